use crate::BatchError;

use super::{
    listener::StepExecutionListener,
    step::{Step, StepContext, StepExecution, check_interrupted, run_step},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet wants to be called again.
    Continuable,
    /// The tasklet has finished executing.
    Finished,
}

/// A single unit of work run in a loop until it reports [`RepeatStatus::Finished`].
///
/// Each call is committed on its own: counters and the step context are saved
/// to the repository after every call, and a stop request is honoured between
/// two calls.
pub trait Tasklet: Sync {
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<RepeatStatus, BatchError>;
}

/// Tasklet backed by a closure.
///
/// ```
/// use batch_engine::core::tasklet::{FnTasklet, RepeatStatus};
///
/// let tasklet = FnTasklet::new(|step_execution, _context| {
///     step_execution.execution_context.put_bool("cleaned", true);
///     Ok(RepeatStatus::Finished)
/// });
/// # let _ = tasklet;
/// ```
pub struct FnTasklet<F> {
    function: F,
}

impl<F> FnTasklet<F>
where
    F: Fn(&mut StepExecution, &StepContext<'_>) -> Result<RepeatStatus, BatchError> + Sync,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> Tasklet for FnTasklet<F>
where
    F: Fn(&mut StepExecution, &StepContext<'_>) -> Result<RepeatStatus, BatchError> + Sync,
{
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        (self.function)(step_execution, context)
    }
}

pub struct TaskletStep<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    listeners: Vec<&'a dyn StepExecutionListener>,
    allow_start_if_complete: bool,
    start_limit: usize,
    promotion_keys: Vec<String>,
}

impl Step for TaskletStep<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        run_step(&self.listeners, step_execution, |step_execution| {
            loop {
                check_interrupted(step_execution, context)?;

                let status = self.tasklet.execute(step_execution, context)?;
                step_execution.commit_count += 1;
                context.repository().update_step_execution(step_execution)?;

                if status == RepeatStatus::Finished {
                    return Ok(());
                }
            }
        })
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn start_limit(&self) -> usize {
        self.start_limit
    }

    fn promotion_keys(&self) -> &[String] {
        &self.promotion_keys
    }
}

pub struct TaskletStepBuilder<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    listeners: Vec<&'a dyn StepExecutionListener>,
    allow_start_if_complete: bool,
    start_limit: usize,
    promotion_keys: Vec<String>,
}

impl<'a> TaskletStepBuilder<'a> {
    pub fn new(name: &str, tasklet: &'a dyn Tasklet) -> Self {
        Self {
            name: name.to_string(),
            tasklet,
            listeners: Vec::new(),
            allow_start_if_complete: false,
            start_limit: usize::MAX,
            promotion_keys: Vec::new(),
        }
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn start_limit(mut self, start_limit: usize) -> Self {
        self.start_limit = start_limit;
        self
    }

    pub fn promote_keys(mut self, keys: &[&str]) -> Self {
        self.promotion_keys = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn build(self) -> TaskletStep<'a> {
        TaskletStep {
            name: self.name,
            tasklet: self.tasklet,
            listeners: self.listeners,
            allow_start_if_complete: self.allow_start_if_complete,
            start_limit: self.start_limit,
            promotion_keys: self.promotion_keys,
        }
    }
}
