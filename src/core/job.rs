use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    context::ExecutionContext,
    flow::{Flow, FlowBuilder, FlowExecutor, FlowNode},
    listener::JobExecutionListener,
    parameters::{JobParameters, JobParametersIncrementer, JobParametersValidator},
    repository::JobRepository,
    step::{BatchStatus, ExitStatus, Step, StepExecution},
};

/// A job together with the identifying parameters of one logical run.
///
/// An instance is created the first time a job is launched with a given set of
/// identifying parameters. Every launch with the same parameters afterwards is
/// a new [`JobExecution`] of the same instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    /// Unique identifier for this job instance
    pub id: Uuid,
    /// Name of the job this instance belongs to
    pub job_name: String,
    /// Hash of the identifying parameters
    pub job_key: String,
}

impl JobInstance {
    pub fn new(job_name: &str, job_key: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            job_key: job_key.to_string(),
        }
    }
}

/// Represents one attempt at running a job instance.
///
/// A `JobExecution` records:
/// - The parameters it was launched with
/// - Its status and exit status
/// - When it was created, started and ended
/// - The job execution context shared by its steps
/// - The step executions it ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_instance_id: Uuid,
    pub job_name: String,
    pub job_parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    /// Step executions run by this job execution, in the order they ended.
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
    pub failures: Vec<String>,
}

impl JobExecution {
    pub fn new(instance: &JobInstance, job_parameters: &JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_instance_id: instance.id,
            job_name: instance.job_name.clone(),
            job_parameters: job_parameters.clone(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().rev().find(|step| step.name == name)
    }

    /// The last step of this execution that did not complete.
    pub fn failed_step(&self) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|step| step.status.is_unsuccessful())
    }

    /// Human readable account of the execution and of every step it ran.
    ///
    /// For a failed execution the summary names the failing step and the number
    /// of chunks it committed before failing, which is where a restart resumes.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "JobExecution: id={}, job={}, status={}, exitStatus={}, parameters={}",
            self.id, self.job_name, self.status, self.exit_status, self.job_parameters
        )];
        for step in &self.step_executions {
            lines.push(format!("  {}", step.summary()));
        }
        if let Some(step) = self.failed_step() {
            lines.push(format!(
                "  Failed step: {} after {} committed chunks ({} items written)",
                step.name, step.commit_count, step.write_count
            ));
        }
        for failure in &self.failures {
            lines.push(format!("  Failure: {}", failure));
        }
        lines.join("\n")
    }
}

/// Represents a job that can be executed.
///
/// A job is a flow of steps plus the rules deciding when it may be launched:
/// whether it can be restarted, how its parameters are validated and how the
/// parameters of the next instance are derived.
///
/// # Implementation Note
///
/// `execute` must always hand back the execution it was given, with its final
/// status set and saved in the repository. Failures are reported through the
/// status, never as a panic.
pub trait Job: Sync {
    fn name(&self) -> &str;

    fn is_restartable(&self) -> bool {
        true
    }

    fn validate(&self, _parameters: &JobParameters) -> Result<(), BatchError> {
        Ok(())
    }

    fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        None
    }

    /// Whether a COMPLETED instance of this job may be launched again.
    fn allows_start_after_complete(&self) -> bool {
        false
    }

    /// Runs the job.
    ///
    /// # Parameters
    /// - `execution`: A new execution created by the repository
    /// - `repository`: Where progress is recorded
    ///
    /// # Returns
    /// The same execution in its final state
    fn execute(&self, execution: JobExecution, repository: &dyn JobRepository) -> JobExecution;
}

/// A job whose steps are organised as a [`Flow`].
pub struct FlowJob<'a> {
    name: String,
    flow: Flow<'a>,
    restartable: bool,
    validator: Option<&'a dyn JobParametersValidator>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    listeners: Vec<&'a dyn JobExecutionListener>,
}

impl<'a> FlowJob<'a> {
    pub fn steps(&self) -> Vec<&'a dyn Step> {
        self.flow.steps()
    }
}

impl Job for FlowJob<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        match self.validator {
            Some(validator) => validator.validate(parameters),
            None => Ok(()),
        }
    }

    fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer
    }

    fn allows_start_after_complete(&self) -> bool {
        self.steps()
            .iter()
            .any(|step| step.allow_start_if_complete())
    }

    fn execute(&self, execution: JobExecution, repository: &dyn JobRepository) -> JobExecution {
        let start = Instant::now();
        let mut execution = execution;
        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());
        execution.last_updated = execution.start_time;
        if let Err(err) = repository.update_job_execution(&execution) {
            error!("Unable to record start of job {}: {}", self.name, err);
        }

        info!("Start of job: {}, id: {}", self.name, execution.id);

        for listener in &self.listeners {
            listener.before_job(&execution);
        }

        let executor = FlowExecutor::new(repository, execution);
        let outcome = executor.execute_flow(&self.flow);
        let mut execution = executor.into_job_execution();

        match outcome {
            Ok(status) => {
                execution.status = status.status;
                execution.exit_status = status.exit_status;
            }
            Err(err) => {
                error!("Job {} failed: {}", self.name, err);
                execution.status = BatchStatus::Failed;
                execution.exit_status = ExitStatus::failed().with_description(&err.to_string());
                execution.failures.push(err.to_string());
            }
        }
        if execution.status == BatchStatus::Stopped && execution.exit_status.exit_code == ExitStatus::COMPLETED {
            execution.exit_status = ExitStatus::stopped();
        }

        execution.end_time = Some(Utc::now());
        execution.last_updated = execution.end_time;

        for listener in &self.listeners {
            if let Some(exit_status) = listener.after_job(&execution) {
                execution.exit_status = exit_status;
            }
        }

        if let Err(err) = repository.update_job_execution(&execution) {
            error!("Unable to record end of job {}: {}", self.name, err);
            execution.failures.push(err.to_string());
        }

        info!(
            "End of job: {}, id: {}, status: {}, duration: {:?}",
            self.name,
            execution.id,
            execution.status,
            start.elapsed()
        );
        if execution.status == BatchStatus::Completed {
            info!("{}", execution.summary());
        } else {
            warn!("{}", execution.summary());
        }

        execution
    }
}

/// Builder for creating a [`FlowJob`].
///
/// Steps given to `start` and `next` run one after the other, each one only
/// when the previous completed. A job needing conditional transitions is given
/// a complete [`Flow`] instead.
///
/// # Example
///
/// ```
/// use batch_engine::core::job::JobBuilder;
/// use batch_engine::core::step::StepBuilder;
/// use batch_engine::core::tasklet::{FnTasklet, RepeatStatus};
///
/// let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
/// let extract = StepBuilder::new("extract").tasklet(&tasklet).build();
/// let load = StepBuilder::new("load").tasklet(&tasklet).build();
///
/// let job = JobBuilder::new()
///     .name("import-customers")
///     .start(&extract)
///     .next(&load)
///     .build();
/// assert!(job.is_ok());
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    /// Steps run in sequence
    steps: Vec<&'a dyn Step>,
    flow: Option<Flow<'a>>,
    prevent_restart: bool,
    validator: Option<&'a dyn JobParametersValidator>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    listeners: Vec<&'a dyn JobExecutionListener>,
}

impl<'a> JobBuilder<'a> {
    /// Creates a new `JobBuilder` instance.
    ///
    /// # Returns
    /// A new `JobBuilder` instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the job.
    ///
    /// # Parameters
    /// - `name`: The name to assign to the job
    ///
    /// # Returns
    /// The builder instance for method chaining
    pub fn name(mut self, name: &str) -> JobBuilder<'a> {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    ///
    /// This method is semantically identical to `next()` but provides better readability
    /// when constructing the initial step of a job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step run when the previous one completes.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Uses `flow` as the job's execution graph. Cannot be combined with `start`.
    pub fn flow(mut self, flow: Flow<'a>) -> JobBuilder<'a> {
        self.flow = Some(flow);
        self
    }

    pub fn validator(mut self, validator: &'a dyn JobParametersValidator) -> JobBuilder<'a> {
        self.validator = Some(validator);
        self
    }

    pub fn incrementer(mut self, incrementer: &'a dyn JobParametersIncrementer) -> JobBuilder<'a> {
        self.incrementer = Some(incrementer);
        self
    }

    pub fn listener(mut self, listener: &'a dyn JobExecutionListener) -> JobBuilder<'a> {
        self.listeners.push(listener);
        self
    }

    /// Refuses any launch of an instance that already has an execution.
    pub fn prevent_restart(mut self) -> JobBuilder<'a> {
        self.prevent_restart = true;
        self
    }

    /// Builds the job.
    ///
    /// If no name has been provided, a random name is generated.
    ///
    /// # Returns
    /// - `Ok(FlowJob)` ready to be launched
    /// - `Err(BatchError::Definition)` when the job has no step, has both steps
    ///   and a flow, or its flow is invalid
    pub fn build(self) -> Result<FlowJob<'a>, BatchError> {
        let name = self.name.unwrap_or_else(build_name);

        let flow = match (self.flow, self.steps.is_empty()) {
            (Some(_), false) => {
                return Err(BatchError::Definition(format!(
                    "job {} has both a flow and a list of steps",
                    name
                )));
            }
            (Some(flow), true) => flow,
            (None, _) => self
                .steps
                .into_iter()
                .fold(FlowBuilder::new(&name), |builder, step| {
                    builder.next(FlowNode::step(step))
                })
                .build()?,
        };

        Ok(FlowJob {
            name,
            flow,
            restartable: !self.prevent_restart,
            validator: self.validator,
            incrementer: self.incrementer,
            listeners: self.listeners,
        })
    }
}
