//! Conditional execution of steps.
//!
//! A [`Flow`] is a graph of named nodes (steps, decisions, nested flows and
//! parallel splits) linked by transitions. After a node runs, its exit code is
//! matched against the patterns of the transitions leaving it: `*` matches any
//! run of characters and `?` a single one. When several patterns match, an
//! exact pattern beats a wildcard one, and between wildcard patterns the one
//! with more literal characters wins. When nothing matches, the flow ends with
//! the node's own status: FAILED fails the job, STOPPED stops it, anything else
//! completes it.
//!
//! # Examples
//!
//! ```
//! use batch_engine::core::flow::FlowBuilder;
//! use batch_engine::core::tasklet::{FnTasklet, RepeatStatus};
//! use batch_engine::core::step::StepBuilder;
//!
//! let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
//! let load = StepBuilder::new("load").tasklet(&tasklet).build();
//! let recover = StepBuilder::new("recover").tasklet(&tasklet).build();
//! let report = StepBuilder::new("report").tasklet(&tasklet).build();
//!
//! let flow = FlowBuilder::new("import")
//!     .start_step(&load)
//!     .on("FAILED").to_step(&recover)
//!     .from("load").on("*").to_step(&report)
//!     .build();
//! assert!(flow.is_ok());
//! ```

use std::{collections::BTreeMap, thread};

use glob::Pattern;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::BatchError;

use super::{
    context::{ExecutionContext, promote},
    job::JobExecution,
    listener::StepExecutionListener,
    lock,
    parameters::JobParameters,
    repository::JobRepository,
    step::{BatchStatus, ExitStatus, Step, StepContext, StepExecution, run_step},
};

/// Job context key prefix recording where a stopped flow resumes.
pub const RESTART_KEY_PREFIX: &str = "batch.restart.";

/// Routes a flow on something other than a step's exit status.
pub trait JobExecutionDecider: Sync {
    /// `step_execution` is the last step run by the enclosing flow, if any.
    fn decide(
        &self,
        job_execution: &JobExecution,
        step_execution: Option<&StepExecution>,
    ) -> ExitStatus;
}

/// Decider backed by a closure.
pub struct FnDecider<F> {
    function: F,
}

impl<F> FnDecider<F>
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> ExitStatus + Sync,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> JobExecutionDecider for FnDecider<F>
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> ExitStatus + Sync,
{
    fn decide(
        &self,
        job_execution: &JobExecution,
        step_execution: Option<&StepExecution>,
    ) -> ExitStatus {
        (self.function)(job_execution, step_execution)
    }
}

pub enum FlowNode<'a> {
    Step(&'a dyn Step),
    Decision {
        name: String,
        decider: &'a dyn JobExecutionDecider,
    },
    Flow(&'a Flow<'a>),
    /// Flows run concurrently; the split ends with the worst of their statuses.
    Split {
        name: String,
        flows: Vec<&'a Flow<'a>>,
    },
}

impl<'a> FlowNode<'a> {
    pub fn step(step: &'a dyn Step) -> Self {
        FlowNode::Step(step)
    }

    pub fn decision(name: &str, decider: &'a dyn JobExecutionDecider) -> Self {
        FlowNode::Decision {
            name: name.to_string(),
            decider,
        }
    }

    pub fn flow(flow: &'a Flow<'a>) -> Self {
        FlowNode::Flow(flow)
    }

    pub fn split(name: &str, flows: Vec<&'a Flow<'a>>) -> Self {
        FlowNode::Split {
            name: name.to_string(),
            flows,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FlowNode::Step(step) => step.name(),
            FlowNode::Decision { name, .. } => name,
            FlowNode::Flow(flow) => flow.name(),
            FlowNode::Split { name, .. } => name,
        }
    }

    fn same_as(&self, other: &FlowNode<'_>) -> bool {
        match (self, other) {
            (FlowNode::Step(a), FlowNode::Step(b)) => {
                std::ptr::addr_eq(*a as *const dyn Step, *b as *const dyn Step)
            }
            (FlowNode::Decision { decider: a, .. }, FlowNode::Decision { decider: b, .. }) => {
                std::ptr::addr_eq(
                    *a as *const dyn JobExecutionDecider,
                    *b as *const dyn JobExecutionDecider,
                )
            }
            (FlowNode::Flow(a), FlowNode::Flow(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTarget {
    Node(String),
    End,
    Fail,
    Stop { restart: Option<String> },
}

#[derive(Debug, Clone)]
struct Transition {
    from: String,
    pattern: String,
    matcher: Option<Pattern>,
    /// Only followed when the node completed; used for plain sequencing.
    on_success_only: bool,
    target: TransitionTarget,
}

impl Transition {
    /// A STOPPED node only follows transitions naming its exit code without
    /// wildcards; otherwise the flow stops at the node.
    fn matches(&self, status: &FlowExecutionStatus) -> bool {
        if self.on_success_only && status.status != BatchStatus::Completed {
            return false;
        }
        if status.status == BatchStatus::Stopped && self.matcher.is_some() {
            return false;
        }
        match &self.matcher {
            Some(matcher) => matcher.matches(&status.exit_status.exit_code),
            None => self.pattern == status.exit_status.exit_code,
        }
    }

    /// Ranks matching transitions: exact first, then more literal
    /// characters, then fewer wildcards.
    fn specificity(&self) -> (bool, usize, std::cmp::Reverse<usize>) {
        let wildcards = self
            .pattern
            .chars()
            .filter(|c| *c == '*' || *c == '?')
            .count();
        (
            self.matcher.is_none(),
            self.pattern.chars().count() - wildcards,
            std::cmp::Reverse(wildcards),
        )
    }
}

fn is_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Final status of a flow, or the outcome of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowExecutionStatus {
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
}

impl FlowExecutionStatus {
    pub fn new(status: BatchStatus, exit_status: ExitStatus) -> Self {
        Self {
            status,
            exit_status,
        }
    }

    pub fn completed() -> Self {
        Self::new(BatchStatus::Completed, ExitStatus::completed())
    }

    pub fn failed() -> Self {
        Self::new(BatchStatus::Failed, ExitStatus::failed())
    }

    pub fn stopped() -> Self {
        Self::new(BatchStatus::Stopped, ExitStatus::stopped())
    }

    /// Status of a decision: derived from the exit code the decider returned.
    fn from_exit_status(exit_status: ExitStatus) -> Self {
        let status = if exit_status.exit_code.starts_with(ExitStatus::FAILED) {
            BatchStatus::Failed
        } else if exit_status.exit_code.starts_with(ExitStatus::STOPPED) {
            BatchStatus::Stopped
        } else {
            BatchStatus::Completed
        };
        Self::new(status, exit_status)
    }

    /// The end state reached when no transition matches.
    fn into_end(self) -> Self {
        match self.status {
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped => self,
            _ => Self::new(BatchStatus::Failed, self.exit_status),
        }
    }
}

/// Validated execution graph. Built with [`FlowBuilder`].
pub struct Flow<'a> {
    name: String,
    start: String,
    nodes: BTreeMap<String, FlowNode<'a>>,
    transitions: Vec<Transition>,
}

impl<'a> Flow<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    pub fn node_names(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    /// Every step reachable from this flow, nested flows and splits included.
    pub fn steps(&self) -> Vec<&'a dyn Step> {
        let mut steps = Vec::new();
        for node in self.nodes.values() {
            match node {
                FlowNode::Step(step) => steps.push(*step),
                FlowNode::Flow(flow) => steps.extend(flow.steps()),
                FlowNode::Split { flows, .. } => {
                    for flow in flows {
                        steps.extend(flow.steps());
                    }
                }
                FlowNode::Decision { .. } => {}
            }
        }
        steps
    }

    fn node(&self, name: &str) -> Result<&FlowNode<'a>, BatchError> {
        self.nodes.get(name).ok_or_else(|| {
            BatchError::Definition(format!("flow {} has no node named {}", self.name, name))
        })
    }

    /// The most specific transition leaving `from` that matches `status`.
    pub fn transition_for(
        &self,
        from: &str,
        status: &FlowExecutionStatus,
    ) -> Option<&TransitionTarget> {
        self.transitions
            .iter()
            .filter(|transition| transition.from == from && transition.matches(status))
            .max_by_key(|transition| transition.specificity())
            .map(|transition| &transition.target)
    }

    fn restart_key(&self) -> String {
        format!("{}{}", RESTART_KEY_PREFIX, self.name)
    }
}

pub struct FlowBuilder<'a> {
    name: String,
    start: Option<String>,
    nodes: BTreeMap<String, FlowNode<'a>>,
    transitions: Vec<Transition>,
    current: Option<String>,
    errors: Vec<String>,
}

impl<'a> FlowBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: None,
            nodes: BTreeMap::new(),
            transitions: Vec::new(),
            current: None,
            errors: Vec::new(),
        }
    }

    pub fn start(mut self, node: FlowNode<'a>) -> Self {
        let name = self.register(node);
        if self.start.is_some() {
            self.errors
                .push(format!("flow {} has more than one start", self.name));
        }
        self.start = Some(name.clone());
        self.current = Some(name);
        self
    }

    pub fn start_step(self, step: &'a dyn Step) -> Self {
        self.start(FlowNode::step(step))
    }

    /// Runs `node` after the current one when the current one completes.
    pub fn next(mut self, node: FlowNode<'a>) -> Self {
        let name = self.register(node);
        match self.current.take() {
            Some(from) => self.push_transition(from, "*", true, TransitionTarget::Node(name.clone())),
            None => self.start = Some(name.clone()),
        }
        self.current = Some(name);
        self
    }

    pub fn next_step(self, step: &'a dyn Step) -> Self {
        self.next(FlowNode::step(step))
    }

    /// Selects an already registered node as the source of the next transitions.
    pub fn from(mut self, name: &str) -> Self {
        self.current = Some(name.to_string());
        self
    }

    pub fn on(self, pattern: &str) -> TransitionBuilder<'a> {
        TransitionBuilder {
            parent: self,
            pattern: pattern.to_string(),
        }
    }

    pub fn build(self) -> Result<Flow<'a>, BatchError> {
        let mut errors = self.errors;
        let start = match self.start {
            Some(start) => start,
            None => {
                errors.push(format!("flow {} has no start node", self.name));
                String::new()
            }
        };

        for transition in &self.transitions {
            if !self.nodes.contains_key(&transition.from) {
                errors.push(format!(
                    "transition on {} leaves unknown node {}",
                    transition.pattern, transition.from
                ));
            }
            let target = match &transition.target {
                TransitionTarget::Node(target) => Some(target),
                TransitionTarget::Stop { restart } => restart.as_ref(),
                TransitionTarget::End | TransitionTarget::Fail => None,
            };
            if let Some(target) = target
                && !self.nodes.contains_key(target)
            {
                errors.push(format!(
                    "transition from {} targets unknown node {}",
                    transition.from, target
                ));
            }
        }

        if !errors.is_empty() {
            return Err(BatchError::Definition(errors.join("; ")));
        }

        Ok(Flow {
            name: self.name,
            start,
            nodes: self.nodes,
            transitions: self.transitions,
        })
    }

    fn register(&mut self, node: FlowNode<'a>) -> String {
        let name = node.name().to_string();
        match self.nodes.get(&name) {
            Some(existing) if existing.same_as(&node) => {}
            Some(_) => self
                .errors
                .push(format!("flow {} has two nodes named {}", self.name, name)),
            None => {
                self.nodes.insert(name.clone(), node);
            }
        }
        name
    }

    fn push_transition(
        &mut self,
        from: String,
        pattern: &str,
        on_success_only: bool,
        target: TransitionTarget,
    ) {
        let matcher = if is_wildcard(pattern) {
            match Pattern::new(pattern) {
                Ok(matcher) => Some(matcher),
                Err(err) => {
                    self.errors
                        .push(format!("invalid exit status pattern {}: {}", pattern, err));
                    None
                }
            }
        } else {
            None
        };
        self.transitions.push(Transition {
            from,
            pattern: pattern.to_string(),
            matcher,
            on_success_only,
            target,
        });
    }
}

/// Completes a transition started with [`FlowBuilder::on`].
pub struct TransitionBuilder<'a> {
    parent: FlowBuilder<'a>,
    pattern: String,
}

impl<'a> TransitionBuilder<'a> {
    pub fn to(mut self, node: FlowNode<'a>) -> FlowBuilder<'a> {
        let name = self.parent.register(node);
        self.finish(TransitionTarget::Node(name.clone()));
        self.parent.current = Some(name);
        self.parent
    }

    pub fn to_step(self, step: &'a dyn Step) -> FlowBuilder<'a> {
        self.to(FlowNode::step(step))
    }

    /// Ends the flow as COMPLETED.
    pub fn end(mut self) -> FlowBuilder<'a> {
        self.finish(TransitionTarget::End);
        self.parent
    }

    /// Ends the flow as FAILED.
    pub fn fail(mut self) -> FlowBuilder<'a> {
        self.finish(TransitionTarget::Fail);
        self.parent
    }

    /// Ends the flow as STOPPED; a restart begins again at the start node.
    pub fn stop(mut self) -> FlowBuilder<'a> {
        self.finish(TransitionTarget::Stop { restart: None });
        self.parent
    }

    /// Ends the flow as STOPPED; a restart resumes at `node`.
    pub fn stop_and_restart(mut self, node: FlowNode<'a>) -> FlowBuilder<'a> {
        let name = self.parent.register(node);
        self.finish(TransitionTarget::Stop {
            restart: Some(name),
        });
        self.parent
    }

    fn finish(&mut self, target: TransitionTarget) {
        match self.parent.current.clone() {
            Some(from) => {
                let pattern = self.pattern.clone();
                self.parent.push_transition(from, &pattern, false, target);
            }
            None => self.parent.errors.push(format!(
                "transition on {} has no source node",
                self.pattern
            )),
        }
    }
}

/// Runs flows for one job execution and records their steps in the repository.
pub struct FlowExecutor<'r> {
    repository: &'r dyn JobRepository,
    job_parameters: JobParameters,
    job_execution_id: Uuid,
    job_instance_id: Uuid,
    job_execution: std::sync::Mutex<JobExecution>,
}

impl<'r> FlowExecutor<'r> {
    pub fn new(repository: &'r dyn JobRepository, job_execution: JobExecution) -> Self {
        Self {
            repository,
            job_parameters: job_execution.job_parameters.clone(),
            job_execution_id: job_execution.id,
            job_instance_id: job_execution.job_instance_id,
            job_execution: std::sync::Mutex::new(job_execution),
        }
    }

    pub fn into_job_execution(self) -> JobExecution {
        self.job_execution
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn job_parameters(&self) -> &JobParameters {
        &self.job_parameters
    }

    pub fn job_execution_id(&self) -> Uuid {
        self.job_execution_id
    }

    pub fn job_context(&self) -> ExecutionContext {
        lock(&self.job_execution).execution_context.clone()
    }

    pub fn repository(&self) -> &dyn JobRepository {
        self.repository
    }

    pub fn is_stop_requested(&self) -> bool {
        match self
            .repository
            .get_job_execution_status(self.job_execution_id)
        {
            Ok(status) => status == Some(BatchStatus::Stopping),
            Err(err) => {
                warn!("Unable to read status of job execution {}: {}", self.job_execution_id, err);
                false
            }
        }
    }

    /// Runs `flow` from its start node, or from the node a previous stopped
    /// execution asked to resume at.
    ///
    /// Step failures end the flow with a FAILED status; `Err` is reserved for
    /// definition errors, start limits and repository failures.
    pub fn execute_flow(&self, flow: &Flow<'_>) -> Result<FlowExecutionStatus, BatchError> {
        let mut current = self
            .take_restart_node(flow)
            .unwrap_or_else(|| flow.start.clone());
        let mut last_step: Option<StepExecution> = None;

        debug!("Start of flow: {} at node {}", flow.name, current);

        loop {
            let status = match flow.node(&current)? {
                FlowNode::Step(step) => {
                    let step_execution = self.handle_step(*step)?;
                    let status = FlowExecutionStatus::new(
                        step_execution.status,
                        step_execution.exit_status.clone(),
                    );
                    last_step = Some(step_execution);
                    status
                }
                FlowNode::Decision { name, decider } => {
                    let job_execution = lock(&self.job_execution).clone();
                    let exit_status = decider.decide(&job_execution, last_step.as_ref());
                    info!("Decision {} returned {}", name, exit_status);
                    FlowExecutionStatus::from_exit_status(exit_status)
                }
                FlowNode::Flow(sub_flow) => self.execute_flow(sub_flow)?,
                FlowNode::Split { name, flows } => self.execute_split(name, flows)?,
            };

            match flow.transition_for(&current, &status) {
                Some(TransitionTarget::Node(next)) => {
                    debug!("{} -> {} on {}", current, next, status.exit_status.exit_code);
                    current = next.clone();
                }
                Some(TransitionTarget::End) => return Ok(FlowExecutionStatus::completed()),
                Some(TransitionTarget::Fail) => return Ok(FlowExecutionStatus::failed()),
                Some(TransitionTarget::Stop { restart }) => {
                    if let Some(resume_at) = restart {
                        self.record_restart_node(flow, resume_at)?;
                    }
                    return Ok(FlowExecutionStatus::stopped());
                }
                None => return Ok(status.into_end()),
            }
        }
    }

    fn execute_split(
        &self,
        name: &str,
        flows: &[&Flow<'_>],
    ) -> Result<FlowExecutionStatus, BatchError> {
        info!("Start of split: {} with {} flows", name, flows.len());

        let results: Vec<Result<FlowExecutionStatus, BatchError>> = thread::scope(|scope| {
            let handles: Vec<_> = flows
                .iter()
                .map(|flow| scope.spawn(move || self.execute_flow(flow)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(BatchError::Step(format!("a branch of split {} panicked", name)))
                    })
                })
                .collect()
        });

        let mut aggregate: Option<FlowExecutionStatus> = None;
        for result in results {
            let status = result?;
            aggregate = Some(match aggregate {
                Some(current) if current.status.max(status.status) == current.status => current,
                _ => status,
            });
        }
        Ok(aggregate.unwrap_or_else(FlowExecutionStatus::completed))
    }

    fn handle_step(&self, step: &dyn Step) -> Result<StepExecution, BatchError> {
        let name = step.name();
        let last = self
            .repository
            .get_last_step_execution(self.job_instance_id, name)?;

        if let Some(last) = &last
            && last.status == BatchStatus::Completed
            && !step.allow_start_if_complete()
        {
            info!("Step already complete or not restartable, so no action to execute: {}", name);
            return Ok(last.clone());
        }

        let start_count = self
            .repository
            .get_step_execution_count(self.job_instance_id, name)?;
        if start_count >= step.start_limit() {
            return Err(BatchError::StartLimitExceeded {
                step: name.to_string(),
                limit: step.start_limit(),
            });
        }

        let mut step_execution = StepExecution::new(name, self.job_execution_id);
        if let Some(last) = last
            && last.status != BatchStatus::Completed
        {
            debug!("Restoring context of step {} from execution {}", name, last.id);
            step_execution.execution_context = last.execution_context;
        }
        self.repository.add_step_execution(&step_execution)?;

        let context = StepContext::new(self);
        if let Err(err) = step.execute(&mut step_execution, &context) {
            debug!("Step {} ended with error: {}", name, err);
        }

        self.repository.update_step_execution(&step_execution)?;

        let mut job_execution = lock(&self.job_execution);
        if step_execution.status == BatchStatus::Completed {
            let promoted = promote(
                &step_execution.execution_context,
                &mut job_execution.execution_context,
                &step
                    .promotion_keys()
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>(),
            );
            if promoted > 0 {
                debug!("Promoted {} keys of step {} to the job context", promoted, name);
            }
        }
        job_execution.step_executions.push(step_execution.clone());
        self.repository.update_job_execution(&job_execution)?;

        Ok(step_execution)
    }

    fn take_restart_node(&self, flow: &Flow<'_>) -> Option<String> {
        let mut job_execution = lock(&self.job_execution);
        let node = job_execution
            .execution_context
            .get_string(&flow.restart_key())?;
        job_execution.execution_context.remove(&flow.restart_key());
        if flow.nodes.contains_key(&node) {
            info!("Restarting flow {} at node {}", flow.name, node);
            Some(node)
        } else {
            error!("Ignoring unknown restart node {} of flow {}", node, flow.name);
            None
        }
    }

    fn record_restart_node(&self, flow: &Flow<'_>, node: &str) -> Result<(), BatchError> {
        let mut job_execution = lock(&self.job_execution);
        job_execution
            .execution_context
            .put_string(&flow.restart_key(), node);
        self.repository.update_job_execution(&job_execution)
    }
}

/// Runs a whole flow as a single step of an enclosing job.
pub struct FlowStep<'a> {
    name: String,
    flow: &'a Flow<'a>,
    listeners: Vec<&'a dyn StepExecutionListener>,
}

impl<'a> FlowStep<'a> {
    pub fn new(name: &str, flow: &'a Flow<'a>) -> Self {
        Self {
            name: name.to_string(),
            flow,
            listeners: Vec::new(),
        }
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl Step for FlowStep<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        run_step(&self.listeners, step_execution, |step_execution| {
            let status = context.execute_flow(self.flow)?;
            step_execution.exit_status = status.exit_status.clone();
            match status.status {
                BatchStatus::Completed => Ok(()),
                BatchStatus::Stopped => Err(BatchError::Interrupted(format!(
                    "flow {} stopped",
                    self.flow.name()
                ))),
                _ => Err(BatchError::Step(self.flow.name().to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tasklet::{FnTasklet, RepeatStatus};
    use crate::core::step::StepBuilder;

    fn status(code: &str) -> FlowExecutionStatus {
        FlowExecutionStatus::new(BatchStatus::Completed, ExitStatus::new(code))
    }

    #[test]
    fn exact_pattern_beats_wildcards() -> Result<(), BatchError> {
        let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
        let a = StepBuilder::new("a").tasklet(&tasklet).build();
        let b = StepBuilder::new("b").tasklet(&tasklet).build();
        let c = StepBuilder::new("c").tasklet(&tasklet).build();
        let d = StepBuilder::new("d").tasklet(&tasklet).build();

        let flow = FlowBuilder::new("routing")
            .start_step(&a)
            .on("*")
            .to_step(&b)
            .from("a")
            .on("COMPLETED*")
            .to_step(&c)
            .from("a")
            .on("COMPLETED WITH SKIPS")
            .to_step(&d)
            .build()?;

        assert_eq!(
            flow.transition_for("a", &status("COMPLETED WITH SKIPS")),
            Some(&TransitionTarget::Node("d".to_string()))
        );
        assert_eq!(
            flow.transition_for("a", &status("COMPLETED")),
            Some(&TransitionTarget::Node("c".to_string()))
        );
        assert_eq!(
            flow.transition_for("a", &status("NOOP")),
            Some(&TransitionTarget::Node("b".to_string()))
        );
        Ok(())
    }

    #[test]
    fn sequencing_is_not_followed_after_failure() -> Result<(), BatchError> {
        let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
        let a = StepBuilder::new("a").tasklet(&tasklet).build();
        let b = StepBuilder::new("b").tasklet(&tasklet).build();

        let flow = FlowBuilder::new("linear").start_step(&a).next_step(&b).build()?;

        let failed = FlowExecutionStatus::new(BatchStatus::Failed, ExitStatus::failed());
        assert_eq!(flow.transition_for("a", &failed), None);
        assert_eq!(
            flow.transition_for("a", &status("ANYTHING")),
            Some(&TransitionTarget::Node("b".to_string()))
        );
        Ok(())
    }

    #[test]
    fn build_rejects_unknown_nodes() {
        let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
        let a = StepBuilder::new("a").tasklet(&tasklet).build();

        let result = FlowBuilder::new("broken")
            .start_step(&a)
            .from("missing")
            .on("*")
            .end()
            .build();
        assert!(matches!(result, Err(BatchError::Definition(_))));

        assert!(FlowBuilder::new("empty").build().is_err());
    }

    #[test]
    fn build_rejects_two_steps_with_the_same_name() {
        let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
        let first = StepBuilder::new("same").tasklet(&tasklet).build();
        let second = StepBuilder::new("same").tasklet(&tasklet).build();

        let result = FlowBuilder::new("dup")
            .start_step(&first)
            .next_step(&second)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn decision_status_follows_exit_code() {
        assert_eq!(
            FlowExecutionStatus::from_exit_status(ExitStatus::new("FAILED")).status,
            BatchStatus::Failed
        );
        assert_eq!(
            FlowExecutionStatus::from_exit_status(ExitStatus::new("ODD")).status,
            BatchStatus::Completed
        );
    }
}
