use std::{fmt, time::Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BatchError, FailureKind};

use super::{
    build_name,
    chunk::{Chunk, ChunkStatus},
    completion::{CompletionPolicy, SimpleCompletionPolicy},
    context::ExecutionContext,
    fault::{ClassifierFaultPolicy, FaultDecision, FaultPolicy},
    flow::{Flow, FlowExecutionStatus, FlowExecutor},
    item::{ItemProcessor, ItemReader, ItemWriter, PassThroughProcessor},
    listener::{ChunkListener, ItemReadListener, StepExecutionListener},
    parameters::JobParameters,
    repository::JobRepository,
    tasklet::{Tasklet, TaskletStepBuilder},
};

/// Lifecycle status shared by job and step executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    Completed,
    Abandoned,
    Unknown,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    pub fn is_unsuccessful(&self) -> bool {
        matches!(
            self,
            BatchStatus::Failed
                | BatchStatus::Stopped
                | BatchStatus::Abandoned
                | BatchStatus::Unknown
        )
    }

    fn severity(&self) -> u8 {
        match self {
            BatchStatus::Completed => 0,
            BatchStatus::Starting => 1,
            BatchStatus::Started => 2,
            BatchStatus::Stopping => 3,
            BatchStatus::Stopped => 4,
            BatchStatus::Failed => 5,
            BatchStatus::Abandoned => 6,
            BatchStatus::Unknown => 7,
        }
    }

    /// The worse of two statuses, used to aggregate parallel branches.
    pub fn max(self, other: BatchStatus) -> BatchStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Exit code of an execution, the value flow transitions are matched against.
///
/// Codes are free-form strings: a tasklet or a listener may report
/// `"COMPLETED WITH SKIPS"` and route the flow on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const NOOP: &'static str = "NOOP";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(exit_code: &str) -> Self {
        Self {
            exit_code: exit_code.to_string(),
            exit_description: String::new(),
        }
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.exit_description = description.to_string();
        self
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING
    }

    /// Default exit status reported for a final batch status.
    pub fn from_status(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => Self::completed(),
            BatchStatus::Failed => Self::failed(),
            BatchStatus::Stopped => Self::stopped(),
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping => {
                Self::executing()
            }
            BatchStatus::Abandoned | BatchStatus::Unknown => Self::unknown(),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exit_description.is_empty() {
            f.write_str(&self.exit_code)
        } else {
            write!(f, "{} ({})", self.exit_code, self.exit_description)
        }
    }
}

/// Record of one attempt at running a step.
///
/// Every counter is checkpointed with the step's [`ExecutionContext`] at each
/// chunk commit, so after a failure the repository holds exactly the work that
/// was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub job_execution_id: Uuid,
    pub name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub read_count: usize,
    pub write_count: usize,
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    pub execution_context: ExecutionContext,
    /// Set by a listener to stop the step at the next chunk boundary.
    pub terminate_only: bool,
    pub failures: Vec<String>,
}

impl StepExecution {
    pub fn new(name: &str, job_execution_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_execution_id,
            name: name.to_string(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            start_time: None,
            end_time: None,
            last_updated: None,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            execution_context: ExecutionContext::new(),
            terminate_only: false,
            failures: Vec::new(),
        }
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    pub fn set_terminate_only(&mut self) {
        self.terminate_only = true;
    }

    /// One-line account of the execution, used in job summaries.
    pub fn summary(&self) -> String {
        format!(
            "StepExecution: name={}, status={}, exitStatus={}, readCount={}, filterCount={}, writeCount={}, readSkipCount={}, processSkipCount={}, writeSkipCount={}, commitCount={}, rollbackCount={}",
            self.name,
            self.status,
            self.exit_status,
            self.read_count,
            self.filter_count,
            self.write_count,
            self.read_skip_count,
            self.process_skip_count,
            self.write_skip_count,
            self.commit_count,
            self.rollback_count
        )
    }
}

/// Unit of work in a job.
pub trait Step: Sync {
    fn name(&self) -> &str;

    /// Runs the step, recording status, counters and checkpoints in
    /// `step_execution`. An `Err` means the step ended FAILED or STOPPED; the
    /// execution already carries the final status when this returns.
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError>;

    /// Whether a COMPLETED step runs again when its job instance is restarted.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Maximum number of executions of this step within one job instance.
    fn start_limit(&self) -> usize {
        usize::MAX
    }

    /// Step context keys copied into the job context once the step completes.
    fn promotion_keys(&self) -> &[String] {
        &[]
    }
}

/// What a running step can see of the job it belongs to.
pub struct StepContext<'e> {
    executor: &'e FlowExecutor<'e>,
}

impl<'e> StepContext<'e> {
    pub(crate) fn new(executor: &'e FlowExecutor<'e>) -> Self {
        Self { executor }
    }

    pub fn job_parameters(&self) -> &JobParameters {
        self.executor.job_parameters()
    }

    pub fn job_execution_id(&self) -> Uuid {
        self.executor.job_execution_id()
    }

    /// Snapshot of the job execution context.
    pub fn job_context(&self) -> ExecutionContext {
        self.executor.job_context()
    }

    pub fn repository(&self) -> &dyn JobRepository {
        self.executor.repository()
    }

    /// True once an operator asked the job execution to stop.
    pub fn is_stop_requested(&self) -> bool {
        self.executor.is_stop_requested()
    }

    pub(crate) fn execute_flow(&self, flow: &Flow<'_>) -> Result<FlowExecutionStatus, BatchError> {
        self.executor.execute_flow(flow)
    }
}

/// Fails with [`BatchError::Interrupted`] when the step should stop at this boundary.
pub(crate) fn check_interrupted(
    step_execution: &StepExecution,
    context: &StepContext<'_>,
) -> Result<(), BatchError> {
    if step_execution.terminate_only {
        return Err(BatchError::Interrupted(format!(
            "step {} was asked to terminate",
            step_execution.name
        )));
    }
    if context.is_stop_requested() {
        return Err(BatchError::Interrupted(format!(
            "job execution {} is stopping",
            context.job_execution_id()
        )));
    }
    Ok(())
}

/// Status bookkeeping and listener calls common to every step type.
pub(crate) fn run_step<F>(
    listeners: &[&dyn StepExecutionListener],
    step_execution: &mut StepExecution,
    body: F,
) -> Result<(), BatchError>
where
    F: FnOnce(&mut StepExecution) -> Result<(), BatchError>,
{
    let start = Instant::now();
    step_execution.status = BatchStatus::Started;
    step_execution.start_time = Some(Utc::now());
    step_execution.exit_status = ExitStatus::executing();

    info!(
        "Start of step: {}, id: {}",
        step_execution.name, step_execution.id
    );

    for listener in listeners {
        listener.before_step(step_execution);
    }

    let result = body(step_execution);

    match &result {
        Ok(()) if step_execution.terminate_only => {
            step_execution.status = BatchStatus::Stopped;
            step_execution.exit_status = ExitStatus::stopped();
        }
        Ok(()) => {
            step_execution.status = BatchStatus::Completed;
            if step_execution.exit_status.is_running() {
                step_execution.exit_status = ExitStatus::completed();
            }
        }
        Err(BatchError::Interrupted(reason)) => {
            warn!("Step {} stopped: {}", step_execution.name, reason);
            step_execution.status = BatchStatus::Stopped;
            step_execution.exit_status = ExitStatus::stopped().with_description(reason);
        }
        Err(err) => {
            error!("Step {} failed: {}", step_execution.name, err);
            step_execution.status = BatchStatus::Failed;
            step_execution.exit_status = ExitStatus::failed().with_description(&err.to_string());
            step_execution.failures.push(err.to_string());
        }
    }

    step_execution.end_time = Some(Utc::now());
    step_execution.last_updated = step_execution.end_time;

    for listener in listeners {
        if let Some(exit_status) = listener.after_step(step_execution) {
            step_execution.exit_status = exit_status;
        }
    }

    info!(
        "End of step: {}, id: {}, status: {}, duration: {:?}",
        step_execution.name,
        step_execution.id,
        step_execution.status,
        start.elapsed()
    );

    result
}

/// Step context key counting the items of the current chunk already written or
/// skipped one by one.
const SCAN_PROGRESS_KEY: &str = "batch.chunk.scanned";

enum ReadOutcome<I> {
    Item(I),
    Skipped,
    End,
}

enum ProcessOutcome<O> {
    Item(O),
    Filtered,
    Skipped,
}

/// Reads, processes and writes items in chunks, committing after each one.
///
/// At every commit the writer stages the chunk and flushes it; only then do the
/// reader and writer record their position in the step's context and the step
/// execution is saved. The repository never claims output that was not
/// flushed. A failure between the flush and the save replays the chunk on
/// restart.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    reader: &'a dyn ItemReader<I>,
    processor: &'a dyn ItemProcessor<I, O>,
    writer: &'a dyn ItemWriter<O>,
    completion_policy: Box<dyn CompletionPolicy + 'a>,
    fault_policy: Box<dyn FaultPolicy + 'a>,
    skip_limit: usize,
    retry_limit: usize,
    allow_start_if_complete: bool,
    start_limit: usize,
    promotion_keys: Vec<String>,
    step_listeners: Vec<&'a dyn StepExecutionListener>,
    chunk_listeners: Vec<&'a dyn ChunkListener>,
    read_listeners: Vec<&'a dyn ItemReadListener<I>>,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        run_step(&self.step_listeners, step_execution, |step_execution| {
            self.reader.open(&step_execution.execution_context)?;
            if let Err(err) = self.writer.open(&step_execution.execution_context) {
                Self::manage_error(self.reader.close());
                return Err(err);
            }

            let result = self.process_chunks(step_execution, context);

            Self::manage_error(self.reader.close());
            Self::manage_error(self.writer.close());

            result
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

impl<I, O> ChunkOrientedStep<'_, I, O> {
    fn process_chunks(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        loop {
            check_interrupted(step_execution, context)?;

            for listener in &self.chunk_listeners {
                listener.before_chunk(step_execution);
            }

            let outcome = self
                .read_chunk(step_execution)
                .and_then(|chunk| {
                    if !chunk.is_empty() {
                        self.commit_chunk(step_execution, &chunk, context)?;
                    }
                    Ok(chunk.get_status())
                });

            match outcome {
                Ok(status) => {
                    for listener in &self.chunk_listeners {
                        listener.after_chunk(step_execution);
                    }
                    if status == ChunkStatus::Finished {
                        debug!("End of input for step {}", self.name);
                        return Ok(());
                    }
                }
                Err(err) => {
                    for listener in &self.chunk_listeners {
                        listener.after_chunk_error(step_execution, &err);
                    }
                    return Err(err);
                }
            }
        }
    }

    fn read_chunk(&self, step_execution: &mut StepExecution) -> Result<Chunk<O>, BatchError> {
        debug!("Start reading chunk");
        let mut repeat = self.completion_policy.start();
        let mut chunk = Chunk::new(repeat.target().unwrap_or(0));

        loop {
            // Every chunk consumes at least one input, even under a policy that
            // is complete from the start.
            if !chunk.is_empty() && self.completion_policy.is_complete(&repeat) {
                chunk.set_status(ChunkStatus::Full);
                debug!("End reading chunk: FULL");
                return Ok(chunk);
            }

            match self.read_item(step_execution)? {
                ReadOutcome::Item(item) => {
                    self.completion_policy.update(&mut repeat);
                    match self.process_item(step_execution, &item)? {
                        ProcessOutcome::Item(output) => chunk.add_item(output),
                        ProcessOutcome::Filtered => {
                            step_execution.filter_count += 1;
                            chunk.add_consumed();
                        }
                        ProcessOutcome::Skipped => chunk.add_consumed(),
                    }
                }
                ReadOutcome::Skipped => chunk.add_consumed(),
                ReadOutcome::End => {
                    chunk.set_status(ChunkStatus::Finished);
                    debug!("End reading chunk: FINISHED");
                    return Ok(chunk);
                }
            }
        }
    }

    fn read_item(&self, step_execution: &mut StepExecution) -> Result<ReadOutcome<I>, BatchError> {
        let mut attempts = 0;
        loop {
            for listener in &self.read_listeners {
                listener.before_read();
            }

            match self.reader.read() {
                Ok(Some(item)) => {
                    step_execution.read_count += 1;
                    for listener in &self.read_listeners {
                        listener.after_read(&item);
                    }
                    return Ok(ReadOutcome::Item(item));
                }
                Ok(None) => return Ok(ReadOutcome::End),
                Err(err) => {
                    for listener in &self.read_listeners {
                        listener.on_read_error(&err);
                    }
                    match self.classify(&err, step_execution) {
                        FaultDecision::Skip => {
                            self.check_skip_limit(&err, step_execution)?;
                            warn!("Skipping item on read: {}", err);
                            step_execution.read_skip_count += 1;
                            return Ok(ReadOutcome::Skipped);
                        }
                        // Only a transient error leaves the record in place; any
                        // other failed record is already consumed.
                        FaultDecision::Retry if err.kind() != FailureKind::Transient => {
                            self.check_skip_limit(&err, step_execution)?;
                            warn!("Skipping consumed record instead of retrying: {}", err);
                            step_execution.read_skip_count += 1;
                            return Ok(ReadOutcome::Skipped);
                        }
                        FaultDecision::Retry => {
                            attempts += 1;
                            self.check_retry_limit(attempts, &err)?;
                            warn!("Retrying read, attempt {}: {}", attempts, err);
                        }
                        FaultDecision::Fail => return Err(err),
                    }
                }
            }
        }
    }

    fn process_item(
        &self,
        step_execution: &mut StepExecution,
        item: &I,
    ) -> Result<ProcessOutcome<O>, BatchError> {
        let mut attempts = 0;
        loop {
            match self.processor.process(item) {
                Ok(Some(output)) => return Ok(ProcessOutcome::Item(output)),
                Ok(None) => return Ok(ProcessOutcome::Filtered),
                Err(err) => match self.classify(&err, step_execution) {
                    FaultDecision::Skip => {
                        self.check_skip_limit(&err, step_execution)?;
                        warn!("Skipping item on process: {}", err);
                        step_execution.process_skip_count += 1;
                        return Ok(ProcessOutcome::Skipped);
                    }
                    FaultDecision::Retry => {
                        attempts += 1;
                        self.check_retry_limit(attempts, &err)?;
                        warn!("Retrying process, attempt {}: {}", attempts, err);
                    }
                    FaultDecision::Fail => return Err(err),
                },
            }
        }
    }

    fn commit_chunk(
        &self,
        step_execution: &mut StepExecution,
        chunk: &Chunk<O>,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        let scanned = step_execution
            .execution_context
            .get_usize(SCAN_PROGRESS_KEY)
            .unwrap_or(0)
            .min(chunk.get_items().len());
        if scanned > 0 {
            info!(
                "Resuming chunk of step {} after {} items already handled",
                self.name, scanned
            );
        }
        let items = &chunk.get_items()[scanned..];

        let mut attempts = 0;
        loop {
            match self.write_chunk(items) {
                Ok(()) => break,
                Err(err) => {
                    step_execution.rollback_count += 1;
                    warn!("Chunk rolled back in step {}: {}", self.name, err);
                    match self.classify(&err, step_execution) {
                        FaultDecision::Retry => {
                            attempts += 1;
                            self.check_retry_limit(attempts, &err)?;
                        }
                        FaultDecision::Skip => {
                            return self.scan_chunk(step_execution, items, scanned, context);
                        }
                        FaultDecision::Fail => return Err(err),
                    }
                }
            }
        }

        step_execution.write_count += items.len();
        self.save_checkpoint(step_execution, context)
    }

    /// Writes `items` and makes them durable, or rolls the writer back.
    fn write_chunk(&self, items: &[O]) -> Result<(), BatchError> {
        debug!("Start writing chunk");
        let staged = if items.is_empty() {
            Ok(())
        } else {
            self.writer.write(items)
        };
        let result = staged.and_then(|()| self.writer.flush());
        if result.is_err() {
            self.writer.rollback();
        }
        result
    }

    /// Moves the checkpoint past the chunk the writer just flushed.
    fn save_checkpoint(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        step_execution.commit_count += 1;
        step_execution.execution_context.remove(SCAN_PROGRESS_KEY);
        self.reader.update(&mut step_execution.execution_context)?;
        self.writer.update(&mut step_execution.execution_context)?;
        self.persist(step_execution, context)?;
        debug!(
            "End writing chunk, commit {} of step {}",
            step_execution.commit_count, self.name
        );
        Ok(())
    }

    /// Saves the step execution, retrying the repository as the fault policy allows.
    ///
    /// Output is already flushed when this runs. If the save is lost, a restart
    /// replays the chunk from the previous checkpoint, and writers that truncate
    /// to their saved position drop the replayed output first.
    fn persist(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        step_execution.last_updated = Some(Utc::now());
        let mut attempts = 0;
        loop {
            match context.repository().update_step_execution(step_execution) {
                Ok(()) => return Ok(()),
                Err(err) => match self.classify(&err, step_execution) {
                    FaultDecision::Retry => {
                        attempts += 1;
                        self.check_retry_limit(attempts, &err)?;
                        warn!(
                            "Retrying checkpoint of step {}, attempt {}: {}",
                            self.name, attempts, err
                        );
                    }
                    FaultDecision::Skip | FaultDecision::Fail => return Err(err),
                },
            }
        }
    }

    /// Writes items one at a time to isolate the ones the writer rejects.
    ///
    /// Progress through the chunk is saved after every item, so a restart
    /// neither writes an item twice nor skips it again.
    fn scan_chunk(
        &self,
        step_execution: &mut StepExecution,
        items: &[O],
        scanned: usize,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        warn!(
            "Scanning chunk of {} items in step {}",
            items.len(),
            self.name
        );

        for (index, item) in items.iter().enumerate() {
            let mut attempts = 0;
            loop {
                match self.write_chunk(std::slice::from_ref(item)) {
                    Ok(()) => {
                        step_execution.write_count += 1;
                        break;
                    }
                    Err(err) => match self.classify(&err, step_execution) {
                        FaultDecision::Skip => {
                            self.check_skip_limit(&err, step_execution)?;
                            warn!("Skipping item on write: {}", err);
                            step_execution.write_skip_count += 1;
                            break;
                        }
                        FaultDecision::Retry => {
                            attempts += 1;
                            self.check_retry_limit(attempts, &err)?;
                        }
                        FaultDecision::Fail => return Err(err),
                    },
                }
            }

            if index + 1 < items.len() {
                step_execution
                    .execution_context
                    .put_usize(SCAN_PROGRESS_KEY, scanned + index + 1);
                self.writer.update(&mut step_execution.execution_context)?;
                self.persist(step_execution, context)?;
            }
        }

        self.save_checkpoint(step_execution, context)
    }

    fn classify(&self, err: &BatchError, step_execution: &StepExecution) -> FaultDecision {
        if err.kind().is_unrecoverable() {
            return FaultDecision::Fail;
        }
        self.fault_policy
            .classify(err, step_execution.skip_count())
    }

    fn check_skip_limit(
        &self,
        err: &BatchError,
        step_execution: &StepExecution,
    ) -> Result<(), BatchError> {
        if step_execution.skip_count() >= self.skip_limit {
            return Err(BatchError::SkipLimitExceeded {
                limit: self.skip_limit,
                cause: err.to_string(),
            });
        }
        Ok(())
    }

    fn check_retry_limit(&self, attempts: usize, err: &BatchError) -> Result<(), BatchError> {
        if attempts > self.retry_limit {
            return Err(BatchError::RetryLimitExceeded {
                limit: self.retry_limit,
                cause: err.to_string(),
            });
        }
        Ok(())
    }

    fn manage_error(result: Result<(), BatchError>) {
        if let Err(err) = result {
            error!("Error while closing stream: {}", err);
        }
    }
}

static PASS_THROUGH: PassThroughProcessor = PassThroughProcessor;

/// Entry point for building steps.
///
/// ```
/// use batch_engine::core::step::StepBuilder;
/// use batch_engine::item::list::{ListItemReader, ListItemWriter};
///
/// let reader = ListItemReader::new("numbers", vec![1, 2, 3]);
/// let writer = ListItemWriter::new();
///
/// let step = StepBuilder::new("copy")
///     .chunk::<i32>(2)
///     .reader(&reader)
///     .writer(&writer)
///     .build();
/// assert!(step.is_ok());
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Anonymous step with a generated name.
    pub fn unnamed() -> Self {
        Self { name: build_name() }
    }

    pub fn tasklet<'a>(self, tasklet: &'a dyn Tasklet) -> TaskletStepBuilder<'a> {
        TaskletStepBuilder::new(&self.name, tasklet)
    }

    /// Chunk step committing every `chunk_size` items.
    pub fn chunk<'a, I: Clone>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, I> {
        ChunkOrientedStepBuilder::new(
            self.name,
            Box::new(SimpleCompletionPolicy::new(chunk_size)),
        )
    }

    /// Chunk step whose chunk boundaries are decided by `policy`.
    pub fn chunk_policy<'a, I: Clone>(
        self,
        policy: &'a dyn CompletionPolicy,
    ) -> ChunkOrientedStepBuilder<'a, I, I> {
        ChunkOrientedStepBuilder::new(self.name, Box::new(policy))
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    completion_policy: Box<dyn CompletionPolicy + 'a>,
    fault_policy: Box<dyn FaultPolicy + 'a>,
    skip_limit: usize,
    retry_limit: usize,
    allow_start_if_complete: bool,
    start_limit: usize,
    promotion_keys: Vec<String>,
    step_listeners: Vec<&'a dyn StepExecutionListener>,
    chunk_listeners: Vec<&'a dyn ChunkListener>,
    read_listeners: Vec<&'a dyn ItemReadListener<I>>,
}

impl<'a, I: Clone> ChunkOrientedStepBuilder<'a, I, I> {
    fn new(name: String, completion_policy: Box<dyn CompletionPolicy + 'a>) -> Self {
        Self {
            name,
            reader: None,
            processor: Some(&PASS_THROUGH),
            writer: None,
            completion_policy,
            fault_policy: Box::new(ClassifierFaultPolicy::default()),
            skip_limit: 0,
            retry_limit: 0,
            allow_start_if_complete: false,
            start_limit: usize::MAX,
            promotion_keys: Vec::new(),
            step_listeners: Vec::new(),
            chunk_listeners: Vec::new(),
            read_listeners: Vec::new(),
        }
    }
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Sets the processor. Changes the output type, so any writer set before
    /// must be set again.
    pub fn processor<P>(
        self,
        processor: &'a dyn ItemProcessor<I, P>,
    ) -> ChunkOrientedStepBuilder<'a, I, P> {
        ChunkOrientedStepBuilder {
            name: self.name,
            reader: self.reader,
            processor: Some(processor),
            writer: None,
            completion_policy: self.completion_policy,
            fault_policy: self.fault_policy,
            skip_limit: self.skip_limit,
            retry_limit: self.retry_limit,
            allow_start_if_complete: self.allow_start_if_complete,
            start_limit: self.start_limit,
            promotion_keys: self.promotion_keys,
            step_listeners: self.step_listeners,
            chunk_listeners: self.chunk_listeners,
            read_listeners: self.read_listeners,
        }
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn fault_policy(mut self, fault_policy: &'a dyn FaultPolicy) -> Self {
        self.fault_policy = Box::new(fault_policy);
        self
    }

    /// Number of skips tolerated before the step fails. Defaults to zero.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Number of retries of one operation before the step fails. Defaults to zero.
    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
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

    /// Keys of the step context promoted to the job context when the step completes.
    pub fn promote_keys(mut self, keys: &[&str]) -> Self {
        self.promotion_keys = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.step_listeners.push(listener);
        self
    }

    pub fn chunk_listener(mut self, listener: &'a dyn ChunkListener) -> Self {
        self.chunk_listeners.push(listener);
        self
    }

    pub fn read_listener(mut self, listener: &'a dyn ItemReadListener<I>) -> Self {
        self.read_listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        let reader = self.reader.ok_or_else(|| {
            BatchError::Definition(format!("step {} has no reader", self.name))
        })?;
        let processor = self.processor.ok_or_else(|| {
            BatchError::Definition(format!("step {} has no processor", self.name))
        })?;
        let writer = self.writer.ok_or_else(|| {
            BatchError::Definition(format!("step {} has no writer", self.name))
        })?;

        Ok(ChunkOrientedStep {
            name: self.name,
            reader,
            processor,
            writer,
            completion_policy: self.completion_policy,
            fault_policy: self.fault_policy,
            skip_limit: self.skip_limit,
            retry_limit: self.retry_limit,
            allow_start_if_complete: self.allow_start_if_complete,
            start_limit: self.start_limit,
            promotion_keys: self.promotion_keys,
            step_listeners: self.step_listeners,
            chunk_listeners: self.chunk_listeners,
            read_listeners: self.read_listeners,
        })
    }
}
