//! Observer hooks around jobs, steps, chunks and reads.
//!
//! Listeners watch an execution; they do not steer it. The only ways a listener
//! can influence what happens next are asking the step to terminate at the
//! next chunk boundary with [`StepExecution::set_terminate_only`] and
//! replacing the exit status from `after_step` or `after_job`.

use log::info;

use crate::BatchError;

use super::{
    job::JobExecution,
    step::{ExitStatus, StepExecution},
};

pub trait JobExecutionListener: Sync {
    fn before_job(&self, _job_execution: &JobExecution) {}

    /// Returning an exit status replaces the one the job ended with.
    fn after_job(&self, _job_execution: &JobExecution) -> Option<ExitStatus> {
        None
    }
}

pub trait StepExecutionListener: Sync {
    fn before_step(&self, _step_execution: &mut StepExecution) {}

    /// Returning an exit status replaces the one the step ended with, which
    /// is how a step reports a custom code for flow transitions.
    fn after_step(&self, _step_execution: &StepExecution) -> Option<ExitStatus> {
        None
    }
}

pub trait ChunkListener: Sync {
    fn before_chunk(&self, _step_execution: &mut StepExecution) {}

    /// Called once the chunk is committed.
    fn after_chunk(&self, _step_execution: &mut StepExecution) {}

    fn after_chunk_error(&self, _step_execution: &StepExecution, _error: &BatchError) {}
}

pub trait ItemReadListener<I>: Sync {
    fn before_read(&self) {}

    fn after_read(&self, _item: &I) {}

    fn on_read_error(&self, _error: &BatchError) {}
}

/// Reports `COMPLETED WITH SKIPS` instead of `COMPLETED` when a step skipped items.
#[derive(Default)]
pub struct SkipCheckingListener;

impl SkipCheckingListener {
    pub const COMPLETED_WITH_SKIPS: &'static str = "COMPLETED WITH SKIPS";
}

impl StepExecutionListener for SkipCheckingListener {
    fn after_step(&self, step_execution: &StepExecution) -> Option<ExitStatus> {
        if step_execution.exit_status.exit_code == ExitStatus::COMPLETED
            && step_execution.skip_count() > 0
        {
            info!(
                "Step {} completed with {} skips",
                step_execution.name,
                step_execution.skip_count()
            );
            return Some(ExitStatus::new(Self::COMPLETED_WITH_SKIPS));
        }
        None
    }
}
