use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    BatchError,
    core::{
        step::{StepContext, StepExecution},
        tasklet::{RepeatStatus, Tasklet},
    },
};

/// Cooperative cancellation signal handed to the work of a [`CallableTasklet`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs a closure on a dedicated worker thread.
///
/// The step thread waits for the result, checking for stop requests every
/// `poll_interval`. When `timeout` elapses or a stop is requested the token
/// passed to the closure is cancelled, and the closure gets `grace_period` to
/// return. A timeout fails the step with [`BatchError::Timeout`]; a stop ends it
/// STOPPED. A worker still running after the grace period is left behind.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use batch_engine::core::tasklet::RepeatStatus;
/// use batch_engine::tasklet::callable::CallableTasklet;
///
/// let tasklet = CallableTasklet::new(|token| {
///     for _batch in 0..100 {
///         if token.is_cancelled() {
///             break;
///         }
///         // process one batch
///     }
///     Ok(RepeatStatus::Finished)
/// })
/// .timeout(Duration::from_secs(30));
/// # let _ = tasklet;
/// ```
pub struct CallableTasklet<F> {
    function: Arc<F>,
    timeout: Option<Duration>,
    grace_period: Duration,
    poll_interval: Duration,
}

impl<F> CallableTasklet<F>
where
    F: Fn(&CancellationToken) -> Result<RepeatStatus, BatchError> + Send + Sync + 'static,
{
    pub fn new(function: F) -> Self {
        Self {
            function: Arc::new(function),
            timeout: None,
            grace_period: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Time left to the closure to return once cancelled.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl<F> Tasklet for CallableTasklet<F>
where
    F: Fn(&CancellationToken) -> Result<RepeatStatus, BatchError> + Send + Sync + 'static,
{
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        let token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel();

        let function = Arc::clone(&self.function);
        let worker_token = token.clone();
        thread::Builder::new()
            .name(format!("{}-worker", step_execution.name))
            .spawn(move || {
                let _ = sender.send(function(&worker_token));
            })
            .map_err(|e| BatchError::Tasklet(format!("unable to start worker: {}", e)))?;

        let started = Instant::now();
        loop {
            match receiver.recv_timeout(self.poll_interval) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BatchError::Tasklet(format!(
                        "worker of step {} terminated without a result",
                        step_execution.name
                    )));
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            if let Some(timeout) = self.timeout.filter(|timeout| started.elapsed() >= *timeout) {
                warn!("Step {} timed out, cancelling its worker", step_execution.name);
                self.cancel(&token, &receiver);
                return Err(BatchError::Timeout(format!(
                    "step {} exceeded {:?}",
                    step_execution.name, timeout
                )));
            }

            if context.is_stop_requested() {
                self.cancel(&token, &receiver);
                return Err(BatchError::Interrupted(format!(
                    "stop requested while step {} was running",
                    step_execution.name
                )));
            }
        }
    }
}

impl<F> CallableTasklet<F> {
    fn cancel<T>(&self, token: &CancellationToken, receiver: &mpsc::Receiver<T>) {
        token.cancel();
        match receiver.recv_timeout(self.grace_period) {
            Ok(_) => debug!("Worker acknowledged cancellation"),
            Err(_) => warn!(
                "Worker still running after a grace period of {:?}",
                self.grace_period
            ),
        }
    }
}
