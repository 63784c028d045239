//! Launching, restarting and stopping jobs.
//!
//! # Examples
//!
//! ```
//! use batch_engine::core::job::JobBuilder;
//! use batch_engine::core::launcher::{JobLauncher, exit_code};
//! use batch_engine::core::parameters::JobParametersBuilder;
//! use batch_engine::core::repository::InMemoryJobRepository;
//! use batch_engine::core::step::{BatchStatus, StepBuilder};
//! use batch_engine::core::tasklet::{FnTasklet, RepeatStatus};
//!
//! let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
//! let step = StepBuilder::new("hello").tasklet(&tasklet).build();
//! let job = JobBuilder::new().name("hello-job").start(&step).build()?;
//!
//! let repository = InMemoryJobRepository::new();
//! let mut launcher = JobLauncher::new(&repository);
//! launcher.register(&job)?;
//!
//! let parameters = JobParametersBuilder::new().add_string("name", "Michael").build();
//! let execution = launcher.launch("hello-job", parameters.clone())?;
//! assert_eq!(execution.status, BatchStatus::Completed);
//! assert_eq!(exit_code(&execution), 0);
//!
//! // The instance is complete: launching it again is refused.
//! assert!(launcher.launch("hello-job", parameters).is_err());
//! # Ok::<(), batch_engine::BatchError>(())
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::BatchError;

use super::{
    job::{Job, JobExecution},
    parameters::JobParameters,
    repository::JobRepository,
    step::{BatchStatus, ExitStatus},
};

/// Process exit code for a completed job.
pub const EXIT_COMPLETED: i32 = 0;
/// Process exit code for a failed job.
pub const EXIT_FAILED: i32 = 1;
/// Process exit code when the job could not be launched at all.
pub const EXIT_INVALID_LAUNCH: i32 = 2;
/// Process exit code for a stopped job.
pub const EXIT_STOPPED: i32 = 3;

/// Maps the final state of an execution to a process exit code.
pub fn exit_code(execution: &JobExecution) -> i32 {
    match execution.status {
        BatchStatus::Completed => EXIT_COMPLETED,
        BatchStatus::Stopped | BatchStatus::Stopping => EXIT_STOPPED,
        _ => EXIT_FAILED,
    }
}

/// Maps the result of a launch, refused launches included, to a process exit code.
pub fn launch_exit_code(result: &Result<JobExecution, BatchError>) -> i32 {
    match result {
        Ok(execution) => exit_code(execution),
        Err(_) => EXIT_INVALID_LAUNCH,
    }
}

/// Jobs known by name.
#[derive(Default)]
pub struct JobRegistry<'a> {
    jobs: BTreeMap<String, &'a dyn Job>,
}

impl<'a> JobRegistry<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: &'a dyn Job) -> Result<(), BatchError> {
        if self.jobs.contains_key(job.name()) {
            return Err(BatchError::Definition(format!(
                "a job named {} is already registered",
                job.name()
            )));
        }
        self.jobs.insert(job.name().to_string(), job);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&'a dyn Job, BatchError> {
        self.jobs
            .get(name)
            .copied()
            .ok_or_else(|| BatchError::NoSuchJob(name.to_string()))
    }

    pub fn job_names(&self) -> impl Iterator<Item = &String> {
        self.jobs.keys()
    }
}

pub struct JobLauncher<'a> {
    repository: &'a dyn JobRepository,
    registry: JobRegistry<'a>,
}

impl<'a> JobLauncher<'a> {
    pub fn new(repository: &'a dyn JobRepository) -> Self {
        Self {
            repository,
            registry: JobRegistry::new(),
        }
    }

    pub fn register(&mut self, job: &'a dyn Job) -> Result<(), BatchError> {
        self.registry.register(job)
    }

    pub fn registry(&self) -> &JobRegistry<'a> {
        &self.registry
    }

    /// Launches the registered job `job_name`.
    pub fn launch(
        &self,
        job_name: &str,
        parameters: JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let job = self.registry.get(job_name)?;
        self.run(job, parameters)
    }

    /// Starts a new instance of `job`, or restarts the instance identified by
    /// `parameters` when its last execution did not complete.
    ///
    /// Refused launches return an error and leave the repository untouched:
    /// invalid parameters, an execution of the instance still running, a job
    /// that forbids restarts, or an instance that already completed.
    pub fn run(&self, job: &dyn Job, parameters: JobParameters) -> Result<JobExecution, BatchError> {
        let parameters = match job.incrementer() {
            Some(incrementer) => {
                let previous = self.previous_parameters(job.name())?;
                incrementer.next(previous.as_ref()).merge(&parameters)
            }
            None => parameters,
        };

        job.validate(&parameters)?;

        let instance = match self.repository.get_job_instance(job.name(), &parameters)? {
            Some(instance) => {
                if let Some(last) = self.repository.get_last_job_execution(instance.id)? {
                    self.check_restart(job, &last)?;
                    info!(
                        "Restarting instance {} of job {} after execution {} ended {}",
                        instance.id, job.name(), last.id, last.status
                    );
                }
                instance
            }
            None => self.repository.create_job_instance(job.name(), &parameters)?,
        };

        let execution = self.repository.create_job_execution(&instance, &parameters)?;
        info!(
            "Job: [{}] launched with the following parameters: [{}]",
            job.name(),
            parameters
        );

        Ok(job.execute(execution, self.repository))
    }

    fn check_restart(&self, job: &dyn Job, last: &JobExecution) -> Result<(), BatchError> {
        if last.status.is_running() {
            return Err(BatchError::JobExecutionAlreadyRunning(format!(
                "execution {} of job {} is {}",
                last.id,
                job.name(),
                last.status
            )));
        }
        if !job.is_restartable() {
            return Err(BatchError::JobRestart(format!(
                "job {} is not restartable",
                job.name()
            )));
        }
        if last.status == BatchStatus::Abandoned {
            return Err(BatchError::JobRestart(format!(
                "execution {} of job {} was abandoned",
                last.id,
                job.name()
            )));
        }
        if last.status == BatchStatus::Completed && !job.allows_start_after_complete() {
            return Err(BatchError::JobInstanceAlreadyComplete(format!(
                "job {} already completed with parameters {}",
                job.name(),
                last.job_parameters
            )));
        }
        Ok(())
    }

    fn previous_parameters(&self, job_name: &str) -> Result<Option<JobParameters>, BatchError> {
        let Some(instance) = self.repository.get_last_job_instance(job_name)? else {
            return Ok(None);
        };
        Ok(self
            .repository
            .get_last_job_execution(instance.id)?
            .map(|execution| execution.job_parameters))
    }

    /// Asks a running execution to stop. Steps notice at their next chunk or
    /// tasklet boundary and end STOPPED.
    pub fn stop(&self, execution_id: Uuid) -> Result<(), BatchError> {
        let mut execution = self.running_execution(execution_id)?;
        info!("Stopping job execution {}", execution_id);
        execution.status = BatchStatus::Stopping;
        self.repository.update_job_execution(&execution)
    }

    /// Marks an execution that will never finish as FAILED so that its instance
    /// can be restarted, typically after the process running it died.
    pub fn mark_failed(&self, execution_id: Uuid) -> Result<(), BatchError> {
        let mut execution = self.running_execution(execution_id)?;
        warn!("Marking job execution {} as failed", execution_id);

        for step in execution.step_executions.iter_mut() {
            if step.status.is_running() {
                step.status = BatchStatus::Failed;
                step.exit_status = ExitStatus::failed().with_description("marked failed");
                step.end_time = Some(Utc::now());
                self.repository.update_step_execution(step)?;
            }
        }

        execution.status = BatchStatus::Failed;
        execution.exit_status = ExitStatus::failed().with_description("marked failed");
        execution.end_time = Some(Utc::now());
        self.repository.update_job_execution(&execution)
    }

    /// Marks a finished execution ABANDONED; its instance can no longer be restarted.
    pub fn abandon(&self, execution_id: Uuid) -> Result<(), BatchError> {
        let mut execution = self
            .repository
            .get_job_execution(execution_id)?
            .ok_or_else(|| BatchError::Repository(format!("unknown job execution {}", execution_id)))?;
        if execution.status.is_running() {
            return Err(BatchError::JobExecutionAlreadyRunning(format!(
                "execution {} is {}, stop it first",
                execution_id, execution.status
            )));
        }
        execution.status = BatchStatus::Abandoned;
        self.repository.update_job_execution(&execution)
    }

    fn running_execution(&self, execution_id: Uuid) -> Result<JobExecution, BatchError> {
        let execution = self
            .repository
            .get_job_execution(execution_id)?
            .ok_or_else(|| BatchError::Repository(format!("unknown job execution {}", execution_id)))?;
        if !execution.status.is_running() {
            return Err(BatchError::JobRestart(format!(
                "execution {} is not running, it is {}",
                execution_id, execution.status
            )));
        }
        Ok(execution)
    }
}
