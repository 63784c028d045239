//! Durable record of job instances, job executions and step executions.
//!
//! The repository is what makes a job restartable: every chunk commit saves
//! the step's counters and execution context here, and a relaunch reads back
//! the last saved state to decide which steps to skip and where each reader
//! resumes.
//!
//! [`SimpleJobRepository`] keeps the whole record in memory and hands every
//! change to an [`ExecutionStore`]. [`InMemoryJobRepository`] stores nothing
//! further; [`FileJobRepository`] rewrites a JSON snapshot after each change.

use std::sync::Mutex;

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    job::{JobExecution, JobInstance},
    lock,
    parameters::JobParameters,
    step::{BatchStatus, StepExecution},
};

pub mod file;

pub use file::{FileJobRepository, JsonFileStore};

pub trait JobRepository: Send + Sync {
    /// The instance of `job_name` identified by `parameters`, if one was created.
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError>;

    fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, BatchError>;

    /// The most recently created instance of `job_name`.
    fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>, BatchError>;

    /// Creates a STARTING execution of `instance`. On a restart the execution
    /// context of the previous execution is carried over.
    fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError>;

    /// Saves `execution`. A STOPPING status already recorded is kept when the
    /// update still reports the execution as running.
    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError>;

    /// The execution with its step executions attached.
    fn get_job_execution(&self, execution_id: Uuid) -> Result<Option<JobExecution>, BatchError>;

    fn get_job_execution_status(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<BatchStatus>, BatchError> {
        Ok(self
            .get_job_execution(execution_id)?
            .map(|execution| execution.status))
    }

    fn get_last_job_execution(
        &self,
        job_instance_id: Uuid,
    ) -> Result<Option<JobExecution>, BatchError>;

    /// Every execution of an instance, oldest first.
    fn find_job_executions(&self, job_instance_id: Uuid) -> Result<Vec<JobExecution>, BatchError>;

    fn add_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;

    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;

    /// The latest execution of step `step_name` across all executions of an instance.
    fn get_last_step_execution(
        &self,
        job_instance_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError>;

    /// How many times step `step_name` was started within an instance.
    fn get_step_execution_count(
        &self,
        job_instance_id: Uuid,
        step_name: &str,
    ) -> Result<usize, BatchError>;
}

/// Everything a repository knows, in a form that serializes to one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryState {
    instances: Vec<JobInstance>,
    job_executions: Vec<JobExecution>,
    step_executions: Vec<StepExecution>,
}

impl RepositoryState {
    fn job_execution(&self, execution_id: Uuid) -> Option<&JobExecution> {
        self.job_executions
            .iter()
            .find(|execution| execution.id == execution_id)
    }

    fn with_steps(&self, execution: &JobExecution) -> JobExecution {
        let mut execution = execution.clone();
        execution.step_executions = self
            .step_executions
            .iter()
            .filter(|step| step.job_execution_id == execution.id)
            .cloned()
            .collect();
        execution
    }

    fn instance_steps<'s>(
        &'s self,
        job_instance_id: Uuid,
        step_name: &'s str,
    ) -> impl Iterator<Item = &'s StepExecution> + 's {
        self.step_executions.iter().filter(move |step| {
            step.name == step_name
                && self
                    .job_execution(step.job_execution_id)
                    .is_some_and(|execution| execution.job_instance_id == job_instance_id)
        })
    }
}

/// Where a [`SimpleJobRepository`] saves its state.
pub trait ExecutionStore: Send + Sync {
    fn load(&self) -> Result<RepositoryState, BatchError>;

    fn save(&self, state: &RepositoryState) -> Result<(), BatchError>;
}

/// Store that keeps nothing beyond the repository's own memory.
#[derive(Debug, Default)]
pub struct MemoryStore;

impl ExecutionStore for MemoryStore {
    fn load(&self) -> Result<RepositoryState, BatchError> {
        Ok(RepositoryState::default())
    }

    fn save(&self, _state: &RepositoryState) -> Result<(), BatchError> {
        Ok(())
    }
}

pub struct SimpleJobRepository<S> {
    store: S,
    state: Mutex<RepositoryState>,
}

/// Repository whose content disappears with the process.
pub type InMemoryJobRepository = SimpleJobRepository<MemoryStore>;

impl SimpleJobRepository<MemoryStore> {
    pub fn new() -> Self {
        Self {
            store: MemoryStore,
            state: Mutex::new(RepositoryState::default()),
        }
    }
}

impl Default for SimpleJobRepository<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ExecutionStore> SimpleJobRepository<S> {
    /// Creates a repository starting from what `store` already holds.
    pub fn with_store(store: S) -> Result<Self, BatchError> {
        let state = store.load()?;
        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    /// Copy of the complete state, mainly for inspection in tests.
    pub fn snapshot(&self) -> RepositoryState {
        lock(&self.state).clone()
    }

    /// Applies `change` and saves the result; the in-memory state is left
    /// untouched when either fails.
    fn mutate<T, F>(&self, change: F) -> Result<T, BatchError>
    where
        F: FnOnce(&mut RepositoryState) -> Result<T, BatchError>,
    {
        let mut state = lock(&self.state);
        let mut next = state.clone();
        let value = change(&mut next)?;
        self.store.save(&next)?;
        *state = next;
        Ok(value)
    }
}

impl<S: ExecutionStore> JobRepository for SimpleJobRepository<S> {
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        let job_key = parameters.to_identifying_key();
        Ok(lock(&self.state)
            .instances
            .iter()
            .find(|instance| instance.job_name == job_name && instance.job_key == job_key)
            .cloned())
    }

    fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, BatchError> {
        let job_key = parameters.to_identifying_key();
        self.mutate(|state| {
            if state
                .instances
                .iter()
                .any(|instance| instance.job_name == job_name && instance.job_key == job_key)
            {
                return Err(BatchError::Repository(format!(
                    "an instance of {} already exists for parameters {}",
                    job_name, parameters
                )));
            }
            let instance = JobInstance::new(job_name, &job_key);
            debug!("Created instance {} of job {}", instance.id, job_name);
            state.instances.push(instance.clone());
            Ok(instance)
        })
    }

    fn get_last_job_instance(&self, job_name: &str) -> Result<Option<JobInstance>, BatchError> {
        Ok(lock(&self.state)
            .instances
            .iter()
            .rev()
            .find(|instance| instance.job_name == job_name)
            .cloned())
    }

    fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        self.mutate(|state| {
            if !state.instances.iter().any(|known| known.id == instance.id) {
                return Err(BatchError::Repository(format!(
                    "unknown job instance {}",
                    instance.id
                )));
            }
            let mut execution = JobExecution::new(instance, parameters);
            if let Some(previous) = state
                .job_executions
                .iter()
                .rev()
                .find(|execution| execution.job_instance_id == instance.id)
            {
                execution.execution_context = previous.execution_context.clone();
            }
            execution.last_updated = Some(Utc::now());
            state.job_executions.push(execution.clone());
            Ok(execution)
        })
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), BatchError> {
        self.mutate(|state| {
            let stored = state
                .job_executions
                .iter_mut()
                .find(|stored| stored.id == execution.id)
                .ok_or_else(|| {
                    BatchError::Repository(format!("unknown job execution {}", execution.id))
                })?;
            let keep_stopping =
                stored.status == BatchStatus::Stopping && execution.status.is_running();
            *stored = execution.clone();
            stored.step_executions.clear();
            if keep_stopping {
                stored.status = BatchStatus::Stopping;
            }
            stored.last_updated = Some(Utc::now());
            Ok(())
        })
    }

    fn get_job_execution(&self, execution_id: Uuid) -> Result<Option<JobExecution>, BatchError> {
        let state = lock(&self.state);
        Ok(state
            .job_execution(execution_id)
            .map(|execution| state.with_steps(execution)))
    }

    fn get_job_execution_status(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<BatchStatus>, BatchError> {
        Ok(lock(&self.state)
            .job_execution(execution_id)
            .map(|execution| execution.status))
    }

    fn get_last_job_execution(
        &self,
        job_instance_id: Uuid,
    ) -> Result<Option<JobExecution>, BatchError> {
        let state = lock(&self.state);
        Ok(state
            .job_executions
            .iter()
            .rev()
            .find(|execution| execution.job_instance_id == job_instance_id)
            .map(|execution| state.with_steps(execution)))
    }

    fn find_job_executions(&self, job_instance_id: Uuid) -> Result<Vec<JobExecution>, BatchError> {
        let state = lock(&self.state);
        Ok(state
            .job_executions
            .iter()
            .filter(|execution| execution.job_instance_id == job_instance_id)
            .map(|execution| state.with_steps(execution))
            .collect())
    }

    fn add_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.mutate(|state| {
            if state.job_execution(step_execution.job_execution_id).is_none() {
                return Err(BatchError::Repository(format!(
                    "step {} belongs to unknown job execution {}",
                    step_execution.name, step_execution.job_execution_id
                )));
            }
            let mut step_execution = step_execution.clone();
            step_execution.last_updated = Some(Utc::now());
            state.step_executions.push(step_execution);
            Ok(())
        })
    }

    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.mutate(|state| {
            let stored = state
                .step_executions
                .iter_mut()
                .find(|stored| stored.id == step_execution.id)
                .ok_or_else(|| {
                    BatchError::Repository(format!(
                        "unknown step execution {} ({})",
                        step_execution.id, step_execution.name
                    ))
                })?;
            *stored = step_execution.clone();
            stored.last_updated = Some(Utc::now());
            Ok(())
        })
    }

    fn get_last_step_execution(
        &self,
        job_instance_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        Ok(lock(&self.state)
            .instance_steps(job_instance_id, step_name)
            .last()
            .cloned())
    }

    fn get_step_execution_count(
        &self,
        job_instance_id: Uuid,
        step_name: &str,
    ) -> Result<usize, BatchError> {
        Ok(lock(&self.state)
            .instance_steps(job_instance_id, step_name)
            .count())
    }
}
