use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
/// Batch error
pub enum BatchError {
    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    /// Input could not be decoded into an item.
    #[error("Parse failure: {0}")]
    Parse(String),

    /// Job parameters or item content rejected by a validator.
    #[error("Validation failure: {0}")]
    Validation(String),

    /// A resource is unusable. Never skipped, never retried.
    #[error("Non transient resource failure: {0}")]
    NonTransientResource(String),

    /// A failure that may succeed when attempted again.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Skip limit of {limit} exceeded: {cause}")]
    SkipLimitExceeded { limit: usize, cause: String },

    #[error("Retry limit of {limit} exhausted: {cause}")]
    RetryLimitExceeded { limit: usize, cause: String },

    #[error("Footer declares {expected} records but {actual} were read")]
    RecordCountMismatch { expected: usize, actual: usize },

    #[error("Step {0} failed")]
    Step(String),

    #[error("Tasklet: {0}")]
    Tasklet(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Execution interrupted: {0}")]
    Interrupted(String),

    #[error("Invalid job definition: {0}")]
    Definition(String),

    #[error("No job registered under the name {0}")]
    NoSuchJob(String),

    #[error("A job execution for this instance is already running: {0}")]
    JobExecutionAlreadyRunning(String),

    #[error("Job instance already completed: {0}")]
    JobInstanceAlreadyComplete(String),

    #[error("Job restart refused: {0}")]
    JobRestart(String),

    #[error("Step {step} reached its start limit of {limit}")]
    StartLimitExceeded { step: String, limit: usize },

    #[error("Job repository: {0}")]
    Repository(String),
}

/// Classification tag of a [`BatchError`].
///
/// Kinds form a small hierarchy so that fault policies can match a broad kind
/// (`Item`) and override a narrower one (`Validation`). [`FailureKind::parent`]
/// walks one level up; `Any` is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    Any,
    Item,
    Read,
    Parse,
    Process,
    Write,
    Validation,
    Transient,
    Repository,
    NonTransient,
    Fatal,
}

impl FailureKind {
    pub fn parent(&self) -> Option<FailureKind> {
        match self {
            FailureKind::Any => None,
            FailureKind::Item
            | FailureKind::Transient
            | FailureKind::Repository
            | FailureKind::NonTransient
            | FailureKind::Fatal => Some(FailureKind::Any),
            FailureKind::Read
            | FailureKind::Process
            | FailureKind::Write
            | FailureKind::Validation => Some(FailureKind::Item),
            FailureKind::Parse => Some(FailureKind::Read),
        }
    }

    /// Returns this kind followed by each of its ancestors, most specific first.
    pub fn lineage(&self) -> Vec<FailureKind> {
        let mut lineage = vec![*self];
        let mut current = *self;
        while let Some(parent) = current.parent() {
            lineage.push(parent);
            current = parent;
        }
        lineage
    }

    /// Kinds that no policy may skip or retry.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, FailureKind::NonTransient | FailureKind::Fatal)
    }
}

impl BatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BatchError::ItemReader(_) => FailureKind::Read,
            BatchError::ItemProcessor(_) => FailureKind::Process,
            BatchError::ItemWriter(_) => FailureKind::Write,
            BatchError::Parse(_) => FailureKind::Parse,
            BatchError::Validation(_) => FailureKind::Validation,
            BatchError::Transient(_) => FailureKind::Transient,
            BatchError::Repository(_) => FailureKind::Repository,
            BatchError::NonTransientResource(_) | BatchError::RecordCountMismatch { .. } => {
                FailureKind::NonTransient
            }
            BatchError::SkipLimitExceeded { .. }
            | BatchError::RetryLimitExceeded { .. }
            | BatchError::Step(_)
            | BatchError::Tasklet(_)
            | BatchError::Timeout(_)
            | BatchError::Interrupted(_)
            | BatchError::Definition(_)
            | BatchError::NoSuchJob(_)
            | BatchError::JobExecutionAlreadyRunning(_)
            | BatchError::JobInstanceAlreadyComplete(_)
            | BatchError::JobRestart(_)
            | BatchError::StartLimitExceeded { .. } => FailureKind::Fatal,
        }
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(error: serde_json::Error) -> Self {
        BatchError::Repository(error.to_string())
    }
}
