//! Skip and retry classification.
//!
//! When reading, processing or writing fails, the step asks its
//! [`FaultPolicy`] what to do with the error: drop the item and go on
//! ([`FaultDecision::Skip`]), try the same operation again
//! ([`FaultDecision::Retry`]) or give up on the step ([`FaultDecision::Fail`]).
//!
//! The step itself enforces what no policy may override: errors whose
//! [`FailureKind`] is unrecoverable always fail, skips beyond the step skip
//! limit become [`BatchError::SkipLimitExceeded`], and retries beyond the retry
//! limit become [`BatchError::RetryLimitExceeded`].
//!
//! # Examples
//!
//! ```
//! use batch_engine::{BatchError, FailureKind};
//! use batch_engine::core::fault::{ClassifierFaultPolicy, FaultDecision, FaultPolicy};
//!
//! let policy = ClassifierFaultPolicy::builder()
//!     .skip(FailureKind::Item)
//!     .fail(FailureKind::Validation)
//!     .retry(FailureKind::Transient)
//!     .build();
//!
//! let parse = BatchError::Parse("bad date".to_string());
//! let invalid = BatchError::Validation("duplicate last name".to_string());
//! let timeout = BatchError::Transient("connection reset".to_string());
//!
//! assert_eq!(policy.classify(&parse, 0), FaultDecision::Skip);
//! assert_eq!(policy.classify(&invalid, 0), FaultDecision::Fail);
//! assert_eq!(policy.classify(&timeout, 0), FaultDecision::Retry);
//! ```

use std::collections::BTreeMap;

use crate::{BatchError, FailureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDecision {
    Skip,
    Retry,
    Fail,
}

pub trait FaultPolicy: Sync {
    /// Decides the fate of `error`. `skip_count` is the number of items the step
    /// has skipped so far, so that custom policies can apply their own budget.
    fn classify(&self, error: &BatchError, skip_count: usize) -> FaultDecision;
}

impl<T: FaultPolicy + ?Sized> FaultPolicy for &T {
    fn classify(&self, error: &BatchError, skip_count: usize) -> FaultDecision {
        (**self).classify(error, skip_count)
    }
}

/// Decision table keyed by [`FailureKind`].
///
/// The table is walked from the error's own kind up through its ancestors and
/// the first kind with a rule decides, so the most specific rule wins. Errors
/// matching no rule fail.
#[derive(Debug, Clone)]
pub struct ClassifierFaultPolicy {
    rules: BTreeMap<FailureKind, FaultDecision>,
}

impl ClassifierFaultPolicy {
    pub fn builder() -> ClassifierFaultPolicyBuilder {
        ClassifierFaultPolicyBuilder::new()
    }

    pub fn decision_for(&self, kind: FailureKind) -> FaultDecision {
        kind.lineage()
            .iter()
            .find_map(|kind| self.rules.get(kind).copied())
            .unwrap_or(FaultDecision::Fail)
    }
}

/// Item errors are skippable, transient and repository errors retryable,
/// validation errors fatal.
impl Default for ClassifierFaultPolicy {
    fn default() -> Self {
        ClassifierFaultPolicy::builder()
            .skip(FailureKind::Item)
            .fail(FailureKind::Validation)
            .retry(FailureKind::Transient)
            .retry(FailureKind::Repository)
            .build()
    }
}

impl FaultPolicy for ClassifierFaultPolicy {
    fn classify(&self, error: &BatchError, _skip_count: usize) -> FaultDecision {
        self.decision_for(error.kind())
    }
}

#[derive(Default)]
pub struct ClassifierFaultPolicyBuilder {
    rules: BTreeMap<FailureKind, FaultDecision>,
}

impl ClassifierFaultPolicyBuilder {
    pub fn new() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn skip(mut self, kind: FailureKind) -> Self {
        self.rules.insert(kind, FaultDecision::Skip);
        self
    }

    pub fn retry(mut self, kind: FailureKind) -> Self {
        self.rules.insert(kind, FaultDecision::Retry);
        self
    }

    /// Deny-list entry: errors of `kind` fail even when a broader kind is skippable.
    pub fn fail(mut self, kind: FailureKind) -> Self {
        self.rules.insert(kind, FaultDecision::Fail);
        self
    }

    pub fn build(self) -> ClassifierFaultPolicy {
        ClassifierFaultPolicy { rules: self.rules }
    }
}

/// Custom policy backed by a closure that may inspect the error value.
///
/// ```
/// use batch_engine::BatchError;
/// use batch_engine::core::fault::{FaultDecision, FaultPolicy, FnFaultPolicy};
///
/// // A missing file is fatal, parse errors are skipped up to ten times.
/// let policy = FnFaultPolicy::new(|error: &BatchError, skip_count: usize| match error {
///     BatchError::Parse(_) if skip_count < 10 => FaultDecision::Skip,
///     _ => FaultDecision::Fail,
/// });
///
/// assert_eq!(policy.classify(&BatchError::Parse("x".into()), 3), FaultDecision::Skip);
/// assert_eq!(policy.classify(&BatchError::Parse("x".into()), 10), FaultDecision::Fail);
/// ```
pub struct FnFaultPolicy<F> {
    classifier: F,
}

impl<F> FnFaultPolicy<F>
where
    F: Fn(&BatchError, usize) -> FaultDecision + Sync,
{
    pub fn new(classifier: F) -> Self {
        Self { classifier }
    }
}

impl<F> FaultPolicy for FnFaultPolicy<F>
where
    F: Fn(&BatchError, usize) -> FaultDecision + Sync,
{
    fn classify(&self, error: &BatchError, skip_count: usize) -> FaultDecision {
        (self.classifier)(error, skip_count)
    }
}
