//! Completion policies decide when the chunk being read is full.
//!
//! A policy is asked for a fresh [`RepeatContext`] at the start of every chunk,
//! is told about every item read into the chunk through
//! [`CompletionPolicy::update`], and is polled with
//! [`CompletionPolicy::is_complete`] before each read. The context belongs to a
//! single chunk and is dropped once the step decides to commit, so policies
//! themselves hold no per-chunk state and can be shared between steps.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use batch_engine::core::completion::{
//!     CompletionPolicy, CompositeCompletionPolicy, SimpleCompletionPolicy, TimeoutCompletionPolicy,
//! };
//!
//! let count = SimpleCompletionPolicy::new(2);
//! let timeout = TimeoutCompletionPolicy::new(Duration::from_secs(3));
//! let policy = CompositeCompletionPolicy::new(vec![&timeout, &count]);
//!
//! let mut context = policy.start();
//! policy.update(&mut context);
//! assert!(!policy.is_complete(&context));
//! policy.update(&mut context);
//! assert!(policy.is_complete(&context));
//! ```

use std::time::{Duration, Instant};

use log::debug;
use rand::distr::{Distribution, Uniform};

/// Per-chunk state handed out by [`CompletionPolicy::start`].
#[derive(Debug, Clone)]
pub struct RepeatContext {
    started: Instant,
    item_count: usize,
    target: Option<usize>,
    children: Vec<RepeatContext>,
}

impl RepeatContext {
    fn new(target: Option<usize>) -> Self {
        Self {
            started: Instant::now(),
            item_count: 0,
            target,
            children: Vec::new(),
        }
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Target size chosen for this chunk, when the policy is count based.
    pub fn target(&self) -> Option<usize> {
        self.target
    }
}

pub trait CompletionPolicy: Sync {
    fn start(&self) -> RepeatContext;

    fn is_complete(&self, context: &RepeatContext) -> bool;

    fn update(&self, context: &mut RepeatContext) {
        context.item_count += 1;
    }
}

impl<T: CompletionPolicy + ?Sized> CompletionPolicy for &T {
    fn start(&self) -> RepeatContext {
        (**self).start()
    }

    fn is_complete(&self, context: &RepeatContext) -> bool {
        (**self).is_complete(context)
    }

    fn update(&self, context: &mut RepeatContext) {
        (**self).update(context)
    }
}

/// Completes after a fixed number of items. The default policy of a chunk step.
#[derive(Debug, Clone)]
pub struct SimpleCompletionPolicy {
    chunk_size: usize,
}

impl SimpleCompletionPolicy {
    /// A chunk size of zero is treated as one.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl CompletionPolicy for SimpleCompletionPolicy {
    fn start(&self) -> RepeatContext {
        RepeatContext::new(Some(self.chunk_size))
    }

    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.item_count >= self.chunk_size
    }
}

/// Completes once the chunk has been open for longer than a timeout,
/// whatever the number of items read.
#[derive(Debug, Clone)]
pub struct TimeoutCompletionPolicy {
    timeout: Duration,
}

impl TimeoutCompletionPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CompletionPolicy for TimeoutCompletionPolicy {
    fn start(&self) -> RepeatContext {
        RepeatContext::new(None)
    }

    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.elapsed() >= self.timeout
    }
}

/// Completes as soon as any of its policies does.
pub struct CompositeCompletionPolicy<'a> {
    policies: Vec<&'a dyn CompletionPolicy>,
}

impl<'a> CompositeCompletionPolicy<'a> {
    pub fn new(policies: Vec<&'a dyn CompletionPolicy>) -> Self {
        Self { policies }
    }
}

impl CompletionPolicy for CompositeCompletionPolicy<'_> {
    fn start(&self) -> RepeatContext {
        let mut context = RepeatContext::new(None);
        context.children = self.policies.iter().map(|policy| policy.start()).collect();
        context
    }

    fn is_complete(&self, context: &RepeatContext) -> bool {
        self.policies
            .iter()
            .zip(context.children.iter())
            .any(|(policy, child)| policy.is_complete(child))
    }

    fn update(&self, context: &mut RepeatContext) {
        context.item_count += 1;
        for (policy, child) in self.policies.iter().zip(context.children.iter_mut()) {
            policy.update(child);
        }
    }
}

/// Draws a new chunk size between 1 and `max_chunk_size` at the start of every chunk.
#[derive(Debug, Clone)]
pub struct RandomChunkSizePolicy {
    max_chunk_size: usize,
}

impl RandomChunkSizePolicy {
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
        }
    }
}

impl CompletionPolicy for RandomChunkSizePolicy {
    fn start(&self) -> RepeatContext {
        let chunk_size = Uniform::new_inclusive(1, self.max_chunk_size)
            .map(|range| range.sample(&mut rand::rng()))
            .unwrap_or(self.max_chunk_size);
        debug!("The chunk size has been set to {}", chunk_size);
        RepeatContext::new(Some(chunk_size))
    }

    fn is_complete(&self, context: &RepeatContext) -> bool {
        context
            .target
            .is_some_and(|target| context.item_count >= target)
    }
}
