use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::distr::{Alphanumeric, SampleString};

pub mod chunk;

pub mod completion;

pub mod context;

pub mod fault;

pub mod flow;

pub mod item;

pub mod job;

pub mod launcher;

pub mod listener;

pub mod parameters;

pub mod repository;

pub mod step;

pub mod tasklet;

/// Generates a random name consisting of alphanumeric characters.
///
/// # Returns
///
/// A `String` containing the generated random name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}

/// Locks a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Engine state behind these mutexes is only ever replaced whole, so a poisoned
/// lock still holds a consistent value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
