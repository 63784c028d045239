#![allow(dead_code)]

pub mod mocks;

pub use mocks::MockFile;

use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use batch_engine::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemStream, ItemWriter, ItemWriterResult},
    },
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Reads a fixed script of items and failures. A failure entry is consumed
/// like an item, so the next read moves past it.
pub struct ScriptedReader<T> {
    name: String,
    script: Vec<Result<T, BatchError>>,
    position: Mutex<usize>,
}

impl<T> ScriptedReader<T> {
    pub fn new(name: &str, script: Vec<Result<T, BatchError>>) -> Self {
        Self {
            name: name.to_string(),
            script,
            position: Mutex::new(0),
        }
    }

    fn key(&self) -> String {
        format!("{}.read.count", self.name)
    }
}

/// `count` numbered items, failing with a parse error at the given 1-based positions.
pub fn numbers_with_parse_errors(count: u32, failures: &[u32]) -> Vec<Result<u32, BatchError>> {
    (1..=count)
        .map(|n| {
            if failures.contains(&n) {
                Err(BatchError::Parse(format!("record {} is malformed", n)))
            } else {
                Ok(n)
            }
        })
        .collect()
}

impl<T: Send + Sync> ItemStream for ScriptedReader<T> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        *self.position.lock().unwrap() = context.get_usize(&self.key()).unwrap_or(0);
        Ok(())
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        context.put_usize(&self.key(), *self.position.lock().unwrap());
        Ok(())
    }
}

impl<T: Clone + Send + Sync> ItemReader<T> for ScriptedReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        let mut position = self.position.lock().unwrap();
        let Some(entry) = self.script.get(*position) else {
            return Ok(None);
        };
        *position += 1;
        entry.clone().map(Some)
    }
}

/// Stages chunks and refuses any chunk containing an item matching `reject`.
pub struct RejectingWriter<T, F> {
    reject: F,
    staged: Mutex<Vec<T>>,
    written: Mutex<Vec<T>>,
    pub write_calls: AtomicUsize,
}

impl<T, F: Fn(&T) -> bool + Sync> RejectingWriter<T, F> {
    pub fn new(reject: F) -> Self {
        Self {
            reject,
            staged: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            write_calls: AtomicUsize::new(0),
        }
    }

    pub fn written(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.written.lock().unwrap().clone()
    }
}

impl<T: Send, F: Fn(&T) -> bool + Sync> ItemStream for RejectingWriter<T, F> {}

impl<T: Clone + Send, F: Fn(&T) -> bool + Sync> ItemWriter<T> for RejectingWriter<T, F> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if items.iter().any(|item| (self.reject)(item)) {
            return Err(BatchError::ItemWriter("rejected item in chunk".to_string()));
        }
        self.staged.lock().unwrap().extend(items.iter().cloned());
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        let mut staged = self.staged.lock().unwrap();
        self.written.lock().unwrap().append(&mut staged);
        Ok(())
    }

    fn rollback(&self) {
        self.staged.lock().unwrap().clear();
    }
}

/// Fails the first `failures` flushes with a transient error.
pub struct FlakyFlushWriter<T> {
    failures: AtomicUsize,
    staged: Mutex<Vec<T>>,
    written: Mutex<Vec<T>>,
}

impl<T: Clone> FlakyFlushWriter<T> {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            staged: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn written(&self) -> Vec<T> {
        self.written.lock().unwrap().clone()
    }
}

impl<T: Send> ItemStream for FlakyFlushWriter<T> {}

impl<T: Clone + Send> ItemWriter<T> for FlakyFlushWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.staged.lock().unwrap().extend(items.iter().cloned());
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BatchError::Transient("storage unavailable".to_string()));
        }
        let mut staged = self.staged.lock().unwrap();
        self.written.lock().unwrap().append(&mut staged);
        Ok(())
    }

    fn rollback(&self) {
        self.staged.lock().unwrap().clear();
    }
}
