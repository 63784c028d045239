use std::sync::Mutex;

use log::debug;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemStream, ItemWriter, ItemWriterResult},
        lock,
    },
};

/// Reads items from a vector, saving the index of the next item at every commit.
///
/// The index is stored under `<name>.read.count`, so a restarted step resumes
/// right after the last committed item.
///
/// # Examples
///
/// ```
/// use batch_engine::core::context::ExecutionContext;
/// use batch_engine::core::item::{ItemReader, ItemStream};
/// use batch_engine::item::list::ListItemReader;
///
/// let reader = ListItemReader::new("letters", vec!["a", "b", "c"]);
///
/// let mut saved = ExecutionContext::new();
/// saved.put_usize("letters.read.count", 2);
/// reader.open(&saved)?;
///
/// assert_eq!(reader.read()?, Some("c"));
/// assert_eq!(reader.read()?, None);
/// # Ok::<(), batch_engine::BatchError>(())
/// ```
pub struct ListItemReader<T> {
    name: String,
    items: Vec<T>,
    position: Mutex<usize>,
}

impl<T> ListItemReader<T> {
    pub fn new(name: &str, items: Vec<T>) -> Self {
        Self {
            name: name.to_string(),
            items,
            position: Mutex::new(0),
        }
    }

    fn key(&self) -> String {
        format!("{}.read.count", self.name)
    }
}

impl<T: Sync + Send> ItemStream for ListItemReader<T> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let position = context.get_usize(&self.key()).unwrap_or(0);
        if position > 0 {
            debug!("Reader {} resumes at item {}", self.name, position);
        }
        *lock(&self.position) = position;
        Ok(())
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        context.put_usize(&self.key(), *lock(&self.position));
        Ok(())
    }
}

impl<T: Clone + Sync + Send> ItemReader<T> for ListItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        let mut position = lock(&self.position);
        let item = self.items.get(*position).cloned();
        if item.is_some() {
            *position += 1;
        }
        Ok(item)
    }
}

/// Collects written items in memory.
///
/// Items passed to `write` are staged and only become visible through
/// [`ListItemWriter::get_written_items`] once flushed; `rollback` drops them.
#[derive(Default)]
pub struct ListItemWriter<T> {
    staged: Mutex<Vec<T>>,
    written: Mutex<Vec<T>>,
}

impl<T: Clone> ListItemWriter<T> {
    pub fn new() -> Self {
        Self {
            staged: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn get_written_items(&self) -> Vec<T> {
        lock(&self.written).clone()
    }
}

impl<T: Send> ItemStream for ListItemWriter<T> {
    /// Drops anything staged by an attempt that never flushed.
    fn open(&self, _context: &ExecutionContext) -> Result<(), BatchError> {
        lock(&self.staged).clear();
        Ok(())
    }
}

impl<T: Clone + Send> ItemWriter<T> for ListItemWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        lock(&self.staged).extend(items.iter().cloned());
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        let mut staged = lock(&self.staged);
        lock(&self.written).append(&mut staged);
        Ok(())
    }

    fn rollback(&self) {
        lock(&self.staged).clear();
    }
}
