use std::sync::Mutex;

use log::{debug, error};

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemStream},
        lock,
    },
};

#[derive(Default)]
struct Progress {
    count: usize,
    footer_seen: bool,
}

/// Checks a trailing footer record against the number of records read.
///
/// `footer` returns the record count declared by a footer record and `None` for
/// data records. Data records are passed through and counted; the footer itself
/// ends the stream. A footer whose declared count differs from the number of
/// data records read fails with [`BatchError::RecordCountMismatch`], and so does
/// a stream that ends before any footer. Neither can be skipped.
///
/// The running count is checkpointed under `<name>.record.count`.
///
/// # Examples
///
/// ```
/// use batch_engine::core::item::ItemReader;
/// use batch_engine::item::footer::RecordCountVerifyingReader;
/// use batch_engine::item::list::ListItemReader;
///
/// let lines = ListItemReader::new("lines", vec!["a", "b", "TRAILER 3"]);
/// let reader = RecordCountVerifyingReader::new("lines", &lines, |line: &&str| {
///     line.strip_prefix("TRAILER ").and_then(|count| count.parse().ok())
/// });
///
/// assert_eq!(reader.read()?, Some("a"));
/// assert_eq!(reader.read()?, Some("b"));
/// assert!(reader.read().is_err());
/// # Ok::<(), batch_engine::BatchError>(())
/// ```
pub struct RecordCountVerifyingReader<'a, I, F> {
    name: String,
    delegate: &'a dyn ItemReader<I>,
    footer: F,
    progress: Mutex<Progress>,
}

impl<'a, I, F> RecordCountVerifyingReader<'a, I, F>
where
    F: Fn(&I) -> Option<usize> + Sync,
{
    pub fn new(name: &str, delegate: &'a dyn ItemReader<I>, footer: F) -> Self {
        Self {
            name: name.to_string(),
            delegate,
            footer,
            progress: Mutex::new(Progress::default()),
        }
    }

    fn key(&self) -> String {
        format!("{}.record.count", self.name)
    }
}

impl<I, F> ItemStream for RecordCountVerifyingReader<'_, I, F>
where
    F: Fn(&I) -> Option<usize> + Sync,
{
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        *lock(&self.progress) = Progress {
            count: context.get_usize(&self.key()).unwrap_or(0),
            footer_seen: false,
        };
        self.delegate.open(context)
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        context.put_usize(&self.key(), lock(&self.progress).count);
        self.delegate.update(context)
    }

    fn close(&self) -> Result<(), BatchError> {
        self.delegate.close()
    }
}

impl<I, F> ItemReader<I> for RecordCountVerifyingReader<'_, I, F>
where
    F: Fn(&I) -> Option<usize> + Sync,
{
    fn read(&self) -> ItemReaderResult<I> {
        let mut progress = lock(&self.progress);
        if progress.footer_seen {
            return Ok(None);
        }

        let Some(item) = self.delegate.read()? else {
            error!("{} ended without a footer record", self.name);
            return Err(BatchError::RecordCountMismatch {
                expected: 0,
                actual: progress.count,
            });
        };

        match (self.footer)(&item) {
            Some(expected) if expected == progress.count => {
                debug!("{}: footer matches {} records", self.name, expected);
                progress.footer_seen = true;
                Ok(None)
            }
            Some(expected) => {
                error!(
                    "{}: footer declares {} records, {} read",
                    self.name, expected, progress.count
                );
                Err(BatchError::RecordCountMismatch {
                    expected,
                    actual: progress.count,
                })
            }
            None => {
                progress.count += 1;
                Ok(Some(item))
            }
        }
    }
}
