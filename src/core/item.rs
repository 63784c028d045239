use crate::{BatchError, core::context::ExecutionContext};

/// Result of [`ItemReader::read`]: `Ok(None)` marks the end of the stream.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of [`ItemProcessor::process`]: `Ok(None)` filters the item out.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of [`ItemWriter::write`].
pub type ItemWriterResult = Result<(), BatchError>;

/// Lifecycle and checkpoint callbacks shared by readers and writers.
///
/// The step calls `open` once with the context saved by the previous attempt
/// (empty on a first run), `update` at every chunk commit so the stream can
/// record its position, and `close` when the step ends whatever the outcome.
///
/// A stream must only write keys it owns; prefixing keys with a component name
/// keeps two readers of the same step apart.
pub trait ItemStream: Sync {
    fn open(&self, _context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn update(&self, _context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Retrieves input for a step, one item at a time.
///
/// After `open` with a previously saved context, the next `read` must return
/// the item following the last one included in a committed chunk.
///
/// A read that fails has consumed the failing record: the next `read` returns
/// the record after it. Only [`BatchError::Transient`] leaves the position
/// unchanged, so it is the one read error the step retries; any other error a
/// fault policy marks for retry is skipped instead.
pub trait ItemReader<I>: ItemStream {
    fn read(&self) -> ItemReaderResult<I>;
}

/// Business logic applied to each item between read and write.
pub trait ItemProcessor<I, O>: Sync {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Output of a step, one chunk at a time.
///
/// Writers follow a two-phase discipline: `write` stages the chunk, `flush`
/// makes it durable before the step saves its checkpoint, and `rollback`
/// discards whatever was staged or partly written since the last flush.
///
/// A writer whose `update` records its output position can undo a chunk that
/// was flushed but never checkpointed: `open` cuts the output back to the
/// saved position.
pub trait ItemWriter<O>: ItemStream {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn rollback(&self) {}
}

/// Processor returning every item unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<I: Clone> ItemProcessor<I, I> for PassThroughProcessor {
    fn process(&self, item: &I) -> ItemProcessorResult<I> {
        Ok(Some(item.clone()))
    }
}

/// Validates one item for [`ValidatingItemProcessor`](crate::item::composite::ValidatingItemProcessor).
pub trait Validator<T>: Sync {
    fn validate(&self, item: &T) -> Result<(), BatchError>;
}
