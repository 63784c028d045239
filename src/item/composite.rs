use log::debug;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{
            ItemProcessor, ItemProcessorResult, ItemStream, ItemWriter, ItemWriterResult,
            Validator,
        },
    },
};

/// Runs two processors in sequence. The second one only sees items the first
/// one did not filter out.
///
/// Longer chains are built by nesting composites.
///
/// # Examples
///
/// ```
/// use batch_engine::core::item::{ItemProcessor, ItemProcessorResult};
/// use batch_engine::item::composite::CompositeItemProcessor;
///
/// struct Parse;
/// impl ItemProcessor<String, i64> for Parse {
///     fn process(&self, item: &String) -> ItemProcessorResult<i64> {
///         Ok(item.trim().parse().ok())
///     }
/// }
///
/// struct Double;
/// impl ItemProcessor<i64, i64> for Double {
///     fn process(&self, item: &i64) -> ItemProcessorResult<i64> {
///         Ok(Some(item * 2))
///     }
/// }
///
/// let chain = CompositeItemProcessor::new(&Parse, &Double);
/// assert_eq!(chain.process(&" 21".to_string())?, Some(42));
/// assert_eq!(chain.process(&"n/a".to_string())?, None);
/// # Ok::<(), batch_engine::BatchError>(())
/// ```
pub struct CompositeItemProcessor<'a, I, M, O> {
    first: &'a dyn ItemProcessor<I, M>,
    second: &'a dyn ItemProcessor<M, O>,
}

impl<'a, I, M, O> CompositeItemProcessor<'a, I, M, O> {
    pub fn new(first: &'a dyn ItemProcessor<I, M>, second: &'a dyn ItemProcessor<M, O>) -> Self {
        Self { first, second }
    }
}

impl<I, M, O> ItemProcessor<I, O> for CompositeItemProcessor<'_, I, M, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        match self.first.process(item)? {
            Some(intermediate) => self.second.process(&intermediate),
            None => Ok(None),
        }
    }
}

/// Passes items through a [`Validator`].
///
/// Invalid items are reported as [`BatchError::Validation`], or silently
/// filtered when the processor is built with [`ValidatingItemProcessor::filter`].
pub struct ValidatingItemProcessor<'a, T> {
    validator: &'a dyn Validator<T>,
    filter: bool,
}

impl<'a, T> ValidatingItemProcessor<'a, T> {
    pub fn new(validator: &'a dyn Validator<T>) -> Self {
        Self {
            validator,
            filter: false,
        }
    }

    /// Filters invalid items instead of failing on them.
    pub fn filter(validator: &'a dyn Validator<T>) -> Self {
        Self {
            validator,
            filter: true,
        }
    }
}

impl<T: Clone> ItemProcessor<T, T> for ValidatingItemProcessor<'_, T> {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        match self.validator.validate(item) {
            Ok(()) => Ok(Some(item.clone())),
            Err(error) if self.filter => {
                debug!("Filtering invalid item: {}", error);
                Ok(None)
            }
            Err(BatchError::Validation(message)) => Err(BatchError::Validation(message)),
            Err(error) => Err(BatchError::Validation(error.to_string())),
        }
    }
}

/// Hands every chunk to each delegate writer in turn.
pub struct CompositeItemWriter<'a, O> {
    delegates: Vec<&'a dyn ItemWriter<O>>,
}

impl<'a, O> CompositeItemWriter<'a, O> {
    pub fn new(delegates: Vec<&'a dyn ItemWriter<O>>) -> Self {
        Self { delegates }
    }
}

impl<O> ItemStream for CompositeItemWriter<'_, O> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        self.delegates.iter().try_for_each(|writer| writer.open(context))
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        self.delegates.iter().try_for_each(|writer| writer.update(context))
    }

    fn close(&self) -> Result<(), BatchError> {
        self.delegates.iter().try_for_each(|writer| writer.close())
    }
}

impl<O> ItemWriter<O> for CompositeItemWriter<'_, O> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        self.delegates.iter().try_for_each(|writer| writer.write(items))
    }

    fn flush(&self) -> ItemWriterResult {
        self.delegates.iter().try_for_each(|writer| writer.flush())
    }

    fn rollback(&self) {
        self.delegates.iter().for_each(|writer| writer.rollback());
    }
}

/// Routes each item to one of several writers.
///
/// `classifier` returns the index of the writer an item belongs to. Items keep
/// their relative order within each writer.
///
/// # Examples
///
/// ```
/// use batch_engine::core::item::ItemWriter;
/// use batch_engine::item::composite::ClassifierCompositeItemWriter;
/// use batch_engine::item::list::ListItemWriter;
///
/// let even = ListItemWriter::new();
/// let odd = ListItemWriter::new();
/// let writers: Vec<&dyn ItemWriter<i32>> = vec![&even, &odd];
/// let writer = ClassifierCompositeItemWriter::new(writers, |n: &i32| (n % 2) as usize);
///
/// writer.write(&[1, 2, 3, 4])?;
/// writer.flush()?;
/// assert_eq!(even.get_written_items(), vec![2, 4]);
/// assert_eq!(odd.get_written_items(), vec![1, 3]);
/// # Ok::<(), batch_engine::BatchError>(())
/// ```
pub struct ClassifierCompositeItemWriter<'a, O, F> {
    writers: Vec<&'a dyn ItemWriter<O>>,
    classifier: F,
}

impl<'a, O, F> ClassifierCompositeItemWriter<'a, O, F>
where
    F: Fn(&O) -> usize + Sync,
{
    pub fn new(writers: Vec<&'a dyn ItemWriter<O>>, classifier: F) -> Self {
        Self {
            writers,
            classifier,
        }
    }
}

impl<O, F> ItemStream for ClassifierCompositeItemWriter<'_, O, F>
where
    F: Fn(&O) -> usize + Sync,
{
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        self.writers.iter().try_for_each(|writer| writer.open(context))
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        self.writers.iter().try_for_each(|writer| writer.update(context))
    }

    fn close(&self) -> Result<(), BatchError> {
        self.writers.iter().try_for_each(|writer| writer.close())
    }
}

impl<O, F> ItemWriter<O> for ClassifierCompositeItemWriter<'_, O, F>
where
    O: Clone,
    F: Fn(&O) -> usize + Sync,
{
    fn write(&self, items: &[O]) -> ItemWriterResult {
        let mut routed: Vec<Vec<O>> = vec![Vec::new(); self.writers.len()];
        for item in items {
            let index = (self.classifier)(item);
            let Some(bucket) = routed.get_mut(index) else {
                return Err(BatchError::ItemWriter(format!(
                    "classifier returned writer {} but only {} are configured",
                    index,
                    self.writers.len()
                )));
            };
            bucket.push(item.clone());
        }

        for (writer, bucket) in self.writers.iter().zip(routed) {
            if !bucket.is_empty() {
                writer.write(&bucket)?;
            }
        }
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        self.writers.iter().try_for_each(|writer| writer.flush())
    }

    fn rollback(&self) {
        self.writers.iter().for_each(|writer| writer.rollback());
    }
}
