use std::sync::Mutex;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemStream},
        lock,
    },
};

/// Wraps a reader with one item of lookahead.
///
/// Peeking reads the next item from the delegate ahead of time. The delegate's
/// checkpoint is captured just before that read, so a commit taken while an
/// item is peeked records the position of the peeked item rather than the one
/// after it and a restart reads it again.
pub struct PeekableItemReader<'a, I> {
    delegate: &'a dyn ItemReader<I>,
    peeked: Mutex<Option<I>>,
    saved: Mutex<ExecutionContext>,
}

impl<'a, I: Clone + Send> PeekableItemReader<'a, I> {
    pub fn new(delegate: &'a dyn ItemReader<I>) -> Self {
        Self {
            delegate,
            peeked: Mutex::new(None),
            saved: Mutex::new(ExecutionContext::new()),
        }
    }

    /// Returns the item the next `read` will return, without consuming it.
    pub fn peek(&self) -> ItemReaderResult<I> {
        let mut peeked = lock(&self.peeked);
        if peeked.is_none() {
            let mut saved = ExecutionContext::new();
            self.delegate.update(&mut saved)?;
            *peeked = self.delegate.read()?;
            *lock(&self.saved) = saved;
        }
        Ok(peeked.clone())
    }
}

impl<I: Clone + Send> ItemStream for PeekableItemReader<'_, I> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        *lock(&self.peeked) = None;
        self.delegate.open(context)
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        if lock(&self.peeked).is_some() {
            context.merge(&lock(&self.saved));
            Ok(())
        } else {
            self.delegate.update(context)
        }
    }

    fn close(&self) -> Result<(), BatchError> {
        *lock(&self.peeked) = None;
        self.delegate.close()
    }
}

impl<I: Clone + Send> ItemReader<I> for PeekableItemReader<'_, I> {
    fn read(&self) -> ItemReaderResult<I> {
        if let Some(item) = lock(&self.peeked).take() {
            return Ok(Some(item));
        }
        self.delegate.read()
    }
}

/// A header record followed by the records belonging to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemGroup<T> {
    pub header: T,
    pub children: Vec<T>,
}

/// Groups a flat stream into header/children blocks.
///
/// A new group starts at every record for which `is_header` holds, and the
/// group ends right before the next header or at the end of the stream. A
/// stream that does not begin with a header cannot be grouped and yields a
/// parse failure.
///
/// # Examples
///
/// ```
/// use batch_engine::core::item::ItemReader;
/// use batch_engine::item::list::ListItemReader;
/// use batch_engine::item::peekable::ControlBreakItemReader;
///
/// let lines = ListItemReader::new("lines", vec!["H1", "a", "b", "H2", "c"]);
/// let reader = ControlBreakItemReader::new(&lines, |line: &&str| line.starts_with('H'));
///
/// let first = reader.read()?.unwrap();
/// assert_eq!(first.header, "H1");
/// assert_eq!(first.children, vec!["a", "b"]);
///
/// let second = reader.read()?.unwrap();
/// assert_eq!(second.children, vec!["c"]);
/// assert!(reader.read()?.is_none());
/// # Ok::<(), batch_engine::BatchError>(())
/// ```
pub struct ControlBreakItemReader<'a, T, F> {
    reader: PeekableItemReader<'a, T>,
    is_header: F,
}

impl<'a, T, F> ControlBreakItemReader<'a, T, F>
where
    T: Clone + Send,
    F: Fn(&T) -> bool + Sync,
{
    pub fn new(delegate: &'a dyn ItemReader<T>, is_header: F) -> Self {
        Self {
            reader: PeekableItemReader::new(delegate),
            is_header,
        }
    }
}

impl<T, F> ItemStream for ControlBreakItemReader<'_, T, F>
where
    T: Clone + Send,
    F: Fn(&T) -> bool + Sync,
{
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        self.reader.open(context)
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        self.reader.update(context)
    }

    fn close(&self) -> Result<(), BatchError> {
        self.reader.close()
    }
}

impl<T, F> ItemReader<ItemGroup<T>> for ControlBreakItemReader<'_, T, F>
where
    T: Clone + Send,
    F: Fn(&T) -> bool + Sync,
{
    fn read(&self) -> ItemReaderResult<ItemGroup<T>> {
        let Some(header) = self.reader.read()? else {
            return Ok(None);
        };
        if !(self.is_header)(&header) {
            return Err(BatchError::Parse(
                "record group does not start with a header".to_string(),
            ));
        }

        let mut children = Vec::new();
        while let Some(next) = self.reader.peek()? {
            if (self.is_header)(&next) {
                break;
            }
            self.reader.read()?;
            children.push(next);
        }

        Ok(Some(ItemGroup { header, children }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::list::ListItemReader;

    #[test]
    fn peek_does_not_consume() -> Result<(), BatchError> {
        let delegate = ListItemReader::new("numbers", vec![1, 2]);
        let reader = PeekableItemReader::new(&delegate);

        assert_eq!(reader.peek()?, Some(1));
        assert_eq!(reader.peek()?, Some(1));
        assert_eq!(reader.read()?, Some(1));
        assert_eq!(reader.read()?, Some(2));
        assert_eq!(reader.peek()?, None);
        Ok(())
    }

    #[test]
    fn checkpoint_excludes_the_peeked_item() -> Result<(), BatchError> {
        let delegate = ListItemReader::new("numbers", vec![1, 2, 3]);
        let reader = PeekableItemReader::new(&delegate);
        reader.open(&ExecutionContext::new())?;

        reader.read()?;
        reader.peek()?;
        let mut context = ExecutionContext::new();
        reader.update(&mut context)?;
        assert_eq!(context.get_usize("numbers.read.count"), Some(1));

        reader.read()?;
        let mut context = ExecutionContext::new();
        reader.update(&mut context)?;
        assert_eq!(context.get_usize("numbers.read.count"), Some(2));
        Ok(())
    }

    #[test]
    fn stream_without_leading_header_is_a_parse_failure() {
        let delegate = ListItemReader::new("lines", vec!["a", "H1"]);
        let reader = ControlBreakItemReader::new(&delegate, |line: &&str| line.starts_with('H'));
        assert!(matches!(reader.read(), Err(BatchError::Parse(_))));
    }

    #[test]
    fn header_without_children_forms_a_group() -> Result<(), BatchError> {
        let delegate = ListItemReader::new("lines", vec!["H1", "H2", "x"]);
        let reader = ControlBreakItemReader::new(&delegate, |line: &&str| line.starts_with('H'));

        let first = reader.read()?;
        assert_eq!(
            first,
            Some(ItemGroup {
                header: "H1",
                children: vec![]
            })
        );
        assert_eq!(reader.read()?.map(|group| group.children), Some(vec!["x"]));
        Ok(())
    }
}
