use std::fmt::Debug;

use log::info;

use crate::{
    BatchError,
    core::item::{ItemStream, ItemWriter},
};

/// Logs every written item at `info` level.
///
/// Log lines cannot be taken back: items of a chunk that is later rolled back
/// have already been logged.
#[derive(Default)]
pub struct LoggerWriter {
    label: Option<String>,
}

impl LoggerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes each line with `label` instead of `Record`.
    pub fn with_label(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
        }
    }
}

impl ItemStream for LoggerWriter {}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> Result<(), BatchError> {
        let label = self.label.as_deref().unwrap_or("Record");
        items.iter().for_each(|item| info!("{}:{:?}", label, item));
        Ok(())
    }
}
