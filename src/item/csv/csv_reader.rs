use csv::{ReaderBuilder, StringRecordsIntoIter, Terminator, Trim};
use log::{debug, info};
use serde::de::DeserializeOwned;
use std::{fs::File, io::Read, path::Path, sync::Mutex};

use crate::{
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemStream},
        lock,
    },
    error::BatchError,
};

/// A restartable CSV item reader.
///
/// Rows are deserialized into `T` with serde, one per `read`. The reader counts
/// the rows it consumed, malformed ones included, and saves that count under
/// `<name>.read.count` at every commit. When opened with a saved count it
/// skips that many rows, so a restarted step picks up at the first row of the
/// chunk that did not commit.
///
/// # Errors
///
/// - A row that cannot be decoded into `T` yields [`BatchError::Parse`] with the
///   line number; the row is consumed, so a skip policy may move past it.
/// - An I/O failure of the underlying source yields [`BatchError::ItemReader`].
///
/// # Examples
///
/// ```
/// use batch_engine::item::csv::csv_reader::CsvItemReaderBuilder;
/// use batch_engine::core::item::ItemReader;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Record {
///     name: String,
///     value: i32,
/// }
///
/// let data = "\
/// name,value
/// foo,123
/// bar,456
/// ";
///
/// let reader = CsvItemReaderBuilder::new()
///     .has_headers(true)
///     .from_reader(data.as_bytes());
///
/// let record: Record = reader.read().unwrap().unwrap();
/// assert_eq!(record.name, "foo");
/// assert_eq!(record.value, 123);
///
/// let record: Record = reader.read().unwrap().unwrap();
/// assert_eq!(record.name, "bar");
///
/// assert!(ItemReader::<Record>::read(&reader).unwrap().is_none());
/// ```
pub struct CsvItemReader<R> {
    name: String,
    records: Mutex<StringRecordsIntoIter<R>>,
    count: Mutex<usize>,
}

impl<R> CsvItemReader<R> {
    fn count_key(&self) -> String {
        format!("{}.read.count", self.name)
    }
}

fn to_batch_error(error: csv::Error) -> BatchError {
    let line = error.position().map(|position| position.line());
    match (error.is_io_error(), line) {
        (true, _) => BatchError::ItemReader(error.to_string()),
        (false, Some(line)) => BatchError::Parse(format!("line {}: {}", line, error)),
        (false, None) => BatchError::Parse(error.to_string()),
    }
}

impl<R: Read + Send> ItemStream for CsvItemReader<R> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let target = context.get_usize(&self.count_key()).unwrap_or(0);
        let mut records = lock(&self.records);
        let mut count = lock(&self.count);

        if target > 0 {
            info!("{}: skipping {} rows already committed", self.name, target);
        }
        while *count < target {
            match records.next() {
                Some(Err(error)) if error.is_io_error() => return Err(to_batch_error(error)),
                Some(_) => *count += 1,
                None => break,
            }
        }
        Ok(())
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        context.put_usize(&self.count_key(), *lock(&self.count));
        Ok(())
    }
}

impl<R: Read + Send, T: DeserializeOwned> ItemReader<T> for CsvItemReader<R> {
    fn read(&self) -> ItemReaderResult<T> {
        let Some(result) = lock(&self.records).next() else {
            debug!("{}: end of input after {} rows", self.name, *lock(&self.count));
            return Ok(None);
        };
        *lock(&self.count) += 1;

        let string_record = result.map_err(to_batch_error)?;
        let record: T = string_record.deserialize(None).map_err(to_batch_error)?;
        Ok(Some(record))
    }
}

/// A builder for configuring CSV item reading.
///
/// # Default Configuration
///
/// - Name: `csvItemReader`
/// - Delimiter: comma (,)
/// - Terminator: CRLF
/// - Headers: disabled
/// - Trimming: all fields trimmed
///
/// # Examples
///
/// ```
/// use batch_engine::item::csv::csv_reader::CsvItemReaderBuilder;
/// use csv::Terminator;
///
/// let reader = CsvItemReaderBuilder::new()
///     .name("people")
///     .delimiter(b';')
///     .terminator(Terminator::Any(b'\n'))
///     .has_headers(true)
///     .from_reader("name;age\nAlice;30".as_bytes());
/// ```
pub struct CsvItemReaderBuilder {
    name: String,
    delimiter: u8,
    terminator: Terminator,
    has_headers: bool,
}

impl Default for CsvItemReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemReaderBuilder {
    pub fn new() -> Self {
        Self {
            name: "csvItemReader".to_string(),
            delimiter: b',',
            terminator: Terminator::CRLF,
            has_headers: false,
        }
    }

    /// Sets the name prefixing the checkpoint keys of the reader.
    ///
    /// Two CSV readers of the same step need distinct names.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Whether the first row holds column names rather than data.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers);
        builder
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> CsvItemReader<R> {
        let records = self.reader_builder().from_reader(rdr).into_records();
        CsvItemReader {
            name: self.name,
            records: Mutex::new(records),
            count: Mutex::new(0),
        }
    }

    /// Opens the file at `path`.
    ///
    /// A missing or unreadable file is a [`BatchError::NonTransientResource`]:
    /// no amount of retrying or skipping makes it readable.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvItemReader<File>, BatchError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|error| {
            BatchError::NonTransientResource(format!("{}: {}", path.display(), error))
        })?;
        Ok(self.from_reader(file))
    }
}
