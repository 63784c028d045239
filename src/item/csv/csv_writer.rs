use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use csv::WriterBuilder;
use log::{debug, error, info};
use serde::Serialize;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemStream, ItemWriter},
        lock,
    },
};

struct WriterState<W> {
    output: Option<W>,
    staged: Vec<u8>,
    committed_bytes: u64,
    header_written: bool,
    header_staged: bool,
}

/// A CSV item writer with two-phase output.
///
/// `write` serializes a chunk into a staging buffer; `flush` appends it to the
/// destination when the chunk commits and `rollback` discards it. At each
/// commit the writer saves the byte offset of the destination once the staged
/// rows are in, under `<name>.written.bytes`.
///
/// A writer created with [`CsvItemWriterBuilder::from_path`] opens its file in
/// `open`: a fresh run truncates it, a restart cuts it back to the saved offset
/// and appends from there, so rows of a chunk that did not commit are not
/// duplicated. The header row is written once per file.
pub struct CsvItemWriter<W> {
    name: String,
    delimiter: u8,
    has_headers: bool,
    opener: Option<Opener<W>>,
    truncator: Option<Truncator<W>>,
    state: Mutex<WriterState<W>>,
}

/// Opens the destination given the committed byte offset.
type Opener<W> = Box<dyn Fn(u64) -> Result<W, BatchError> + Send + Sync>;

/// Cuts the destination back to the committed byte offset.
type Truncator<W> = fn(&mut W, u64) -> Result<(), BatchError>;

fn io_error(context: &str, error: std::io::Error) -> BatchError {
    BatchError::ItemWriter(format!("{}: {}", context, error))
}

impl<W> CsvItemWriter<W> {
    fn offset_key(&self) -> String {
        format!("{}.written.bytes", self.name)
    }

    fn header_key(&self) -> String {
        format!("{}.header.written", self.name)
    }
}

fn open_file(name: &str, path: &Path, offset: u64) -> Result<File, BatchError> {
    if offset == 0 {
        return File::create(path)
            .map_err(|e| BatchError::NonTransientResource(format!("{}: {}", path.display(), e)));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| BatchError::NonTransientResource(format!("{}: {}", path.display(), e)))?;
    let length = file
        .metadata()
        .map_err(|e| io_error("unable to inspect output", e))?
        .len();

    if length < offset {
        return Err(BatchError::NonTransientResource(format!(
            "{}: {} holds {} bytes, less than the {} committed",
            name,
            path.display(),
            length,
            offset
        )));
    }
    truncate_file(&mut file, offset)?;
    info!("{}: appending to {} from byte {}", name, path.display(), offset);
    Ok(file)
}

fn truncate_file(file: &mut File, offset: u64) -> Result<(), BatchError> {
    file.set_len(offset)
        .map_err(|e| io_error("unable to truncate output", e))?;
    file.seek(SeekFrom::End(0))
        .map_err(|e| io_error("unable to seek output", e))?;
    Ok(())
}

impl<W: Write + Send> CsvItemWriter<W> {
    /// Returns the destination, once pending rows are written.
    pub fn into_inner(self) -> Result<W, BatchError> {
        let mut state = self
            .state
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let staged = std::mem::take(&mut state.staged);
        let mut output = state
            .output
            .take()
            .ok_or_else(|| BatchError::ItemWriter("writer has no destination".to_string()))?;
        output
            .write_all(&staged)
            .and_then(|()| output.flush())
            .map_err(|e| io_error("unable to write output", e))?;
        Ok(output)
    }

    fn stage<R: Serialize>(&self, state: &mut WriterState<W>, items: &[R]) -> Result<(), BatchError> {
        let with_header = self.has_headers && !state.header_written && !state.header_staged;
        let mut wtr = WriterBuilder::new()
            .flexible(false)
            .delimiter(self.delimiter)
            .has_headers(with_header)
            .from_writer(Vec::new());

        for item in items {
            wtr.serialize(item)
                .map_err(|e| BatchError::ItemWriter(e.to_string()))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| BatchError::ItemWriter(e.to_string()))?;

        state.staged.extend_from_slice(&bytes);
        if with_header && !items.is_empty() {
            state.header_staged = true;
        }
        Ok(())
    }
}

impl<W: Write + Send> ItemStream for CsvItemWriter<W> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let offset = context.get_u64(&self.offset_key()).unwrap_or(0);
        let header_written = context.get_bool(&self.header_key()).unwrap_or(false);
        let mut state = lock(&self.state);
        state.staged.clear();
        state.header_staged = false;
        state.committed_bytes = offset;
        state.header_written = header_written;
        if let Some(opener) = &self.opener {
            state.output = Some(opener(offset)?);
        } else if offset > 0 {
            debug!("{}: resuming after {} bytes", self.name, offset);
        }
        Ok(())
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        let state = lock(&self.state);
        context.put_u64(
            &self.offset_key(),
            state.committed_bytes + state.staged.len() as u64,
        );
        context.put_bool(&self.header_key(), state.header_written || state.header_staged);
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        let mut state = lock(&self.state);
        if let Some(output) = state.output.as_mut() {
            output
                .flush()
                .map_err(|e| io_error("unable to flush output", e))?;
        }
        if self.opener.is_some() {
            state.output = None;
        }
        Ok(())
    }
}

impl<W: Write + Send, R: Serialize> ItemWriter<R> for CsvItemWriter<W> {
    fn write(&self, items: &[R]) -> Result<(), BatchError> {
        let mut state = lock(&self.state);
        self.stage(&mut state, items)
    }

    /// Appends the staged rows to the destination and flushes it.
    fn flush(&self) -> Result<(), BatchError> {
        let mut state = lock(&self.state);
        let staged = std::mem::take(&mut state.staged);
        let Some(output) = state.output.as_mut() else {
            return Err(BatchError::ItemWriter(format!(
                "{} is not open",
                self.name
            )));
        };

        output
            .write_all(&staged)
            .and_then(|()| output.flush())
            .map_err(|e| io_error("unable to write output", e))?;

        state.committed_bytes += staged.len() as u64;
        if state.header_staged {
            state.header_written = true;
            state.header_staged = false;
        }
        debug!("{}: {} bytes committed", self.name, state.committed_bytes);
        Ok(())
    }

    /// Discards staged rows. A file destination is also cut back to the last
    /// committed offset, dropping the bytes of a flush that failed midway.
    fn rollback(&self) {
        let mut state = lock(&self.state);
        state.staged.clear();
        state.header_staged = false;
        let committed = state.committed_bytes;
        if let (Some(truncate), Some(output)) = (self.truncator, state.output.as_mut())
            && let Err(err) = truncate(output, committed)
        {
            error!("{}: unable to roll back output: {}", self.name, err);
        }
    }
}

/// A builder for [`CsvItemWriter`].
///
/// # Examples
///
/// ```
/// use batch_engine::core::item::ItemWriter;
/// use batch_engine::item::csv::csv_writer::CsvItemWriterBuilder;
///
/// #[derive(serde::Serialize)]
/// struct Row<'a> {
///     city: &'a str,
///     #[serde(rename = "popcount")]
///     population: u64,
/// }
///
/// let wtr = CsvItemWriterBuilder::new()
///     .has_headers(true)
///     .from_writer(vec![]);
///
/// wtr.write(&[Row { city: "Boston", population: 4628910 }])?;
/// ItemWriter::<Row>::flush(&wtr)?;
/// wtr.write(&[Row { city: "Concord", population: 42695 }])?;
/// ItemWriter::<Row>::rollback(&wtr);
///
/// let data = String::from_utf8(wtr.into_inner()?).unwrap();
/// assert_eq!(data, "city,popcount\nBoston,4628910\n");
/// # Ok::<(), batch_engine::BatchError>(())
/// ```
pub struct CsvItemWriterBuilder {
    name: String,
    delimiter: u8,
    has_headers: bool,
}

impl Default for CsvItemWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemWriterBuilder {
    pub fn new() -> CsvItemWriterBuilder {
        CsvItemWriterBuilder {
            name: "csvItemWriter".to_string(),
            delimiter: b',',
            has_headers: false,
        }
    }

    /// Sets the name prefixing the checkpoint keys of the writer.
    pub fn name(mut self, name: &str) -> CsvItemWriterBuilder {
        self.name = name.to_string();
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> CsvItemWriterBuilder {
        self.delimiter = delimiter;
        self
    }

    pub fn has_headers(mut self, yes: bool) -> CsvItemWriterBuilder {
        self.has_headers = yes;
        self
    }

    /// Writes to the file at `path`, opened when the step opens the writer.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> CsvItemWriter<File> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let name = self.name.clone();
        let opener: Opener<File> = Box::new(move |offset| open_file(&name, &path, offset));
        self.build(Some(opener), Some(truncate_file as Truncator<File>), None)
    }

    /// Writes to `wtr`. Restarting cannot take back bytes already written to it.
    pub fn from_writer<W: Write>(self, wtr: W) -> CsvItemWriter<W> {
        self.build(None, None, Some(wtr))
    }

    fn build<W>(
        self,
        opener: Option<Opener<W>>,
        truncator: Option<Truncator<W>>,
        output: Option<W>,
    ) -> CsvItemWriter<W> {
        CsvItemWriter {
            name: self.name,
            delimiter: self.delimiter,
            has_headers: self.has_headers,
            opener,
            truncator,
            state: Mutex::new(WriterState {
                output,
                staged: Vec::new(),
                committed_bytes: 0,
                header_written: false,
                header_staged: false,
            }),
        }
    }
}
