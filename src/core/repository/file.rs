use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::BatchError;

use super::{ExecutionStore, RepositoryState, SimpleJobRepository};

/// Repository surviving process restarts, backed by one JSON file.
pub type FileJobRepository = SimpleJobRepository<JsonFileStore>;

impl SimpleJobRepository<JsonFileStore> {
    /// Opens the repository stored at `path`, starting empty if the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        Self::with_store(JsonFileStore::new(path))
    }
}

/// Saves the repository as a JSON document.
///
/// Each save writes a temporary file in the target directory and renames it
/// over the previous snapshot, so a crash leaves either the old or the new
/// document on disk, never a truncated one.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

fn io_error(context: &str, path: &Path, error: std::io::Error) -> BatchError {
    BatchError::Repository(format!("{} {}: {}", context, path.display(), error))
}

impl ExecutionStore for JsonFileStore {
    fn load(&self) -> Result<RepositoryState, BatchError> {
        if !self.path.exists() {
            info!("No repository at {}, starting empty", self.path.display());
            return Ok(RepositoryState::default());
        }
        let file = File::open(&self.path).map_err(|e| io_error("Unable to open", &self.path, e))?;
        let state = serde_json::from_reader(BufReader::new(file))?;
        debug!("Loaded repository from {}", self.path.display());
        Ok(state)
    }

    fn save(&self, state: &RepositoryState) -> Result<(), BatchError> {
        let directory = self.directory();
        let temp = NamedTempFile::new_in(directory)
            .map_err(|e| io_error("Unable to create temporary file in", directory, e))?;

        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer
                .flush()
                .map_err(|e| io_error("Unable to write", temp.path(), e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| io_error("Unable to sync", temp.path(), e))?;

        temp.persist(&self.path)
            .map_err(|e| io_error("Unable to replace", &self.path, e.error))?;
        Ok(())
    }
}
