//! CSV support for reading and writing tabular data.
//!
//! Both components are restartable: the reader checkpoints the number of rows
//! it consumed, the writer the byte offset of its committed output. A step
//! restarted after a failure therefore neither reads a committed row twice nor
//! writes a committed row twice.
//!
//! # Examples
//!
//! A step copying cities from one CSV document to another:
//!
//! ```
//! use batch_engine::core::repository::InMemoryJobRepository;
//! use batch_engine::core::job::JobBuilder;
//! use batch_engine::core::launcher::JobLauncher;
//! use batch_engine::core::parameters::JobParameters;
//! use batch_engine::core::step::{BatchStatus, StepBuilder};
//! use batch_engine::item::csv::csv_reader::CsvItemReaderBuilder;
//! use batch_engine::item::csv::csv_writer::CsvItemWriterBuilder;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Deserialize, Serialize)]
//! struct City {
//!     city: String,
//!     country: String,
//!     pop: u32,
//! }
//!
//! let csv_data = "\
//! city,country,pop
//! Boston,United States,4628910
//! Concord,United States,42695
//! ";
//!
//! let reader = CsvItemReaderBuilder::new()
//!     .has_headers(true)
//!     .from_reader(csv_data.as_bytes());
//! let writer = CsvItemWriterBuilder::new()
//!     .has_headers(true)
//!     .from_writer(Vec::new());
//!
//! let step = StepBuilder::new("copy-cities")
//!     .chunk::<City>(10)
//!     .reader(&reader)
//!     .writer(&writer)
//!     .build()?;
//! let job = JobBuilder::new().name("cities").start(&step).build()?;
//!
//! let repository = InMemoryJobRepository::new();
//! let execution = JobLauncher::new(&repository).run(&job, JobParameters::new())?;
//! assert_eq!(execution.status, BatchStatus::Completed);
//! assert_eq!(execution.step_executions[0].write_count, 2);
//! # Ok::<(), batch_engine::BatchError>(())
//! ```

/// A module providing facilities for reading CSV data records.
pub mod csv_reader;

/// A module providing facilities for writing CSV data records.
pub mod csv_writer;
