#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # Batch Engine for Rust

 A restartable, chunk-oriented batch execution engine. Jobs are graphs of steps;
 a chunk step reads, processes and writes items in transactional chunks, a
 tasklet step runs one unit of work. Every state change is recorded in a job
 repository, so a job that failed or was stopped restarts exactly where it left
 off: completed steps are not run again and a chunk step resumes after its last
 committed chunk.

 ## Core Concepts

- **Job:** a named flow of steps, decisions, sub-flows and parallel splits, run by a `JobLauncher`.
- **JobInstance:** one logical run of a job, identified by its identifying `JobParameters`.
- **JobExecution / StepExecution:** one attempt at running an instance or a step, with counters, status and an `ExecutionContext` checkpoint.
- **ItemReader / ItemProcessor / ItemWriter:** the three phases of a chunk step. Readers and writers are `ItemStream`s saving their position at each commit.
- **CompletionPolicy:** decides when a chunk is complete.
- **FaultPolicy:** classifies failures as skippable, retryable or fatal.
- **JobRepository:** stores instances, executions and checkpoints, in memory or in a JSON file.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| csv           | Enables restartable CSV `ItemReader` and `ItemWriter`         |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```rust
use batch_engine::{
    core::{
        item::{ItemProcessor, ItemProcessorResult},
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::JobParametersBuilder,
        repository::InMemoryJobRepository,
        step::{BatchStatus, StepBuilder},
    },
    error::BatchError,
    item::list::{ListItemReader, ListItemWriter},
};

struct Upper;

impl ItemProcessor<String, String> for Upper {
    fn process(&self, item: &String) -> ItemProcessorResult<String> {
        Ok(Some(item.to_uppercase()))
    }
}

fn main() -> Result<(), BatchError> {
    let reader = ListItemReader::new(
        "names",
        vec!["ada".to_string(), "grace".to_string(), "linus".to_string()],
    );
    let writer = ListItemWriter::new();

    let step = StepBuilder::new("shout")
        .chunk::<String>(2)
        .reader(&reader)
        .processor(&Upper)
        .writer(&writer)
        .build()?;

    let job = JobBuilder::new().name("shout-job").start(&step).build()?;

    let repository = InMemoryJobRepository::new();
    let mut launcher = JobLauncher::new(&repository);
    launcher.register(&job)?;

    let parameters = JobParametersBuilder::new().add_long("run.id", 1).build();
    let execution = launcher.launch("shout-job", parameters)?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(writer.get_written_items(), vec!["ADA", "GRACE", "LINUS"]);
    assert_eq!(execution.step_executions[0].commit_count, 2);
    Ok(())
}
```

 ## Restarting

 Use a `FileJobRepository` to keep execution metadata across processes. When a
 launch reuses the identifying parameters of an instance whose last execution
 FAILED or STOPPED, the launcher creates a new execution of that instance and
 each step resumes from its saved context.
*/

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of items readers / writers
pub mod item;

/// Set of tasklets for common batch operations
pub mod tasklet;
