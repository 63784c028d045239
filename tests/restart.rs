mod common;

use std::{
    fs,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use batch_engine::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemProcessor, ItemProcessorResult, ItemStream, ItemWriter, ItemWriterResult},
        job::JobBuilder,
        launcher::{EXIT_STOPPED, JobLauncher, exit_code},
        parameters::JobParametersBuilder,
        repository::{FileJobRepository, InMemoryJobRepository, JobRepository},
        step::{BatchStatus, StepBuilder},
        tasklet::{FnTasklet, RepeatStatus},
    },
    item::{
        csv::csv_writer::CsvItemWriterBuilder,
        list::ListItemReader,
    },
};

use common::{RejectingWriter, init_logger};

#[test]
fn failed_job_resumes_after_its_last_commit() {
    init_logger();
    let setup_calls = AtomicUsize::new(0);
    let setup = FnTasklet::new(|_, _| {
        setup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let broken = AtomicBool::new(true);

    let reader = ListItemReader::new("numbers", (1..=10).collect::<Vec<u32>>());
    let writer = RejectingWriter::new(|n: &u32| *n == 7 && broken.load(Ordering::SeqCst));

    let prepare = StepBuilder::new("prepare").tasklet(&setup).build();
    let load = StepBuilder::new("load")
        .chunk::<u32>(3)
        .reader(&reader)
        .writer(&writer)
        .build()
        .unwrap();
    let job = JobBuilder::new()
        .name("numbers")
        .start(&prepare)
        .next(&load)
        .build()
        .unwrap();

    let repository = InMemoryJobRepository::new();
    let mut launcher = JobLauncher::new(&repository);
    launcher.register(&job).unwrap();
    let parameters = JobParametersBuilder::new().add_string("file", "numbers.txt").build();

    let first = launcher.launch("numbers", parameters.clone()).unwrap();
    assert_eq!(first.status, BatchStatus::Failed);
    let failed_load = first.step_execution("load").unwrap();
    assert_eq!(failed_load.commit_count, 2);
    assert_eq!(failed_load.execution_context.get_usize("numbers.read.count"), Some(6));
    assert_eq!(writer.written(), vec![1, 2, 3, 4, 5, 6]);

    broken.store(false, Ordering::SeqCst);
    let second = launcher.launch("numbers", parameters).unwrap();

    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(second.job_instance_id, first.job_instance_id);
    assert_ne!(second.id, first.id);
    assert_eq!(setup_calls.load(Ordering::SeqCst), 1);

    let resumed_load = second.step_execution("load").unwrap();
    assert_eq!(resumed_load.read_count, 4);
    assert_eq!(resumed_load.write_count, 4);
    assert_eq!(writer.written(), (1..=10).collect::<Vec<u32>>());

    let executions = repository.find_job_executions(first.job_instance_id).unwrap();
    assert_eq!(executions.len(), 2);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Transaction {
    id: u32,
    account: String,
    amount: f64,
}

fn transactions() -> Vec<Transaction> {
    (1..=10)
        .map(|id| Transaction {
            id,
            account: format!("ACC-{:03}", id % 3),
            amount: id as f64 * 10.5,
        })
        .collect()
}

struct CrashingProcessor {
    armed: AtomicBool,
}

impl ItemProcessor<Transaction, Transaction> for CrashingProcessor {
    fn process(&self, item: &Transaction) -> ItemProcessorResult<Transaction> {
        if item.id == 7 && self.armed.load(Ordering::SeqCst) {
            panic!("simulated process crash");
        }
        Ok(Some(item.clone()))
    }
}

#[test]
fn crashed_execution_is_marked_failed_then_restarted_without_duplicates() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let repository_path = dir.path().join("repository.json");
    let output_path = dir.path().join("transactions.csv");
    let parameters = JobParametersBuilder::new().add_string("day", "2024-03-01").build();

    let reader = ListItemReader::new("transactions", transactions());
    let processor = CrashingProcessor {
        armed: AtomicBool::new(true),
    };

    // First process: dies in the middle of the third chunk.
    {
        let writer = CsvItemWriterBuilder::new()
            .name("output")
            .has_headers(true)
            .from_path(&output_path);
        let step = StepBuilder::new("export")
            .chunk::<Transaction>(3)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();
        let job = JobBuilder::new().name("export").start(&step).build().unwrap();
        let repository = FileJobRepository::open(&repository_path).unwrap();
        let launcher = JobLauncher::new(&repository);

        let crashed = thread::scope(|scope| {
            scope
                .spawn(|| launcher.run(&job, parameters.clone()))
                .join()
        });
        assert!(crashed.is_err());
    }

    let lines = fs::read_to_string(&output_path).unwrap();
    assert_eq!(lines.lines().count(), 7);

    // Second process: the execution still looks alive until marked failed.
    processor.armed.store(false, Ordering::SeqCst);
    let writer = CsvItemWriterBuilder::new()
        .name("output")
        .has_headers(true)
        .from_path(&output_path);
    let step = StepBuilder::new("export")
        .chunk::<Transaction>(3)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("export").start(&step).build().unwrap();
    let repository = FileJobRepository::open(&repository_path).unwrap();
    let launcher = JobLauncher::new(&repository);

    let refused = launcher.run(&job, parameters.clone());
    assert!(matches!(refused, Err(BatchError::JobExecutionAlreadyRunning(_))));

    let instance = repository.get_last_job_instance("export").unwrap().unwrap();
    let stale = repository.get_last_job_execution(instance.id).unwrap().unwrap();
    assert_eq!(stale.status, BatchStatus::Started);
    launcher.mark_failed(stale.id).unwrap();

    let resumed = launcher.run(&job, parameters).unwrap();
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(resumed.step_executions[0].write_count, 4);

    let content = fs::read_to_string(&output_path).unwrap();
    let rows: Vec<&str> = content.lines().collect();
    assert_eq!(rows.len(), 11);
    assert_eq!(rows[0], "id,account,amount");
    for (index, row) in rows[1..].iter().enumerate() {
        assert!(row.starts_with(&format!("{},", index + 1)), "unexpected row {}", row);
    }
}

#[test]
fn stopped_job_restarts_the_interrupted_step() {
    init_logger();
    let finish = AtomicBool::new(false);
    let calls = AtomicUsize::new(0);
    let tasklet = FnTasklet::new(|_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        if finish.load(Ordering::SeqCst) {
            Ok(RepeatStatus::Finished)
        } else {
            thread::sleep(Duration::from_millis(5));
            Ok(RepeatStatus::Continuable)
        }
    });
    let step = StepBuilder::new("poll").tasklet(&tasklet).build();
    let job = JobBuilder::new().name("poller").start(&step).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_long("run.id", 1).build();

    let stopped = thread::scope(|scope| {
        let handle = scope.spawn(|| launcher.run(&job, parameters.clone()));

        let execution_id = loop {
            let running = repository
                .get_last_job_instance("poller")
                .unwrap()
                .and_then(|instance| repository.get_last_job_execution(instance.id).unwrap())
                .filter(|execution| execution.status == BatchStatus::Started);
            if let Some(execution) = running {
                break execution.id;
            }
            thread::sleep(Duration::from_millis(1));
        };
        launcher.stop(execution_id).unwrap();

        handle.join().unwrap().unwrap()
    });

    assert_eq!(stopped.status, BatchStatus::Stopped);
    assert_eq!(exit_code(&stopped), EXIT_STOPPED);
    assert_eq!(stopped.step_executions[0].status, BatchStatus::Stopped);

    finish.store(true, Ordering::SeqCst);
    let restarted = launcher.run(&job, parameters).unwrap();
    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(restarted.job_instance_id, stopped.job_instance_id);
}

#[test]
fn completed_steps_can_opt_into_running_again() {
    init_logger();
    let cleanup_calls = AtomicUsize::new(0);
    let cleanup = FnTasklet::new(|_, _| {
        cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let broken = AtomicBool::new(true);
    let reader = ListItemReader::new("numbers", vec![1, 2, 3]);
    let writer = RejectingWriter::new(|_: &u32| broken.load(Ordering::SeqCst));

    let clean = StepBuilder::new("clean")
        .tasklet(&cleanup)
        .allow_start_if_complete(true)
        .build();
    let load = StepBuilder::new("load")
        .chunk::<u32>(5)
        .reader(&reader)
        .writer(&writer)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("reload").start(&clean).next(&load).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_long("run.id", 7).build();

    assert_eq!(
        launcher.run(&job, parameters.clone()).unwrap().status,
        BatchStatus::Failed
    );
    broken.store(false, Ordering::SeqCst);
    assert_eq!(
        launcher.run(&job, parameters).unwrap().status,
        BatchStatus::Completed
    );
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 2);
}

/// Keeps written items in memory; the flush of a chunk holding 4 kills the
/// process while armed.
struct DyingFlushWriter {
    armed: AtomicBool,
    staged: Mutex<Vec<u32>>,
    written: Mutex<Vec<u32>>,
}

impl DyingFlushWriter {
    fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
            staged: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        }
    }

    fn written(&self) -> Vec<u32> {
        self.written.lock().unwrap().clone()
    }
}

impl ItemStream for DyingFlushWriter {
    fn open(&self, _context: &ExecutionContext) -> Result<(), BatchError> {
        self.staged.lock().unwrap().clear();
        Ok(())
    }
}

impl ItemWriter<u32> for DyingFlushWriter {
    fn write(&self, items: &[u32]) -> ItemWriterResult {
        self.staged.lock().unwrap().extend_from_slice(items);
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        let doomed = self.staged.lock().unwrap().contains(&4);
        if doomed && self.armed.load(Ordering::SeqCst) {
            panic!("simulated crash during flush");
        }
        let mut staged = self.staged.lock().unwrap();
        self.written.lock().unwrap().append(&mut staged);
        Ok(())
    }

    fn rollback(&self) {
        self.staged.lock().unwrap().clear();
    }
}

#[test]
fn crash_during_flush_replays_only_the_unflushed_chunk() {
    init_logger();
    let reader = ListItemReader::new("numbers", (1..=9).collect::<Vec<u32>>());
    let writer = DyingFlushWriter::new();
    let step = StepBuilder::new("load")
        .chunk::<u32>(3)
        .reader(&reader)
        .writer(&writer)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("loader").start(&step).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_long("run.id", 1).build();

    let crashed = thread::scope(|scope| {
        scope
            .spawn(|| launcher.run(&job, parameters.clone()))
            .join()
    });
    assert!(crashed.is_err());
    assert_eq!(writer.written(), vec![1, 2, 3]);

    let instance = repository.get_last_job_instance("loader").unwrap().unwrap();
    let saved = repository
        .get_last_step_execution(instance.id, "load")
        .unwrap()
        .unwrap();
    assert_eq!(saved.commit_count, 1);
    assert_eq!(saved.write_count, 3);
    assert_eq!(saved.execution_context.get_usize("numbers.read.count"), Some(3));

    let stale = repository.get_last_job_execution(instance.id).unwrap().unwrap();
    launcher.mark_failed(stale.id).unwrap();
    writer.armed.store(false, Ordering::SeqCst);

    let resumed = launcher.run(&job, parameters).unwrap();
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(resumed.step_executions[0].write_count, 6);
    assert_eq!(writer.written(), (1..=9).collect::<Vec<u32>>());
}

#[test]
fn restart_after_a_write_skip_failure_does_not_rewrite_scanned_items() {
    init_logger();
    let broken = AtomicBool::new(true);
    let reader = ListItemReader::new("numbers", (1..=10).collect::<Vec<u32>>());
    let writer = RejectingWriter::new(|n: &u32| *n == 8 && broken.load(Ordering::SeqCst));
    let step = StepBuilder::new("load")
        .chunk::<u32>(3)
        .reader(&reader)
        .writer(&writer)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("loader").start(&step).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_long("run.id", 1).build();

    let first = launcher.run(&job, parameters.clone()).unwrap();
    assert_eq!(first.status, BatchStatus::Failed);
    assert_eq!(writer.written(), vec![1, 2, 3, 4, 5, 6, 7]);
    let failed = first.step_execution("load").unwrap();
    assert_eq!(failed.execution_context.get_usize("numbers.read.count"), Some(6));
    assert_eq!(failed.execution_context.get_usize("batch.chunk.scanned"), Some(1));

    broken.store(false, Ordering::SeqCst);
    let second = launcher.run(&job, parameters).unwrap();

    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(writer.written(), (1..=10).collect::<Vec<u32>>());
    let resumed = second.step_execution("load").unwrap();
    assert_eq!(resumed.write_count, 3);
    assert_eq!(resumed.execution_context.get_usize("batch.chunk.scanned"), None);
}
