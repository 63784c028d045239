mod common;

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use batch_engine::{
    BatchError,
    core::{
        job::{JobBuilder, JobExecution},
        launcher::{EXIT_FAILED, EXIT_INVALID_LAUNCH, JobLauncher, exit_code, launch_exit_code},
        listener::JobExecutionListener,
        parameters::{
            CompositeJobParametersValidator, DailyTimestamper, DefaultJobParametersValidator,
            FnJobParametersValidator, JobParameters, JobParametersBuilder, JobParametersValidator,
            RunIdIncrementer,
        },
        repository::{InMemoryJobRepository, JobRepository},
        step::{BatchStatus, ExitStatus, StepBuilder},
        tasklet::{FnTasklet, RepeatStatus},
    },
};

use common::init_logger;

#[test]
fn identifying_parameters_select_the_instance() {
    init_logger();
    let failing = AtomicBool::new(true);
    let tasklet = FnTasklet::new(|_, _| {
        if failing.load(Ordering::SeqCst) {
            Err(BatchError::Tasklet("not yet".to_string()))
        } else {
            Ok(RepeatStatus::Finished)
        }
    });
    let step = StepBuilder::new("import").tasklet(&tasklet).build();
    let job = JobBuilder::new().name("import").start(&step).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let mut launcher = JobLauncher::new(&repository);
    launcher.register(&job).unwrap();

    let first = launcher
        .launch(
            "import",
            JobParameters::from_args(["fileName=a.csv", "-chunk(long)=5"]).unwrap(),
        )
        .unwrap();
    assert_eq!(first.status, BatchStatus::Failed);
    assert_eq!(exit_code(&first), EXIT_FAILED);

    // Only the non-identifying parameter changed: same instance, new execution.
    failing.store(false, Ordering::SeqCst);
    let second = launcher
        .launch(
            "import",
            JobParameters::from_args(["fileName=a.csv", "-chunk(long)=50"]).unwrap(),
        )
        .unwrap();
    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(second.job_instance_id, first.job_instance_id);
    assert_eq!(second.job_parameters.get_long("chunk"), Some(50));

    let other = launcher
        .launch("import", JobParameters::from_args(["fileName=b.csv"]).unwrap())
        .unwrap();
    assert_ne!(other.job_instance_id, first.job_instance_id);

    assert_eq!(
        repository
            .find_job_executions(first.job_instance_id)
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn completed_instance_is_not_launched_again() {
    init_logger();
    let calls = AtomicUsize::new(0);
    let tasklet = FnTasklet::new(|_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let step = StepBuilder::new("once").tasklet(&tasklet).build();
    let job = JobBuilder::new().name("once").start(&step).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_string("day", "2024-01-01").build();

    let first = launcher.run(&job, parameters.clone()).unwrap();
    assert_eq!(first.status, BatchStatus::Completed);

    let refused = launcher.run(&job, parameters);
    assert!(matches!(refused, Err(BatchError::JobInstanceAlreadyComplete(_))));
    assert_eq!(launch_exit_code(&refused), EXIT_INVALID_LAUNCH);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        repository
            .find_job_executions(first.job_instance_id)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn invalid_parameters_never_reach_the_repository() {
    init_logger();
    let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let step = StepBuilder::new("load").tasklet(&tasklet).build();

    let keys = DefaultJobParametersValidator::new(&["fileName"], &["run.id"]);
    let csv_only = FnJobParametersValidator::new(|parameters: &JobParameters| {
        match parameters.get_string("fileName") {
            Some(name) if name.ends_with(".csv") => Ok(()),
            _ => Err(BatchError::Validation("fileName must be a csv file".to_string())),
        }
    });
    let validators: Vec<&dyn JobParametersValidator> = vec![&keys, &csv_only];
    let validator = CompositeJobParametersValidator::new(validators);
    let job = JobBuilder::new()
        .name("validated")
        .start(&step)
        .validator(&validator)
        .build()
        .unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);

    let missing = launcher.run(&job, JobParameters::new());
    assert!(matches!(missing, Err(BatchError::Validation(_))));

    let unexpected = launcher.run(
        &job,
        JobParameters::from_args(["fileName=a.csv", "mode=full"]).unwrap(),
    );
    assert!(matches!(unexpected, Err(BatchError::Validation(_))));

    let wrong_extension = launcher.run(&job, JobParameters::from_args(["fileName=a.txt"]).unwrap());
    assert!(matches!(wrong_extension, Err(BatchError::Validation(_))));
    assert_eq!(launch_exit_code(&wrong_extension), EXIT_INVALID_LAUNCH);

    assert!(repository.get_last_job_instance("validated").unwrap().is_none());

    let accepted = launcher
        .run(&job, JobParameters::from_args(["fileName=a.csv"]).unwrap())
        .unwrap();
    assert_eq!(accepted.status, BatchStatus::Completed);
}

#[test]
fn explicit_parameters_override_incremented_ones() {
    init_logger();
    let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let step = StepBuilder::new("tick").tasklet(&tasklet).build();
    let incrementer = RunIdIncrementer::new();
    let job = JobBuilder::new()
        .name("ticker")
        .start(&step)
        .incrementer(&incrementer)
        .build()
        .unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);

    let first = launcher.run(&job, JobParameters::new()).unwrap();
    assert_eq!(first.job_parameters.get_long("run.id"), Some(1));

    let pinned = launcher
        .run(&job, JobParametersBuilder::new().add_long("run.id", 10).build())
        .unwrap();
    assert_eq!(pinned.job_parameters.get_long("run.id"), Some(10));

    let next = launcher.run(&job, JobParameters::new()).unwrap();
    assert_eq!(next.job_parameters.get_long("run.id"), Some(11));
    assert_eq!(next.status, BatchStatus::Completed);
}

#[test]
fn daily_timestamper_stamps_each_launch() {
    init_logger();
    let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let step = StepBuilder::new("stamp").tasklet(&tasklet).build();
    let job = JobBuilder::new()
        .name("stamped")
        .start(&step)
        .incrementer(&DailyTimestamper)
        .build()
        .unwrap();

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository)
        .run(&job, JobParameters::new())
        .unwrap();
    assert!(
        execution
            .job_parameters
            .get_date(DailyTimestamper::CURRENT_DATE_KEY)
            .is_some()
    );
}

#[test]
fn start_limit_caps_attempts_of_a_step() {
    init_logger();
    let tasklet = FnTasklet::new(|_, _| Err(BatchError::Tasklet("always broken".to_string())));
    let step = StepBuilder::new("flaky")
        .tasklet(&tasklet)
        .start_limit(2)
        .build();
    let job = JobBuilder::new().name("limited").start(&step).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_string("id", "1").build();

    for _ in 0..2 {
        let execution = launcher.run(&job, parameters.clone()).unwrap();
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.step_executions.len(), 1);
    }

    let third = launcher.run(&job, parameters).unwrap();
    assert_eq!(third.status, BatchStatus::Failed);
    assert!(third.step_executions.is_empty());
    assert!(third.failures[0].contains("start limit of 2"));
    assert_eq!(
        repository
            .get_step_execution_count(third.job_instance_id, "flaky")
            .unwrap(),
        2
    );
}

#[test]
fn non_restartable_job_refuses_a_second_execution() {
    init_logger();
    let tasklet = FnTasklet::new(|_, _| Err(BatchError::Tasklet("broken".to_string())));
    let step = StepBuilder::new("once").tasklet(&tasklet).build();
    let job = JobBuilder::new()
        .name("one-shot")
        .start(&step)
        .prevent_restart()
        .build()
        .unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_string("id", "1").build();

    assert_eq!(
        launcher.run(&job, parameters.clone()).unwrap().status,
        BatchStatus::Failed
    );
    assert!(matches!(
        launcher.run(&job, parameters),
        Err(BatchError::JobRestart(_))
    ));
}

#[test]
fn abandoned_execution_cannot_be_restarted() {
    init_logger();
    let tasklet = FnTasklet::new(|_, _| Err(BatchError::Tasklet("broken".to_string())));
    let step = StepBuilder::new("step").tasklet(&tasklet).build();
    let job = JobBuilder::new().name("abandoned").start(&step).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_string("id", "1").build();

    let failed = launcher.run(&job, parameters.clone()).unwrap();
    launcher.abandon(failed.id).unwrap();
    assert_eq!(
        repository.get_job_execution_status(failed.id).unwrap(),
        Some(BatchStatus::Abandoned)
    );

    assert!(matches!(
        launcher.run(&job, parameters),
        Err(BatchError::JobRestart(_))
    ));
}

#[test]
fn stop_and_mark_failed_need_a_running_execution() {
    init_logger();
    let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let step = StepBuilder::new("step").tasklet(&tasklet).build();
    let job = JobBuilder::new().name("quick").start(&step).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let done = launcher.run(&job, JobParameters::new()).unwrap();

    assert!(matches!(launcher.stop(done.id), Err(BatchError::JobRestart(_))));
    assert!(matches!(
        launcher.mark_failed(done.id),
        Err(BatchError::JobRestart(_))
    ));
    assert!(launcher.stop(uuid::Uuid::new_v4()).is_err());
}

#[test]
fn promoted_keys_are_visible_to_later_steps() {
    init_logger();
    let produce = FnTasklet::new(|step_execution, _| {
        step_execution
            .execution_context
            .put_string("customer.file", "customers-2024.csv");
        step_execution.execution_context.put_usize("scratch", 42);
        Ok(RepeatStatus::Finished)
    });
    let seen = Mutex::new(None);
    let consume = FnTasklet::new(|_, context| {
        *seen.lock().unwrap() = context.job_context().get_string("customer.file");
        Ok(RepeatStatus::Finished)
    });

    let producer = StepBuilder::new("produce")
        .tasklet(&produce)
        .promote_keys(&["customer.file"])
        .build();
    let consumer = StepBuilder::new("consume").tasklet(&consume).build();
    let job = JobBuilder::new()
        .name("handoff")
        .start(&producer)
        .next(&consumer)
        .build()
        .unwrap();

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository)
        .run(&job, JobParameters::new())
        .unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(
        seen.lock().unwrap().as_deref(),
        Some("customers-2024.csv")
    );
    assert_eq!(
        execution.execution_context.get_string("customer.file").as_deref(),
        Some("customers-2024.csv")
    );
    assert!(!execution.execution_context.contains_key("scratch"));
}

struct AuditListener {
    before: AtomicUsize,
}

impl JobExecutionListener for AuditListener {
    fn before_job(&self, _job_execution: &JobExecution) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    fn after_job(&self, job_execution: &JobExecution) -> Option<ExitStatus> {
        (job_execution.status == BatchStatus::Completed).then(|| ExitStatus::new("AUDITED"))
    }
}

#[test]
fn job_listener_can_replace_the_exit_status() {
    init_logger();
    let tasklet = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let step = StepBuilder::new("step").tasklet(&tasklet).build();
    let listener = AuditListener {
        before: AtomicUsize::new(0),
    };
    let job = JobBuilder::new()
        .name("audited")
        .start(&step)
        .listener(&listener)
        .build()
        .unwrap();

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository)
        .run(&job, JobParameters::new())
        .unwrap();

    assert_eq!(listener.before.load(Ordering::SeqCst), 1);
    assert_eq!(execution.exit_status.exit_code, "AUDITED");
    let stored = repository.get_job_execution(execution.id).unwrap().unwrap();
    assert_eq!(stored.exit_status.exit_code, "AUDITED");
}
