mod common;

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use batch_engine::{
    BatchError,
    core::{
        flow::{FlowBuilder, FlowNode, FlowStep, FnDecider, RESTART_KEY_PREFIX},
        job::{FlowJob, JobBuilder, JobExecution},
        launcher::{EXIT_STOPPED, JobLauncher, exit_code},
        parameters::{JobParameters, JobParametersBuilder},
        repository::{InMemoryJobRepository, JobRepository},
        step::{BatchStatus, ExitStatus, StepBuilder},
        tasklet::{FnTasklet, RepeatStatus},
    },
};

use common::init_logger;

fn launch(job: &FlowJob<'_>, parameters: JobParameters) -> JobExecution {
    init_logger();
    let repository = InMemoryJobRepository::new();
    JobLauncher::new(&repository).run(job, parameters).unwrap()
}

fn step_names(execution: &JobExecution) -> Vec<&str> {
    execution
        .step_executions
        .iter()
        .map(|step| step.name.as_str())
        .collect()
}

#[test]
fn failed_step_is_routed_to_recovery() {
    let failing = AtomicBool::new(true);
    let load_tasklet = FnTasklet::new(|_, _| {
        if failing.load(Ordering::SeqCst) {
            Err(BatchError::Tasklet("database unreachable".to_string()))
        } else {
            Ok(RepeatStatus::Finished)
        }
    });
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));

    let load = StepBuilder::new("load").tasklet(&load_tasklet).build();
    let recover = StepBuilder::new("recover").tasklet(&noop).build();
    let report = StepBuilder::new("report").tasklet(&noop).build();

    let flow = FlowBuilder::new("import")
        .start_step(&load)
        .on("FAILED")
        .to_step(&recover)
        .from("load")
        .on("*")
        .to_step(&report)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("import").flow(flow).build().unwrap();

    let recovered = launch(&job, JobParameters::new());
    assert_eq!(recovered.status, BatchStatus::Completed);
    assert_eq!(step_names(&recovered), vec!["load", "recover"]);
    assert_eq!(recovered.step_executions[0].status, BatchStatus::Failed);

    failing.store(false, Ordering::SeqCst);
    let reported = launch(&job, JobParameters::new());
    assert_eq!(reported.status, BatchStatus::Completed);
    assert_eq!(step_names(&reported), vec!["load", "report"]);
}

#[test]
fn unmatched_failure_fails_the_job() {
    let broken = FnTasklet::new(|_, _| Err(BatchError::Tasklet("boom".to_string())));
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let first = StepBuilder::new("first").tasklet(&broken).build();
    let second = StepBuilder::new("second").tasklet(&noop).build();

    let job = JobBuilder::new()
        .name("linear")
        .start(&first)
        .next(&second)
        .build()
        .unwrap();

    let execution = launch(&job, JobParameters::new());
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(step_names(&execution), vec!["first"]);
    assert_eq!(
        execution.failed_step().map(|step| step.name.as_str()),
        Some("first")
    );
}

#[test]
fn end_and_fail_override_the_step_status() {
    let broken = FnTasklet::new(|_, _| Err(BatchError::Tasklet("boom".to_string())));
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let tolerated = StepBuilder::new("tolerated").tasklet(&broken).build();
    let strict = StepBuilder::new("strict").tasklet(&noop).build();

    let lenient = FlowBuilder::new("lenient")
        .start_step(&tolerated)
        .on("FAILED")
        .end()
        .build()
        .unwrap();
    let lenient_job = JobBuilder::new().name("lenient").flow(lenient).build().unwrap();
    assert_eq!(
        launch(&lenient_job, JobParameters::new()).status,
        BatchStatus::Completed
    );

    let harsh = FlowBuilder::new("harsh")
        .start_step(&strict)
        .on("*")
        .fail()
        .build()
        .unwrap();
    let harsh_job = JobBuilder::new().name("harsh").flow(harsh).build().unwrap();
    let execution = launch(&harsh_job, JobParameters::new());
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.step_executions[0].status, BatchStatus::Completed);
}

#[test]
fn custom_exit_code_selects_the_transition() {
    let empty_input = FnTasklet::new(|step_execution, _| {
        step_execution.exit_status = ExitStatus::new("NO INPUT");
        Ok(RepeatStatus::Finished)
    });
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let check = StepBuilder::new("check").tasklet(&empty_input).build();
    let notify = StepBuilder::new("notify").tasklet(&noop).build();
    let process = StepBuilder::new("process").tasklet(&noop).build();

    let flow = FlowBuilder::new("guarded")
        .start_step(&check)
        .on("NO*")
        .to_step(&notify)
        .from("check")
        .on("COMPLETED")
        .to_step(&process)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("guarded").flow(flow).build().unwrap();

    let execution = launch(&job, JobParameters::new());
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_names(&execution), vec!["check", "notify"]);
    assert_eq!(execution.step_executions[0].exit_status.exit_code, "NO INPUT");
}

#[test]
fn decider_routes_on_job_parameters() {
    let decider = FnDecider::new(|job_execution: &JobExecution, _| {
        match job_execution.job_parameters.get_string("mode") {
            Some("full") => ExitStatus::new("FULL"),
            _ => ExitStatus::new("DELTA"),
        }
    });
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let full = StepBuilder::new("full").tasklet(&noop).build();
    let delta = StepBuilder::new("delta").tasklet(&noop).build();

    let flow = FlowBuilder::new("sync")
        .start(FlowNode::decision("mode", &decider))
        .on("FULL")
        .to_step(&full)
        .from("mode")
        .on("DELTA")
        .to_step(&delta)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("sync").flow(flow).build().unwrap();

    let parameters = JobParametersBuilder::new().add_string("mode", "full").build();
    assert_eq!(step_names(&launch(&job, parameters)), vec!["full"]);

    let parameters = JobParametersBuilder::new().add_string("mode", "incremental").build();
    assert_eq!(step_names(&launch(&job, parameters)), vec!["delta"]);
}

#[test]
fn decider_sees_the_previous_step() {
    let counting = FnTasklet::new(|step_execution, _| {
        step_execution.write_count = 0;
        Ok(RepeatStatus::Finished)
    });
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let load = StepBuilder::new("load").tasklet(&counting).build();
    let archive = StepBuilder::new("archive").tasklet(&noop).build();
    let decider = FnDecider::new(|_: &JobExecution, step| match step {
        Some(step) if step.write_count == 0 => ExitStatus::new("EMPTY"),
        _ => ExitStatus::completed(),
    });

    let flow = FlowBuilder::new("load-then-archive")
        .start_step(&load)
        .next(FlowNode::decision("anything-written", &decider))
        .on("EMPTY")
        .end()
        .from("anything-written")
        .on("*")
        .to_step(&archive)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("archive").flow(flow).build().unwrap();

    let execution = launch(&job, JobParameters::new());
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_names(&execution), vec!["load"]);
}

#[test]
fn split_runs_every_branch_and_keeps_the_worst_status() {
    let calls = AtomicUsize::new(0);
    let ok = FnTasklet::new(|_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let broken = FnTasklet::new(|_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(BatchError::Tasklet("branch failure".to_string()))
    });

    let customers = StepBuilder::new("customers").tasklet(&ok).build();
    let orders = StepBuilder::new("orders").tasklet(&broken).build();
    let merge = StepBuilder::new("merge").tasklet(&ok).build();

    let customers_flow = FlowBuilder::new("customers-flow")
        .start_step(&customers)
        .build()
        .unwrap();
    let orders_flow = FlowBuilder::new("orders-flow")
        .start_step(&orders)
        .build()
        .unwrap();

    let flow = FlowBuilder::new("parallel-import")
        .start(FlowNode::split("import", vec![&customers_flow, &orders_flow]))
        .next_step(&merge)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("parallel").flow(flow).build().unwrap();

    let execution = launch(&job, JobParameters::new());
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let mut names = step_names(&execution);
    names.sort();
    assert_eq!(names, vec!["customers", "orders"]);
}

#[test]
fn successful_split_continues_with_the_next_node() {
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let left = StepBuilder::new("left").tasklet(&noop).build();
    let right = StepBuilder::new("right").tasklet(&noop).build();
    let join = StepBuilder::new("join").tasklet(&noop).build();

    let left_flow = FlowBuilder::new("left-flow").start_step(&left).build().unwrap();
    let right_flow = FlowBuilder::new("right-flow").start_step(&right).build().unwrap();
    let flow = FlowBuilder::new("fan-out")
        .start(FlowNode::split("both", vec![&left_flow, &right_flow]))
        .next_step(&join)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("fan-out").flow(flow).build().unwrap();

    let execution = launch(&job, JobParameters::new());
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.step_executions.len(), 3);
    assert_eq!(execution.step_executions[2].name, "join");
}

#[test]
fn stop_and_restart_resumes_at_the_named_node() {
    init_logger();
    let extract_calls = AtomicUsize::new(0);
    let load_calls = AtomicUsize::new(0);
    let extract_tasklet = FnTasklet::new(|_, _| {
        extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let load_tasklet = FnTasklet::new(|_, _| {
        load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let extract = StepBuilder::new("extract").tasklet(&extract_tasklet).build();
    let load = StepBuilder::new("load").tasklet(&load_tasklet).build();

    let flow = FlowBuilder::new("review")
        .start_step(&extract)
        .on("COMPLETED")
        .stop_and_restart(FlowNode::step(&load))
        .build()
        .unwrap();
    let job = JobBuilder::new().name("review").flow(flow).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_string("batch", "B-42").build();

    let paused = launcher.run(&job, parameters.clone()).unwrap();
    assert_eq!(paused.status, BatchStatus::Stopped);
    assert_eq!(exit_code(&paused), EXIT_STOPPED);
    assert_eq!(
        paused
            .execution_context
            .get_string(&format!("{}review", RESTART_KEY_PREFIX)),
        Some("load".to_string())
    );
    assert_eq!(load_calls.load(Ordering::SeqCst), 0);

    let resumed = launcher.run(&job, parameters).unwrap();
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(resumed.job_instance_id, paused.job_instance_id);
    assert_eq!(step_names(&resumed), vec!["load"]);
    assert_eq!(extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(load_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn stopped_step_ends_the_flow_despite_a_catch_all_transition() {
    init_logger();
    let report_calls = AtomicUsize::new(0);
    let poll_tasklet = FnTasklet::new(|_, _| {
        thread::sleep(Duration::from_millis(2));
        Ok(RepeatStatus::Continuable)
    });
    let report_tasklet = FnTasklet::new(|_, _| {
        report_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let poll = StepBuilder::new("poll").tasklet(&poll_tasklet).build();
    let report = StepBuilder::new("report").tasklet(&report_tasklet).build();

    let flow = FlowBuilder::new("watch")
        .start_step(&poll)
        .on("*")
        .to_step(&report)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("watch").flow(flow).build().unwrap();

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParametersBuilder::new().add_long("run.id", 1).build();

    let stopped = thread::scope(|scope| {
        let handle = scope.spawn(|| launcher.run(&job, parameters.clone()));
        let execution_id = loop {
            let running = repository
                .get_last_job_instance("watch")
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
    assert_eq!(step_names(&stopped), vec!["poll"]);
    assert_eq!(report_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn stopped_step_follows_a_transition_naming_stopped() {
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let halting = FnTasklet::new(|step_execution, _| {
        step_execution.set_terminate_only();
        Ok(RepeatStatus::Finished)
    });
    let check = StepBuilder::new("check").tasklet(&halting).build();
    let cleanup = StepBuilder::new("cleanup").tasklet(&noop).build();
    let report = StepBuilder::new("report").tasklet(&noop).build();

    let flow = FlowBuilder::new("audit")
        .start_step(&check)
        .on("STOPPED")
        .to_step(&cleanup)
        .from("check")
        .on("*")
        .to_step(&report)
        .build()
        .unwrap();
    let job = JobBuilder::new().name("audit").flow(flow).build().unwrap();

    let execution = launch(&job, JobParameters::new());
    assert_eq!(execution.step_executions[0].status, BatchStatus::Stopped);
    assert_eq!(step_names(&execution), vec!["check", "cleanup"]);
}

#[test]
fn flow_step_runs_a_nested_flow() {
    let calls = AtomicUsize::new(0);
    let counting = FnTasklet::new(|_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    });
    let prepare = StepBuilder::new("prepare").tasklet(&counting).build();
    let inner_a = StepBuilder::new("inner-a").tasklet(&counting).build();
    let inner_b = StepBuilder::new("inner-b").tasklet(&counting).build();

    let inner = FlowBuilder::new("inner")
        .start_step(&inner_a)
        .next_step(&inner_b)
        .build()
        .unwrap();
    let nested = FlowStep::new("nested", &inner);

    let job = JobBuilder::new()
        .name("outer")
        .start(&prepare)
        .next(&nested)
        .build()
        .unwrap();

    let execution = launch(&job, JobParameters::new());
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let names = step_names(&execution);
    for expected in ["prepare", "inner-a", "inner-b", "nested"] {
        assert!(names.contains(&expected), "missing {} in {:?}", expected, names);
    }
}

#[test]
fn failing_nested_flow_fails_its_flow_step() {
    let broken = FnTasklet::new(|_, _| Err(BatchError::Tasklet("inner failure".to_string())));
    let inner_step = StepBuilder::new("inner").tasklet(&broken).build();
    let inner = FlowBuilder::new("inner-flow").start_step(&inner_step).build().unwrap();
    let nested = FlowStep::new("nested", &inner);
    let job = JobBuilder::new().name("outer").start(&nested).build().unwrap();

    let execution = launch(&job, JobParameters::new());
    assert_eq!(execution.status, BatchStatus::Failed);
    let nested_execution = execution.step_execution("nested").unwrap();
    assert_eq!(nested_execution.status, BatchStatus::Failed);
}

#[test]
fn job_cannot_mix_a_flow_and_steps() {
    let noop = FnTasklet::new(|_, _| Ok(RepeatStatus::Finished));
    let a = StepBuilder::new("a").tasklet(&noop).build();
    let b = StepBuilder::new("b").tasklet(&noop).build();
    let flow = FlowBuilder::new("f").start_step(&a).build().unwrap();

    let result = JobBuilder::new().name("mixed").start(&b).flow(flow).build();
    assert!(matches!(result, Err(BatchError::Definition(_))));
}
