use anyhow::Result;
use batch_engine::core::{
    flow::{FlowBuilder, FlowNode, FnDecider},
    job::{JobBuilder, JobExecution},
    launcher::JobLauncher,
    parameters::JobParametersBuilder,
    repository::InMemoryJobRepository,
    step::{ExitStatus, StepBuilder, StepExecution},
    tasklet::{FnTasklet, RepeatStatus},
};
use log::info;

fn main() -> Result<()> {
    env_logger::init();

    let scan = FnTasklet::new(|step_execution, context| {
        let files = context.job_parameters().get_long("files").unwrap_or(0);
        info!("Found {} files to import", files);
        step_execution.write_count = files as usize;
        step_execution
            .execution_context
            .put_usize("inbox.files", files as usize);
        Ok(RepeatStatus::Finished)
    });
    let import_customers = FnTasklet::new(|_, context| {
        let files = context.job_context().get_usize("inbox.files").unwrap_or(0);
        info!("Importing customers from {} files", files);
        Ok(RepeatStatus::Finished)
    });
    let import_orders = FnTasklet::new(|_, _| {
        info!("Importing orders");
        Ok(RepeatStatus::Finished)
    });
    let report = FnTasklet::new(|_, _| {
        info!("Writing import report");
        Ok(RepeatStatus::Finished)
    });

    let scan_step = StepBuilder::new("scan")
        .tasklet(&scan)
        .promote_keys(&["inbox.files"])
        .build();
    let customers_step = StepBuilder::new("customers").tasklet(&import_customers).build();
    let orders_step = StepBuilder::new("orders").tasklet(&import_orders).build();
    let report_step = StepBuilder::new("report").tasklet(&report).build();

    let inbox_empty = FnDecider::new(|_: &JobExecution, last: Option<&StepExecution>| {
        match last {
            Some(step) if step.write_count == 0 => ExitStatus::new("EMPTY"),
            _ => ExitStatus::completed(),
        }
    });

    let customers = FlowBuilder::new("customers-flow")
        .start_step(&customers_step)
        .build()?;
    let orders = FlowBuilder::new("orders-flow")
        .start_step(&orders_step)
        .build()?;

    let flow = FlowBuilder::new("inbox")
        .start_step(&scan_step)
        .next(FlowNode::decision("inbox-empty", &inbox_empty))
        .on("EMPTY")
        .end()
        .from("inbox-empty")
        .on("*")
        .to(FlowNode::split("import", vec![&customers, &orders]))
        .next_step(&report_step)
        .build()?;

    let job = JobBuilder::new().name("inbox").flow(flow).build()?;

    let repository = InMemoryJobRepository::new();
    let mut launcher = JobLauncher::new(&repository);
    launcher.register(&job)?;

    for files in [0, 3] {
        let parameters = JobParametersBuilder::new().add_long("files", files).build();
        let execution = launcher.launch("inbox", parameters)?;
        println!("{}", execution.summary());
    }

    Ok(())
}
