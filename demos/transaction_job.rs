use std::{env, fs, process};

use anyhow::Result;
use batch_engine::{
    BatchError, FailureKind,
    core::{
        fault::ClassifierFaultPolicy,
        item::{ItemWriter, Validator},
        job::JobBuilder,
        launcher::{JobLauncher, launch_exit_code},
        listener::SkipCheckingListener,
        parameters::{JobParameters, RunIdIncrementer},
        repository::FileJobRepository,
        step::StepBuilder,
    },
    item::{
        composite::{CompositeItemWriter, ValidatingItemProcessor},
        csv::{csv_reader::CsvItemReaderBuilder, csv_writer::CsvItemWriterBuilder},
        logger::LoggerWriter,
    },
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
struct Transaction {
    id: u32,
    account: String,
    amount: f64,
}

struct PositiveAmount;

impl Validator<Transaction> for PositiveAmount {
    fn validate(&self, item: &Transaction) -> Result<(), BatchError> {
        if item.amount > 0.0 {
            Ok(())
        } else {
            Err(BatchError::Validation(format!(
                "transaction {} has a non positive amount",
                item.id
            )))
        }
    }
}

const INPUT: &str = "id,account,amount
1,ACC-001,120.50
2,ACC-002,-15.00
3,ACC-001,not-a-number
4,ACC-003,99.99
5,ACC-002,42.00";

fn main() -> Result<()> {
    env_logger::init();

    let work_dir = env::temp_dir().join("batch-engine-transactions");
    fs::create_dir_all(&work_dir)?;
    let input = work_dir.join("transactions.csv");
    fs::write(&input, INPUT)?;

    let reader = CsvItemReaderBuilder::new()
        .name("transactions")
        .has_headers(true)
        .from_path(&input)?;
    let validator = PositiveAmount;
    let processor = ValidatingItemProcessor::new(&validator);

    let csv_writer = CsvItemWriterBuilder::new()
        .name("accepted")
        .has_headers(true)
        .from_path(work_dir.join("accepted.csv"));
    let logger = LoggerWriter::with_label("Transaction");
    let delegates: Vec<&dyn ItemWriter<Transaction>> = vec![&csv_writer, &logger];
    let writer = CompositeItemWriter::new(delegates);

    // Bad rows and rejected amounts are skipped, up to five of them.
    let fault_policy = ClassifierFaultPolicy::builder()
        .skip(FailureKind::Validation)
        .build();
    let skip_listener = SkipCheckingListener;

    let step = StepBuilder::new("load-transactions")
        .chunk::<Transaction>(2)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .fault_policy(&fault_policy)
        .skip_limit(5)
        .listener(&skip_listener)
        .build()?;

    let incrementer = RunIdIncrementer::new();
    let job = JobBuilder::new()
        .name("transactions")
        .start(&step)
        .incrementer(&incrementer)
        .build()?;

    let repository = FileJobRepository::open(work_dir.join("repository.json"))?;
    let mut launcher = JobLauncher::new(&repository);
    launcher.register(&job)?;

    let parameters = JobParameters::from_args(env::args().skip(1))?;
    let result = launcher.launch("transactions", parameters);
    match &result {
        Ok(execution) => println!("{}", execution.summary()),
        Err(err) => eprintln!("Launch refused: {}", err),
    }

    process::exit(launch_exit_code(&result));
}
