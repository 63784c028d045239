//! Job parameters identify a job instance and configure its executions.
//!
//! Identifying parameters take part in the instance key: launching the same
//! job twice with the same identifying parameters targets the same instance,
//! which is how a failed run is restarted. Non-identifying parameters are
//! passed to the execution but ignored when looking the instance up.
//!
//! # Examples
//!
//! ```
//! use batch_engine::core::parameters::{JobParameter, JobParametersBuilder};
//!
//! let first = JobParametersBuilder::new()
//!     .add_string("fileName", "customers.csv")
//!     .add_parameter("chunkSize", JobParameter::long(10).non_identifying())
//!     .build();
//! let second = JobParametersBuilder::new()
//!     .add_string("fileName", "customers.csv")
//!     .add_parameter("chunkSize", JobParameter::long(50).non_identifying())
//!     .build();
//!
//! assert_eq!(first.to_identifying_key(), second.to_identifying_key());
//! ```

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::BatchError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => f.write_str(value),
            ParameterValue::Long(value) => write!(f, "{}", value),
            ParameterValue::Double(value) => write!(f, "{}", value),
            ParameterValue::Date(value) => f.write_str(&value.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    value: ParameterValue,
    identifying: bool,
}

impl JobParameter {
    pub fn new(value: ParameterValue, identifying: bool) -> Self {
        Self { value, identifying }
    }

    pub fn string(value: &str) -> Self {
        Self::new(ParameterValue::String(value.to_string()), true)
    }

    pub fn long(value: i64) -> Self {
        Self::new(ParameterValue::Long(value), true)
    }

    pub fn double(value: f64) -> Self {
        Self::new(ParameterValue::Double(value), true)
    }

    pub fn date(value: DateTime<Utc>) -> Self {
        Self::new(ParameterValue::Date(value), true)
    }

    pub fn non_identifying(mut self) -> Self {
        self.identifying = false;
        self
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn is_identifying(&self) -> bool {
        self.identifying
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key).map(JobParameter::value) {
            Some(ParameterValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key).map(JobParameter::value) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key).map(JobParameter::value) {
            Some(ParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key).map(JobParameter::value) {
            Some(ParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.parameters.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// SHA-256 over the identifying parameters, sorted by key.
    ///
    /// The type of each value is part of the key, so `run.id(long)=1` and
    /// `run.id=1` name different instances. Every field is length-prefixed:
    /// no value can spell out the boundary of another parameter.
    pub fn to_identifying_key(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, parameter) in self.parameters.iter().filter(|(_, p)| p.identifying) {
            let type_name = match parameter.value {
                ParameterValue::String(_) => "string",
                ParameterValue::Long(_) => "long",
                ParameterValue::Double(_) => "double",
                ParameterValue::Date(_) => "date",
            };
            let value = parameter.value.to_string();
            for field in [key.as_str(), type_name, value.as_str()] {
                hasher.update((field.len() as u64).to_be_bytes());
                hasher.update(field.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// A copy of `self` with every parameter of `other` added, `other` winning on conflicts.
    pub fn merge(&self, other: &JobParameters) -> JobParameters {
        let mut parameters = self.parameters.clone();
        for (key, parameter) in &other.parameters {
            parameters.insert(key.clone(), parameter.clone());
        }
        JobParameters { parameters }
    }

    /// Parses command line style arguments.
    ///
    /// Each argument has the form `key=value` or `key(type)=value`, with type one
    /// of `string`, `long`, `double` or `date` (RFC 3339 or `YYYY-MM-DD`). A
    /// leading `-` marks the parameter as non-identifying.
    ///
    /// ```
    /// use batch_engine::core::parameters::JobParameters;
    ///
    /// let parameters = JobParameters::from_args(["fileName=a.csv", "-run.id(long)=4"])?;
    /// assert_eq!(parameters.get_string("fileName"), Some("a.csv"));
    /// assert_eq!(parameters.get_long("run.id"), Some(4));
    /// # Ok::<(), batch_engine::BatchError>(())
    /// ```
    pub fn from_args<I, S>(args: I) -> Result<JobParameters, BatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parameters = BTreeMap::new();
        for arg in args {
            let (key, parameter) = parse_arg(arg.as_ref())?;
            parameters.insert(key, parameter);
        }
        Ok(JobParameters { parameters })
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .parameters
            .iter()
            .map(|(key, parameter)| format!("{}={}", key, parameter.value))
            .collect();
        write!(f, "{{{}}}", rendered.join(", "))
    }
}

fn parse_arg(arg: &str) -> Result<(String, JobParameter), BatchError> {
    let (identifying, arg) = match arg.strip_prefix('-') {
        Some(rest) => (false, rest),
        None => (true, arg),
    };
    let (name, raw) = arg
        .split_once('=')
        .ok_or_else(|| BatchError::Validation(format!("expected key=value, got {}", arg)))?;

    let (key, type_name) = match name.split_once('(') {
        Some((key, rest)) => {
            let type_name = rest.strip_suffix(')').ok_or_else(|| {
                BatchError::Validation(format!("unterminated type in parameter {}", name))
            })?;
            (key, type_name)
        }
        None => (name, "string"),
    };
    if key.is_empty() {
        return Err(BatchError::Validation(format!(
            "empty parameter name in {}",
            arg
        )));
    }

    let invalid = |kind: &str| {
        BatchError::Validation(format!("parameter {}: {} is not a valid {}", key, raw, kind))
    };
    let value = match type_name.to_ascii_lowercase().as_str() {
        "string" => ParameterValue::String(raw.to_string()),
        "long" => ParameterValue::Long(raw.parse().map_err(|_| invalid("long"))?),
        "double" => ParameterValue::Double(raw.parse().map_err(|_| invalid("double"))?),
        "date" => ParameterValue::Date(parse_date(raw).ok_or_else(|| invalid("date"))?),
        other => {
            return Err(BatchError::Validation(format!(
                "parameter {} has unknown type {}",
                key, other
            )));
        }
    };

    Ok((key.to_string(), JobParameter::new(value, identifying)))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(raw) {
        return Some(date_time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date_time| date_time.and_utc())
}

#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing set of parameters.
    pub fn from(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.parameters.clone(),
        }
    }

    pub fn add_string(self, key: &str, value: &str) -> Self {
        self.add_parameter(key, JobParameter::string(value))
    }

    pub fn add_long(self, key: &str, value: i64) -> Self {
        self.add_parameter(key, JobParameter::long(value))
    }

    pub fn add_double(self, key: &str, value: f64) -> Self {
        self.add_parameter(key, JobParameter::double(value))
    }

    pub fn add_date(self, key: &str, value: DateTime<Utc>) -> Self {
        self.add_parameter(key, JobParameter::date(value))
    }

    pub fn add_parameter(mut self, key: &str, parameter: JobParameter) -> Self {
        self.parameters.insert(key.to_string(), parameter);
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

/// Checks parameters before a job execution is created.
pub trait JobParametersValidator: Sync {
    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError>;
}

/// Checks that required keys are present and, when optional keys are
/// declared, that no other key is.
#[derive(Debug, Clone, Default)]
pub struct DefaultJobParametersValidator {
    required_keys: Vec<String>,
    optional_keys: Vec<String>,
}

impl DefaultJobParametersValidator {
    pub fn new(required_keys: &[&str], optional_keys: &[&str]) -> Self {
        Self {
            required_keys: required_keys.iter().map(|key| key.to_string()).collect(),
            optional_keys: optional_keys.iter().map(|key| key.to_string()).collect(),
        }
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .filter(|key| !parameters.contains_key(key))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(BatchError::Validation(format!(
                "The JobParameters do not contain required keys: {:?}",
                missing
            )));
        }

        if !self.optional_keys.is_empty() {
            let unexpected: Vec<&str> = parameters
                .keys()
                .filter(|key| !self.required_keys.contains(key) && !self.optional_keys.contains(key))
                .map(String::as_str)
                .collect();
            if !unexpected.is_empty() {
                return Err(BatchError::Validation(format!(
                    "The JobParameters contains keys that are not explicitly optional or required: {:?}",
                    unexpected
                )));
            }
        }

        Ok(())
    }
}

/// Runs several validators in order and reports the first failure.
pub struct CompositeJobParametersValidator<'a> {
    validators: Vec<&'a dyn JobParametersValidator>,
}

impl<'a> CompositeJobParametersValidator<'a> {
    pub fn new(validators: Vec<&'a dyn JobParametersValidator>) -> Self {
        Self { validators }
    }
}

impl JobParametersValidator for CompositeJobParametersValidator<'_> {
    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        self.validators
            .iter()
            .try_for_each(|validator| validator.validate(parameters))
    }
}

/// Validator backed by a closure.
///
/// ```
/// use batch_engine::BatchError;
/// use batch_engine::core::parameters::{
///     FnJobParametersValidator, JobParametersBuilder, JobParametersValidator,
/// };
///
/// let csv_only = FnJobParametersValidator::new(|parameters| {
///     match parameters.get_string("fileName") {
///         Some(name) if name.to_lowercase().ends_with("csv") => Ok(()),
///         Some(_) => Err(BatchError::Validation("fileName does not use the csv extension".into())),
///         None => Err(BatchError::Validation("fileName is missing".into())),
///     }
/// });
///
/// let parameters = JobParametersBuilder::new().add_string("fileName", "a.txt").build();
/// assert!(csv_only.validate(&parameters).is_err());
/// ```
pub struct FnJobParametersValidator<F> {
    function: F,
}

impl<F> FnJobParametersValidator<F>
where
    F: Fn(&JobParameters) -> Result<(), BatchError> + Sync,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> JobParametersValidator for FnJobParametersValidator<F>
where
    F: Fn(&JobParameters) -> Result<(), BatchError> + Sync,
{
    fn validate(&self, parameters: &JobParameters) -> Result<(), BatchError> {
        (self.function)(parameters)
    }
}

/// Derives the parameters of the next instance from those of the last one.
pub trait JobParametersIncrementer: Sync {
    /// `previous` holds the parameters of the last execution of the job, if any.
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Increments a long parameter, `run.id` by default, so every launch creates
/// a new instance.
#[derive(Debug, Clone)]
pub struct RunIdIncrementer {
    key: String,
}

impl RunIdIncrementer {
    pub const RUN_ID_KEY: &'static str = "run.id";

    pub fn new() -> Self {
        Self::with_key(Self::RUN_ID_KEY)
    }

    pub fn with_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let previous = previous.cloned().unwrap_or_default();
        let run_id = previous.get_long(&self.key).unwrap_or(0) + 1;
        JobParametersBuilder::from(&previous)
            .add_long(&self.key, run_id)
            .build()
    }
}

/// Stamps the current time under `currentDate`, giving one instance per launch.
#[derive(Debug, Clone, Default)]
pub struct DailyTimestamper;

impl DailyTimestamper {
    pub const CURRENT_DATE_KEY: &'static str = "currentDate";
}

impl JobParametersIncrementer for DailyTimestamper {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let previous = previous.cloned().unwrap_or_default();
        JobParametersBuilder::from(&previous)
            .add_date(Self::CURRENT_DATE_KEY, Utc::now())
            .build()
    }
}
