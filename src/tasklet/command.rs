use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus as ProcessStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    BatchError,
    core::{
        step::{ExitStatus, StepContext, StepExecution},
        tasklet::{RepeatStatus, Tasklet},
    },
};

/// Translates the exit code of a system process into an [`ExitStatus`].
///
/// A mapped `FAILED` exit code fails the step; any other code completes it with
/// that exit status, so flows can branch on it.
pub trait SystemProcessExitCodeMapper: Sync {
    fn get_exit_status(&self, exit_code: i32) -> ExitStatus;
}

/// Zero is `COMPLETED`, everything else `FAILED`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleSystemProcessExitCodeMapper;

impl SystemProcessExitCodeMapper for SimpleSystemProcessExitCodeMapper {
    fn get_exit_status(&self, exit_code: i32) -> ExitStatus {
        if exit_code == 0 {
            ExitStatus::completed()
        } else {
            ExitStatus::failed()
        }
    }
}

/// Maps exit codes through a table, with a fallback for unlisted codes.
///
/// ```
/// use batch_engine::core::step::ExitStatus;
/// use batch_engine::tasklet::command::{
///     ConfigurableSystemProcessExitCodeMapper, SystemProcessExitCodeMapper,
/// };
///
/// let mapper = ConfigurableSystemProcessExitCodeMapper::new()
///     .map(0, ExitStatus::COMPLETED)
///     .map(1, "NO FILES");
///
/// assert_eq!(mapper.get_exit_status(1).exit_code, "NO FILES");
/// assert_eq!(mapper.get_exit_status(7).exit_code, ExitStatus::FAILED);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigurableSystemProcessExitCodeMapper {
    mappings: HashMap<i32, String>,
    otherwise: String,
}

impl Default for ConfigurableSystemProcessExitCodeMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurableSystemProcessExitCodeMapper {
    pub fn new() -> Self {
        Self {
            mappings: HashMap::new(),
            otherwise: ExitStatus::FAILED.to_string(),
        }
    }

    pub fn map(mut self, exit_code: i32, status: &str) -> Self {
        self.mappings.insert(exit_code, status.to_string());
        self
    }

    /// Exit code reported for unlisted process codes. Defaults to `FAILED`.
    pub fn otherwise(mut self, status: &str) -> Self {
        self.otherwise = status.to_string();
        self
    }
}

impl SystemProcessExitCodeMapper for ConfigurableSystemProcessExitCodeMapper {
    fn get_exit_status(&self, exit_code: i32) -> ExitStatus {
        ExitStatus::new(self.mappings.get(&exit_code).unwrap_or(&self.otherwise))
    }
}

static SIMPLE_MAPPER: SimpleSystemProcessExitCodeMapper = SimpleSystemProcessExitCodeMapper;

/// Runs an operating system command as the work of a step.
///
/// The command is spawned without a shell; its line is split into program and
/// arguments the way a POSIX shell would. The step polls the process every
/// `termination_check_interval` and, between polls, checks the timeout and
/// stop requests. Hitting either one kills the process only when
/// `interrupt_on_cancel` is set; the step fails on timeout and stops on a stop
/// request either way. A process left running is waited for on a background
/// thread.
pub struct SystemCommandTasklet<'a> {
    command_line: String,
    program: String,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    environment: Vec<(String, String)>,
    timeout: Option<Duration>,
    termination_check_interval: Duration,
    interrupt_on_cancel: bool,
    exit_code_mapper: &'a dyn SystemProcessExitCodeMapper,
}

impl SystemCommandTasklet<'_> {
    fn spawn(&self) -> Result<Child, BatchError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.environment.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());
        if let Some(directory) = &self.working_directory {
            command.current_dir(directory);
        }

        command.spawn().map_err(|e| {
            BatchError::NonTransientResource(format!(
                "unable to start `{}`: {}",
                self.command_line, e
            ))
        })
    }

    fn cancel(&self, mut child: Child) {
        if !self.interrupt_on_cancel {
            warn!("Leaving `{}` running (pid {})", self.command_line, child.id());
            let command_line = self.command_line.clone();
            // Reaped in the background so the abandoned process never lingers as a zombie.
            thread::spawn(move || match child.wait() {
                Ok(status) => debug!("Abandoned `{}` finished with {}", command_line, status),
                Err(e) => warn!("Unable to reap `{}`: {}", command_line, e),
            });
            return;
        }
        info!("Killing `{}` (pid {})", self.command_line, child.id());
        if let Err(e) = child.kill() {
            warn!("Unable to kill `{}`: {}", self.command_line, e);
        }
        let _ = child.wait();
    }

    fn wait(&self, mut child: Child, context: &StepContext<'_>) -> Result<ProcessStatus, BatchError> {
        let started = Instant::now();
        loop {
            let polled = child
                .try_wait()
                .map_err(|e| BatchError::Tasklet(format!("`{}`: {}", self.command_line, e)))?;
            if let Some(status) = polled {
                return Ok(status);
            }

            if let Some(timeout) = self.timeout.filter(|timeout| started.elapsed() >= *timeout) {
                self.cancel(child);
                return Err(BatchError::Timeout(format!(
                    "`{}` did not finish within {:?}",
                    self.command_line, timeout
                )));
            }

            if context.is_stop_requested() {
                self.cancel(child);
                return Err(BatchError::Interrupted(format!(
                    "stop requested while `{}` was running",
                    self.command_line
                )));
            }

            thread::sleep(self.termination_check_interval);
        }
    }
}

impl Tasklet for SystemCommandTasklet<'_> {
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        debug!("Running `{}` for step {}", self.command_line, step_execution.name);
        let child = self.spawn()?;
        let status = self.wait(child, context)?;

        let Some(code) = status.code() else {
            return Err(BatchError::Tasklet(format!(
                "`{}` was terminated by a signal",
                self.command_line
            )));
        };

        let exit_status = self.exit_code_mapper.get_exit_status(code);
        info!("`{}` exited with code {} ({})", self.command_line, code, exit_status.exit_code);
        if exit_status.exit_code == ExitStatus::FAILED {
            return Err(BatchError::Tasklet(format!(
                "`{}` exited with code {}",
                self.command_line, code
            )));
        }

        step_execution.exit_status =
            exit_status.with_description(&format!("process exit code {}", code));
        Ok(RepeatStatus::Finished)
    }
}

/// Configures a [`SystemCommandTasklet`].
///
/// ```
/// use std::time::Duration;
/// use batch_engine::tasklet::command::SystemCommandTaskletBuilder;
///
/// let tasklet = SystemCommandTaskletBuilder::new("echo 'hello world!'")
///     .timeout(Duration::from_secs(5))
///     .termination_check_interval(Duration::from_millis(50))
///     .interrupt_on_cancel(true)
///     .environment("BATCH_HOME", "/tmp")
///     .build()?;
/// # let _ = tasklet;
/// # Ok::<(), batch_engine::BatchError>(())
/// ```
pub struct SystemCommandTaskletBuilder<'a> {
    command_line: String,
    working_directory: Option<PathBuf>,
    environment: Vec<(String, String)>,
    timeout: Option<Duration>,
    termination_check_interval: Duration,
    interrupt_on_cancel: bool,
    exit_code_mapper: &'a dyn SystemProcessExitCodeMapper,
}

impl<'a> SystemCommandTaskletBuilder<'a> {
    pub fn new(command_line: &str) -> Self {
        Self {
            command_line: command_line.to_string(),
            working_directory: None,
            environment: Vec::new(),
            timeout: None,
            termination_check_interval: Duration::from_secs(1),
            interrupt_on_cancel: false,
            exit_code_mapper: &SIMPLE_MAPPER,
        }
    }

    pub fn working_directory<P: AsRef<Path>>(mut self, directory: P) -> Self {
        self.working_directory = Some(directory.as_ref().to_path_buf());
        self
    }

    pub fn environment(mut self, key: &str, value: &str) -> Self {
        self.environment.push((key.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn termination_check_interval(mut self, interval: Duration) -> Self {
        self.termination_check_interval = interval;
        self
    }

    pub fn interrupt_on_cancel(mut self, interrupt: bool) -> Self {
        self.interrupt_on_cancel = interrupt;
        self
    }

    pub fn exit_code_mapper(mut self, mapper: &'a dyn SystemProcessExitCodeMapper) -> Self {
        self.exit_code_mapper = mapper;
        self
    }

    pub fn build(self) -> Result<SystemCommandTasklet<'a>, BatchError> {
        let mut parts = shell_words::split(&self.command_line)
            .map_err(|e| BatchError::Definition(format!("Failed to parse command: {e}")))?;
        if parts.is_empty() {
            return Err(BatchError::Definition("Empty command".to_string()));
        }
        let program = parts.remove(0);

        if let Some(directory) = &self.working_directory
            && !directory.is_dir()
        {
            return Err(BatchError::Definition(format!(
                "working directory {} does not exist",
                directory.display()
            )));
        }

        Ok(SystemCommandTasklet {
            command_line: self.command_line,
            program,
            args: parts,
            working_directory: self.working_directory,
            environment: self.environment,
            timeout: self.timeout,
            termination_check_interval: self.termination_check_interval,
            interrupt_on_cancel: self.interrupt_on_cancel,
            exit_code_mapper: self.exit_code_mapper,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_is_split_like_a_shell() -> Result<(), BatchError> {
        let tasklet = SystemCommandTaskletBuilder::new("grep -c 'two words' \"in a file.txt\"").build()?;
        assert_eq!(tasklet.program, "grep");
        assert_eq!(tasklet.args, vec!["-c", "two words", "in a file.txt"]);
        Ok(())
    }

    #[test]
    fn invalid_command_lines_are_definition_errors() {
        assert!(matches!(
            SystemCommandTaskletBuilder::new("   ").build(),
            Err(BatchError::Definition(_))
        ));
        assert!(matches!(
            SystemCommandTaskletBuilder::new("echo 'unterminated").build(),
            Err(BatchError::Definition(_))
        ));
        assert!(matches!(
            SystemCommandTaskletBuilder::new("ls")
                .working_directory("/definitely/not/here")
                .build(),
            Err(BatchError::Definition(_))
        ));
    }

    #[test]
    fn simple_mapper_only_accepts_zero() {
        let mapper = SimpleSystemProcessExitCodeMapper;
        assert_eq!(mapper.get_exit_status(0), ExitStatus::completed());
        assert_eq!(mapper.get_exit_status(2), ExitStatus::failed());
    }
}
