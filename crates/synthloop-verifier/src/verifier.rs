use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::classify::is_invalid_command;
use crate::output::CapturedStream;
use crate::{InterruptSignal, OutputCallback, OutputStream, TestResult, VerifyError};

/// Idle window after which a silent check command is presumed stuck
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

const READ_CHUNK_SIZE: usize = 4096;

/// Where and how check commands are run
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub working_dir: PathBuf,
    pub idle_timeout: Duration,
    /// Shell used to interpret the command; `$SHELL` or `sh` when unset
    pub shell: Option<PathBuf>,
    pub env_vars: HashMap<String, String>,
}

impl VerifierConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shell: None,
            env_vars: HashMap::new(),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    fn resolve_shell(&self) -> PathBuf {
        self.shell
            .clone()
            .or_else(|| std::env::var_os("SHELL").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("sh"))
    }
}

/// Runs a check command and turns its exit into a [`TestResult`]
pub struct TestVerifier {
    config: VerifierConfig,
    interrupt: Option<InterruptSignal>,
}

impl TestVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            interrupt: None,
        }
    }

    pub fn with_interrupt(mut self, interrupt: InterruptSignal) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Run `command` once, streaming every output chunk to `on_output`.
    ///
    /// Success is decided by exit status alone. A failing run reports stderr,
    /// falling back to stdout when stderr is empty.
    pub async fn run(
        &self,
        command: &str,
        on_output: Option<OutputCallback>,
    ) -> Result<TestResult, VerifyError> {
        let start = std::time::Instant::now();
        let shell = self.config.resolve_shell();
        let idle_timeout = self.config.idle_timeout;

        debug!(
            shell = %shell.display(),
            command = %command,
            working_dir = %self.config.working_dir.display(),
            idle_timeout_ms = idle_timeout.as_millis(),
            "Spawning check command"
        );

        let mut cmd = Command::new(&shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so the watchdog can take down grandchildren
        #[cfg(unix)]
        cmd.process_group(0);

        for (key, value) in &self.config.env_vars {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "Failed to spawn check command");
                return Ok(TestResult::fail(format!(
                    "Failed to start `{}`: {}",
                    command, e
                )));
            }
        };

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            terminate(&mut child).await;
            return Ok(TestResult::fail("Check command output was not captured"));
        };

        let mut stdout_capture = CapturedStream::default();
        let mut stderr_capture = CapturedStream::default();
        let mut stdout_buf = [0u8; READ_CHUNK_SIZE];
        let mut stderr_buf = [0u8; READ_CHUNK_SIZE];
        let mut stdout_open = true;
        let mut stderr_open = true;

        let mut interrupt_rx = self.interrupt.as_ref().map(InterruptSignal::subscribe);
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        while stdout_open || stderr_open {
            tokio::select! {
                read = stdout.read(&mut stdout_buf), if stdout_open => {
                    match read {
                        Ok(0) => stdout_open = false,
                        Ok(n) => {
                            trace!(bytes = n, "stdout");
                            let chunk = stdout_capture.push(&stdout_buf[..n]);
                            emit(&on_output, &chunk, OutputStream::Stdout);
                            idle.as_mut().reset(Instant::now() + idle_timeout);
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read check stdout");
                            stdout_open = false;
                        }
                    }
                }
                read = stderr.read(&mut stderr_buf), if stderr_open => {
                    match read {
                        Ok(0) => stderr_open = false,
                        Ok(n) => {
                            trace!(bytes = n, "stderr");
                            let chunk = stderr_capture.push(&stderr_buf[..n]);
                            emit(&on_output, &chunk, OutputStream::Stderr);
                            idle.as_mut().reset(Instant::now() + idle_timeout);
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read check stderr");
                            stderr_open = false;
                        }
                    }
                }
                _ = &mut idle => {
                    warn!(command = %command, "Check command went idle, killing it");
                    terminate(&mut child).await;
                    return Err(VerifyError::WatchdogTimeout {
                        command: command.to_string(),
                        idle: idle_timeout,
                    });
                }
                _ = wait_for_interrupt(&mut interrupt_rx) => {
                    debug!("Interrupted while running check command");
                    terminate(&mut child).await;
                    return Err(VerifyError::Interrupted);
                }
            }
        }

        if let Some(rest) = stdout_capture.flush() {
            emit(&on_output, &rest, OutputStream::Stdout);
        }
        if let Some(rest) = stderr_capture.flush() {
            emit(&on_output, &rest, OutputStream::Stderr);
        }
        let stdout_text = stdout_capture.into_text();
        let stderr_text = stderr_capture.into_text();

        // Pipes closed; the process may still linger
        let status = tokio::select! {
            status = child.wait() => status,
            _ = &mut idle => {
                terminate(&mut child).await;
                return Err(VerifyError::WatchdogTimeout {
                    command: command.to_string(),
                    idle: idle_timeout,
                });
            }
            _ = wait_for_interrupt(&mut interrupt_rx) => {
                terminate(&mut child).await;
                return Err(VerifyError::Interrupted);
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                return Ok(TestResult::fail(format!(
                    "Failed to wait for `{}`: {}",
                    command, e
                )))
            }
        };

        debug!(
            exit_code = status.code().unwrap_or(-1),
            duration_ms = start.elapsed().as_millis(),
            "Check command completed"
        );

        if is_invalid_command(&stderr_text) || status.code() == Some(127) {
            let output = if stderr_text.trim().is_empty() {
                stdout_text
            } else {
                stderr_text
            };
            return Err(VerifyError::InvalidCommand {
                command: command.to_string(),
                output,
            });
        }

        if status.success() {
            return Ok(TestResult::Success);
        }

        let message = if !stderr_text.trim().is_empty() {
            stderr_text
        } else if !stdout_text.trim().is_empty() {
            stdout_text
        } else {
            match status.code() {
                Some(code) => format!("command exited with status {}", code),
                None => "command was terminated by a signal".to_string(),
            }
        };

        Ok(TestResult::fail(message))
    }
}

fn emit(callback: &Option<OutputCallback>, chunk: &str, stream: OutputStream) {
    if chunk.is_empty() {
        return;
    }
    if let Some(callback) = callback {
        callback(chunk, stream);
    }
}

async fn wait_for_interrupt(rx: &mut Option<watch::Receiver<bool>>) {
    match rx {
        Some(rx) => {
            if rx.wait_for(|interrupted| *interrupted).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let group = format!("-{}", pid);
        let _ = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }

    let _ = child.start_kill();
    let _ = tokio::time::timeout(Duration::from_secs(3), child.wait()).await;
}
