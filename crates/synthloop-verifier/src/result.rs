use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Outcome of one check run that the loop can learn from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestResult {
    Success,
    /// Raw diagnostic text, passed verbatim to the next generation attempt
    Fail { message: String },
}

impl TestResult {
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Fail { message } => Some(message),
        }
    }
}

/// Check outcomes that no amount of regeneration can fix
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("The test command `{command}` is invalid. Fix the command, not the code.")]
    InvalidCommand { command: String, output: String },

    #[error(
        "The test command `{command}` produced no output for {}s and was stopped. \
         It may be running in watch mode; use a command that runs once and exits.",
        idle.as_secs()
    )]
    WatchdogTimeout { command: String, idle: Duration },

    #[error("Verification was interrupted")]
    Interrupted,
}
