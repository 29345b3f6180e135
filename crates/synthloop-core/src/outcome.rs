use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a run stopped before succeeding or running out of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The same failure came back after the debug-log escalation
    RepeatedFailure,
    /// The check command itself is wrong
    InvalidCommand,
    /// The check command stopped producing output
    WatchdogTimeout,
    /// The check could not be carried out at all (e.g. no screenshot)
    CheckUnavailable,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::RepeatedFailure => "repeated failure",
            Self::InvalidCommand => "invalid command",
            Self::WatchdogTimeout => "watchdog timeout",
            Self::CheckUnavailable => "check unavailable",
        };
        f.write_str(text)
    }
}

/// The final outcome of a synthesis run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// The check passed
    Success {
        attempts: usize,
        total_duration_secs: f64,
    },
    /// Every allowed attempt failed
    MaxRunsReached {
        attempts: usize,
        last_error: Option<String>,
        resume_command: String,
        total_duration_secs: f64,
    },
    /// Stopped early; continuing would not help
    Aborted {
        attempts: usize,
        reason: AbortReason,
        message: String,
        resume_command: String,
        total_duration_secs: f64,
    },
    /// User requested stop (Ctrl+C)
    Interrupted {
        attempts: usize,
        total_duration_secs: f64,
    },
    /// The completion engine failed outright
    GenerationFailed {
        attempts: usize,
        error: String,
        total_duration_secs: f64,
    },
}

impl LoopOutcome {
    pub fn success(attempts: usize, duration: Duration) -> Self {
        Self::Success {
            attempts,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn max_runs_reached(
        attempts: usize,
        last_error: Option<String>,
        resume_command: String,
        duration: Duration,
    ) -> Self {
        Self::MaxRunsReached {
            attempts,
            last_error,
            resume_command,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn aborted(
        attempts: usize,
        reason: AbortReason,
        message: String,
        resume_command: String,
        duration: Duration,
    ) -> Self {
        Self::Aborted {
            attempts,
            reason,
            message,
            resume_command,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn interrupted(attempts: usize, duration: Duration) -> Self {
        Self::Interrupted {
            attempts,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn generation_failed(attempts: usize, error: String, duration: Duration) -> Self {
        Self::GenerationFailed {
            attempts,
            error,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            Self::Success { attempts, .. }
            | Self::MaxRunsReached { attempts, .. }
            | Self::Aborted { attempts, .. }
            | Self::Interrupted { attempts, .. }
            | Self::GenerationFailed { attempts, .. } => *attempts,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        match self {
            Self::Success {
                total_duration_secs,
                ..
            }
            | Self::MaxRunsReached {
                total_duration_secs,
                ..
            }
            | Self::Aborted {
                total_duration_secs,
                ..
            }
            | Self::Interrupted {
                total_duration_secs,
                ..
            }
            | Self::GenerationFailed {
                total_duration_secs,
                ..
            } => *total_duration_secs,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short status name, as serialized
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::MaxRunsReached { .. } => "max_runs_reached",
            Self::Aborted { .. } => "aborted",
            Self::Interrupted { .. } => "interrupted",
            Self::GenerationFailed { .. } => "generation_failed",
        }
    }

    /// One-line reason the run stopped, if it did not succeed
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::MaxRunsReached { attempts, .. } => {
                Some(format!("no passing artifact after {} attempts", attempts))
            }
            Self::Aborted {
                reason, message, ..
            } => Some(format!("{}: {}", reason, message)),
            Self::Interrupted { .. } => Some("interrupted".to_string()),
            Self::GenerationFailed { error, .. } => Some(error.clone()),
        }
    }

    pub fn resume_command(&self) -> Option<&str> {
        match self {
            Self::MaxRunsReached { resume_command, .. } | Self::Aborted { resume_command, .. } => {
                Some(resume_command)
            }
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success { .. } => 0,
            Self::MaxRunsReached { .. } => 1,
            Self::Aborted { .. } => 1,
            Self::GenerationFailed { .. } => 2,
            Self::Interrupted { .. } => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let d = Duration::from_secs(1);
        assert_eq!(LoopOutcome::success(1, d).exit_code(), 0);
        assert_eq!(
            LoopOutcome::max_runs_reached(3, None, "x".into(), d).exit_code(),
            1
        );
        assert_eq!(
            LoopOutcome::aborted(5, AbortReason::RepeatedFailure, "m".into(), "x".into(), d)
                .exit_code(),
            1
        );
        assert_eq!(LoopOutcome::generation_failed(1, "e".into(), d).exit_code(), 2);
        assert_eq!(LoopOutcome::interrupted(2, d).exit_code(), 130);
    }

    #[test]
    fn test_serialized_status_tag() {
        let outcome = LoopOutcome::aborted(
            1,
            AbortReason::InvalidCommand,
            "bad".into(),
            "synthloop a.js".into(),
            Duration::ZERO,
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], outcome.status());
        assert_eq!(json["reason"], "invalid_command");
        assert_eq!(outcome.resume_command(), Some("synthloop a.js"));
    }
}
