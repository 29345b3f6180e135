use async_trait::async_trait;

use synthloop_generator::VisualAttachments;
use synthloop_verifier::{OutputCallback, TestResult, TestVerifier};

use crate::error::CheckError;

/// Result of one check run
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub result: TestResult,
    /// Images the next generation attempt should see (visual checks only)
    pub visual: Option<VisualAttachments>,
}

impl CheckReport {
    pub fn from_result(result: TestResult) -> Self {
        Self {
            result,
            visual: None,
        }
    }
}

/// The verification step of the loop
#[async_trait]
pub trait Check: Send + Sync {
    /// Human-readable description, shown in logs
    fn describe(&self) -> String;

    /// Judge the artifact currently on disk
    async fn run(&self, on_output: Option<OutputCallback>) -> Result<CheckReport, CheckError>;
}

/// Runs a shell command through the [`TestVerifier`]
pub struct CommandCheck {
    verifier: TestVerifier,
    command: String,
}

impl CommandCheck {
    pub fn new(verifier: TestVerifier, command: impl Into<String>) -> Self {
        Self {
            verifier,
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Check for CommandCheck {
    fn describe(&self) -> String {
        self.command.clone()
    }

    async fn run(&self, on_output: Option<OutputCallback>) -> Result<CheckReport, CheckError> {
        let result = self.verifier.run(&self.command, on_output).await?;
        Ok(CheckReport::from_result(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synthloop_verifier::{VerifierConfig, VerifyError};

    fn check(command: &str) -> CommandCheck {
        let dir = std::env::temp_dir();
        CommandCheck::new(TestVerifier::new(VerifierConfig::new(dir)), command)
    }

    #[tokio::test]
    async fn test_command_check_passes_result_through() {
        let report = check("echo 'x is not a function' >&2; exit 1")
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.result, TestResult::fail("x is not a function\n"));
        assert!(report.visual.is_none());
    }

    #[tokio::test]
    async fn test_command_check_surfaces_invalid_command() {
        let err = check("definitely-not-a-real-binary-xyz").run(None).await.unwrap_err();
        assert!(matches!(
            err,
            CheckError::Verify(VerifyError::InvalidCommand { .. })
        ));
    }
}
