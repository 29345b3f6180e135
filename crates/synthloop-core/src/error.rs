use std::path::PathBuf;
use thiserror::Error;

use synthloop_generator::GeneratorError;
use synthloop_verifier::VerifyError;

/// Why a check could not produce a pass/fail verdict
#[derive(Error, Debug)]
pub enum CheckError {
    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("Visual critic failed: {0}")]
    Critic(#[from] GeneratorError),

    #[error("Screenshot capture failed: {0}")]
    Capture(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Failed to write artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
