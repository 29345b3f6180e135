//! # synthloop-verifier
//!
//! Runs the external check command for the synthloop loop.
//!
//! The verifier spawns one shell command, streams its output to a callback,
//! and guards it with an idle watchdog: if the command goes quiet for longer
//! than the configured window it is killed, since it is most likely running
//! in a non-exiting watch mode.
//!
//! ## Key Types
//!
//! - [`TestVerifier`] - Spawns and supervises the check command
//! - [`TestResult`] - `Success` or `Fail { message }`
//! - [`VerifyError`] - Outcomes that stop the loop instead of feeding it
//! - [`InterruptSignal`] - Cooperative cancellation shared with the CLI

mod classify;
mod interrupt;
mod output;
mod result;
mod verifier;

pub use classify::is_invalid_command;
pub use interrupt::InterruptSignal;
pub use output::{OutputCallback, OutputStream};
pub use result::{TestResult, VerifyError};
pub use verifier::{TestVerifier, VerifierConfig, DEFAULT_IDLE_TIMEOUT};
