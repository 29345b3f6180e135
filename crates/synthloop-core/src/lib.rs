//! # synthloop-core
//!
//! The synthesis loop: ask the generator for an artifact, write it, run the
//! check, feed the failure back, and escalate when the same failure keeps
//! coming back.
//!
//! ## Key Types
//!
//! - [`Session`] - Parameters of one run
//! - [`SynthesisRunner`] - Orchestrates the loop
//! - [`EscalationTracker`] - Process-wide failure history
//! - [`Check`] - Verification step ([`CommandCheck`] or [`VisualCheck`])
//! - [`LoopOutcome`] - How the run stopped
//!
//! ## Loop Flow
//!
//! ```text
//! initial check ──pass──▶ Success
//!      │ fail
//!      ▼
//! ┌─▶ generate ─▶ resolve (diff?) ─▶ write ─▶ check ──pass──▶ Success
//! │                    │ patch error              │ fail
//! │                    └──────────┬───────────────┘
//! │                               ▼
//! └──── continue / escalate ◀── escalation ──▶ abort
//! ```

mod check;
mod error;
mod escalation;
mod loop_runner;
mod outcome;
mod resume;
mod session;
mod visual;

pub use check::{Check, CheckReport, CommandCheck};
pub use error::{CheckError, LoopError};
pub use escalation::{
    EscalationDecision, EscalationState, EscalationTracker, DEFAULT_ESCALATION_WINDOW,
};
pub use loop_runner::{SynthesisRunner, PROGRAM_NAME};
pub use outcome::{AbortReason, LoopOutcome};
pub use resume::{quote, ResumeCommand, ResumePrompt};
pub use session::{default_prompt_file, default_test_file, CheckSpec, Session, DEFAULT_MAX_RUNS};
pub use visual::{
    find_reference_image, png_dimensions, PlaywrightCapture, ScreenshotCapture, Viewport,
    VisualCheck, FALLBACK_VIEWPORT, REFERENCE_EXTENSIONS,
};
