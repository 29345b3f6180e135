//! # synthloop-patch
//!
//! Unified diff support for the synthloop generate-then-verify loop.
//!
//! Generators sometimes answer with a unified diff against the prior artifact
//! instead of a full replacement. This crate turns that diff back into a
//! complete artifact.
//!
//! ## Key Types
//!
//! - [`UnifiedDiff`] - Parsed diff: file patches made of hunks
//! - [`PatchError`] - Why a diff could not be parsed or applied
//! - [`ResponseShape`] - Whether generator output looks like a diff
//!
//! ## Usage
//!
//! ```rust
//! use synthloop_patch::apply_unified_diff;
//!
//! let diff = "--- a/greet.txt\n+++ b/greet.txt\n@@ -1,2 +1,2 @@\n-Hello\n+Hi\n World";
//! let updated = apply_unified_diff(diff, "Hello\nWorld").unwrap();
//! assert_eq!(updated, "Hi\nWorld");
//! ```
//!
//! Application is all-or-nothing: the input string is never modified and a
//! failing hunk fails the whole call.

mod apply;
mod error;
mod parse;
mod shape;

pub use apply::{apply_patch, apply_unified_diff};
pub use error::PatchError;
pub use parse::{FilePatch, Hunk, HunkLine, UnifiedDiff};
pub use shape::{classify_response, ResponseShape};
