use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Diff contains no file patches")]
    NoPatches,

    #[error("Patch for {path} contains no hunks")]
    EmptyPatch { path: String },

    #[error("Malformed hunk header: {0}")]
    MalformedHunkHeader(String),

    #[error("Malformed diff line {line}: {content}")]
    Malformed { line: usize, content: String },

    #[error(
        "Hunk {hunk} ({header}) does not match at line {line}: expected {expected:?}, found {found:?}"
    )]
    HunkMismatch {
        hunk: usize,
        header: String,
        line: usize,
        expected: String,
        found: Option<String>,
    },

    #[error("Hunk {hunk} ({header}) starts past the end of the file ({len} lines)")]
    HunkOutOfRange {
        hunk: usize,
        header: String,
        len: usize,
    },
}
