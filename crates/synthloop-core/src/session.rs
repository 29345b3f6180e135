use std::path::{Path, PathBuf};

use synthloop_generator::file_stem;

/// Default attempt ceiling
pub const DEFAULT_MAX_RUNS: usize = 20;

/// What decides whether an attempt passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckSpec {
    /// A shell command that exits zero on success
    Command(String),
    /// A screenshot of `url` judged against the reference design
    Visual { url: String },
}

impl CheckSpec {
    pub fn describe(&self) -> String {
        match self {
            Self::Command(command) => command.clone(),
            Self::Visual { url } => format!("visual comparison of {}", url),
        }
    }

    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Command(command) => Some(command),
            Self::Visual { .. } => None,
        }
    }
}

/// Parameters of one synthesis run.
///
/// Created once per invocation. The runner only mutates `last_error`.
#[derive(Debug, Clone)]
pub struct Session {
    pub artifact_path: PathBuf,
    pub prompt: String,
    /// Where the prompt lives, or will be saved if the run stops early
    pub prompt_file: PathBuf,
    /// False when the prompt was typed and exists only in memory
    pub prompt_on_disk: bool,
    pub test_file: Option<PathBuf>,
    pub check: CheckSpec,
    pub max_runs: usize,
    pub thread_id: Option<String>,
    pub last_error: Option<String>,
    pub interactive: bool,
    pub allow_diffs: bool,
}

impl Session {
    pub fn new(artifact_path: PathBuf, prompt: impl Into<String>, check: CheckSpec) -> Self {
        let prompt_file = default_prompt_file(&artifact_path);
        Self {
            artifact_path,
            prompt: prompt.into(),
            prompt_file,
            prompt_on_disk: false,
            test_file: None,
            check,
            max_runs: DEFAULT_MAX_RUNS,
            thread_id: None,
            last_error: None,
            interactive: false,
            allow_diffs: false,
        }
    }

    /// Use a prompt that was read from `path`
    pub fn with_prompt_file(mut self, path: PathBuf) -> Self {
        self.prompt_file = path;
        self.prompt_on_disk = true;
        self
    }

    pub fn with_test_file(mut self, test_file: Option<PathBuf>) -> Self {
        self.test_file = test_file;
        self
    }

    pub fn with_max_runs(mut self, max_runs: usize) -> Self {
        self.max_runs = max_runs;
        self
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn allow_diffs(mut self, allow: bool) -> Self {
        self.allow_diffs = allow;
        self
    }

    /// Write an in-memory prompt so a resume command can point at it.
    ///
    /// A file already holding the same prompt is reused. A file holding
    /// something else is left alone and the prompt goes to the first free
    /// `<stem>.prompt-<n>.md` instead. Returns whether a file was written.
    pub fn persist_prompt(&mut self) -> std::io::Result<bool> {
        if self.prompt_on_disk {
            return Ok(false);
        }

        let mut candidate = self.prompt_file.clone();
        let mut n = 1;
        loop {
            match std::fs::read(&candidate) {
                Ok(existing) if existing == self.prompt.as_bytes() => {
                    self.prompt_file = candidate;
                    self.prompt_on_disk = true;
                    return Ok(false);
                }
                Ok(_) => {
                    n += 1;
                    candidate = numbered_prompt_file(&self.prompt_file, n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => return Err(e),
            }
        }

        if let Some(parent) = candidate.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&candidate, &self.prompt)?;
        self.prompt_file = candidate;
        self.prompt_on_disk = true;
        Ok(true)
    }
}

/// `sum.prompt.md` -> `sum.prompt-<n>.md`
fn numbered_prompt_file(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let head = name.strip_suffix(".md").unwrap_or(&name);
    base.with_file_name(format!("{}-{}.md", head, n))
}

/// `<dir>/<stem>.prompt.md`
pub fn default_prompt_file(artifact: &Path) -> PathBuf {
    artifact.with_file_name(format!("{}.prompt.md", file_stem(artifact)))
}

/// `<dir>/<stem>.test.<ext>`
pub fn default_test_file(artifact: &Path) -> PathBuf {
    let stem = file_stem(artifact);
    match artifact.extension().and_then(|e| e.to_str()) {
        Some(ext) => artifact.with_file_name(format!("{}.test.{}", stem, ext)),
        None => artifact.with_file_name(format!("{}.test", stem)),
    }
}
