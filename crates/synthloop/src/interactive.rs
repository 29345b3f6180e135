//! Guided setup when no artifact path is given.
//!
//! Asks what to build, picks a file path, drafts and reviews a unit test,
//! then settles on a test command that actually runs. The result is a
//! [`Session`] ready for the synthesis loop.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::Input;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use synthloop_core::{default_test_file, CheckSpec, Session};
use synthloop_generator::{find_upwards, GeneratorAdapter};
use synthloop_verifier::{InterruptSignal, TestVerifier, VerifyError};

/// Files offered to the generator when it suggests a path
const MAX_LISTED_FILES: usize = 200;
const MAX_WALK_DEPTH: usize = 6;
const MAX_EXAMPLE_TESTS: usize = 2;
const MAX_EXAMPLE_TEST_CHARS: usize = 4000;
/// Revisions after which the latest draft is taken as is
const MAX_TEST_REVISIONS: usize = 10;

/// Where the review of a drafted test stands
#[derive(Debug, Clone, PartialEq)]
enum TestReview {
    /// Show the draft and ask whether it is good
    Review { code: String, revisions: usize },
    /// Ask what should change
    Feedback { code: String, revisions: usize },
    /// Ask the generator for a revised draft
    Regenerate {
        code: String,
        feedback: String,
        revisions: usize,
    },
    Accepted { code: String },
}

impl TestReview {
    fn start(code: String) -> Self {
        TestReview::Review { code, revisions: 0 }
    }

    /// Transition out of `Review` given the user's answer
    fn answered(code: String, revisions: usize, answer: &str) -> Self {
        let answer = answer.trim();
        if answer.eq_ignore_ascii_case("good") {
            TestReview::Accepted { code }
        } else if revisions >= MAX_TEST_REVISIONS {
            TestReview::Accepted { code }
        } else if answer.is_empty() {
            TestReview::Feedback { code, revisions }
        } else {
            TestReview::Regenerate {
                code,
                feedback: answer.to_string(),
                revisions,
            }
        }
    }
}

pub struct InteractiveSetup<'a> {
    adapter: &'a GeneratorAdapter,
    verifier: &'a TestVerifier,
    working_dir: &'a Path,
    interrupt: InterruptSignal,
    artifact: Option<PathBuf>,
}

impl<'a> InteractiveSetup<'a> {
    pub fn new(
        adapter: &'a GeneratorAdapter,
        verifier: &'a TestVerifier,
        working_dir: &'a Path,
        interrupt: InterruptSignal,
    ) -> Self {
        Self {
            adapter,
            verifier,
            working_dir,
            interrupt,
            artifact: None,
        }
    }

    /// Skip the file path question and build `artifact`
    pub fn with_artifact(mut self, artifact: Option<PathBuf>) -> Self {
        self.artifact = artifact;
        self
    }

    /// Walk the user through setup.
    ///
    /// Returns `Ok(None)` when the user cancels any prompt. Generator
    /// failures propagate as `GeneratorError` inside the `anyhow::Error`.
    pub async fn run(&self) -> Result<Option<Session>> {
        let Some(intent) = ask("What would you like to build?", None, false) else {
            return Ok(None);
        };

        let files = project_files(self.working_dir, MAX_LISTED_FILES);
        let artifact = match &self.artifact {
            Some(artifact) => artifact.clone(),
            None => {
                let suggested = self.adapter.suggest_file_path(&intent, &files).await?;
                if self.interrupt.is_triggered() {
                    return Ok(None);
                }
                let Some(path) = ask("File path", suggested.as_deref(), false) else {
                    return Ok(None);
                };
                PathBuf::from(path)
            }
        };
        let test_file = default_test_file(&artifact);

        if self
            .review_test(&intent, &artifact, &test_file, &files)
            .await?
            .is_none()
        {
            return Ok(None);
        }

        let Some(command) = self.choose_test_command(&test_file).await? else {
            return Ok(None);
        };

        Ok(Some(
            Session::new(artifact, intent, CheckSpec::Command(command))
                .with_test_file(Some(test_file))
                .interactive(true),
        ))
    }

    /// Draft a test and revise it until the user answers `good`
    async fn review_test(
        &self,
        intent: &str,
        artifact: &Path,
        test_file: &Path,
        files: &[String],
    ) -> Result<Option<String>> {
        let examples = example_tests(self.working_dir, files);
        let package_json = artifact
            .parent()
            .map(|dir| self.working_dir.join(dir))
            .and_then(|dir| find_upwards(&dir, "package.json"))
            .and_then(|path| std::fs::read_to_string(path).ok());

        eprintln!("{}", "Drafting a test...".dimmed());
        let draft = self
            .adapter
            .generate_test(
                intent,
                test_file,
                artifact,
                &examples,
                package_json.as_deref(),
            )
            .await?;

        let mut state = TestReview::start(draft);
        loop {
            if self.interrupt.is_triggered() {
                return Ok(None);
            }

            state = match state {
                TestReview::Review { code, revisions } => {
                    write_file(&self.working_dir.join(test_file), &code)?;
                    eprintln!();
                    eprintln!("{}", format!("--- {} ---", test_file.display()).bright_blue());
                    eprintln!("{}", code);
                    eprintln!();

                    let Some(answer) = ask(
                        "Type `good` to accept, or describe what to change",
                        None,
                        true,
                    ) else {
                        return Ok(None);
                    };
                    let next = TestReview::answered(code, revisions, &answer);
                    if matches!(next, TestReview::Accepted { .. })
                        && !answer.trim().eq_ignore_ascii_case("good")
                    {
                        warn!(revisions, "Revision limit reached, keeping the latest draft");
                        eprintln!("{}", "Keeping the latest draft.".yellow());
                    }
                    next
                }
                TestReview::Feedback { code, revisions } => {
                    let Some(feedback) = ask("What should change?", None, false) else {
                        return Ok(None);
                    };
                    TestReview::Regenerate {
                        code,
                        feedback,
                        revisions,
                    }
                }
                TestReview::Regenerate {
                    code,
                    feedback,
                    revisions,
                } => {
                    eprintln!("{}", "Revising the test...".dimmed());
                    let revised = self
                        .adapter
                        .revise_test(intent, test_file, artifact, &code, &feedback)
                        .await?;
                    TestReview::Review {
                        code: revised,
                        revisions: revisions + 1,
                    }
                }
                TestReview::Accepted { code } => {
                    write_file(&self.working_dir.join(test_file), &code)?;
                    return Ok(Some(code));
                }
            };
        }
    }

    /// Ask for a test command until one runs. A failing test is fine here;
    /// the code under test does not exist yet.
    async fn choose_test_command(&self, test_file: &Path) -> Result<Option<String>> {
        let mut suggestion = self.adapter.suggest_test_command(test_file).await?;

        loop {
            let Some(command) = ask("Test command", Some(&suggestion), false) else {
                return Ok(None);
            };

            match self.verifier.run(&command, None).await {
                Ok(result) => {
                    debug!(command = %command, passed = result.is_success(), "Test command validated");
                    return Ok(Some(command));
                }
                Err(VerifyError::Interrupted) => return Ok(None),
                Err(e) => {
                    eprintln!("{} {}", "That command cannot be used:".red(), e);
                    suggestion = command;
                }
            }
        }
    }
}

/// One line of input. `None` means the prompt was cancelled.
fn ask(prompt: &str, initial: Option<&str>, allow_empty: bool) -> Option<String> {
    let mut input = Input::<String>::new()
        .with_prompt(prompt)
        .allow_empty(allow_empty);
    if let Some(initial) = initial {
        input = input.with_initial_text(initial);
    }

    match input.interact_text() {
        Ok(value) => Some(value.trim().to_string()),
        Err(e) => {
            debug!(error = %e, "Prompt cancelled");
            None
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Project files relative to `root`, honouring ignore files, sorted.
pub fn project_files(root: &Path, limit: usize) -> Vec<String> {
    let mut files: Vec<String> = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .max_depth(Some(MAX_WALK_DEPTH))
        .filter_entry(|entry| entry.file_name() != "node_modules")
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    files.sort();
    files.truncate(limit);
    files
}

/// Contents of a few existing tests, so drafts follow the project's style
fn example_tests(root: &Path, files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|f| f.contains(".test.") || f.contains(".spec."))
        .filter_map(|f| std::fs::read_to_string(root.join(f)).ok())
        .map(|content| content.chars().take(MAX_EXAMPLE_TEST_CHARS).collect())
        .take(MAX_EXAMPLE_TESTS)
        .collect()
}
