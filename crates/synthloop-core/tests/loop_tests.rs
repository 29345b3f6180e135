use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use synthloop_core::{
    AbortReason, CheckSpec, CommandCheck, EscalationTracker, LoopOutcome, Session,
    SynthesisRunner,
};
use synthloop_generator::{ChunkCallback, CompletionRequest, Generator, GeneratorError};
use synthloop_logging::{LogFormat, Logger};
use synthloop_verifier::{InterruptSignal, TestVerifier, VerifierConfig};

/// Replies in order, repeating the last one; records every request
struct Scripted {
    replies: Vec<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Scripted {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn user_text(&self, call: usize) -> String {
        let requests = self.requests.lock().unwrap();
        requests[call]
            .messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Generator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete_with_callback(
        &self,
        request: &CompletionRequest,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<String, GeneratorError> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len().min(self.replies.len() - 1);
        requests.push(request.clone());
        let reply = self.replies[index].clone();
        if let Some(cb) = on_chunk {
            cb(&reply);
        }
        Ok(reply)
    }
}

struct Failing;

#[async_trait]
impl Generator for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete_with_callback(
        &self,
        _request: &CompletionRequest,
        _on_chunk: Option<ChunkCallback>,
    ) -> Result<String, GeneratorError> {
        Err(GeneratorError::Config(
            "Missing OpenAI key. Use `synthloop config set OPENAI_KEY=<your key>` to set it."
                .to_string(),
        ))
    }
}

/// Passes once sum.js exports a function that adds
const SUM_CHECK: &str = "grep -q 'a + b' sum.js || { echo 'x is not a function' >&2; exit 1; }";

fn command_check(dir: &Path, command: &str) -> CommandCheck {
    CommandCheck::new(TestVerifier::new(VerifierConfig::new(dir)), command)
}

fn runner(generator: Arc<dyn Generator>) -> SynthesisRunner {
    SynthesisRunner::new(generator, Arc::new(Logger::new(LogFormat::Compact)))
}

fn session(dir: &Path, command: &str) -> Session {
    Session::new(
        dir.join("sum.js"),
        "Write a function that adds two numbers",
        CheckSpec::Command(command.to_string()),
    )
}

#[tokio::test]
async fn test_single_attempt_success_writes_generator_output() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("sum.js"), "").unwrap();

    let output = "module.exports = (a, b) => a + b;";
    let generator = Scripted::new(&[output]);
    let mut session = session(dir.path(), SUM_CHECK);

    let outcome = runner(generator.clone())
        .run(
            &mut session,
            &command_check(dir.path(), SUM_CHECK),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, LoopOutcome::Success { attempts: 1, .. }));
    assert_eq!(generator.calls(), 1);
    assert_eq!(std::fs::read_to_string(dir.path().join("sum.js")).unwrap(), output);
    // The failing initial check fed the first prompt
    assert!(generator.user_text(0).contains("x is not a function"));
}

#[tokio::test]
async fn test_passing_initial_check_skips_generation() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("sum.js"), "module.exports = (a, b) => a + b;").unwrap();

    let generator = Scripted::new(&["unused"]);
    let outcome = runner(generator.clone())
        .run(
            &mut session(dir.path(), SUM_CHECK),
            &command_check(dir.path(), SUM_CHECK),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, LoopOutcome::Success { attempts: 0, .. }));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_repeated_failure_escalates_then_aborts() {
    let dir = TempDir::new().unwrap();
    let generator = Scripted::new(&["module.exports = (a, b) => a - b;"]);
    let mut session = session(dir.path(), SUM_CHECK).with_max_runs(10);

    let outcome = runner(generator.clone())
        .run(
            &mut session,
            &command_check(dir.path(), SUM_CHECK),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    match &outcome {
        LoopOutcome::Aborted {
            attempts,
            reason,
            message,
            resume_command,
            ..
        } => {
            assert_eq!(*attempts, 5);
            assert_eq!(*reason, AbortReason::RepeatedFailure);
            assert_eq!(message, "x is not a function\n");
            assert!(resume_command.contains(&dir.path().join("sum.js").display().to_string()));
            assert!(resume_command.contains("--max-runs 10"));
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(generator.calls(), 5);

    // Only the attempt after the fourth identical failure asks for logging
    assert!(!generator.user_text(3).contains("debug logging"));
    assert!(generator.user_text(4).contains("4 times in a row"));

    // The typed prompt was saved for the resume command
    assert_eq!(
        std::fs::read_to_string(dir.path().join("sum.prompt.md")).unwrap(),
        "Write a function that adds two numbers"
    );
}

#[tokio::test]
async fn test_max_runs_reached() {
    let dir = TempDir::new().unwrap();
    // Each attempt fails differently, so escalation never triggers
    let check = "n=$(cat sum.js); echo \"attempt $n\" >&2; exit 1";
    let generator = Scripted::new(&["1", "2", "3"]);
    let mut session = session(dir.path(), check).with_max_runs(3);

    let outcome = runner(generator.clone())
        .run(
            &mut session,
            &command_check(dir.path(), check),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, LoopOutcome::MaxRunsReached { attempts: 3, .. }));
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(session.last_error.as_deref(), Some("attempt 3\n"));
    assert!(outcome.resume_command().unwrap().contains("--test-command"));
}

#[tokio::test]
async fn test_rejected_patch_keeps_prior_artifact() {
    let dir = TempDir::new().unwrap();
    let prior = "module.exports = (a, b) => a * b;";
    std::fs::write(dir.path().join("sum.js"), prior).unwrap();

    let bad_diff = "--- a/sum.js\n+++ b/sum.js\n@@ -1,1 +1,1 @@\n-nothing like the file\n+module.exports = (a, b) => a + b;";
    let generator = Scripted::new(&[bad_diff, "module.exports = (a, b) => a + b;"]);
    let mut session = session(dir.path(), SUM_CHECK);

    let outcome = runner(generator.clone())
        .run(
            &mut session,
            &command_check(dir.path(), SUM_CHECK),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, LoopOutcome::Success { attempts: 2, .. }));
    assert!(generator.user_text(1).contains("could not be applied"));
}

#[tokio::test]
async fn test_diff_response_patches_prior_artifact() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("sum.js"), "// sum\nmodule.exports = (a, b) => a * b;").unwrap();

    let diff = "--- a/sum.js\n+++ b/sum.js\n@@ -1,2 +1,2 @@\n // sum\n-module.exports = (a, b) => a * b;\n+module.exports = (a, b) => a + b;";
    let generator = Scripted::new(&[diff]);

    let outcome = runner(generator)
        .run(
            &mut session(dir.path(), SUM_CHECK),
            &command_check(dir.path(), SUM_CHECK),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("sum.js")).unwrap(),
        "// sum\nmodule.exports = (a, b) => a + b;"
    );
}

#[tokio::test]
async fn test_invalid_command_aborts_before_generation() {
    let dir = TempDir::new().unwrap();
    let command = "definitely-not-a-real-binary-xyz";
    let generator = Scripted::new(&["unused"]);

    let outcome = runner(generator.clone())
        .run(
            &mut session(dir.path(), command),
            &command_check(dir.path(), command),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        LoopOutcome::Aborted {
            reason: AbortReason::InvalidCommand,
            ..
        }
    ));
    assert!(outcome.reason().unwrap().contains("Fix the command, not the code"));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_generation_error_stops_without_resume() {
    let dir = TempDir::new().unwrap();
    let outcome = runner(Arc::new(Failing))
        .run(
            &mut session(dir.path(), SUM_CHECK),
            &command_check(dir.path(), SUM_CHECK),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, LoopOutcome::GenerationFailed { attempts: 1, .. }));
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.resume_command().is_none());
    assert!(outcome.reason().unwrap().contains("Missing OpenAI key"));
}

#[tokio::test]
async fn test_debug_logs_removed_after_escalated_success() {
    let dir = TempDir::new().unwrap();
    let broken = "module.exports = (a, b) => a - b;";
    let instrumented = "console.log('sum');\nmodule.exports = (a, b) => a + b;";
    let cleaned = "module.exports = (a, b) => a + b;";
    let generator = Scripted::new(&[broken, broken, broken, broken, instrumented, cleaned]);

    let outcome = runner(generator.clone())
        .run(
            &mut session(dir.path(), SUM_CHECK),
            &command_check(dir.path(), SUM_CHECK),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, LoopOutcome::Success { attempts: 5, .. }));
    assert_eq!(generator.calls(), 6);
    assert_eq!(std::fs::read_to_string(dir.path().join("sum.js")).unwrap(), cleaned);
}

#[tokio::test]
async fn test_failed_log_removal_restores_passing_artifact() {
    let dir = TempDir::new().unwrap();
    let broken = "module.exports = (a, b) => a - b;";
    let instrumented = "console.log('sum');\nmodule.exports = (a, b) => a + b;";
    let generator = Scripted::new(&[broken, broken, broken, broken, instrumented, broken]);

    let outcome = runner(generator)
        .run(
            &mut session(dir.path(), SUM_CHECK),
            &command_check(dir.path(), SUM_CHECK),
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("sum.js")).unwrap(),
        instrumented
    );
}

/// Fails until sum.js adds, then hangs in the passing branch
const HANGS_ONCE_FIXED: &str =
    "if grep -q 'a + b' sum.js; then sleep 5; else echo 'x is not a function' >&2; exit 1; fi";

#[tokio::test]
async fn test_silent_check_aborts_with_watchdog_timeout() {
    let dir = TempDir::new().unwrap();
    let generator = Scripted::new(&["module.exports = (a, b) => a + b;"]);
    let check = CommandCheck::new(
        TestVerifier::new(
            VerifierConfig::new(dir.path()).with_idle_timeout(Duration::from_millis(300)),
        ),
        HANGS_ONCE_FIXED,
    );

    let started = Instant::now();
    let outcome = runner(generator.clone())
        .run(
            &mut session(dir.path(), HANGS_ONCE_FIXED),
            &check,
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    match &outcome {
        LoopOutcome::Aborted {
            attempts,
            reason,
            resume_command,
            ..
        } => {
            assert_eq!(*attempts, 1);
            assert_eq!(*reason, AbortReason::WatchdogTimeout);
            assert!(resume_command.contains("--test-command"));
            assert!(resume_command.contains("--prompt-file"));
        }
        other => panic!("expected watchdog abort, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_interrupt_during_check_kills_it() {
    let dir = TempDir::new().unwrap();
    let command = "if grep -q 'a + b' sum.js; then sleep 1.5; touch finished; \
                   else echo 'x is not a function' >&2; exit 1; fi";
    let signal = InterruptSignal::new();
    let check = CommandCheck::new(
        TestVerifier::new(VerifierConfig::new(dir.path())).with_interrupt(signal.clone()),
        command,
    );

    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        trigger.trigger();
    });

    let generator = Scripted::new(&["module.exports = (a, b) => a + b;"]);
    let outcome = runner(generator)
        .with_interrupt(signal)
        .run(
            &mut session(dir.path(), command),
            &check,
            &mut EscalationTracker::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, LoopOutcome::Interrupted { .. }));
    assert_eq!(outcome.exit_code(), 130);
    assert!(outcome.resume_command().is_none());

    // The killed check never reaches its last step
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!dir.path().join("finished").exists());
}
