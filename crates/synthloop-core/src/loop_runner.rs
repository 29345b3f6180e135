use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use synthloop_generator::{
    load_manifest_for, resolve_artifact, ChunkCallback, GenerationContext, Generator,
    GeneratorAdapter, ResolvedArtifact, Tactic, VisualAttachments,
};
use synthloop_logging::{LogEvent, Logger, StreamType};
use synthloop_patch::ResponseShape;
use synthloop_verifier::{InterruptSignal, OutputCallback, OutputStream, TestResult, VerifyError};

use crate::check::{Check, CheckReport};
use crate::error::{CheckError, LoopError};
use crate::escalation::{EscalationDecision, EscalationState, EscalationTracker};
use crate::outcome::{AbortReason, LoopOutcome};
use crate::resume::ResumeCommand;
use crate::session::Session;

/// Program name used in resume commands
pub const PROGRAM_NAME: &str = "synthloop";

/// Mutable state of one run
struct RunState {
    started_at: Instant,
    attempts: usize,
    tactic: Tactic,
    escalation: EscalationState,
    visual: Option<VisualAttachments>,
}

impl RunState {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            attempts: 0,
            tactic: Tactic::Normal,
            escalation: EscalationState::default(),
            visual: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Drives generate, write, check and escalate until the run stops
pub struct SynthesisRunner {
    generator: Arc<dyn Generator>,
    logger: Arc<Logger>,
    interrupt: InterruptSignal,
    program: String,
}

impl SynthesisRunner {
    pub fn new(generator: Arc<dyn Generator>, logger: Arc<Logger>) -> Self {
        Self {
            generator,
            logger,
            interrupt: InterruptSignal::new(),
            program: PROGRAM_NAME.to_string(),
        }
    }

    /// Share a cancellation signal with the caller (and its verifier)
    pub fn with_interrupt(mut self, interrupt: InterruptSignal) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn interrupt_handle(&self) -> InterruptSignal {
        self.interrupt.clone()
    }

    /// Run the loop for `session` until it succeeds, runs out of attempts or
    /// aborts. `tracker` outlives the run; its history carries across sessions.
    pub async fn run(
        &self,
        session: &mut Session,
        check: &dyn Check,
        tracker: &mut EscalationTracker,
    ) -> Result<LoopOutcome, LoopError> {
        let mut state = RunState::new();

        self.logger.log(&LogEvent::LoopStarted {
            artifact: session.artifact_path.clone(),
            check: check.describe(),
            max_runs: session.max_runs,
            generator: self.generator.name().to_string(),
        });

        let outcome = self.drive(session, check, tracker, &mut state).await?;

        info!(
            status = outcome.status(),
            attempts = outcome.attempts(),
            "Synthesis loop stopped"
        );
        self.logger.log(&LogEvent::LoopStopped {
            outcome: outcome.status().to_string(),
            attempts: outcome.attempts(),
            duration_secs: outcome.duration_secs(),
        });

        Ok(outcome)
    }

    async fn drive(
        &self,
        session: &mut Session,
        check: &dyn Check,
        tracker: &mut EscalationTracker,
        state: &mut RunState,
    ) -> Result<LoopOutcome, LoopError> {
        // Never pay for generation when the check already passes
        let report = match self.run_check(0, check).await {
            Ok(report) => report,
            Err(e) => return Ok(self.stop_on_check_error(e, session, state)),
        };
        let passed = report.result.is_success();
        self.logger.log(&LogEvent::InitialCheck { passed });
        if passed {
            return Ok(LoopOutcome::success(0, state.elapsed()));
        }
        session.last_error = report.result.failure_message().map(str::to_string);
        state.visual = report.visual;

        for attempt in 1..=session.max_runs {
            if self.interrupt.is_triggered() {
                info!("Loop interrupted by user");
                return Ok(LoopOutcome::interrupted(state.attempts, state.elapsed()));
            }

            state.attempts = attempt;
            if let Some(outcome) = self
                .run_attempt(attempt, session, check, tracker, state)
                .await?
            {
                return Ok(outcome);
            }
        }

        let resume_command = self.prepare_resume(session);
        Ok(LoopOutcome::max_runs_reached(
            state.attempts,
            session.last_error.clone(),
            resume_command,
            state.elapsed(),
        ))
    }

    /// Run one generate, write, check cycle.
    /// Returns Some(outcome) if the loop should stop, None to continue.
    async fn run_attempt(
        &self,
        attempt: usize,
        session: &mut Session,
        check: &dyn Check,
        tracker: &mut EscalationTracker,
        state: &mut RunState,
    ) -> Result<Option<LoopOutcome>, LoopError> {
        let tactic = state.tactic;

        self.logger.log(&LogEvent::AttemptStarted {
            attempt,
            max_runs: session.max_runs,
            tactic: tactic_name(tactic).to_string(),
        });

        let prior = read_artifact(&session.artifact_path);
        let ctx = generation_context(session, &prior, state.visual.clone());

        debug!(attempt, tactic = ?tactic, "Requesting generation");
        let adapter = self.adapter(attempt);
        let generated = tokio::select! {
            result = adapter.generate(&ctx, tactic) => result,
            _ = self.interrupt.triggered() => {
                return Ok(Some(LoopOutcome::interrupted(attempt, state.elapsed())));
            }
        };
        let raw = match generated {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, attempt, "Generation failed");
                return Ok(Some(LoopOutcome::generation_failed(
                    attempt,
                    e.to_string(),
                    state.elapsed(),
                )));
            }
        };

        let (result, resolved) = match resolve_artifact(&raw, &prior) {
            Ok(resolved) => {
                self.write_artifact(attempt, &session.artifact_path, &resolved)?;
                let report = match self.run_check(attempt, check).await {
                    Ok(report) => report,
                    Err(e) => return Ok(Some(self.stop_on_check_error(e, session, state))),
                };
                if report.visual.is_some() {
                    state.visual = report.visual;
                }
                (report.result, Some(resolved))
            }
            Err(e) => {
                // The prior artifact stays on disk; the rejection becomes feedback
                self.logger.log(&LogEvent::PatchRejected {
                    attempt,
                    error: e.to_string(),
                });
                let message = format!(
                    "The diff you returned could not be applied to the current code: {}. \
                     Return the complete file instead.",
                    e
                );
                (TestResult::fail(message), None)
            }
        };

        match result {
            TestResult::Success => {
                if state.escalation.added_logs {
                    if let Some(passing) = &resolved {
                        self.remove_debug_logs(attempt, session, check, &passing.content)
                            .await?;
                    }
                }
                Ok(Some(LoopOutcome::success(attempt, state.elapsed())))
            }
            TestResult::Fail { message } => match tracker.record(&message, &mut state.escalation) {
                EscalationDecision::Continue => {
                    state.tactic = Tactic::Normal;
                    session.last_error = Some(message);
                    Ok(None)
                }
                EscalationDecision::Escalate => {
                    let repeats = tracker.window();
                    info!(attempt, repeats, "Same failure repeated; escalating to debug logs");
                    self.logger
                        .log(&LogEvent::EscalationTriggered { attempt, repeats });
                    state.tactic = Tactic::AddDebugLogs { repeats };
                    session.last_error = Some(message);
                    Ok(None)
                }
                EscalationDecision::Abort => {
                    warn!(attempt, "Same failure persists after adding debug logs");
                    let resume_command = self.prepare_resume(session);
                    Ok(Some(LoopOutcome::aborted(
                        attempt,
                        AbortReason::RepeatedFailure,
                        message,
                        resume_command,
                        state.elapsed(),
                    )))
                }
            },
        }
    }

    /// Run the check with live output, racing it against the interrupt signal
    async fn run_check(&self, attempt: usize, check: &dyn Check) -> Result<CheckReport, CheckError> {
        let started = Instant::now();
        self.logger.log(&LogEvent::CheckStarted {
            attempt,
            check: check.describe(),
        });

        let report = tokio::select! {
            report = check.run(Some(self.output_callback(attempt))) => report?,
            _ = self.interrupt.triggered() => return Err(VerifyError::Interrupted.into()),
        };

        let duration_secs = started.elapsed().as_secs_f64();
        match &report.result {
            TestResult::Success => self.logger.log(&LogEvent::CheckPassed {
                attempt,
                duration_secs,
            }),
            TestResult::Fail { message } => self.logger.log(&LogEvent::CheckFailed {
                attempt,
                message: message.clone(),
                duration_secs,
            }),
        }
        Ok(report)
    }

    /// One extra pass to strip the instrumentation from passing code.
    /// Best-effort: anything short of a passing cleaned file restores `passing`.
    async fn remove_debug_logs(
        &self,
        attempt: usize,
        session: &Session,
        check: &dyn Check,
        passing: &str,
    ) -> Result<(), LoopError> {
        info!(attempt, "Removing debug logs from passing artifact");

        let cleaned = match self
            .adapter(attempt)
            .remove_debug_logs(passing, &session.artifact_path, session.thread_id.clone())
            .await
        {
            Ok(raw) => resolve_artifact(&raw, passing).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let removed = match cleaned {
            Ok(resolved) => {
                self.write_artifact(attempt, &session.artifact_path, &resolved)?;
                matches!(
                    self.run_check(attempt, check).await,
                    Ok(CheckReport {
                        result: TestResult::Success,
                        ..
                    })
                )
            }
            Err(e) => {
                warn!(error = %e, "Debug log removal failed");
                false
            }
        };

        if !removed {
            write_file(&session.artifact_path, passing)?;
        }
        self.logger.log(&LogEvent::DebugLogsRemoved { removed });
        Ok(())
    }

    fn stop_on_check_error(
        &self,
        error: CheckError,
        session: &mut Session,
        state: &RunState,
    ) -> LoopOutcome {
        let reason = match &error {
            CheckError::Verify(VerifyError::Interrupted) => {
                return LoopOutcome::interrupted(state.attempts, state.elapsed());
            }
            CheckError::Critic(e) => {
                return LoopOutcome::generation_failed(state.attempts, e.to_string(), state.elapsed());
            }
            CheckError::Verify(VerifyError::InvalidCommand { .. }) => AbortReason::InvalidCommand,
            CheckError::Verify(VerifyError::WatchdogTimeout { .. }) => AbortReason::WatchdogTimeout,
            CheckError::Capture(_) | CheckError::Io { .. } => AbortReason::CheckUnavailable,
        };

        warn!(error = %error, reason = %reason, "Check cannot continue");
        let resume_command = self.prepare_resume(session);
        LoopOutcome::aborted(
            state.attempts,
            reason,
            error.to_string(),
            resume_command,
            state.elapsed(),
        )
    }

    /// Save a typed prompt so the resume command can reference it
    fn prepare_resume(&self, session: &mut Session) -> String {
        match session.persist_prompt() {
            Ok(true) => info!(path = %session.prompt_file.display(), "Saved prompt for resuming"),
            Ok(false) => {}
            Err(e) => warn!(
                error = %e,
                path = %session.prompt_file.display(),
                "Failed to save prompt"
            ),
        }
        ResumeCommand::from_session(&self.program, session).render()
    }

    fn adapter(&self, attempt: usize) -> GeneratorAdapter {
        GeneratorAdapter::new(self.generator.clone()).with_chunk_callback(self.chunk_callback(attempt))
    }

    fn chunk_callback(&self, attempt: usize) -> ChunkCallback {
        let logger = self.logger.clone();
        Arc::new(move |text: &str| {
            logger.log(&LogEvent::GeneratorChunk {
                attempt,
                text: text.to_string(),
            });
        })
    }

    fn output_callback(&self, attempt: usize) -> OutputCallback {
        let logger = self.logger.clone();
        Arc::new(move |chunk: &str, stream: OutputStream| {
            let stream = match stream {
                OutputStream::Stdout => StreamType::Stdout,
                OutputStream::Stderr => StreamType::Stderr,
            };
            logger.log(&LogEvent::CheckOutput {
                attempt,
                stream,
                chunk: chunk.to_string(),
            });
        })
    }

    fn write_artifact(
        &self,
        attempt: usize,
        path: &Path,
        resolved: &ResolvedArtifact,
    ) -> Result<(), LoopError> {
        write_file(path, &resolved.content)?;
        self.logger.log(&LogEvent::ArtifactWritten {
            attempt,
            path: path.to_path_buf(),
            bytes: resolved.content.len(),
            shape: shape_name(resolved.shape).to_string(),
        });
        Ok(())
    }
}

fn generation_context(
    session: &Session,
    prior: &str,
    visual: Option<VisualAttachments>,
) -> GenerationContext {
    let mut ctx = GenerationContext::new(session.artifact_path.clone(), session.prompt.clone())
        .with_prior_artifact(prior)
        .with_last_error(session.last_error.clone())
        .with_manifest(load_manifest_for(&session.artifact_path))
        .interactive(session.interactive)
        .allow_diffs(session.allow_diffs)
        .with_thread(session.thread_id.clone())
        .with_visual(visual);

    if let Some(command) = session.check.command() {
        ctx = ctx.with_check_command(command);
    }
    if let Some(test_file) = &session.test_file {
        let test_code = std::fs::read_to_string(test_file).ok();
        ctx = ctx.with_test(test_file.clone(), test_code);
    }
    ctx
}

/// Current artifact text; a missing file reads as empty
fn read_artifact(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(error = %e, path = %path.display(), "No readable prior artifact");
            String::new()
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), LoopError> {
    let result = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
    .and_then(|_| std::fs::write(path, content));

    result.map_err(|source| LoopError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn tactic_name(tactic: Tactic) -> &'static str {
    match tactic {
        Tactic::Normal => "normal",
        Tactic::AddDebugLogs { .. } => "add_debug_logs",
    }
}

fn shape_name(shape: ResponseShape) -> &'static str {
    match shape {
        ResponseShape::FullArtifact => "full_artifact",
        ResponseShape::UnifiedDiff => "unified_diff",
    }
}
