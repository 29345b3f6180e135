use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const RULE_WIDTH: usize = 69;

/// Type of output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Stdout,
    Stderr,
}

/// Structured log events for the synthesis loop.
///
/// `attempt` is 0 for the initial check that runs before any generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    LoopStarted {
        artifact: PathBuf,
        check: String,
        max_runs: usize,
        generator: String,
    },
    InitialCheck {
        passed: bool,
    },
    AttemptStarted {
        attempt: usize,
        max_runs: usize,
        tactic: String,
    },
    /// Incremental generator output
    GeneratorChunk {
        attempt: usize,
        text: String,
    },
    ArtifactWritten {
        attempt: usize,
        path: PathBuf,
        bytes: usize,
        shape: String,
    },
    PatchRejected {
        attempt: usize,
        error: String,
    },
    CheckStarted {
        attempt: usize,
        check: String,
    },
    /// Incremental check output
    CheckOutput {
        attempt: usize,
        stream: StreamType,
        chunk: String,
    },
    CheckPassed {
        attempt: usize,
        duration_secs: f64,
    },
    CheckFailed {
        attempt: usize,
        message: String,
        duration_secs: f64,
    },
    EscalationTriggered {
        attempt: usize,
        repeats: usize,
    },
    DebugLogsRemoved {
        removed: bool,
    },
    LoopStopped {
        outcome: String,
        attempts: usize,
        duration_secs: f64,
    },
}

impl LogEvent {
    /// Chunks of streamed text. Shown live, never mirrored to the log file.
    fn is_stream(&self) -> bool {
        matches!(
            self,
            LogEvent::GeneratorChunk { .. } | LogEvent::CheckOutput { .. }
        )
    }

    fn stamped(&self) -> serde_json::Value {
        let now = chrono::Utc::now().to_rfc3339();
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut fields)) => {
                fields.insert("timestamp".into(), now.into());
                serde_json::Value::Object(fields)
            }
            Ok(other) => other,
            Err(_) => serde_json::Value::Null,
        }
    }
}

/// How events are rendered on stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Coloured boxes, with generator and check output streamed live
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
    /// One terse line per event
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            other => return Err(format!("'{}' is not a log format (pretty, json, compact)", other)),
        };
        Ok(format)
    }
}

/// Renders loop events on stderr and optionally mirrors them to a JSONL file
pub struct Logger {
    format: LogFormat,
    mirror: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            mirror: None,
        }
    }

    /// Also append each non-streamed event, timestamped, to `log_path`
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        match log_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)?,
            _ => {}
        }
        let file = File::options().create(true).append(true).open(log_path)?;

        let mut logger = Self::new(format);
        logger.mirror = Some(Mutex::new(file));
        Ok(logger)
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn log(&self, event: &LogEvent) {
        if !event.is_stream() {
            self.mirror_to_file(event);
        }

        match self.format {
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
            LogFormat::Json => {
                if let Ok(line) = serde_json::to_string(event) {
                    let _ = writeln!(std::io::stderr().lock(), "{}", line);
                }
            }
        }
    }

    fn mirror_to_file(&self, event: &LogEvent) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        if let Ok(mut file) = mirror.lock() {
            let _ = writeln!(file, "{}", event.stamped());
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::LoopStarted {
                artifact,
                check,
                max_runs,
                generator,
            } => {
                let top = format!("╭{}╮", "─".repeat(RULE_WIDTH));
                let bottom = format!("╰{}╯", "─".repeat(RULE_WIDTH));
                let _ = writeln!(stderr);
                let _ = writeln!(stderr, "{}", top.bright_blue());
                let _ = writeln!(
                    stderr,
                    "{}  {}  {}",
                    "│".bright_blue(),
                    "synthloop".bold().bright_white(),
                    format!("{} · up to {} runs", generator, max_runs).dimmed()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "Artifact:".dimmed(),
                    Self::truncate(&artifact.display().to_string(), 56).dimmed()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "Check:".dimmed(),
                    Self::truncate(check, 59).dimmed()
                );
                let _ = writeln!(stderr, "{}", bottom.bright_blue());
                let _ = writeln!(stderr);
            }
            LogEvent::InitialCheck { passed } => {
                if *passed {
                    let _ = writeln!(
                        stderr,
                        "  {} {}",
                        "✓".bright_green(),
                        "Check already passes; nothing to generate".bright_green()
                    );
                } else {
                    let _ = writeln!(
                        stderr,
                        "  {} {}",
                        "→".dimmed(),
                        "Check fails; starting generation".dimmed()
                    );
                }
                let _ = writeln!(stderr);
            }
            LogEvent::AttemptStarted {
                attempt,
                max_runs,
                tactic,
            } => {
                let title = format!("─ Attempt {}/{} ", attempt, max_runs);
                let padding = "─".repeat(RULE_WIDTH.saturating_sub(title.chars().count() + 1));
                let _ = writeln!(
                    stderr,
                    "{}{}{}",
                    "┌".bright_blue(),
                    title.bright_blue().bold(),
                    padding.bright_blue()
                );
                let _ = writeln!(stderr);
                if tactic != "normal" {
                    let _ = writeln!(
                        stderr,
                        "  {} {}",
                        "⚡".bright_yellow(),
                        format!("Tactic: {}", tactic).bright_yellow()
                    );
                }
                let _ = writeln!(
                    stderr,
                    "  {} {}",
                    "▶".bright_cyan(),
                    "GENERATE".bright_cyan().bold()
                );
                let _ = write!(stderr, "    {} ", "│".dimmed());
            }
            LogEvent::GeneratorChunk { text, .. } => {
                let _ = write!(stderr, "{}", Self::indent_stream(text).dimmed());
            }
            LogEvent::ArtifactWritten {
                path, bytes, shape, ..
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "    {} Wrote {} ({} bytes, {})",
                    "✓".bright_green(),
                    path.display(),
                    bytes,
                    shape.replace('_', " ")
                );
                let _ = writeln!(stderr);
            }
            LogEvent::PatchRejected { error, .. } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "    {} {}",
                    "✗".bright_red(),
                    format!("Patch rejected: {}", error).bright_red()
                );
                Self::footer(&mut stderr);
            }
            LogEvent::CheckStarted { check, .. } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {}",
                    "▶".bright_magenta(),
                    "CHECK".bright_magenta().bold(),
                    check.dimmed()
                );
                let _ = write!(stderr, "    {} ", "│".dimmed());
            }
            LogEvent::CheckOutput { stream, chunk, .. } => {
                let text = Self::indent_stream(chunk);
                let _ = match stream {
                    StreamType::Stdout => write!(stderr, "{}", text.normal()),
                    StreamType::Stderr => write!(stderr, "{}", text.dimmed()),
                };
            }
            LogEvent::CheckPassed {
                attempt,
                duration_secs,
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "    {} Passed ({:.1}s)",
                    "✓".bright_green(),
                    duration_secs
                );
                if *attempt > 0 {
                    Self::footer(&mut stderr);
                }
            }
            LogEvent::CheckFailed {
                attempt,
                duration_secs,
                ..
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "    {} Failed ({:.1}s)",
                    "✗".bright_red(),
                    duration_secs
                );
                if *attempt > 0 {
                    Self::footer(&mut stderr);
                }
            }
            LogEvent::EscalationTriggered { repeats, .. } => {
                let _ = writeln!(
                    stderr,
                    "{} Same failure {} times in a row; asking for debug logs next",
                    "⚠".bright_yellow(),
                    repeats
                );
                let _ = writeln!(stderr);
            }
            LogEvent::DebugLogsRemoved { removed } => {
                if *removed {
                    let _ = writeln!(stderr, "{} Removed debug logs", "✓".bright_green());
                } else {
                    let _ = writeln!(
                        stderr,
                        "{} Could not remove debug logs cleanly; keeping the passing version",
                        "⚠".bright_yellow()
                    );
                }
            }
            LogEvent::LoopStopped { .. } => {
                // Rendered by the binary's outcome summary
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::LoopStarted { artifact, .. } => {
                format!("[{}] loop:start {}", timestamp, artifact.display())
            }
            LogEvent::InitialCheck { passed } => format!(
                "[{}] check:initial {}",
                timestamp,
                if *passed { "pass" } else { "fail" }
            ),
            LogEvent::AttemptStarted {
                attempt, tactic, ..
            } => format!("[{}] attempt:start:{} {}", timestamp, attempt, tactic),
            LogEvent::ArtifactWritten { attempt, bytes, .. } => {
                format!("[{}] artifact:{} {}b", timestamp, attempt, bytes)
            }
            LogEvent::PatchRejected { attempt, error } => {
                format!("[{}] patch:reject:{} {}", timestamp, attempt, error)
            }
            LogEvent::CheckStarted { attempt, .. } => {
                format!("[{}] check:start:{}", timestamp, attempt)
            }
            LogEvent::CheckPassed {
                attempt,
                duration_secs,
            } => format!("[{}] check:pass:{} {:.1}s", timestamp, attempt, duration_secs),
            LogEvent::CheckFailed {
                attempt,
                duration_secs,
                ..
            } => format!("[{}] check:fail:{} {:.1}s", timestamp, attempt, duration_secs),
            LogEvent::EscalationTriggered { attempt, repeats } => {
                format!("[{}] escalate:{} x{}", timestamp, attempt, repeats)
            }
            LogEvent::DebugLogsRemoved { removed } => format!(
                "[{}] logs:{}",
                timestamp,
                if *removed { "removed" } else { "kept" }
            ),
            LogEvent::LoopStopped {
                outcome,
                attempts,
                duration_secs,
            } => format!(
                "[{}] loop:stop {} {} {:.1}s",
                timestamp, outcome, attempts, duration_secs
            ),
            LogEvent::GeneratorChunk { .. } | LogEvent::CheckOutput { .. } => return,
        };
        let _ = writeln!(stderr, "{}", msg);
    }

    fn footer(stderr: &mut std::io::Stderr) {
        let _ = writeln!(stderr);
        let _ = writeln!(
            stderr,
            "{}",
            format!("└{}┘", "─".repeat(RULE_WIDTH)).bright_blue()
        );
        let _ = writeln!(stderr);
    }

    /// Keep streamed text inside the gutter
    fn indent_stream(text: &str) -> String {
        text.replace('\n', "\n    │ ")
    }

    fn truncate(s: &str, max_chars: usize) -> String {
        if s.chars().count() > max_chars {
            let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{}...", head)
        } else {
            s.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_event_tagging() {
        let json = serde_json::to_value(LogEvent::CheckFailed {
            attempt: 2,
            message: "boom".to_string(),
            duration_secs: 0.5,
        })
        .unwrap();
        assert_eq!(json["event"], "check_failed");
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn test_file_mirror_skips_streamed_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("run.jsonl");
        let logger = Logger::with_file(LogFormat::Compact, &path).unwrap();

        logger.log(&LogEvent::InitialCheck { passed: false });
        logger.log(&LogEvent::GeneratorChunk {
            attempt: 1,
            text: "partial".to_string(),
        });
        logger.log(&LogEvent::DebugLogsRemoved { removed: true });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "initial_check");
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(lines[1]["event"], "debug_logs_removed");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(Logger::truncate("héllo wörld", 8), "héllo...");
        assert_eq!(Logger::truncate("short", 8), "short");
    }
}
