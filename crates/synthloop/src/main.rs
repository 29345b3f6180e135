mod config;
mod interactive;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use synthloop_core::{
    default_prompt_file, default_test_file, Check, CheckSpec, CommandCheck, EscalationTracker,
    LoopOutcome, PlaywrightCapture, Session, SynthesisRunner, VisualCheck,
};
use synthloop_generator::{create_generator, Generator, GeneratorAdapter, GeneratorError, ThreadStore};
use synthloop_logging::{init_tracing, LogFormat, Logger, WorkerGuard};
use synthloop_verifier::{InterruptSignal, TestVerifier, VerifierConfig};

use config::{ConfigAction, Settings};
use interactive::InteractiveSetup;

/// Exit status for generator and configuration failures
const EXIT_CONFIG_FAILURE: i32 = 2;
const PROMPT_PREVIEW_CHARS: usize = 100;
const ERROR_PREVIEW_LINES: usize = 20;

#[derive(Parser, Debug)]
#[command(
    name = "synthloop",
    about = "Generate code until its check passes",
    version,
    author,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// File to synthesize (omit for interactive mode)
    artifact: Option<PathBuf>,

    /// Shell command that checks the artifact (default: suggested by the generator)
    #[arg(short = 't', long)]
    test_command: Option<String>,

    /// Unit test file (default: <stem>.test.<ext> next to the artifact)
    #[arg(short = 'f', long)]
    test_file: Option<PathBuf>,

    /// Prompt file (default: <stem>.prompt.md next to the artifact)
    #[arg(short = 'p', long)]
    prompt_file: Option<PathBuf>,

    /// Prompt text, instead of reading the prompt file
    #[arg(long)]
    prompt: Option<String>,

    /// Maximum generation attempts
    #[arg(short = 'm', long)]
    max_runs: Option<usize>,

    /// Model name; llama and phi models run on a local Ollama server
    #[arg(long)]
    model: Option<String>,

    /// Continue an earlier conversation thread
    #[arg(long)]
    thread: Option<String>,

    /// Judge the rendered page at URL against the reference design instead of running tests
    #[arg(short = 'v', long, value_name = "URL")]
    visual: Option<String>,

    /// Guided setup: describe the code, review a generated test, pick a test command
    #[arg(long)]
    interactive: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormatChoice,

    /// Also append loop events as JSON lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write tracing diagnostics to this file
    #[arg(long)]
    trace_file: Option<PathBuf>,

    /// Tracing level for diagnostics (RUST_LOG overrides)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Output final result as JSON
    #[arg(long)]
    json_output: bool,

    /// Dry run: show the resolved configuration without generating anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read or change the global configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

/// Where the prompt came from
#[derive(Debug, PartialEq)]
struct PromptSource {
    text: String,
    file: PathBuf,
    /// False when given with `--prompt`; the file is written only if a resume command needs it
    on_disk: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if let Some(Commands::Config { action }) = cli.command.take() {
        return config::handle_config_command(action);
    }

    let log_format: LogFormat = cli.log_format.into();
    let guard = init_tracing(&cli.log_level, log_format, cli.trace_file.as_deref());

    let working_dir = std::env::current_dir().context("Failed to get current directory")?;
    let mut settings = Settings::load(&working_dir)?;
    if let Some(ref model) = cli.model {
        settings.model = model.clone();
    }
    if let Some(max_runs) = cli.max_runs {
        settings.max_runs = max_runs;
    }

    if cli.dry_run {
        print_dry_run(&cli, &settings)?;
        return Ok(());
    }

    // Handle Ctrl+C gracefully
    let interrupt = InterruptSignal::new();
    let handle = interrupt.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Stopping...");
        handle.trigger();
    })
    .context("Failed to set Ctrl+C handler")?;

    let generator: Arc<dyn Generator> = match create_generator(settings.generator_settings()) {
        Ok(generator) => Arc::from(generator),
        Err(e) => exit_with_config_error(&e, guard),
    };
    info!(generator = generator.name(), "Generator ready");

    let logger = match cli.log_file {
        Some(ref path) => Logger::with_file(log_format, path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?,
        None => Logger::new(log_format),
    };
    let logger = Arc::new(logger);

    let verifier = || {
        TestVerifier::new(
            VerifierConfig::new(working_dir.clone()).with_idle_timeout(settings.watchdog),
        )
        .with_interrupt(interrupt.clone())
    };
    let adapter = GeneratorAdapter::new(generator.clone());

    let session = if cli.interactive || cli.artifact.is_none() {
        let setup_verifier = verifier();
        let setup = InteractiveSetup::new(&adapter, &setup_verifier, &working_dir, interrupt.clone())
            .with_artifact(cli.artifact.clone());
        setup.run().await
    } else {
        build_session(&cli, &adapter).await.map(Some)
    };
    let mut session = match session {
        Ok(Some(session)) => session,
        Ok(None) => {
            eprintln!("Goodbye!");
            return Ok(());
        }
        Err(e) => match e.downcast_ref::<GeneratorError>() {
            Some(generator_error) => exit_with_config_error(generator_error, guard),
            None => return Err(e),
        },
    };

    session = session
        .with_max_runs(settings.max_runs)
        .with_thread(Some(
            cli.thread.clone().unwrap_or_else(ThreadStore::new_thread_id),
        ))
        .allow_diffs(settings.allow_diffs);

    let check: Box<dyn Check> = match session.check {
        CheckSpec::Command(ref command) => Box::new(CommandCheck::new(verifier(), command.clone())),
        CheckSpec::Visual { ref url } => {
            let capture = Box::new(PlaywrightCapture::new(working_dir.clone()));
            match VisualCheck::for_artifact(&session.artifact_path, url.clone(), capture, generator.clone()) {
                Ok(check) => Box::new(check.with_debug_dir(working_dir.join("debug").join("images"))),
                Err(e) => exit_with_config_error(&e, guard),
            }
        }
    };

    let runner = SynthesisRunner::new(generator.clone(), logger).with_interrupt(interrupt.clone());

    let mut tracker = EscalationTracker::with_window(settings.escalation_window);
    let outcome = runner
        .run(&mut session, check.as_ref(), &mut tracker)
        .await?;

    if cli.json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        if matches!(outcome, LoopOutcome::Interrupted { .. }) {
            eprintln!("Goodbye!");
        }
    } else {
        print_outcome(&outcome);
    }

    // Flush buffered trace lines before exiting
    drop(guard);
    std::process::exit(outcome.exit_code());
}

fn exit_with_config_error(
    error: &dyn std::fmt::Display,
    guard: Option<WorkerGuard>,
) -> ! {
    eprintln!("Error: {}", error);
    drop(guard);
    std::process::exit(EXIT_CONFIG_FAILURE);
}

/// Assemble the session for a run with an explicit artifact
async fn build_session(cli: &Cli, adapter: &GeneratorAdapter) -> Result<Session> {
    let artifact = cli
        .artifact
        .clone()
        .context("An artifact path is required outside interactive mode")?;
    let prompt = resolve_prompt(cli, &artifact)?;

    let test_file = match cli.visual {
        Some(_) => None,
        None => Some(
            cli.test_file
                .clone()
                .unwrap_or_else(|| default_test_file(&artifact)),
        ),
    };

    let check = match (&cli.visual, &cli.test_command, &test_file) {
        (Some(url), _, _) => CheckSpec::Visual { url: url.clone() },
        (None, Some(command), _) => CheckSpec::Command(command.clone()),
        (None, None, Some(test_file)) => {
            CheckSpec::Command(adapter.suggest_test_command(test_file).await?)
        }
        (None, None, None) => anyhow::bail!("No test command given"),
    };

    let mut session = Session::new(artifact, prompt.text, check).with_test_file(test_file);
    if prompt.on_disk {
        session = session.with_prompt_file(prompt.file);
    } else {
        session.prompt_file = prompt.file;
    }
    Ok(session)
}

fn resolve_prompt(cli: &Cli, artifact: &Path) -> Result<PromptSource> {
    let file = cli
        .prompt_file
        .clone()
        .unwrap_or_else(|| default_prompt_file(artifact));

    // Prefer --prompt flag
    if let Some(ref text) = cli.prompt {
        return Ok(PromptSource {
            text: text.clone(),
            file,
            on_disk: false,
        });
    }

    if !file.exists() {
        anyhow::bail!(
            "No prompt provided. Use --prompt or create {}",
            file.display()
        );
    }

    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read prompt file {}", file.display()))?
        .trim()
        .to_string();
    if text.is_empty() {
        anyhow::bail!("Prompt file {} is empty", file.display());
    }

    Ok(PromptSource {
        text,
        file,
        on_disk: true,
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

fn print_dry_run(cli: &Cli, settings: &Settings) -> Result<()> {
    println!("=== Dry Run ===");
    match cli.artifact {
        Some(ref artifact) if !cli.interactive => {
            let prompt = resolve_prompt(cli, artifact)?;
            println!("Artifact: {}", artifact.display());
            println!("Prompt: {}", preview(&prompt.text, PROMPT_PREVIEW_CHARS));
            println!("Prompt file: {}", prompt.file.display());
            match (&cli.visual, &cli.test_command) {
                (Some(url), _) => println!("Check: visual comparison of {}", url),
                (None, Some(command)) => println!("Check: {}", command),
                (None, None) => println!("Check: suggested by the generator"),
            }
            if cli.visual.is_none() {
                let test_file = cli
                    .test_file
                    .clone()
                    .unwrap_or_else(|| default_test_file(artifact));
                println!("Test file: {}", test_file.display());
            }
        }
        _ => println!("Mode: interactive"),
    }
    println!("Generator: {}", settings.generator_label());
    println!("Max runs: {}", settings.max_runs);
    println!("Escalation window: {}", settings.escalation_window);
    println!("Watchdog: {}s", settings.watchdog.as_secs());
    println!("Diffs allowed: {}", settings.allow_diffs);
    if let Some(ref thread) = cli.thread {
        println!("Thread: {}", thread);
    }
    Ok(())
}

fn print_outcome(outcome: &LoopOutcome) {
    match outcome {
        LoopOutcome::Success {
            attempts,
            total_duration_secs,
        } => {
            eprintln!();
            eprintln!("=== SUCCESS ===");
            if *attempts == 0 {
                eprintln!("The check already passed; nothing was generated.");
            } else {
                eprintln!("Passed after {} attempt(s)", attempts);
            }
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
        LoopOutcome::MaxRunsReached {
            attempts,
            last_error,
            resume_command,
            total_duration_secs,
        } => {
            eprintln!();
            eprintln!("=== INCOMPLETE ===");
            eprintln!("No passing version after {} attempt(s)", attempts);
            eprintln!("Duration: {:.1}s", total_duration_secs);
            if let Some(error) = last_error {
                eprintln!("Last failure:");
                print_error_preview(error);
            }
            print_resume(resume_command);
        }
        LoopOutcome::Aborted {
            attempts,
            reason,
            message,
            resume_command,
            total_duration_secs,
        } => {
            eprintln!();
            eprintln!("=== ABORTED ===");
            eprintln!("Stopped after {} attempt(s): {}", attempts, reason);
            eprintln!("Duration: {:.1}s", total_duration_secs);
            print_error_preview(message);
            print_resume(resume_command);
        }
        LoopOutcome::Interrupted { .. } => {
            eprintln!();
            eprintln!("Goodbye!");
        }
        LoopOutcome::GenerationFailed {
            attempts,
            error,
            total_duration_secs,
        } => {
            eprintln!();
            eprintln!("=== FAILED ===");
            eprintln!("Generator error after {} attempt(s): {}", attempts, error);
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
    }
}

fn print_error_preview(error: &str) {
    let lines: Vec<&str> = error.lines().collect();
    for line in lines.iter().take(ERROR_PREVIEW_LINES) {
        eprintln!("  {}", line);
    }
    if lines.len() > ERROR_PREVIEW_LINES {
        eprintln!("  ... ({} more lines)", lines.len() - ERROR_PREVIEW_LINES);
    }
}

fn print_resume(command: &str) {
    eprintln!();
    eprintln!("Resume with:");
    eprintln!("{}", command);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_invocation() {
        let cli = Cli::try_parse_from([
            "synthloop",
            "src/sum.js",
            "-t",
            "npm test -- sum",
            "-f",
            "src/sum.spec.js",
            "-m",
            "5",
            "--thread",
            "abc",
            "--log-format",
            "compact",
        ])
        .unwrap();

        assert_eq!(cli.artifact, Some(PathBuf::from("src/sum.js")));
        assert_eq!(cli.test_command.as_deref(), Some("npm test -- sum"));
        assert_eq!(cli.test_file, Some(PathBuf::from("src/sum.spec.js")));
        assert_eq!(cli.max_runs, Some(5));
        assert_eq!(cli.thread.as_deref(), Some("abc"));
        assert!(matches!(cli.log_format, LogFormatChoice::Compact));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["synthloop", "config", "set", "OPENAI_KEY=sk-x"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Set { .. }
            })
        ));

        assert!(Cli::try_parse_from(["synthloop", "sessions", "list"]).is_err());
    }

    #[test]
    fn test_no_artifact_means_interactive() {
        let cli = Cli::try_parse_from(["synthloop"]).unwrap();
        assert!(cli.artifact.is_none());
    }

    #[test]
    fn test_resolve_prompt_from_default_file() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("sum.js");
        std::fs::write(dir.path().join("sum.prompt.md"), "  add two numbers \n").unwrap();

        let cli = Cli::try_parse_from(["synthloop", "sum.js"]).unwrap();
        let prompt = resolve_prompt(&cli, &artifact).unwrap();
        assert_eq!(prompt.text, "add two numbers");
        assert_eq!(prompt.file, dir.path().join("sum.prompt.md"));
        assert!(prompt.on_disk);
    }

    #[test]
    fn test_resolve_prompt_text_flag() {
        let cli = Cli::try_parse_from(["synthloop", "sum.js", "--prompt", "add numbers"]).unwrap();
        let prompt = resolve_prompt(&cli, Path::new("sum.js")).unwrap();
        assert_eq!(
            prompt,
            PromptSource {
                text: "add numbers".to_string(),
                file: PathBuf::from("sum.prompt.md"),
                on_disk: false,
            }
        );
    }

    #[test]
    fn test_resolve_prompt_missing_file() {
        let dir = TempDir::new().unwrap();
        let cli = Cli::try_parse_from(["synthloop", "sum.js"]).unwrap();
        let err = resolve_prompt(&cli, &dir.path().join("sum.js")).unwrap_err();
        assert!(err.to_string().contains("No prompt provided"));
    }

    #[test]
    fn test_resolve_prompt_empty_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("custom.md");
        std::fs::write(&file, "   \n").unwrap();

        let cli = Cli::try_parse_from([
            "synthloop".into(),
            "sum.js".into(),
            "-p".into(),
            file.clone().into_os_string(),
        ])
        .unwrap();
        assert!(resolve_prompt(&cli, Path::new("sum.js")).is_err());
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("ééé", 2), "éé...");
        assert_eq!(preview("short", 10), "short");
    }
}
