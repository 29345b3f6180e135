use std::fmt;
use std::path::{Path, PathBuf};

use crate::session::{CheckSpec, Session};

/// How the resume command hands the prompt back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePrompt {
    File(PathBuf),
    /// The prompt could not be saved, so it is passed inline
    Text(String),
}

/// A shell command that restarts a stopped session with the same parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCommand {
    pub program: String,
    pub artifact: PathBuf,
    pub prompt: ResumePrompt,
    pub check: CheckSpec,
    pub test_file: Option<PathBuf>,
    pub max_runs: usize,
    pub thread_id: Option<String>,
}

impl ResumeCommand {
    pub fn from_session(program: &str, session: &Session) -> Self {
        Self {
            program: program.to_string(),
            artifact: session.artifact_path.clone(),
            prompt: if session.prompt_on_disk {
                ResumePrompt::File(session.prompt_file.clone())
            } else {
                ResumePrompt::Text(session.prompt.clone())
            },
            check: session.check.clone(),
            test_file: session.test_file.clone(),
            max_runs: session.max_runs,
            thread_id: session.thread_id.clone(),
        }
    }

    /// Backslash-continued, one option per line
    pub fn render(&self) -> String {
        let mut parts = vec![format!("{} {}", self.program, quote_path(&self.artifact))];

        parts.push(match &self.prompt {
            ResumePrompt::File(path) => format!("--prompt-file {}", quote_path(path)),
            ResumePrompt::Text(text) => format!("--prompt {}", quote(text)),
        });
        match &self.check {
            CheckSpec::Command(command) => parts.push(format!("--test-command {}", quote(command))),
            CheckSpec::Visual { url } => parts.push(format!("--visual {}", quote(url))),
        }
        if let Some(test_file) = &self.test_file {
            parts.push(format!("--test-file {}", quote_path(test_file)));
        }
        parts.push(format!("--max-runs {}", self.max_runs));
        if let Some(thread) = &self.thread_id {
            parts.push(format!("--thread {}", quote(thread)));
        }

        parts.join(" \\\n  ")
    }
}

impl fmt::Display for ResumeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Double-quote for a POSIX shell, escaping characters that stay special
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn quote_path(path: &Path) -> String {
    let text = path.display().to_string();
    let plain = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_'));
    if plain {
        text
    } else {
        quote(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes_inner_quotes() {
        assert_eq!(quote(r#"npm test -- -t "adds""#), r#""npm test -- -t \"adds\"""#);
        assert_eq!(quote("echo $HOME"), r#""echo \$HOME""#);
    }

    #[test]
    fn test_render_full_command() {
        let session = Session::new(
            PathBuf::from("src/sum.js"),
            "sum",
            CheckSpec::Command("npm test -- sum".to_string()),
        )
        .with_prompt_file(PathBuf::from("src/sum.prompt.md"))
        .with_test_file(Some(PathBuf::from("src/sum.test.js")))
        .with_max_runs(5)
        .with_thread(Some("abc-123".to_string()));

        let rendered = ResumeCommand::from_session("synthloop", &session).render();
        assert_eq!(
            rendered,
            "synthloop src/sum.js \\\n  \
             --prompt-file src/sum.prompt.md \\\n  \
             --test-command \"npm test -- sum\" \\\n  \
             --test-file src/sum.test.js \\\n  \
             --max-runs 5 \\\n  \
             --thread \"abc-123\""
        );
    }

    #[test]
    fn test_render_visual_without_thread() {
        let session = Session::new(
            PathBuf::from("my app/Button.tsx"),
            "button",
            CheckSpec::Visual {
                url: "http://localhost:3000".to_string(),
            },
        );
        let rendered = ResumeCommand::from_session("synthloop", &session).to_string();
        assert!(rendered.starts_with("synthloop \"my app/Button.tsx\""));
        assert!(rendered.contains("--visual \"http://localhost:3000\""));
        assert!(!rendered.contains("--thread"));
        assert!(!rendered.contains("--test-file"));
    }

    #[test]
    fn test_unsaved_prompt_is_passed_inline() {
        let session = Session::new(
            PathBuf::from("src/sum.js"),
            "add \"two\" numbers",
            CheckSpec::Command("npm test".to_string()),
        );
        let rendered = ResumeCommand::from_session("synthloop", &session).render();
        assert!(rendered.contains(r#"--prompt "add \"two\" numbers""#));
        assert!(!rendered.contains("--prompt-file"));
    }
}
