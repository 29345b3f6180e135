use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synthloop_patch::{apply_unified_diff, classify_response, PatchError, ResponseShape};
use tracing::debug;

use crate::extract::{extract_code_block, strip_code_fences};
use crate::manifest::find_upwards;
use crate::prompts::{
    file_stem, Prompts, FILE_SUGGESTION_SYSTEM_PROMPT, GENERATION_SYSTEM_PROMPT,
    TEST_COMMAND_SYSTEM_PROMPT, TEST_FEEDBACK_SYSTEM_PROMPT, TEST_GENERATION_SYSTEM_PROMPT,
    VISUAL_SYSTEM_PROMPT,
};
use crate::{ChunkCallback, CompletionRequest, Generator, GeneratorError, Manifest, Message};

/// How the next generation call should approach the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tactic", rename_all = "snake_case")]
pub enum Tactic {
    Normal,
    /// The same failure repeated this many times; instrument instead of fixing
    AddDebugLogs { repeats: usize },
}

/// The two images a visual attempt is judged on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualAttachments {
    pub design_url: String,
    pub screenshot_url: String,
}

/// Everything a generation attempt is built from
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub artifact_path: PathBuf,
    pub prompt: String,
    pub prior_artifact: String,
    pub test_file: Option<PathBuf>,
    pub test_code: Option<String>,
    pub check_command: Option<String>,
    pub last_error: Option<String>,
    pub manifest: Option<Manifest>,
    pub interactive: bool,
    pub allow_diffs: bool,
    pub thread_id: Option<String>,
    pub visual: Option<VisualAttachments>,
}

impl GenerationContext {
    pub fn new(artifact_path: PathBuf, prompt: impl Into<String>) -> Self {
        Self {
            artifact_path,
            prompt: prompt.into(),
            prior_artifact: String::new(),
            test_file: None,
            test_code: None,
            check_command: None,
            last_error: None,
            manifest: None,
            interactive: false,
            allow_diffs: false,
            thread_id: None,
            visual: None,
        }
    }

    pub fn with_prior_artifact(mut self, prior: impl Into<String>) -> Self {
        self.prior_artifact = prior.into();
        self
    }

    pub fn with_test(mut self, test_file: PathBuf, test_code: Option<String>) -> Self {
        self.test_file = Some(test_file);
        self.test_code = test_code;
        self
    }

    pub fn with_check_command(mut self, command: impl Into<String>) -> Self {
        self.check_command = Some(command.into());
        self
    }

    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = error;
        self
    }

    pub fn with_manifest(mut self, manifest: Option<Manifest>) -> Self {
        self.manifest = manifest;
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

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_visual(mut self, visual: Option<VisualAttachments>) -> Self {
        self.visual = visual;
        self
    }
}

/// The artifact text recovered from a raw response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub content: String,
    pub shape: ResponseShape,
}

/// Strip fences and, for diff-shaped responses, patch the prior artifact.
///
/// A [`PatchError`] leaves `prior` untouched for the caller.
pub fn resolve_artifact(raw: &str, prior: &str) -> Result<ResolvedArtifact, PatchError> {
    let stripped = strip_code_fences(raw);
    match classify_response(&stripped) {
        ResponseShape::UnifiedDiff => Ok(ResolvedArtifact {
            content: apply_unified_diff(&stripped, prior)?,
            shape: ResponseShape::UnifiedDiff,
        }),
        ResponseShape::FullArtifact => Ok(ResolvedArtifact {
            content: stripped,
            shape: ResponseShape::FullArtifact,
        }),
    }
}

/// `npm test -- <stem>` for a test file
pub fn default_test_command(test_file: &Path) -> String {
    format!("npm test -- {}", file_stem(test_file))
}

/// Builds prompts for the loop and obtains raw text from the completion engine
#[derive(Clone)]
pub struct GeneratorAdapter {
    generator: Arc<dyn Generator>,
    on_chunk: Option<ChunkCallback>,
}

impl GeneratorAdapter {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            on_chunk: None,
        }
    }

    pub fn with_chunk_callback(mut self, on_chunk: ChunkCallback) -> Self {
        self.on_chunk = Some(on_chunk);
        self
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }

    async fn call(&self, request: CompletionRequest) -> Result<String, GeneratorError> {
        self.generator
            .complete_with_callback(&request, self.on_chunk.clone())
            .await
    }

    /// Request a new artifact; returns the raw response text
    pub async fn generate(
        &self,
        ctx: &GenerationContext,
        tactic: Tactic,
    ) -> Result<String, GeneratorError> {
        debug!(
            artifact = %ctx.artifact_path.display(),
            tactic = ?tactic,
            visual = ctx.visual.is_some(),
            has_error = ctx.last_error.is_some(),
            "Building generation request"
        );

        let request = match &ctx.visual {
            Some(visual) => {
                let mut text = Prompts::build_visual_prompt(
                    ctx.last_error.as_deref(),
                    &ctx.prior_artifact,
                    &ctx.prompt,
                    &ctx.artifact_path,
                );
                if let Tactic::AddDebugLogs { repeats } = tactic {
                    text.push_str(&format!(
                        "\n\nThe same feedback has come back {} times in a row. Take a different approach this time; rewriting the layout from scratch is fine.",
                        repeats
                    ));
                }
                CompletionRequest::new(vec![
                    Message::system(VISUAL_SYSTEM_PROMPT),
                    Message::user_with_images(
                        text,
                        &[visual.design_url.clone(), visual.screenshot_url.clone()],
                    ),
                ])
            }
            None => {
                let text = match tactic {
                    Tactic::Normal => Prompts::build_generation_prompt(ctx),
                    Tactic::AddDebugLogs { repeats } => {
                        Prompts::build_debug_logs_prompt(ctx, repeats)
                    }
                };
                CompletionRequest::new(vec![
                    Message::system(GENERATION_SYSTEM_PROMPT),
                    Message::user(text),
                ])
                .with_thread(ctx.thread_id.clone())
            }
        };

        self.call(request).await
    }

    /// Ask for the debug logging to be removed from passing code
    pub async fn remove_debug_logs(
        &self,
        code: &str,
        artifact_path: &Path,
        thread_id: Option<String>,
    ) -> Result<String, GeneratorError> {
        let request = CompletionRequest::new(vec![
            Message::system(GENERATION_SYSTEM_PROMPT),
            Message::user(Prompts::build_remove_logs_prompt(code, artifact_path)),
        ])
        .with_thread(thread_id);
        self.call(request).await
    }

    /// Suggest a non-watch command for `test_file`, falling back to `npm test -- <stem>`
    pub async fn suggest_test_command(&self, test_file: &Path) -> Result<String, GeneratorError> {
        let fallback = default_test_command(test_file);
        let dir = test_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let Some(package_json) = find_upwards(dir, "package.json")
            .and_then(|path| std::fs::read_to_string(path).ok())
        else {
            return Ok(fallback);
        };

        let raw = self
            .call(CompletionRequest::new(vec![
                Message::system(TEST_COMMAND_SYSTEM_PROMPT),
                Message::user(Prompts::build_test_command_prompt(test_file, &package_json)),
            ]))
            .await?;

        let suggestion = strip_code_fences(&raw)
            .lines()
            .map(|l| l.trim().trim_matches('`').trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();

        Ok(if suggestion.is_empty() {
            fallback
        } else {
            suggestion
        })
    }

    /// Draft a unit test file for the intent
    pub async fn generate_test(
        &self,
        intent: &str,
        test_file: &Path,
        artifact_path: &Path,
        example_tests: &[String],
        package_json: Option<&str>,
    ) -> Result<String, GeneratorError> {
        let raw = self
            .call(CompletionRequest::new(vec![
                Message::system(TEST_GENERATION_SYSTEM_PROMPT),
                Message::user(Prompts::build_test_generation_prompt(
                    intent,
                    test_file,
                    artifact_path,
                    example_tests,
                    package_json,
                )),
            ]))
            .await?;
        Ok(extract_code_block(&raw))
    }

    /// Revise a drafted test according to user feedback
    pub async fn revise_test(
        &self,
        intent: &str,
        test_file: &Path,
        artifact_path: &Path,
        test_code: &str,
        feedback: &str,
    ) -> Result<String, GeneratorError> {
        let raw = self
            .call(CompletionRequest::new(vec![
                Message::system(TEST_FEEDBACK_SYSTEM_PROMPT),
                Message::user(Prompts::build_test_feedback_prompt(
                    intent,
                    test_file,
                    artifact_path,
                    test_code,
                    feedback,
                )),
            ]))
            .await?;
        Ok(extract_code_block(&raw))
    }

    /// Suggest a relative path for new code, given a sample of project files
    pub async fn suggest_file_path(
        &self,
        intent: &str,
        files: &[String],
    ) -> Result<Option<String>, GeneratorError> {
        let raw = self
            .call(CompletionRequest::new(vec![
                Message::system(FILE_SUGGESTION_SYSTEM_PROMPT),
                Message::user(Prompts::build_file_suggestion_prompt(intent, files)),
            ]))
            .await?;

        Ok(strip_code_fences(&raw)
            .lines()
            .map(|l| l.trim().trim_matches('`').trim_start_matches('/').trim())
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Returns canned replies and keeps every request it saw
    struct Scripted {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            })
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
            _on_chunk: Option<ChunkCallback>,
        ) -> Result<String, GeneratorError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.replies.lock().unwrap().pop().unwrap_or_default())
        }
    }

    #[test]
    fn test_resolve_full_artifact() {
        let resolved = resolve_artifact("Reasoning...\n```ts\nexport const a = 2;\n```", "old").unwrap();
        assert_eq!(resolved.content, "export const a = 2;");
        assert_eq!(resolved.shape, ResponseShape::FullArtifact);
    }

    #[test]
    fn test_resolve_diff_against_prior() {
        let raw = "```diff\n--- a/x.ts\n+++ b/x.ts\n@@ -1,2 +1,2 @@\n-Hello\n+Hi\n World\n```";
        let resolved = resolve_artifact(raw, "Hello\nWorld\n").unwrap();
        assert_eq!(resolved.content, "Hi\nWorld\n");
        assert_eq!(resolved.shape, ResponseShape::UnifiedDiff);
    }

    #[test]
    fn test_resolve_bad_diff_is_patch_error() {
        let raw = "@@ -1,1 +1,1 @@\n-Missing\n+Present";
        assert!(resolve_artifact(raw, "Hello\n").is_err());
    }

    #[test]
    fn test_resolve_headers_only_diff_is_rejected() {
        let raw = "```diff\n--- a/add.ts\n+++ b/add.ts\n```";
        assert!(matches!(
            resolve_artifact(raw, "export const a = 1;\n"),
            Err(PatchError::EmptyPatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_escalation_prompt_and_thread() {
        let scripted = Scripted::new(&["ok"]);
        let adapter = GeneratorAdapter::new(scripted.clone());
        let ctx = GenerationContext::new(PathBuf::from("a.ts"), "do it")
            .with_thread(Some("t-1".to_string()));

        adapter
            .generate(&ctx, Tactic::AddDebugLogs { repeats: 4 })
            .await
            .unwrap();

        let seen = scripted.seen.lock().unwrap();
        assert_eq!(seen[0].thread_id.as_deref(), Some("t-1"));
        assert_eq!(seen[0].messages[0].text(), GENERATION_SYSTEM_PROMPT);
        assert!(seen[0].messages[1].text().contains("4 times in a row"));
    }

    #[tokio::test]
    async fn test_visual_request_carries_both_images() {
        let scripted = Scripted::new(&["<div/>"]);
        let adapter = GeneratorAdapter::new(scripted.clone());
        let ctx = GenerationContext::new(PathBuf::from("page.tsx"), "")
            .with_last_error(Some("button is misaligned".to_string()))
            .with_visual(Some(VisualAttachments {
                design_url: "data:image/png;base64,AAA".to_string(),
                screenshot_url: "data:image/png;base64,BBB".to_string(),
            }));

        adapter.generate(&ctx, Tactic::Normal).await.unwrap();

        let seen = scripted.seen.lock().unwrap();
        let json = serde_json::to_value(&seen[0].messages[1]).unwrap();
        assert_eq!(json["content"][0]["image_url"]["url"], "data:image/png;base64,AAA");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,BBB");
        assert!(seen[0].messages[1].text().contains("button is misaligned"));
        assert!(seen[0].thread_id.is_none());
    }

    #[tokio::test]
    async fn test_test_command_fallback_without_package_json() {
        let dir = TempDir::new().unwrap();
        let scripted = Scripted::new(&[]);
        let adapter = GeneratorAdapter::new(scripted.clone());

        let command = adapter
            .suggest_test_command(&dir.path().join("add.test.ts"))
            .await
            .unwrap();

        assert_eq!(command, "npm test -- add");
        assert!(scripted.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_test_command_suggestion_is_one_line() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), "{\"scripts\":{\"test\":\"vitest\"}}").unwrap();
        let scripted = Scripted::new(&["```sh\nnpm test -- add --run\n```"]);
        let adapter = GeneratorAdapter::new(scripted);

        let command = adapter
            .suggest_test_command(&dir.path().join("add.test.ts"))
            .await
            .unwrap();
        assert_eq!(command, "npm test -- add --run");
    }

    #[tokio::test]
    async fn test_file_suggestion_strips_leading_slash() {
        let adapter = GeneratorAdapter::new(Scripted::new(&["`/src/utils/slugify.ts`\n"]));
        let path = adapter
            .suggest_file_path("slugify strings", &["src/index.ts".to_string()])
            .await
            .unwrap();
        assert_eq!(path.as_deref(), Some("src/utils/slugify.ts"));
    }
}
