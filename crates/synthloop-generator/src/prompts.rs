use std::borrow::Cow;
use std::path::Path;

use crate::adapter::GenerationContext;

/// Instructions for the code-writing generator
pub const GENERATION_SYSTEM_PROMPT: &str = r#"You take a prompt and existing unit tests and write the implementation that satisfies them.

1. Reason step by step about the problem first: the algorithm, similar known algorithms, the state and data structures involved, and your strategy. Do not emit any code in this step.

2. Then emit one markdown code block with production-ready code that satisfies the tests and the prompt.
 - Export whatever the test file imports so it can be called from an external test.
 - Keep the code general; do not hardcode it to the test cases.
 - Use two spaces for indentation. Add logging where it helps debugging; you will see the log output on your next attempt.
 - Always return the complete file. Never elide parts with comments like "rest of your code"; the block is written to disk verbatim.
 - Do not emit tests, only the implementation.

Stop after the code block."#;

/// Instructions for the visual generator
pub const VISUAL_SYSTEM_PROMPT: &str = "You take a prompt and generate code accordingly. Use placeholders (e.g. https://placehold.co/600x400) for any new images that weren't in the code previously. Never invent image paths; always use placehold.co placeholders.";

/// Instructions for the visual critic
pub const VISUAL_CRITIC_PROMPT: &str = r#"Here are two designs. The first is my current render, which is trying to replicate the second, the original design made by a teammate. What is wrong in mine that I need to fix? Describe in detail anything wrong with the design and layout. Ignore placeholder images (gray boxes); those will be fixed later.

Point out anything wrongly missing or added, elements in the wrong locations, and anything not aligned properly. Be as detailed as possible.

If the two designs already match closely, reply with exactly "looks good" and nothing else."#;

pub const TEST_COMMAND_SYSTEM_PROMPT: &str =
    "You take a prompt and return a single line shell command and nothing else";

pub const TEST_GENERATION_SYSTEM_PROMPT: &str = r#"You are an assistant that, given a user prompt, returns markdown containing a unit test.
1. Think step by step before emitting any code. Consider the shape of the input and output, the behavior, and special situations relevant to the algorithm.

2. After planning, return one code block with the test code.
  - Start with the most basic case and progress to more complex ones.
  - Cover the happy path, then edge cases.
  - Include invalid inputs likely to break the algorithm.
  - Keep individual tests small and focused.
  - Test behavior, not implementation.

Stop after the code block."#;

pub const TEST_FEEDBACK_SYSTEM_PROMPT: &str =
    "You return code for a unit test only. No other words, just the code";

pub const FILE_SUGGESTION_SYSTEM_PROMPT: &str =
    "You return a single relative file path and nothing else";

/// Prompt templates for every generator call the loop makes
pub struct Prompts;

impl Prompts {
    /// The user message for a normal fix attempt
    pub fn build_generation_prompt(ctx: &GenerationContext) -> String {
        let mut prompt = format!(
            r#"Here is what I need:

<prompt>
{intent}
</prompt>

The current code is:
<code>
{code}
</code>

The file path for the above is {path}.
"#,
            intent = non_empty_or(&ctx.prompt, "Pass the tests"),
            code = non_empty_or(&ctx.prior_artifact, "None"),
            path = ctx.artifact_path.display(),
        );

        if let Some(test_code) = &ctx.test_code {
            prompt.push_str(&format!(
                r#"
The test code that needs to pass is:
<test>
{test}
</test>
"#,
                test = test_code,
            ));
        }
        if let Some(test_file) = &ctx.test_file {
            prompt.push_str(&format!("\nThe file path for the test is {}.\n", test_file.display()));
        }
        if let Some(command) = &ctx.check_command {
            prompt.push_str(&format!("\nThe tests are run with `{}`.\n", command));
        }

        prompt.push_str(&format!(
            r#"
The error you received on that code was:
<error>
{error}
</error>
"#,
            error = ctx
                .last_error
                .as_deref()
                .map(|e| truncate_output(e, 12_000))
                .unwrap_or(Cow::Borrowed("None")),
        ));

        if let Some(manifest) = &ctx.manifest {
            let tag = manifest_tag(manifest.file_name());
            prompt.push_str(&format!(
                r#"
Don't use any dependencies that aren't declared here unless specifically told otherwise:
<{tag}>
{contents}
</{tag}>
"#,
                tag = tag,
                contents = truncate_output(&manifest.contents, 8_000),
            ));
        }

        prompt.push_str(
            r#"
Please update the code (or generate all new code if needed) to satisfy the prompt and test.

Be sure to use good coding conventions. For instance, if you are generating a typescript
file, use types (e.g. for function parameters, etc).
"#,
        );

        if !ctx.interactive {
            prompt.push_str(
                r#"
If there is already existing code, strictly maintain the same coding style as the existing code.
Any updated code should look like it was written by the same person or team that wrote the original code.
"#,
            );
        }

        if ctx.allow_diffs && !ctx.prior_artifact.trim().is_empty() {
            prompt.push_str(
                r#"
You may answer with a unified diff against the current code (`--- a/...`, `+++ b/...`, `@@ -l,c +l,c @@` hunks) instead of the complete file.
"#,
            );
        }

        prompt
    }

    /// The escalation prompt used once the same failure keeps repeating
    pub fn build_debug_logs_prompt(ctx: &GenerationContext, repeats: usize) -> String {
        format!(
            r#"{base}
The same error has now occurred {repeats} times in a row, so the previous fixes are not addressing the real cause.

Before trying another fix, add detailed debug logging to the code: log the inputs, intermediate values and branch decisions around the failing logic. The log output will be shown to you on the next attempt. Keep the behaviour otherwise unchanged and return the complete file."#,
            base = Self::build_generation_prompt(ctx),
            repeats = repeats,
        )
    }

    /// Ask for the debug logging to be taken out of passing code
    pub fn build_remove_logs_prompt(code: &str, artifact_path: &Path) -> String {
        format!(
            r#"The code below now passes its tests. While debugging, logging statements were added to it.

<code>
{code}
</code>

The file path for the above is {path}.

Remove the debugging log statements that were added. Do not change anything else. Return the complete file in one code block."#,
            code = code,
            path = artifact_path.display(),
        )
    }

    /// The user text for a visual-mode generation attempt
    pub fn build_visual_prompt(
        feedback: Option<&str>,
        prior_code: &str,
        user_prompt: &str,
        artifact_path: &Path,
    ) -> String {
        format!(
            r#"Here is a design I am trying to make my code match (first attached image), next to how the code currently renders (second attached image). Currently it's not quite right.

Ignore placeholder images (gray boxes); those are intentional when present and will be fixed later.

Here are some examples of things that are wrong between the code and the design that need fixing. Fix any other discrepancies you see too. I want the code to match the design as closely as possible.
<feedback>
{feedback}
</feedback>

The current code is:
<code>
{code}
</code>

If the updates to the code are substantial, it's ok to completely rewrite the code from scratch.

Here are additional instructions from the user:
<prompt>
{prompt}
</prompt>

The file path for the above is {path}."#,
            feedback = feedback
                .filter(|f| !f.trim().is_empty())
                .unwrap_or("Make the code match the original design as close as possible."),
            code = non_empty_or(prior_code, "None"),
            prompt = non_empty_or(user_prompt, "None provided"),
            path = artifact_path.display(),
        )
    }

    /// Ask for a one-line, non-watch test command
    pub fn build_test_command_prompt(test_file: &Path, package_json: &str) -> String {
        let stem = file_stem(test_file);
        format!(
            r#"Here is my package.json. I want to run a single command to execute the tests. The tests should not run in watch mode.
If there is a test script in the package.json, use that script. For example, `npm test`.
The command should filter and run the specific test file at `{path}`. For example, `npm test -- {stem}`.

Here are sample npm test commands without watch mode that work for some popular testing libraries:
- Jest: `npm test -- {stem} --no-watch`
- Vitest: `npm test -- {stem} --run`

<package-json>
{package_json}
</package-json>

If no testing libraries are found in the package.json, use `npx vitest run {stem}` as a fallback."#,
            path = test_file.display(),
            stem = stem,
            package_json = truncate_output(package_json, 8_000),
        )
    }

    /// Ask for a first draft of the unit test file
    pub fn build_test_generation_prompt(
        intent: &str,
        test_file: &Path,
        artifact_path: &Path,
        example_tests: &[String],
        package_json: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            r#"Please prepare a unit test file (can be multiple tests) for the following prompt:
<prompt>
{intent}
</prompt>

The test will be located at `{test}` and the code to test will be located at `{artifact}`.
"#,
            intent = intent,
            test = test_file.display(),
            artifact = artifact_path.display(),
        );

        if !example_tests.is_empty() {
            prompt.push_str(&format!(
                "\nHere is a copy of a couple example tests in the repo:\n<tests>\n{}\n</tests>\n",
                example_tests.join("\n")
            ));
        } else if let Some(package_json) = package_json {
            prompt.push_str(&format!(
                "\nHere is the package.json file to help you know what testing library to use (if any, otherwise use the built-in testing tools):\n<package-json>\n{}\n</package-json>\n",
                truncate_output(package_json, 8_000)
            ));
        }

        prompt.push_str("\nOnly output the test code. No other words, just the code.");
        prompt
    }

    /// Ask for a revision of a generated test based on user feedback
    pub fn build_test_feedback_prompt(
        intent: &str,
        test_file: &Path,
        artifact_path: &Path,
        test_code: &str,
        feedback: &str,
    ) -> String {
        format!(
            r#"Here is a unit test file generated from the following prompt
<prompt>
{intent}
</prompt>

The test will be located at `{test}` and the code to test will be located at `{artifact}`.

The current test code is:
<code>
{code}
</code>

The user has given you this feedback on the test. Please update (or completely rewrite, if needed) the test based on the feedback.

<feedback>
{feedback}
</feedback>

Please give me new code addressing the feedback."#,
            intent = intent,
            test = test_file.display(),
            artifact = artifact_path.display(),
            code = test_code,
            feedback = feedback,
        )
    }

    /// Ask where the requested code should live
    pub fn build_file_suggestion_prompt(intent: &str, files: &[String]) -> String {
        format!(
            r#"Here is what I want to build:
<prompt>
{intent}
</prompt>

Here are some of the files in my project:
<files>
{files}
</files>

Which file should the code go in? Suggest a new file path that fits the project's layout and naming conventions. Reply with only the relative path."#,
            intent = intent,
            files = files.join("\n"),
        )
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn manifest_tag(file_name: &str) -> String {
    file_name
        .to_lowercase()
        .replace(['.', '_'], "-")
}

/// The first dot-separated segment of a file name (`add.test.ts` -> `add`)
pub fn file_stem(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or_default()
        .to_string()
}

/// Keep the tail of long output, where test runners print the failure
/// summary. A cut is announced on the first line.
fn truncate_output(output: &str, max_len: usize) -> Cow<'_, str> {
    if output.len() <= max_len {
        return Cow::Borrowed(output);
    }
    let mut start = output.len() - max_len;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    let tail = match output[start..].find('\n') {
        Some(pos) => &output[start + pos + 1..],
        None => &output[start..],
    };
    Cow::Owned(format!(
        "[output truncated: first {} bytes omitted]\n{}",
        output.len() - tail.len(),
        tail
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Manifest;
    use std::path::PathBuf;

    fn context() -> GenerationContext {
        GenerationContext::new(PathBuf::from("src/add.ts"), "add two numbers")
            .with_prior_artifact("export const add = () => 0;")
            .with_test(PathBuf::from("src/add.test.ts"), Some("expect(add(1, 2)).toBe(3)".to_string()))
            .with_last_error(Some("expected 3, got 0".to_string()))
    }

    #[test]
    fn test_generation_prompt_sections() {
        let prompt = Prompts::build_generation_prompt(&context());

        assert!(prompt.contains("<prompt>\nadd two numbers\n</prompt>"));
        assert!(prompt.contains("<code>\nexport const add = () => 0;\n</code>"));
        assert!(prompt.contains("The file path for the above is src/add.ts."));
        assert!(prompt.contains("<test>\nexpect(add(1, 2)).toBe(3)\n</test>"));
        assert!(prompt.contains("<error>\nexpected 3, got 0\n</error>"));
        assert!(prompt.contains("strictly maintain the same coding style"));
        assert!(!prompt.contains("unified diff"));
    }

    #[test]
    fn test_generation_prompt_defaults() {
        let ctx = GenerationContext::new(PathBuf::from("a.py"), "");
        let prompt = Prompts::build_generation_prompt(&ctx);

        assert!(prompt.contains("<prompt>\nPass the tests\n</prompt>"));
        assert!(prompt.contains("<code>\nNone\n</code>"));
        assert!(prompt.contains("<error>\nNone\n</error>"));
        assert!(!prompt.contains("<test>"));
    }

    #[test]
    fn test_manifest_is_tagged_by_name() {
        let ctx = context().with_manifest(Some(Manifest {
            path: PathBuf::from("/p/package.json"),
            contents: "{\"dependencies\":{}}".to_string(),
        }));
        let prompt = Prompts::build_generation_prompt(&ctx);
        assert!(prompt.contains("<package-json>\n{\"dependencies\":{}}\n</package-json>"));
    }

    #[test]
    fn test_interactive_and_diff_switches() {
        let ctx = context().interactive(true).allow_diffs(true);
        let prompt = Prompts::build_generation_prompt(&ctx);
        assert!(!prompt.contains("strictly maintain"));
        assert!(prompt.contains("unified diff"));
    }

    #[test]
    fn test_debug_logs_prompt_mentions_repeats() {
        let prompt = Prompts::build_debug_logs_prompt(&context(), 4);
        assert!(prompt.contains("occurred 4 times in a row"));
        assert!(prompt.contains("debug logging"));
    }

    #[test]
    fn test_test_command_prompt_uses_stem() {
        let prompt = Prompts::build_test_command_prompt(Path::new("src/add.test.ts"), "{}");
        assert!(prompt.contains("`npm test -- add`"));
        assert!(prompt.contains("npx vitest run add"));
    }

    #[test]
    fn test_long_error_is_marked_as_truncated_in_prompt() {
        let ctx = context().with_last_error(Some(format!(
            "{}expected 3, got 4",
            "noise\n".repeat(3_000)
        )));
        let prompt = Prompts::build_generation_prompt(&ctx);
        assert!(prompt.contains("[output truncated: first"));
        assert!(prompt.contains("expected 3, got 4\n</error>"));
    }

    #[test]
    fn test_truncate_keeps_tail_on_line_boundary() {
        let output = "line one\nline two\nline three";
        assert_eq!(truncate_output(output, 100), output);
        assert_eq!(
            truncate_output(output, 14),
            "[output truncated: first 18 bytes omitted]\nline three"
        );
    }
}
