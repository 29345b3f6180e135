use serde::Serialize;

use crate::parse::hunk_header_regex;

/// What kind of artifact text a generator returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// Replacement for the whole artifact
    FullArtifact,
    /// A unified diff against the prior artifact
    UnifiedDiff,
}

/// Decide whether response text is a unified diff.
///
/// A response is diff-shaped when it opens with a `---`/`+++` pair naming the
/// same file, or when it has at least one hunk header and either such a pair
/// or a hunk header as its first non-blank line. A header pair with no hunks
/// is still a diff, so the patch step rejects it instead of writing the
/// headers out as source.
pub fn classify_response(text: &str) -> ResponseShape {
    let lines: Vec<&str> = text.lines().collect();

    let first = lines.iter().position(|l| !l.trim().is_empty());
    let opens_with_file_header = first
        .and_then(|i| lines.get(i..i + 2))
        .is_some_and(|pair| is_file_header_pair(pair[0], pair[1]));
    if opens_with_file_header {
        return ResponseShape::UnifiedDiff;
    }

    let has_hunk = lines.iter().any(|l| hunk_header_regex().is_match(l));
    if !has_hunk {
        return ResponseShape::FullArtifact;
    }

    let has_file_header = lines
        .windows(2)
        .any(|w| w[0].starts_with("--- ") && w[1].starts_with("+++ "));

    let opens_with_hunk = lines
        .iter()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| hunk_header_regex().is_match(l));

    if has_file_header || opens_with_hunk {
        ResponseShape::UnifiedDiff
    } else {
        ResponseShape::FullArtifact
    }
}

/// `--- a/x` followed by `+++ b/x`, either side possibly `/dev/null`
fn is_file_header_pair(old: &str, new: &str) -> bool {
    let (Some(old), Some(new)) = (old.strip_prefix("--- "), new.strip_prefix("+++ ")) else {
        return false;
    };
    let path = |raw: &str| -> Option<String> {
        let token = raw.split_whitespace().next()?;
        let token = token
            .strip_prefix("a/")
            .or_else(|| token.strip_prefix("b/"))
            .unwrap_or(token);
        Some(token.to_string())
    };
    match (path(old), path(new)) {
        (Some(old), Some(new)) => old == new || old == "/dev/null" || new == "/dev/null",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_source_is_not_a_diff() {
        let code = "export function add(a: number, b: number) {\n  return a + b;\n}\n";
        assert_eq!(classify_response(code), ResponseShape::FullArtifact);
    }

    #[test]
    fn test_headed_diff() {
        let diff = "--- a/add.ts\n+++ b/add.ts\n@@ -1,1 +1,1 @@\n-x\n+y";
        assert_eq!(classify_response(diff), ResponseShape::UnifiedDiff);
    }

    #[test]
    fn test_bare_hunk() {
        let diff = "\n@@ -3,2 +3,2 @@\n-a\n+b\n c";
        assert_eq!(classify_response(diff), ResponseShape::UnifiedDiff);
    }

    #[test]
    fn test_header_pair_without_hunk_is_not_a_diff() {
        // Markdown with a horizontal rule followed by a "+++" line
        let text = "--- notes\n+++ more notes\nplain text";
        assert_eq!(classify_response(text), ResponseShape::FullArtifact);
    }

    #[test]
    fn test_opening_file_headers_without_hunk_are_a_diff() {
        let text = "--- a/add.ts\n+++ b/add.ts\n";
        assert_eq!(classify_response(text), ResponseShape::UnifiedDiff);
        assert_eq!(
            classify_response("\n--- /dev/null\n+++ b/new.ts"),
            ResponseShape::UnifiedDiff
        );
    }

    #[test]
    fn test_hunk_like_string_inside_code() {
        let code = "const s = 1;\n@@ -1 +1 @@\nconsole.log(s);";
        assert_eq!(classify_response(code), ResponseShape::FullArtifact);
    }
}
