use tracing::debug;

use crate::{FilePatch, PatchError, UnifiedDiff};

/// Apply unified diff text to `original`, returning the patched content.
///
/// Empty or whitespace-only diff text returns `original` unchanged. Patches
/// are applied in order, each against the output of the previous one.
pub fn apply_unified_diff(diff_text: &str, original: &str) -> Result<String, PatchError> {
    if diff_text.trim().is_empty() {
        return Ok(original.to_string());
    }

    let diff = UnifiedDiff::parse(diff_text)?;

    let mut content = original.to_string();
    for patch in &diff.patches {
        content = apply_patch(patch, &content)?;
    }
    Ok(content)
}

/// Apply every hunk of one file patch.
///
/// Each hunk must match exactly at its declared start line, shifted by the
/// net line delta of the hunks applied before it.
pub fn apply_patch(patch: &FilePatch, content: &str) -> Result<String, PatchError> {
    let (mut lines, trailing_newline) = split_lines(content);
    let mut offset: isize = 0;

    for (index, hunk) in patch.hunks.iter().enumerate() {
        let old: Vec<&str> = hunk.old_content().collect();
        let new: Vec<String> = hunk.new_content().map(str::to_string).collect();

        // A pure insertion at line N goes after line N
        let declared = if old.is_empty() {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };

        let start = declared as isize + offset;
        if start < 0 || start as usize > lines.len() {
            return Err(PatchError::HunkOutOfRange {
                hunk: index + 1,
                header: hunk.header(),
                len: lines.len(),
            });
        }
        let start = start as usize;

        for (k, expected) in old.iter().enumerate() {
            let found = lines.get(start + k);
            if found.map(String::as_str) != Some(*expected) {
                return Err(PatchError::HunkMismatch {
                    hunk: index + 1,
                    header: hunk.header(),
                    line: start + k + 1,
                    expected: (*expected).to_string(),
                    found: found.cloned(),
                });
            }
        }

        let delta = new.len() as isize - old.len() as isize;
        lines.splice(start..start + old.len(), new);
        offset += delta;
    }

    debug!(
        path = patch.display_path(),
        hunks = patch.hunks.len(),
        "Applied patch"
    );

    Ok(join_lines(&lines, trailing_newline))
}

fn split_lines(content: &str) -> (Vec<String>, bool) {
    if content.is_empty() {
        return (Vec::new(), false);
    }
    let trailing_newline = content.ends_with('\n');
    let body = if trailing_newline {
        &content[..content.len() - 1]
    } else {
        content
    };
    (body.split('\n').map(str::to_string).collect(), trailing_newline)
}

fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_simple_diff() {
        let diff = "--- a/test.txt
+++ b/test.txt
@@ -1,3 +1,3 @@
-Hello
-World
+Hi
+Universe
 This is a test.";

        let result = apply_unified_diff(diff, "Hello\nWorld\nThis is a test.").unwrap();
        assert_eq!(result, "Hi\nUniverse\nThis is a test.");
    }

    #[test]
    fn test_empty_diff_is_identity() {
        for original in ["", "No changes here.", "a\nb\n", "\n\n"] {
            assert_eq!(apply_unified_diff("", original).unwrap(), original);
            assert_eq!(apply_unified_diff("  \n\t\n", original).unwrap(), original);
        }
    }

    #[test]
    fn test_header_without_hunks_fails() {
        let diff = "--- a/test.txt\n+++ b/test.txt\n";
        let result = apply_unified_diff(diff, "unchanged");
        assert!(matches!(result, Err(PatchError::EmptyPatch { .. })));
    }

    #[test]
    fn test_non_diff_text_fails() {
        let result = apply_unified_diff("invalid diff", "Original content.");
        assert_eq!(result, Err(PatchError::NoPatches));
    }

    #[test]
    fn test_multiple_changes_in_one_hunk() {
        // Declared counts overstate the body; the body is authoritative
        let diff = "--- a/test.txt
+++ b/test.txt
@@ -1,5 +1,5 @@
-Hello
+Hi
 World
 This is a test.
-Another line.
+Changed line.";

        let original = "Hello\nWorld\nThis is a test.\nAnother line.";
        let result = apply_unified_diff(diff, original).unwrap();
        assert_eq!(result, "Hi\nWorld\nThis is a test.\nChanged line.");
    }

    #[test]
    fn test_multiple_hunks_track_offset() {
        let original = "one\ntwo\nthree\nfour\nfive\nsix\n";
        let diff = "--- a/n
+++ b/n
@@ -1,2 +1,3 @@
 one
+one-and-a-half
 two
@@ -5,2 +6,1 @@
-five
 six";

        let result = apply_unified_diff(diff, original).unwrap();
        assert_eq!(result, "one\none-and-a-half\ntwo\nthree\nfour\nsix\n");
    }

    #[test]
    fn test_sequential_patches_apply_to_previous_result() {
        let diff = "--- a/f\n+++ b/f\n@@ -1 +1 @@\n-a\n+b\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-b\n+c\n";
        assert_eq!(apply_unified_diff(diff, "a\n").unwrap(), "c\n");
    }

    #[test]
    fn test_insertion_into_empty_file() {
        let diff = "--- /dev/null\n+++ b/add.ts\n@@ -0,0 +1,3 @@\n+export function add(a: number, b: number) {\n+  return a + b;\n+}";
        let result = apply_unified_diff(diff, "").unwrap();
        assert_eq!(
            result,
            "export function add(a: number, b: number) {\n  return a + b;\n}"
        );
    }

    #[test]
    fn test_context_mismatch_names_hunk() {
        let diff = "--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-a\n+b\n@@ -3,1 +3,1 @@\n-zzz\n+y";
        let err = apply_unified_diff(diff, "a\nx\nc").unwrap_err();
        match err {
            PatchError::HunkMismatch {
                hunk,
                line,
                expected,
                found,
                ..
            } => {
                assert_eq!(hunk, 2);
                assert_eq!(line, 3);
                assert_eq!(expected, "zzz");
                assert_eq!(found.as_deref(), Some("c"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mismatch_at_declared_location_is_not_searched() {
        // The old content exists in the file, but not at line 1
        let diff = "--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-target\n+patched";
        assert!(apply_unified_diff(diff, "other\ntarget").is_err());
    }

    #[test]
    fn test_hunk_past_end_of_file() {
        let diff = "--- a/f\n+++ b/f\n@@ -10,0 +11,1 @@\n+tail";
        assert!(matches!(
            apply_unified_diff(diff, "a\nb"),
            Err(PatchError::HunkOutOfRange { hunk: 1, len: 2, .. })
        ));
    }

    #[test]
    fn test_trailing_newline_is_preserved() {
        let diff = "--- a/f\n+++ b/f\n@@ -2,1 +2,1 @@\n-b\n+B";
        assert_eq!(apply_unified_diff(diff, "a\nb\n").unwrap(), "a\nB\n");
    }
}
