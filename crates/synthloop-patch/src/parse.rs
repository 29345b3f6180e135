use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::debug;

use crate::PatchError;

/// One line of a hunk body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl HunkLine {
    pub fn text(&self) -> &str {
        match self {
            HunkLine::Context(s) | HunkLine::Add(s) | HunkLine::Remove(s) => s,
        }
    }

    /// Line is part of the pre-image (context or removal)
    pub fn is_old(&self) -> bool {
        matches!(self, HunkLine::Context(_) | HunkLine::Remove(_))
    }

    /// Line is part of the post-image (context or addition)
    pub fn is_new(&self) -> bool {
        matches!(self, HunkLine::Context(_) | HunkLine::Add(_))
    }
}

/// A single `@@ -l,c +l,c @@` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }

    /// Lines the buffer must contain for this hunk to apply
    pub fn old_content(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter(|l| l.is_old()).map(HunkLine::text)
    }

    /// Lines that replace the old content
    pub fn new_content(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter(|l| l.is_new()).map(HunkLine::text)
    }
}

/// All hunks for one `--- a/... +++ b/...` header pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    fn headerless() -> Self {
        Self {
            old_path: None,
            new_path: None,
            hunks: Vec::new(),
        }
    }

    pub fn display_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("<unnamed>")
    }
}

/// Parsed unified diff text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifiedDiff {
    pub patches: Vec<FilePatch>,
}

pub(crate) fn hunk_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk header regex")
    })
}

impl UnifiedDiff {
    /// Parse diff text into file patches.
    ///
    /// Preamble lines (`diff --git`, `index ...`) are skipped. Hunks that
    /// appear before any `---`/`+++` pair are collected into a headerless
    /// patch. A result with no patches, or a patch with no hunks, is an error.
    pub fn parse(text: &str) -> Result<Self, PatchError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut patches: Vec<FilePatch> = Vec::new();
        let mut current: Option<FilePatch> = None;
        let mut i = 0;

        while i < lines.len() {
            if is_file_header(&lines, i) {
                if let Some(patch) = current.take() {
                    patches.push(patch);
                }
                current = Some(FilePatch {
                    old_path: parse_path(&lines[i][4..]),
                    new_path: parse_path(&lines[i + 1][4..]),
                    hunks: Vec::new(),
                });
                i += 2;
                continue;
            }

            if lines[i].starts_with("@@") {
                let (hunk, next) = parse_hunk(&lines, i)?;
                current
                    .get_or_insert_with(FilePatch::headerless)
                    .hunks
                    .push(hunk);
                i = next;
                continue;
            }

            i += 1;
        }

        if let Some(patch) = current {
            patches.push(patch);
        }

        if patches.is_empty() {
            return Err(PatchError::NoPatches);
        }

        if let Some(empty) = patches.iter().find(|p| p.hunks.is_empty()) {
            return Err(PatchError::EmptyPatch {
                path: empty.display_path().to_string(),
            });
        }

        debug!(
            patches = patches.len(),
            hunks = patches.iter().map(|p| p.hunks.len()).sum::<usize>(),
            "Parsed unified diff"
        );

        Ok(Self { patches })
    }
}

fn is_file_header(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ")
        && lines
            .get(i + 1)
            .is_some_and(|next| next.starts_with("+++ "))
}

fn parse_path(raw: &str) -> Option<String> {
    // Strip an optional tab-separated timestamp
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    if path == "/dev/null" || path.is_empty() {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(path.to_string())
}

fn parse_count(m: Option<regex::Match<'_>>, header: &str) -> Result<usize, PatchError> {
    match m {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| PatchError::MalformedHunkHeader(header.to_string())),
        None => Ok(1),
    }
}

fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize), PatchError> {
    let header = lines[start];
    let caps = hunk_header_regex()
        .captures(header)
        .ok_or_else(|| PatchError::MalformedHunkHeader(header.to_string()))?;

    let old_start = parse_count(caps.get(1), header)?;
    let old_lines = parse_count(caps.get(2), header)?;
    let new_start = parse_count(caps.get(3), header)?;
    let new_lines = parse_count(caps.get(4), header)?;

    let mut body = Vec::new();
    let mut old_seen = 0usize;
    let mut new_seen = 0usize;
    let mut j = start + 1;

    while j < lines.len() {
        let line = lines[j];
        if line.starts_with("@@") || line.starts_with("diff ") || is_file_header(lines, j) {
            break;
        }

        let parsed = match line.chars().next() {
            None => Some(HunkLine::Context(String::new())),
            Some(' ') => Some(HunkLine::Context(line[1..].to_string())),
            Some('+') => Some(HunkLine::Add(line[1..].to_string())),
            Some('-') => Some(HunkLine::Remove(line[1..].to_string())),
            // "\ No newline at end of file"
            Some('\\') => None,
            Some(_) if old_seen >= old_lines && new_seen >= new_lines => break,
            Some(_) => {
                return Err(PatchError::Malformed {
                    line: j + 1,
                    content: line.to_string(),
                })
            }
        };

        if let Some(parsed) = parsed {
            if parsed.is_old() {
                old_seen += 1;
            }
            if parsed.is_new() {
                new_seen += 1;
            }
            body.push(parsed);
        }
        j += 1;
    }

    // Blank separator lines after the last real hunk line are not context
    while old_seen > old_lines
        && new_seen > new_lines
        && body.last() == Some(&HunkLine::Context(String::new()))
    {
        body.pop();
        old_seen -= 1;
        new_seen -= 1;
    }

    Ok((
        Hunk {
            old_start,
            old_lines,
            new_start,
            new_lines,
            lines: body,
        },
        j,
    ))
}
