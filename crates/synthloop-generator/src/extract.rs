//! Pulling code out of markdown-flavoured completion text.

struct FencedBlock<'a> {
    body: Vec<&'a str>,
    closed: bool,
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut current: Option<FencedBlock<'_>> = None;

    for line in text.lines() {
        let is_fence = line.trim_start().starts_with("```");
        if let Some(mut block) = current.take() {
            if is_fence && line.trim() == "```" {
                block.closed = true;
                blocks.push(block);
            } else {
                block.body.push(line);
                current = Some(block);
            }
        } else if is_fence {
            current = Some(FencedBlock {
                body: Vec::new(),
                closed: false,
            });
        }
    }

    if let Some(open) = current {
        blocks.push(open);
    }
    blocks
}

/// Strip delimiter fences from a response.
///
/// Returns the body of the last complete fenced block, or the trimmed input
/// when there is none. Reasoning that precedes the code is discarded.
pub fn strip_code_fences(text: &str) -> String {
    fenced_blocks(text)
        .into_iter()
        .filter(|block| block.closed)
        .last()
        .map(|block| block.body.join("\n").trim().to_string())
        .unwrap_or_else(|| text.trim().to_string())
}

/// Return the first fenced block, tolerating a missing closing fence
pub fn extract_code_block(text: &str) -> String {
    match fenced_blocks(text).into_iter().next() {
        Some(block) => block.body.join("\n").trim().to_string(),
        None => text.trim().to_string(),
    }
}
