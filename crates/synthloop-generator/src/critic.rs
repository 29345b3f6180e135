use std::sync::Arc;
use tracing::{debug, info};

use crate::prompts::VISUAL_CRITIC_PROMPT;
use crate::{ChunkCallback, CompletionRequest, Generator, GeneratorError, Message};

/// Phrase a critic opens with when the render matches the design
pub const AFFIRMATIVE_PHRASE: &str = "looks good";

/// Whether critic text approves the render (case-insensitive, quotes ignored)
pub fn is_affirmative(text: &str) -> bool {
    text.to_lowercase()
        .trim()
        .replace('"', "")
        .starts_with(AFFIRMATIVE_PHRASE)
}

/// The critic's judgement of one render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticVerdict {
    pub approved: bool,
    pub feedback: String,
}

/// Compares a live render with a reference design through the completion engine
pub struct VisualCritic {
    generator: Arc<dyn Generator>,
}

impl VisualCritic {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn evaluate(
        &self,
        design_url: &str,
        screenshot_url: &str,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<CriticVerdict, GeneratorError> {
        debug!(
            design_len = design_url.len(),
            screenshot_len = screenshot_url.len(),
            "Running visual critic"
        );

        // Render first, design second; the prompt refers to them in that order
        let request = CompletionRequest::new(vec![Message::user_with_images(
            VISUAL_CRITIC_PROMPT,
            &[screenshot_url.to_string(), design_url.to_string()],
        )]);

        let feedback = self
            .generator
            .complete_with_callback(&request, on_chunk)
            .await?;
        let approved = is_affirmative(&feedback);

        info!(approved, feedback_len = feedback.len(), "Visual critic finished");
        Ok(CriticVerdict { approved, feedback })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affirmative_variants() {
        assert!(is_affirmative("looks good"));
        assert!(is_affirmative("  \"Looks Good!\" nothing to change"));
        assert!(is_affirmative("LOOKS GOOD"));
    }

    #[test]
    fn test_non_affirmative() {
        assert!(!is_affirmative("It looks good except the header"));
        assert!(!is_affirmative("The buttons should be left of the links"));
        assert!(!is_affirmative(""));
    }
}
