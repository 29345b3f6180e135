//! # synthloop-generator
//!
//! The boundary to the external completion engine and everything needed to
//! talk to it: prompt assembly, streaming, response extraction, recorded
//! replays and the visual critic.
//!
//! ## Key Types
//!
//! - [`Generator`] - Trait implemented by completion engines
//! - [`OpenAiGenerator`] - Streaming client for OpenAI-compatible endpoints
//! - [`RecordedGenerator`] / [`RecordingGenerator`] - Replay and capture of completions
//! - [`GeneratorAdapter`] - Builds loop prompts and returns raw text
//! - [`VisualCritic`] - Judges a render against a reference design

mod adapter;
mod critic;
mod extract;
mod images;
mod manifest;
mod openai;
mod prompts;
mod recorded;
mod thread;
mod traits;

pub use adapter::{
    default_test_command, resolve_artifact, GenerationContext, GeneratorAdapter, ResolvedArtifact,
    Tactic, VisualAttachments,
};
pub use critic::{is_affirmative, CriticVerdict, VisualCritic, AFFIRMATIVE_PHRASE};
pub use extract::{extract_code_block, strip_code_fences};
pub use images::{file_to_data_url, image_data_url, image_mime_type};
pub use manifest::{find_upwards, load_manifest_for, manifest_file_name, Manifest};
pub use openai::{
    uses_local_model, OpenAiGenerator, OpenAiSettings, DEFAULT_ENDPOINT, DEFAULT_MODEL,
    OLLAMA_ENDPOINT,
};
pub use prompts::{file_stem, Prompts};
pub use recorded::{RecordedCompletion, RecordedGenerator, Recording, RecordingGenerator};
pub use thread::ThreadStore;
pub use traits::{
    ChunkCallback, CompletionRequest, ContentPart, Generator, GeneratorError, ImageUrl, Message,
    MessageContent, Role,
};

use std::path::PathBuf;

/// Whether completions are live, replayed or captured
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MockMode {
    #[default]
    Off,
    /// Replay from a recording file; no network access
    Replay(PathBuf),
    /// Call the real engine and append each exchange to a recording file
    Record(PathBuf),
}

/// Everything needed to build the configured generator
#[derive(Debug, Clone, Default)]
pub struct GeneratorSettings {
    pub openai: OpenAiSettings,
    pub mock: MockMode,
    pub threads: Option<ThreadStore>,
}

/// Create the generator described by `settings`
pub fn create_generator(settings: GeneratorSettings) -> Result<Box<dyn Generator>, GeneratorError> {
    if let MockMode::Replay(path) = &settings.mock {
        return Ok(Box::new(RecordedGenerator::new(path.clone())));
    }

    let mut live = OpenAiGenerator::new(settings.openai)?;
    if let Some(store) = settings.threads {
        live = live.with_thread_store(store);
    }

    Ok(match settings.mock {
        MockMode::Record(path) => Box::new(RecordingGenerator::new(Box::new(live), path)),
        _ => Box::new(live),
    })
}
