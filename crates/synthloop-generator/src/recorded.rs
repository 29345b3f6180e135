use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::{ChunkCallback, CompletionRequest, Generator, GeneratorError, Message};

/// One recorded exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCompletion {
    pub inputs: Vec<Message>,
    pub output: String,
}

/// On-disk recording file: `{"completions": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    #[serde(default)]
    pub completions: Vec<RecordedCompletion>,
}

impl Recording {
    /// Missing or unreadable files load as an empty recording
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<(), GeneratorError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GeneratorError::Recording(format!("Failed to encode recording: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Indices of completions whose first input is contained in the request's
    /// first message
    fn matching(&self, request: &CompletionRequest) -> Vec<usize> {
        let Some(first) = request.messages.first() else {
            return Vec::new();
        };
        let wanted = first.text();

        self.completions
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.inputs
                    .first()
                    .is_some_and(|recorded| wanted.contains(&recorded.text()))
            })
            .map(|(i, _)| i)
            .collect()
    }
}

/// Replays completions from a recording file instead of calling a model.
///
/// Matching is on the system message. Among several matches the earliest
/// unused one is returned, so a loop replays its recorded attempts in order;
/// once all are used the last match repeats.
pub struct RecordedGenerator {
    path: PathBuf,
    used: Mutex<HashSet<usize>>,
}

impl RecordedGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            used: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl Generator for RecordedGenerator {
    fn name(&self) -> &str {
        "recorded"
    }

    async fn complete_with_callback(
        &self,
        request: &CompletionRequest,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<String, GeneratorError> {
        let recording = Recording::load(&self.path);
        let matches = recording.matching(request);

        let index = {
            let mut used = self
                .used
                .lock()
                .map_err(|_| GeneratorError::Recording("recording state poisoned".to_string()))?;
            let pick = matches
                .iter()
                .copied()
                .find(|i| !used.contains(i))
                .or_else(|| matches.last().copied());
            if let Some(i) = pick {
                used.insert(i);
            }
            pick
        };

        let Some(index) = index else {
            let first = request.messages.first().map(Message::text).unwrap_or_default();
            let snippet: String = first.chars().take(120).collect();
            return Err(GeneratorError::Recording(format!(
                "No completion found for the given system input in {}: {:?}",
                self.path.display(),
                snippet
            )));
        };

        debug!(index, path = %self.path.display(), "Replaying recorded completion");
        let output = recording.completions[index].output.clone();
        if let Some(callback) = on_chunk {
            callback(&output);
        }
        Ok(output)
    }
}

/// Wraps a real generator and appends every exchange to a recording file
pub struct RecordingGenerator {
    inner: Box<dyn Generator>,
    path: PathBuf,
    name: String,
    write_lock: Mutex<()>,
}

impl RecordingGenerator {
    pub fn new(inner: Box<dyn Generator>, path: impl Into<PathBuf>) -> Self {
        let name = format!("recording({})", inner.name());
        Self {
            inner,
            path: path.into(),
            name,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete_with_callback(
        &self,
        request: &CompletionRequest,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<String, GeneratorError> {
        let output = self.inner.complete_with_callback(request, on_chunk).await?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GeneratorError::Recording("recording state poisoned".to_string()))?;
        let mut recording = Recording::load(&self.path);
        recording.completions.push(RecordedCompletion {
            inputs: request.messages.clone(),
            output: output.clone(),
        });
        if let Err(e) = recording.save(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to save recording");
        }

        Ok(output)
    }
}
