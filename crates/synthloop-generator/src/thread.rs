use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::{GeneratorError, Message};

/// Only the most recent exchanges are replayed into a request or kept on disk
const MAX_REPLAYED_MESSAGES: usize = 16;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ThreadFile {
    id: String,
    messages: Vec<Message>,
}

/// Persists generator conversations so a resumed run continues the same thread
#[derive(Debug, Clone)]
pub struct ThreadStore {
    dir: PathBuf,
}

impl ThreadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data_dir>/synthloop/threads`
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map(|d| Self::new(d.join("synthloop").join("threads")))
    }

    pub fn new_thread_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn path_for(&self, thread_id: &str) -> Result<PathBuf, GeneratorError> {
        let valid = !thread_id.is_empty()
            && thread_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(GeneratorError::Config(format!(
                "Invalid thread id: {:?}",
                thread_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", thread_id)))
    }

    fn read(&self, path: &Path) -> Result<Option<ThreadFile>, GeneratorError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map(Some).map_err(|e| {
            GeneratorError::Config(format!(
                "Corrupt thread file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Prior messages of a thread; an unknown thread is empty
    pub fn load(&self, thread_id: &str) -> Result<Vec<Message>, GeneratorError> {
        let path = self.path_for(thread_id)?;
        Ok(self.read(&path)?.map(|file| file.messages).unwrap_or_default())
    }

    /// Add `messages` to the thread, keeping only what a later request can replay
    pub fn append(&self, thread_id: &str, messages: &[Message]) -> Result<(), GeneratorError> {
        let path = self.path_for(thread_id)?;
        std::fs::create_dir_all(&self.dir)?;

        let mut file = self.read(&path)?.unwrap_or_default();
        file.id = thread_id.to_string();
        file.messages.extend_from_slice(messages);
        let excess = file.messages.len().saturating_sub(MAX_REPLAYED_MESSAGES);
        file.messages.drain(..excess);

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| GeneratorError::Config(format!("Failed to encode thread: {}", e)))?;
        std::fs::write(&path, json)?;

        debug!(thread_id = %thread_id, kept = file.messages.len(), "Thread updated");
        Ok(())
    }
}
