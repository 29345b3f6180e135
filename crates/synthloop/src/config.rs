//! Layered configuration for synthloop.
//!
//! Precedence, lowest first: built-in defaults, the global
//! `<config_dir>/synthloop/config.toml`, the project `synthloop.toml`,
//! environment variables, then command-line flags (applied by `main`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use synthloop_core::{DEFAULT_ESCALATION_WINDOW, DEFAULT_MAX_RUNS};
use synthloop_generator::{
    GeneratorSettings, MockMode, OpenAiSettings, ThreadStore, DEFAULT_ENDPOINT, DEFAULT_MODEL,
};
use synthloop_verifier::DEFAULT_IDLE_TIMEOUT;

/// The project config file name
pub const PROJECT_CONFIG_FILE: &str = "synthloop.toml";

const GLOBAL_CONFIG_FILE: &str = "config.toml";

/// Keys accepted in either config file
pub const CONFIG_KEYS: [&str; 7] = [
    "openai_key",
    "openai_api_endpoint",
    "model",
    "max_runs",
    "watchdog",
    "escalation_window",
    "allow_diffs",
];

/// Contents of a config file. Every field is optional so files can be layered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<usize>,
    /// Idle window before a quiet check command is killed, e.g. `"30s"`
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub watchdog: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_window: Option<usize>,
    /// Let the generator answer with unified diffs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_diffs: Option<bool>,
}

impl FileConfig {
    /// Load a config file.
    ///
    /// Returns `Ok(None)` if the file does not exist. A file that exists but
    /// fails to parse is a hard error.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: FileConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(Some(config))
    }

    /// Overlay `other` on top of `self`
    fn merge(self, other: FileConfig) -> Self {
        Self {
            openai_key: other.openai_key.or(self.openai_key),
            openai_api_endpoint: other.openai_api_endpoint.or(self.openai_api_endpoint),
            model: other.model.or(self.model),
            max_runs: other.max_runs.or(self.max_runs),
            watchdog: other.watchdog.or(self.watchdog),
            escalation_window: other.escalation_window.or(self.escalation_window),
            allow_diffs: other.allow_diffs.or(self.allow_diffs),
        }
    }
}

/// `<config_dir>/synthloop/config.toml`
pub fn global_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("synthloop").join(GLOBAL_CONFIG_FILE))
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_runs: usize,
    pub watchdog: Duration,
    pub escalation_window: usize,
    pub allow_diffs: bool,
    pub mock: MockMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            max_runs: DEFAULT_MAX_RUNS,
            watchdog: DEFAULT_IDLE_TIMEOUT,
            escalation_window: DEFAULT_ESCALATION_WINDOW,
            allow_diffs: false,
            mock: MockMode::Off,
        }
    }
}

impl Settings {
    /// Read the global and project files plus the process environment
    pub fn load(working_dir: &Path) -> Result<Self> {
        let mut layers = Vec::new();
        if let Ok(global) = global_config_path() {
            layers.extend(FileConfig::load(&global)?);
        }
        layers.extend(FileConfig::load(&working_dir.join(PROJECT_CONFIG_FILE))?);

        Ok(Self::resolve(layers, |key| std::env::var(key).ok()))
    }

    /// Combine file layers (lowest precedence first) with an environment lookup
    pub fn resolve(layers: Vec<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Self {
        let file = layers
            .into_iter()
            .fold(FileConfig::default(), FileConfig::merge);
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let mock = match env("SYNTHLOOP_MOCK_LLM_RECORD_FILE") {
            Some(path) => {
                let replay = env("SYNTHLOOP_USE_MOCK_LLM")
                    .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                    .unwrap_or(false);
                if replay {
                    MockMode::Replay(PathBuf::from(path))
                } else {
                    MockMode::Record(PathBuf::from(path))
                }
            }
            None => MockMode::Off,
        };

        Self {
            model: env("SYNTHLOOP_MODEL")
                .or(file.model)
                .unwrap_or(defaults.model),
            endpoint: env("OPENAI_API_ENDPOINT")
                .or(file.openai_api_endpoint)
                .unwrap_or(defaults.endpoint),
            api_key: env("OPENAI_KEY")
                .or_else(|| env("OPENAI_API_KEY"))
                .or(file.openai_key),
            max_runs: file.max_runs.unwrap_or(defaults.max_runs),
            watchdog: file.watchdog.unwrap_or(defaults.watchdog),
            escalation_window: file.escalation_window.unwrap_or(defaults.escalation_window),
            allow_diffs: file.allow_diffs.unwrap_or(defaults.allow_diffs),
            mock,
        }
    }

    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            openai: OpenAiSettings {
                model: self.model.clone(),
                endpoint: self.endpoint.clone(),
                api_key: self.api_key.clone(),
                ..Default::default()
            },
            mock: self.mock.clone(),
            threads: ThreadStore::default_location(),
        }
    }

    /// Short description of the generator for the dry-run printout
    pub fn generator_label(&self) -> String {
        match &self.mock {
            MockMode::Off => self.model.clone(),
            MockMode::Replay(path) => format!("replay from {}", path.display()),
            MockMode::Record(path) => format!("{} (recording to {})", self.model, path.display()),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print one value from the global config
    Get {
        /// Key, e.g. OPENAI_KEY or max_runs
        key: String,
    },

    /// Set a value in the global config
    Set {
        /// KEY=VALUE
        assignment: String,
    },

    /// Print every value in the global config (secrets obfuscated)
    List,

    /// Print the global config file path
    Path,
}

pub fn handle_config_command(action: ConfigAction) -> Result<()> {
    let path = global_config_path()?;

    match action {
        ConfigAction::Get { key } => match get_value(&path, &key)? {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("{} is not set", normalize_key(&key)),
        },
        ConfigAction::Set { assignment } => {
            let key = set_value(&path, &assignment)?;
            eprintln!("Set {} in {}", key, path.display());
        }
        ConfigAction::List => {
            for (key, value) in list_values(&path)? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => println!("{}", path.display()),
    }

    Ok(())
}

/// `OPENAI-KEY` and `OPENAI_KEY` both address `openai_key`
fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('-', "_")
}

fn checked_key(key: &str) -> Result<String> {
    let key = normalize_key(key);
    if !CONFIG_KEYS.contains(&key.as_str()) {
        anyhow::bail!(
            "Unknown config key '{}'. Known keys: {}",
            key,
            CONFIG_KEYS.join(", ")
        );
    }
    Ok(key)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    if !path.exists() {
        return Ok(toml::Table::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .parse::<toml::Table>()
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn render_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn get_value(path: &Path, key: &str) -> Result<Option<String>> {
    let key = checked_key(key)?;
    Ok(read_table(path)?.get(&key).map(render_value))
}

/// Apply `KEY=VALUE` to the file at `path`, returning the normalized key.
///
/// The value is read as an integer, then a boolean, else a string; the first
/// reading under which the table still deserializes as a [`FileConfig`] wins.
pub fn set_value(path: &Path, assignment: &str) -> Result<String> {
    let (key, raw) = assignment
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{}'", assignment))?;
    let key = checked_key(key)?;
    let raw = raw.trim();

    let mut candidates = Vec::new();
    if let Ok(n) = raw.parse::<i64>() {
        candidates.push(toml::Value::Integer(n));
    }
    if let Ok(b) = raw.parse::<bool>() {
        candidates.push(toml::Value::Boolean(b));
    }
    candidates.push(toml::Value::String(raw.to_string()));

    let current = read_table(path)?;
    let table = candidates
        .into_iter()
        .map(|value| {
            let mut table = current.clone();
            table.insert(key.clone(), value);
            table
        })
        .find(|table| {
            toml::Value::Table(table.clone())
                .try_into::<FileConfig>()
                .is_ok()
        })
        .with_context(|| format!("Invalid value for {}: {}", key, raw))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(&table).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(key)
}

/// All set values, sorted by key, with secrets obfuscated
pub fn list_values(path: &Path) -> Result<Vec<(String, String)>> {
    let table = read_table(path)?;
    let mut values: Vec<(String, String)> = table
        .iter()
        .map(|(key, value)| {
            let rendered = render_value(value);
            let shown = if key.ends_with("_key") {
                obfuscate(&rendered)
            } else {
                rendered
            };
            (key.clone(), shown)
        })
        .collect();
    values.sort();
    Ok(values)
}

/// Keep the first and last four characters of long secrets
pub fn obfuscate(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
