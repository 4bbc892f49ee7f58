//! Shared configuration surface (spec §6 "Configuration surface").
//!
//! The CLI argument parser and the actual config-file format are external
//! collaborators (spec §1 Non-goals); this module defines the narrow
//! `ConfigReader` interface the core consumes plus a JSON-backed reference
//! implementation, carried over from the teacher's `config.rs`
//! (`load_json_config`/`save_json_config`/`resolve_api_key`) and widened
//! from "TTS config only" to the full provider/cache/timeout surface this
//! spec names.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::AudioFormat;

/// Typed getters the orchestrator and providers read configuration through.
/// A thin wall between "how configuration is stored" (JSON file, env vars,
/// whatever the CLI decides) and "what the core needs to know".
pub trait ConfigReader: Send + Sync {
    fn default_provider(&self) -> Option<String>;
    fn default_voice(&self) -> Option<String>;
    fn api_key(&self, provider: &str) -> Option<String>;
    fn default_format(&self) -> AudioFormat;
    fn output_directory(&self) -> Option<PathBuf>;
    fn local_server_port(&self) -> u16;
    fn timeouts(&self) -> TimeoutConfig;
    fn provider_option(&self, provider: &str, key: &str) -> Option<String>;
}

/// Timeout overrides (spec §5). Defaults match the spec's stated values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub decoder_startup_s: u64,
    pub decoder_idle_s: u64,
    pub transcoder_s: u64,
    pub local_server_startup_s: u64,
    pub local_server_poll_interval_s: u64,
    pub http_connect_s: u64,
    pub http_read_s: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            decoder_startup_s: 2,
            decoder_idle_s: 5,
            transcoder_s: 30,
            local_server_startup_s: 30,
            local_server_poll_interval_s: 1,
            http_connect_s: 10,
            http_read_s: 30,
        }
    }
}

/// On-disk JSON configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JsonConfig {
    pub default_provider: Option<String>,
    pub default_voice: Option<String>,
    #[serde(default)]
    pub default_format: Option<AudioFormat>,
    pub output_directory: Option<PathBuf>,
    #[serde(default = "default_local_port")]
    pub local_server_port: u16,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// `provider_id -> key -> value`; covers API keys and per-provider options.
    #[serde(default)]
    pub providers: std::collections::HashMap<String, std::collections::HashMap<String, String>>,
}

fn default_local_port() -> u16 {
    12345
}

/// `ConfigReader` backed by a `JsonConfig` loaded from disk.
pub struct JsonConfigReader {
    doc: JsonConfig,
}

impl JsonConfigReader {
    pub fn load(path: &Path) -> Self {
        Self { doc: load_json_config(path, "config") }
    }

    pub fn from_doc(doc: JsonConfig) -> Self {
        Self { doc }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        save_json_config(path, &self.doc, "config")
    }
}

impl ConfigReader for JsonConfigReader {
    fn default_provider(&self) -> Option<String> {
        self.doc.default_provider.clone()
    }

    fn default_voice(&self) -> Option<String> {
        self.doc.default_voice.clone()
    }

    fn api_key(&self, provider: &str) -> Option<String> {
        let field = self.provider_option(provider, "api_key");
        let env_field = self.provider_option(provider, "api_key_env");
        resolve_api_key(&field, &env_field)
    }

    fn default_format(&self) -> AudioFormat {
        self.doc.default_format.unwrap_or_default()
    }

    fn output_directory(&self) -> Option<PathBuf> {
        self.doc.output_directory.clone()
    }

    fn local_server_port(&self) -> u16 {
        self.doc.local_server_port
    }

    fn timeouts(&self) -> TimeoutConfig {
        self.doc.timeouts
    }

    fn provider_option(&self, provider: &str, key: &str) -> Option<String> {
        self.doc.providers.get(provider).and_then(|m| m.get(key)).cloned()
    }
}

/// Generic load for any Serde config type with a `Default` implementation.
/// Falls back to `T::default()` if the file is missing or unparsable.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                tracing::info!(label, path = %path.display(), "loaded config");
                config
            }
            Err(e) => {
                tracing::warn!(label, path = %path.display(), error = %e, "failed to parse config; using defaults");
                T::default()
            }
        },
        Err(_) => {
            tracing::info!(label, path = %path.display(), "no config file found; using defaults");
            T::default()
        }
    }
}

/// Generic save for any Serde config type. Not atomic — callers that need
/// crash-safety (the document cache, the voice-cache journal) use their own
/// temp-file-then-rename writers instead. Returns `anyhow::Result` rather
/// than a typed error: saving a config file sits outside the core's typed
/// `SynthError` contract, the same way the teacher reaches for `anyhow`
/// around its own ad hoc, non-provider-facing fallible helpers.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    tracing::info!(label, path = %path.display(), "saved config");
    Ok(())
}

/// Resolve an API key: the direct field first, then the named environment
/// variable.
pub fn resolve_api_key(api_key: &Option<String>, api_key_env: &Option<String>) -> Option<String> {
    if let Some(key) = api_key {
        if !key.is_empty() {
            return Some(key.clone());
        }
    }
    if let Some(env_var) = api_key_env {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
    }
    None
}

/// User config root for on-disk artefacts (document cache, voice-cache
/// journal) — spec §6 "On-disk artefacts".
pub fn user_config_root() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("speakline")
}

/// Initialise a `tracing` subscriber with an `EnvFilter` (`RUST_LOG`). The
/// CLI's choice of *whether* to call this is external (spec §1 Non-goals
/// name "logging infrastructure" as a peripheral collaborator) but the
/// machinery is carried regardless (SPEC_FULL §0).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
