//! Provider Registry & Dispatch (C4, spec §4.4).
//!
//! Grounded on the teacher's `tts/manager.rs` (`TtsService::build_provider`,
//! lazy construction keyed by string id) and `tts/router.rs`
//! (`TtsRouter::select_provider`), collapsed into one registry: the spec's
//! dispatch is a pure, order-dependent scan (§8 property 2), not the
//! teacher's capability-score-then-fallback-chain — so this module keeps the
//! teacher's "lazy load behind a map" shape but replaces its scoring router
//! with the deterministic algorithm spec §4.4 spells out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};

use crate::config::ConfigReader;
use crate::error::SynthError;
use crate::providers::contract::TtsProvider;
use crate::providers::{edge, elevenlabs, google, local_neural, openai};
use crate::types::{ProviderId, VoiceRef};

/// Outcome of resolving a voice string (spec §4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceResolution {
    pub voice: VoiceRef,
}

type ProviderCell = OnceCell<Arc<dyn TtsProvider>>;

/// Lazily-constructed table of the five built-in providers (spec §4.4:
/// "Loaders are invoked lazily at first use of each provider so unused
/// heavy back-ends... pay no startup cost").
pub struct ProviderRegistry {
    config: Arc<dyn ConfigReader>,
    cells: RwLock<HashMap<ProviderId, Arc<ProviderCell>>>,
    /// Separate handle onto the local neural provider, concretely typed so
    /// the voice cache (C10) can use it as a `VoiceCloneBackend` — the
    /// `dyn TtsProvider` cell above can't be downcast (spec §4.10 needs the
    /// server-token create/release calls the trait doesn't expose).
    local_neural: OnceCell<Arc<local_neural::LocalNeuralProvider>>,
}

impl ProviderRegistry {
    pub fn new(config: Arc<dyn ConfigReader>) -> Self {
        let mut cells = HashMap::new();
        for id in ProviderId::SCAN_ORDER {
            cells.insert(id, Arc::new(OnceCell::new()));
        }
        Self { config, cells: RwLock::new(cells), local_neural: OnceCell::new() }
    }

    /// The concrete local neural provider handle, shared with whatever
    /// built it for `get(ProviderId::LocalNeural)` — constructed once.
    pub async fn local_neural_backend(&self) -> Arc<local_neural::LocalNeuralProvider> {
        self.local_neural
            .get_or_init(|| async { Arc::new(local_neural::LocalNeuralProvider::from_config(self.config.as_ref())) })
            .await
            .clone()
    }

    /// Get (constructing on first use) the provider handle for `id`.
    pub async fn get(&self, id: ProviderId) -> Result<Arc<dyn TtsProvider>, SynthError> {
        let cell = {
            let cells = self.cells.read().await;
            cells
                .get(&id)
                .cloned()
                .ok_or_else(|| SynthError::Internal { message: format!("no cell for provider {id}") })?
        };
        cell.get_or_try_init(|| self.build(id)).await.cloned()
    }

    async fn build(&self, id: ProviderId) -> Result<Arc<dyn TtsProvider>, SynthError> {
        tracing::info!(provider = %id, "constructing provider handle");
        let provider: Arc<dyn TtsProvider> = match id {
            ProviderId::Edge => Arc::new(edge::EdgeProvider::new(self.config.as_ref())),
            ProviderId::OpenAi => Arc::new(openai::OpenAiProvider::from_config(self.config.as_ref())?),
            ProviderId::ElevenLabs => Arc::new(elevenlabs::ElevenLabsProvider::from_config(self.config.as_ref())?),
            ProviderId::Google => Arc::new(google::GoogleProvider::from_config(self.config.as_ref())?),
            ProviderId::LocalNeural => self.local_neural_backend().await,
        };
        Ok(provider)
    }

    /// Voice-string resolution (spec §4.4), a pure, deterministic function
    /// of the string and each provider's voice catalogue (spec §8 property 1).
    pub async fn resolve_voice(&self, raw: &str) -> Result<VoiceResolution, SynthError> {
        // Step 1: explicit "<provider>:<voice>" form.
        if let Some((provider_str, voice_name)) = raw.split_once(':') {
            let provider = ProviderId::from_alias(provider_str).ok_or_else(|| {
                SynthError::voice(format!("unknown provider '{provider_str}'"), provider_alias_suggestions())
            })?;
            return Ok(VoiceResolution { voice: VoiceRef::Named(provider, voice_name.to_string()) });
        }

        // Step 2: bare filesystem path with an audio extension implies cloning.
        if looks_like_audio_path(raw) && Path::new(raw).is_file() {
            return Ok(VoiceResolution { voice: VoiceRef::CloneFrom(Path::new(raw).to_path_buf()) });
        }

        // Step 3: scan each provider's catalogue in the fixed order.
        let mut all_voices = Vec::new();
        for id in ProviderId::SCAN_ORDER {
            let provider = match self.get(id).await {
                Ok(p) => p,
                Err(_) => continue,
            };
            let voices = match provider.list_voices().await {
                Ok(v) => v,
                Err(_) => continue,
            };
            for v in &voices {
                if v.name == raw {
                    return Ok(VoiceResolution { voice: VoiceRef::Named(id, v.name.clone()) });
                }
            }
            all_voices.extend(voices.into_iter().map(|v| v.name));
        }

        // Step 4: unresolved — suggest the nearest matches.
        let suggestions = nearest_matches(raw, &all_voices, 3);
        Err(SynthError::voice(format!("no voice matches '{raw}'"), suggestions))
    }
}

fn provider_alias_suggestions() -> Vec<String> {
    ProviderId::SCAN_ORDER.iter().map(|p| p.short_alias().to_string()).collect()
}

const AUDIO_EXTENSIONS: [&str; 5] = ["wav", "mp3", "flac", "ogg", "m4a"];

fn looks_like_audio_path(s: &str) -> bool {
    Path::new(s)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Nearest matches by Levenshtein distance, closest first, capped at `limit`.
fn nearest_matches(target: &str, candidates: &[String], limit: usize) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> =
        candidates.iter().map(|c| (levenshtein(target, c), c)).collect();
    scored.sort_by_key(|(d, name)| (*d, name.clone()));
    scored.into_iter().take(limit).map(|(_, c)| c.clone()).collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_roundtrip_is_stable() {
        for id in ProviderId::SCAN_ORDER {
            assert_eq!(ProviderId::from_alias(id.short_alias()), Some(id));
        }
    }

    #[test]
    fn scan_order_is_fixed() {
        assert_eq!(
            ProviderId::SCAN_ORDER,
            [
                ProviderId::Edge,
                ProviderId::OpenAi,
                ProviderId::ElevenLabs,
                ProviderId::Google,
                ProviderId::LocalNeural,
            ]
        );
    }

    #[test]
    fn audio_extension_detection() {
        assert!(looks_like_audio_path("sample.wav"));
        assert!(looks_like_audio_path("dir/voice.MP3"));
        assert!(!looks_like_audio_path("plainname"));
    }

    #[test]
    fn levenshtein_basic() {
        assert_eq!(levenshtein("alloy", "alloy"), 0);
        assert_eq!(levenshtein("alloy", "allay"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
    }
}
