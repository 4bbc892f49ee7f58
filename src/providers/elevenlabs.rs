//! ElevenLabs Provider (C7, spec §4.7).
//!
//! Grounded on the teacher's `tts/cloud_base.rs` `elevenlabs_style()`
//! constructor (custom-header auth, streaming capability) generalised into
//! its own module because the spec gives ElevenLabs two things
//! `CloudTTSProvider` doesn't model: a separately cached voice-name → voice-id
//! lookup (TTL: process lifetime) and a dedicated streaming endpoint.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::config::ConfigReader;
use crate::error::SynthError;
use crate::providers::contract::{OptionSpec, ProviderDescriptor, SynthSink, TtsProvider, VoiceRecord};
use crate::types::{AudioFormat, OptionValue, ProviderId, TextRequest, VoiceRef};

#[derive(Deserialize)]
struct VoicesResponse {
    voices: Vec<VoiceEntry>,
}

#[derive(Deserialize, Clone)]
struct VoiceEntry {
    voice_id: String,
    name: String,
}

#[derive(Serialize)]
struct SynthBody {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<String>,
    voice_settings: VoiceSettings,
}

#[derive(Serialize, Default)]
struct VoiceSettings {
    stability: Option<f64>,
    similarity_boost: Option<f64>,
    style: Option<f64>,
}

pub struct ElevenLabsProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_voice: String,
    /// Voice-name → voice-id, populated once and cached for the process
    /// lifetime (spec §4.7).
    voice_cache: RwLock<Option<HashMap<String, String>>>,
}

impl ElevenLabsProvider {
    pub fn from_config(config: &dyn ConfigReader) -> Result<Self, SynthError> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: config.api_key("elevenlabs").unwrap_or_default(),
            base_url: config
                .provider_option("elevenlabs", "base_url")
                .unwrap_or_else(|| "https://api.elevenlabs.io/v1".to_string()),
            default_voice: config
                .provider_option("elevenlabs", "default_voice")
                .unwrap_or_else(|| "21m00Tcm4TlvDq8ikWAM".to_string()),
            voice_cache: RwLock::new(None),
        })
    }

    async fn voices_by_name(&self) -> Result<HashMap<String, String>, SynthError> {
        {
            let cached = self.voice_cache.read().await;
            if let Some(map) = cached.as_ref() {
                return Ok(map.clone());
            }
        }
        let url = format!("{}/voices", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| SynthError::Network { message: e.to_string() })?;
        classify(&response, "elevenlabs")?;
        let parsed: VoicesResponse = response
            .json()
            .await
            .map_err(|e| SynthError::Provider { provider: "elevenlabs".into(), status: None, message: e.to_string() })?;
        let map: HashMap<String, String> = parsed.voices.into_iter().map(|v| (v.name, v.voice_id)).collect();
        *self.voice_cache.write().await = Some(map.clone());
        Ok(map)
    }

    async fn resolve_voice_id(&self, req: &TextRequest) -> Result<String, SynthError> {
        let requested = match &req.voice {
            VoiceRef::Named(ProviderId::ElevenLabs, name) => Some(name.clone()),
            _ => None,
        };
        let Some(name) = requested else { return Ok(self.default_voice.clone()) };
        // Already an opaque id (ElevenLabs ids are 20 alnum chars) or a known name.
        let by_name = self.voices_by_name().await?;
        if let Some(id) = by_name.get(&name) {
            return Ok(id.clone());
        }
        Ok(name)
    }

    fn settings_from(options: &HashMap<String, OptionValue>) -> VoiceSettings {
        let clamp01 = |v: &OptionValue| -> Option<f64> {
            match v {
                OptionValue::Float(f) => Some(f.clamp(0.0, 1.0)),
                OptionValue::Int(i) => Some((*i as f64).clamp(0.0, 1.0)),
                _ => None,
            }
        };
        VoiceSettings {
            stability: options.get("stability").and_then(clamp01),
            similarity_boost: options.get("similarity_boost").and_then(clamp01),
            style: options.get("style").and_then(clamp01),
        }
    }
}

fn classify(response: &reqwest::Response, provider: &str) -> Result<(), SynthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let code = status.as_u16();
    match code {
        401 | 403 => Err(SynthError::Authentication { provider: provider.into(), message: status.to_string() }),
        402 | 409 | 429 => Err(SynthError::Quota { provider: provider.into(), message: status.to_string() }),
        500..=599 => Err(SynthError::Provider { provider: provider.into(), status: Some(code), message: status.to_string() }),
        _ => Err(SynthError::Provider { provider: provider.into(), status: Some(code), message: status.to_string() }),
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsProvider {
    fn describe(&self) -> ProviderDescriptor {
        let mut schema = HashMap::new();
        schema.insert("stability".to_string(), OptionSpec::Float { min: 0.0, max: 1.0, default: 0.5 });
        schema.insert("similarity_boost".to_string(), OptionSpec::Float { min: 0.0, max: 1.0, default: 0.75 });
        schema.insert("style".to_string(), OptionSpec::Float { min: 0.0, max: 1.0, default: 0.0 });
        ProviderDescriptor {
            id: ProviderId::ElevenLabs,
            display_name: "ElevenLabs",
            requires_network: true,
            requires_api_key: true,
            supported_formats: HashSet::from([AudioFormat::Mp3]),
            supports_streaming: true,
            supports_cloning: true,
            supports_ssml: false,
            option_schema: schema,
        }
    }

    async fn synthesise(&self, req: &TextRequest, sink: SynthSink<'_>) -> Result<(), SynthError> {
        let voice_id = self.resolve_voice_id(req).await?;
        let streaming = matches!(sink, SynthSink::Chunks(_));
        let path = if streaming { "stream" } else { "" };
        let url = format!("{}/text-to-speech/{voice_id}/{path}", self.base_url).trim_end_matches('/').to_string();

        let body = SynthBody {
            text: req.text.clone(),
            model_id: None,
            voice_settings: Self::settings_from(&req.provider_options),
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthError::Network { message: e.to_string() })?;
        classify(&response, "elevenlabs")?;

        match sink {
            SynthSink::Chunks(push) => {
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let bytes = chunk.map_err(|e| SynthError::Network { message: e.to_string() })?;
                    push(bytes.to_vec())?;
                }
                Ok(())
            }
            SynthSink::File(out_path) => {
                let tmp = out_path.with_extension("tmp");
                let mut file = tokio::fs::File::create(&tmp).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                let bytes = response.bytes().await.map_err(|e| SynthError::Network { message: e.to_string() })?;
                file.write_all(&bytes).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                file.flush().await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                drop(file);
                tokio::fs::rename(&tmp, out_path).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                Ok(())
            }
        }
    }

    async fn list_voices(&self) -> Result<Vec<VoiceRecord>, SynthError> {
        let by_name = self.voices_by_name().await?;
        Ok(by_name
            .into_keys()
            .map(|name| VoiceRecord { display_name: name.clone(), name, language: None })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_clamp_out_of_range_values() {
        let mut opts = HashMap::new();
        opts.insert("stability".to_string(), OptionValue::Float(1.5));
        opts.insert("style".to_string(), OptionValue::Float(-0.2));
        let settings = ElevenLabsProvider::settings_from(&opts);
        assert_eq!(settings.stability, Some(1.0));
        assert_eq!(settings.style, Some(0.0));
    }
}
