//! OpenAI Provider (C6, spec §4.6).
//!
//! Grounded directly on the teacher's `tts/openai.rs`: same request shape
//! (`model`, `voice`, `input`, `response_format`), same bearer auth, same
//! `bytes_stream()` streaming path. Differences from the teacher: a single
//! `reqwest` call per attempt rather than the teacher's own
//! `request_with_retry`-wrapped POST (the orchestrator's retry loop is the
//! only retry budget here, so this provider matches `elevenlabs.rs`/
//! `google.rs` instead of retrying underneath it), the fixed voice
//! allow-list with fall-back-with-warning the spec requires (the teacher
//! silently forwards whatever voice string it gets), and writing to a path
//! instead of always returning a `Vec<u8>`.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::io::AsyncWriteExt;

use crate::config::ConfigReader;
use crate::error::SynthError;
use crate::providers::contract::{OptionSpec, ProviderDescriptor, SynthSink, TtsProvider, VoiceRecord};
use crate::types::{AudioFormat, ProviderId, TextRequest, VoiceRef};

const ALLOWED_VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];
const DEFAULT_VOICE: &str = "alloy";

#[derive(Serialize, Clone)]
struct SpeechRequest {
    model: String,
    input: String,
    voice: String,
    response_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn from_config(config: &dyn ConfigReader) -> Result<Self, SynthError> {
        let api_key = config.api_key("openai").unwrap_or_default();
        let base_url = config
            .provider_option("openai", "base_url")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let model = config.provider_option("openai", "model").unwrap_or_else(|| "tts-1".to_string());
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeouts().http_read_s))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_key,
            base_url,
            model,
        })
    }

    fn resolve_voice(&self, requested: Option<&str>) -> String {
        match requested {
            Some(v) if ALLOWED_VOICES.contains(&v) => v.to_string(),
            Some(v) => {
                tracing::warn!(requested = v, "unknown OpenAI voice; falling back to default");
                DEFAULT_VOICE.to_string()
            }
            None => DEFAULT_VOICE.to_string(),
        }
    }

    fn body_for(&self, req: &TextRequest) -> SpeechRequest {
        let voice_name = match &req.voice {
            VoiceRef::Named(ProviderId::OpenAi, name) => Some(name.as_str()),
            _ => None,
        };
        SpeechRequest {
            model: self.model.clone(),
            input: req.text.clone(),
            voice: self.resolve_voice(voice_name),
            response_format: req.format.extension().to_string(),
            speed: req.rate.percent().map(|pct| (1.0 + pct / 100.0).clamp(0.25, 4.0)),
        }
    }

    async fn send(&self, body: &SpeechRequest) -> Result<reqwest::Response, SynthError> {
        // A single attempt per call, like `elevenlabs.rs`/`google.rs`: the
        // orchestrator's `invoke_with_retry` owns the only retry budget for a
        // cloud synthesis call (spec §4.16), so this provider must not retry
        // underneath it.
        let url = format!("{}/audio/speech", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| SynthError::Network { message: e.to_string() })?;

        classify_status(&response, "openai")?;
        Ok(response)
    }
}

fn classify_status(response: &reqwest::Response, provider: &str) -> Result<(), SynthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let code = status.as_u16();
    match code {
        401 | 403 => Err(SynthError::Authentication { provider: provider.to_string(), message: status.to_string() }),
        402 | 409 | 429 => Err(SynthError::Quota { provider: provider.to_string(), message: status.to_string() }),
        500..=599 => Err(SynthError::Provider { provider: provider.to_string(), status: Some(code), message: status.to_string() }),
        _ => Err(SynthError::Provider { provider: provider.to_string(), status: Some(code), message: status.to_string() }),
    }
}

#[async_trait]
impl TtsProvider for OpenAiProvider {
    fn describe(&self) -> ProviderDescriptor {
        let mut schema = HashMap::new();
        schema.insert(
            "model".to_string(),
            OptionSpec::Str { allowed: Some(vec!["tts-1".into(), "tts-1-hd".into()]), default: Some("tts-1".into()) },
        );
        ProviderDescriptor {
            id: ProviderId::OpenAi,
            display_name: "OpenAI",
            requires_network: true,
            requires_api_key: true,
            supported_formats: HashSet::from([AudioFormat::Mp3, AudioFormat::Wav, AudioFormat::Flac, AudioFormat::Ogg]),
            supports_streaming: true,
            supports_cloning: false,
            supports_ssml: false,
            option_schema: schema,
        }
    }

    async fn synthesise(&self, req: &TextRequest, sink: SynthSink<'_>) -> Result<(), SynthError> {
        let body = self.body_for(req);
        let response = self.send(&body).await?;

        match sink {
            SynthSink::Chunks(push) => {
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let bytes = chunk.map_err(|e| SynthError::Network { message: e.to_string() })?;
                    push(bytes.to_vec())?;
                }
                Ok(())
            }
            SynthSink::File(path) => {
                let tmp = path.with_extension("tmp");
                let mut file = tokio::fs::File::create(&tmp)
                    .await
                    .map_err(|e| SynthError::Internal { message: e.to_string() })?;
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let bytes = chunk.map_err(|e| SynthError::Network { message: e.to_string() })?;
                    file.write_all(&bytes).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                }
                file.flush().await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                drop(file);
                tokio::fs::rename(&tmp, path).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                Ok(())
            }
        }
    }

    async fn list_voices(&self) -> Result<Vec<VoiceRecord>, SynthError> {
        Ok(ALLOWED_VOICES
            .iter()
            .map(|v| VoiceRecord { name: v.to_string(), display_name: v.to_string(), language: Some("en".to_string()) })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider {
            client: reqwest::Client::new(),
            api_key: "test".to_string(),
            base_url: "http://localhost".to_string(),
            model: "tts-1".to_string(),
        }
    }

    #[test]
    fn unknown_voice_falls_back_to_default() {
        let p = provider();
        assert_eq!(p.resolve_voice(Some("not-a-voice")), DEFAULT_VOICE);
    }

    #[test]
    fn known_voice_passes_through() {
        let p = provider();
        assert_eq!(p.resolve_voice(Some("nova")), "nova");
    }

    fn provider_at(base_url: String) -> OpenAiProvider {
        OpenAiProvider { client: reqwest::Client::new(), api_key: "test".to_string(), base_url, model: "tts-1".to_string() }
    }

    #[tokio::test]
    async fn a_401_response_is_an_authentication_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let p = provider_at(server.uri());
        let req = TextRequest::new("hello");
        let out = unique_temp_path();
        let err = p.synthesise(&req, SynthSink::File(&out)).await.unwrap_err();
        assert!(matches!(err, SynthError::Authentication { .. }));
    }

    #[tokio::test]
    async fn a_429_response_surfaces_immediately_as_quota_without_retry() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider_at(server.uri());
        let req = TextRequest::new("hello");
        let out = unique_temp_path();
        let err = p.synthesise(&req, SynthSink::File(&out)).await.unwrap_err();
        assert!(matches!(err, SynthError::Quota { .. }));
        server.verify().await;
    }

    #[tokio::test]
    async fn a_500_response_surfaces_as_a_provider_error_after_a_single_attempt() {
        // The provider itself makes exactly one HTTP call per `synthesise()`
        // (the orchestrator's `invoke_with_retry` owns the retry budget, not
        // this provider — see `send()`).
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider_at(server.uri());
        let req = TextRequest::new("hello");
        let out = unique_temp_path();
        let err = p.synthesise(&req, SynthSink::File(&out)).await.unwrap_err();
        assert!(matches!(err, SynthError::Provider { status: Some(500), .. }));
        server.verify().await;
    }

    fn unique_temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("speakline-openai-test-{}.mp3", uuid::Uuid::new_v4()))
    }
}
