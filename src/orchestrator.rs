//! Synthesis Orchestrator (C16, spec §4.16).
//!
//! The end-to-end driver: text/document in, audio out. Grounded on the
//! teacher's `tts/manager.rs` (`TtsService::speak`: resolve provider, build
//! params, dispatch, handle playback) generalised with the document
//! pipeline (C11-C15), the downgrade rules, and the bounded retry loop the
//! spec requires (§4.16) that the teacher's manager doesn't have (it
//! retries only inside `utils/http.rs`, never at the orchestration layer).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{transcode, PlaybackManager};
use crate::config::ConfigReader;
use crate::document::{self, EmotionProfile, SsmlPlatform};
use crate::error::SynthError;
use crate::providers::{ProviderRegistry, SynthSink};
use crate::types::{AudioFormat, OptionValue, PitchAdjust, RateAdjust, SynthDestination, TextRequest, VoiceRef};
use crate::voice_cache::VoiceCacheManager;

/// Where the text to synthesise comes from (spec §4.16 step 1).
pub enum TextSource {
    /// Already-final text: args or standard input, passed straight through.
    Plain(String),
    /// A document that must flow through C11→C15→C12→C13→C14 first.
    Document { content: String, ssml_platform: Option<SsmlPlatform>, emotion_profile: EmotionProfile },
}

/// Everything the orchestrator needs to run one synthesis end to end.
pub struct SynthesisRequest {
    pub source: TextSource,
    /// Raw voice string, resolved via C4 (spec §4.4); empty means
    /// `VoiceRef::Default`.
    pub voice: String,
    pub rate: RateAdjust,
    pub pitch: PitchAdjust,
    pub format: AudioFormat,
    pub stream: bool,
    pub provider_options: std::collections::HashMap<String, OptionValue>,
    pub destination: SynthDestination,
}

impl SynthesisRequest {
    pub fn plain_text(text: impl Into<String>, destination: SynthDestination) -> Self {
        Self {
            source: TextSource::Plain(text.into()),
            voice: String::new(),
            rate: RateAdjust::unset(),
            pitch: PitchAdjust::unset(),
            format: AudioFormat::default(),
            stream: false,
            provider_options: std::collections::HashMap::new(),
            destination,
        }
    }
}

const RETRY_ATTEMPTS: u32 = 2;
const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(250);

pub struct SynthesisOrchestrator {
    config: Arc<dyn ConfigReader>,
    registry: Arc<ProviderRegistry>,
    voice_cache: Arc<VoiceCacheManager>,
    playback: PlaybackManager,
    document_cache: document::DocumentCache,
}

impl SynthesisOrchestrator {
    pub fn new(config: Arc<dyn ConfigReader>) -> Self {
        let registry = Arc::new(ProviderRegistry::new(config.clone()));
        let journal_path = crate::config::user_config_root().join("voice_cache.json");
        let document_cache_dir = crate::config::user_config_root().join("document_cache");
        let decoder_idle_s = config.timeouts().decoder_idle_s;
        Self {
            config,
            registry,
            voice_cache: Arc::new(VoiceCacheManager::new(journal_path)),
            playback: PlaybackManager::with_idle_timeout(crate::audio::playback::DEFAULT_DECODER_BIN, decoder_idle_s),
            document_cache: document::DocumentCache::new(document_cache_dir),
        }
    }

    /// Restore the voice-cache journal and attach it to the local neural
    /// provider, so clone-from-path lookups are idempotent across
    /// invocations within this process (spec §4.10).
    pub async fn restore(&self) -> Result<(), SynthError> {
        self.voice_cache.restore().await?;
        let local_neural = self.registry.local_neural_backend().await;
        local_neural.attach_voice_cache(self.voice_cache.clone());
        Ok(())
    }

    pub fn voice_cache(&self) -> &Arc<VoiceCacheManager> {
        &self.voice_cache
    }

    /// Step 1: normalise input into final synthesis text (spec §4.16).
    async fn normalise_text(&self, source: TextSource) -> Result<String, SynthError> {
        match source {
            TextSource::Plain(text) => Ok(text),
            TextSource::Document { content, ssml_platform, emotion_profile } => {
                let markdown = document::to_markdown(&content)?;
                let format_hint = "markdown";
                let platform = ssml_platform.unwrap_or(SsmlPlatform::Generic);

                let elements = if let Some(platform) = ssml_platform {
                    let key = document::compute_key(&markdown, format_hint, platform, emotion_profile);
                    if let Some(cached) = self.document_cache.get(&key, emotion_profile).await {
                        cached
                    } else {
                        let parsed = document::parse_markdown(&markdown);
                        let annotated = document::classify(parsed, emotion_profile);
                        let _ = self.document_cache.put(&key, &annotated).await;
                        annotated
                    }
                } else {
                    // Plain-text document output (spec §4.16: "or just
                    // C11->C12 for non-SSML plain output") still benefits
                    // from the cache, keyed under the generic platform.
                    let key = document::compute_key(&markdown, format_hint, SsmlPlatform::Generic, emotion_profile);
                    if let Some(cached) = self.document_cache.get(&key, emotion_profile).await {
                        cached
                    } else {
                        let parsed = document::parse_markdown(&markdown);
                        let annotated = document::classify(parsed, emotion_profile);
                        let _ = self.document_cache.put(&key, &annotated).await;
                        annotated
                    }
                };

                Ok(match ssml_platform {
                    Some(_) => document::emit_ssml(&elements, platform),
                    None => document::emit_plain(&elements),
                })
            }
        }
    }

    /// Step 2-3: resolve the provider and voice, downgrading streaming or
    /// format support as needed (spec §4.16).
    async fn build_request(
        &self,
        text: String,
        req: &SynthesisRequest,
    ) -> Result<(TextRequest, Arc<dyn crate::providers::TtsProvider>, bool), SynthError> {
        let voice = if req.voice.is_empty() {
            VoiceRef::Default
        } else {
            self.registry.resolve_voice(&req.voice).await?.voice
        };

        let provider_id = match &voice {
            VoiceRef::Named(id, _) => *id,
            VoiceRef::CloneFrom(_) => crate::types::ProviderId::LocalNeural,
            VoiceRef::Default => {
                let default_alias = self.config.default_provider();
                default_alias
                    .as_deref()
                    .and_then(crate::types::ProviderId::from_alias)
                    .unwrap_or(crate::types::ProviderId::Edge)
            }
        };
        let provider = self.registry.get(provider_id).await?;
        let descriptor = provider.describe();

        let normalised_options = provider.validate_options(&req.provider_options)?;

        // Step 3 downgrade: unsupported streaming falls back to file-then-play.
        let effective_stream = req.stream && descriptor.supports_streaming;

        let text_req = TextRequest {
            text,
            voice,
            rate: req.rate,
            pitch: req.pitch,
            format: req.format,
            stream: effective_stream,
            provider_options: normalised_options,
        };
        Ok((text_req, provider, descriptor.supported_formats.contains(&req.format)))
    }

    /// Step 5: retry a provider call with the orchestrator's fixed backoff
    /// schedule (spec §4.16: N=2, 250ms then 1s; only retriable errors).
    async fn invoke_with_retry(
        &self,
        provider: &dyn crate::providers::TtsProvider,
        req: &TextRequest,
        sink: SynthSink<'_>,
    ) -> Result<(), SynthError> {
        let mut delay = RETRY_INITIAL_DELAY;
        let mut attempt = 0;
        loop {
            match provider.synthesise(req, sink_ref(&sink)).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retriable() && attempt < RETRY_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, ?delay, "retrying synthesis after retriable error");
                    tokio::time::sleep(delay).await;
                    delay *= 4; // 250ms then 1s (spec §4.16's literal schedule, not open-ended doubling)
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// End-to-end synthesis (spec §4.16).
    pub async fn synthesize(&self, req: SynthesisRequest) -> Result<(), SynthError> {
        let text = self.normalise_text(req.source).await?;
        let (mut text_req, provider, format_supported) = self.build_request(text, &req).await?;
        let descriptor = provider.describe();

        match req.destination {
            SynthDestination::Stream => {
                if text_req.stream {
                    self.synthesize_streaming(&text_req, &provider).await
                } else {
                    // Downgrade: file-then-play (spec §4.16 step 3, §8 property 8).
                    let tmp = temp_audio_path(text_req.format);
                    self.synthesize_to_file(&mut text_req, &provider, &tmp, format_supported).await?;
                    self.playback.play_file(&tmp, true, None).await
                }
            }
            SynthDestination::File(ref path) => {
                self.synthesize_to_file(&mut text_req, &provider, path, format_supported).await
            }
        }
        .map_err(|e| {
            tracing::error!(provider = %descriptor.id, error = %e, "synthesis failed");
            e
        })
    }

    /// Stream provider chunks to the decoder (spec §4.16 step 4). The
    /// provider contract's sink closure is synchronous (spec §4.3) while
    /// `StreamWriter::write_chunk` is async, so the bridge is a bounded
    /// `std::sync::mpsc` channel feeding a dedicated blocking task that owns
    /// the writer — "a pair of threads connected by a bounded byte queue"
    /// (spec §9 "Concurrency primitives"), giving the decoder's stdin
    /// back-pressure a path to the network reader without ever buffering an
    /// unbounded response.
    async fn synthesize_streaming(
        &self,
        req: &TextRequest,
        provider: &Arc<dyn crate::providers::TtsProvider>,
    ) -> Result<(), SynthError> {
        const QUEUE_DEPTH: usize = 8;
        let writer = self.playback.open_stream(req.format.extension()).await?;
        let (tx, rx) = std::sync::mpsc::sync_channel::<Vec<u8>>(QUEUE_DEPTH);
        let runtime = tokio::runtime::Handle::current();

        let pump = tokio::task::spawn_blocking(move || {
            runtime.block_on(async move {
                let mut writer = writer;
                for chunk in rx.iter() {
                    if let Err(e) = writer.write_chunk(&chunk).await {
                        return Err(e);
                    }
                }
                writer.close().await
            })
        });

        let push = move |chunk: Vec<u8>| -> Result<(), SynthError> {
            tx.send(chunk).map_err(|_| SynthError::Cancelled)
        };
        let synth_result = self.invoke_with_retry(provider.as_ref(), req, SynthSink::Chunks(&push)).await;
        // Dropping `push` drops its captured `SyncSender`, closing the
        // channel so the pump task's `rx.iter()` terminates and it closes
        // the decoder's stdin (spec §4.1: "closing it signals end-of-stream").
        drop(push);

        let pump_result = pump.await.map_err(|e| SynthError::Internal { message: format!("playback pump task panicked: {e}") })?;
        synth_result?;
        pump_result
    }

    async fn synthesize_to_file(
        &self,
        req: &mut TextRequest,
        provider: &Arc<dyn crate::providers::TtsProvider>,
        path: &std::path::Path,
        format_supported: bool,
    ) -> Result<(), SynthError> {
        req.stream = false;
        if format_supported {
            self.invoke_with_retry(provider.as_ref(), req, SynthSink::File(path)).await
        } else {
            // Step 3 downgrade: synthesise to a supported format, then
            // transcode (spec §4.16, §8 property 8, scenario S2).
            let descriptor = provider.describe();
            let fallback_format = descriptor
                .supported_formats
                .iter()
                .copied()
                .next()
                .ok_or_else(|| SynthError::Format { message: "provider advertises no supported formats".into() })?;
            let original_format = req.format;
            req.format = fallback_format;
            let tmp = temp_audio_path(fallback_format);
            let result = self.invoke_with_retry(provider.as_ref(), req, SynthSink::File(&tmp)).await;
            req.format = original_format;
            result?;

            let timeout_s = self.config.timeouts().transcoder_s;
            let transcode_result = transcode(&tmp, path, original_format, timeout_s).await;
            let _ = tokio::fs::remove_file(&tmp).await;
            transcode_result
        }
    }
}

fn sink_ref<'a>(sink: &SynthSink<'a>) -> SynthSink<'a> {
    match sink {
        SynthSink::Chunks(push) => SynthSink::Chunks(*push),
        SynthSink::File(path) => SynthSink::File(path),
    }
}

fn temp_audio_path(format: AudioFormat) -> PathBuf {
    std::env::temp_dir().join(format!("speakline-{}.{}", uuid::Uuid::new_v4(), format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;

    struct StubConfig;
    impl ConfigReader for StubConfig {
        fn default_provider(&self) -> Option<String> {
            Some("edge".to_string())
        }
        fn default_voice(&self) -> Option<String> {
            None
        }
        fn api_key(&self, _provider: &str) -> Option<String> {
            None
        }
        fn default_format(&self) -> AudioFormat {
            AudioFormat::Mp3
        }
        fn output_directory(&self) -> Option<PathBuf> {
            None
        }
        fn local_server_port(&self) -> u16 {
            12345
        }
        fn timeouts(&self) -> TimeoutConfig {
            TimeoutConfig::default()
        }
        fn provider_option(&self, _provider: &str, _key: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn plain_text_normalisation_is_identity() {
        let orchestrator = SynthesisOrchestrator::new(Arc::new(StubConfig));
        let text = orchestrator.normalise_text(TextSource::Plain("hello world".into())).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn document_plain_output_has_no_markup() {
        let orchestrator = SynthesisOrchestrator::new(Arc::new(StubConfig));
        let text = orchestrator
            .normalise_text(TextSource::Document {
                content: "# Title\n\nHello **world**".into(),
                ssml_platform: None,
                emotion_profile: EmotionProfile::Technical,
            })
            .await
            .unwrap();
        assert!(!text.contains('<'));
        assert!(text.contains("Title"));
    }

    #[tokio::test]
    async fn document_ssml_output_is_well_formed() {
        let orchestrator = SynthesisOrchestrator::new(Arc::new(StubConfig));
        let text = orchestrator
            .normalise_text(TextSource::Document {
                content: "# Title\n\nHello **world**".into(),
                ssml_platform: Some(SsmlPlatform::Azure),
                emotion_profile: EmotionProfile::Technical,
            })
            .await
            .unwrap();
        assert!(text.starts_with("<speak"));
        assert!(text.trim_end().ends_with("</speak>"));
    }
}
