//! Edge Provider (C5, spec §4.5).
//!
//! The teacher declares an Edge-TTS dependency but never exercises it (its
//! synthesis always goes through the frontend's `window.speechSynthesis` or
//! a cloud REST call); there is no in-repo usage to generalise from. This
//! module is instead grounded on `msedge-tts`'s own public API
//! (`other_examples/.../msedge-tts-src-lib.rs`: `MSEdgeTTS::connect()` +
//! `.synthesize(text, &SpeechConfig)`), which is a synchronous WebSocket
//! client — run on a blocking task so it composes with the rest of the
//! async pipeline. The library hands back one assembled `SynthesizedAudio`
//! rather than a live chunk stream, so "streaming" here means re-chunking
//! that buffer for the sink, not holding the network connection open
//! chunk-by-chunk; a future upgrade to a frame-level streaming client would
//! slot in behind the same `TtsProvider` contract.

use async_trait::async_trait;
use msedge_tts::{MSEdgeTTS, SpeechConfig};
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::config::ConfigReader;
use crate::error::SynthError;
use crate::providers::contract::{ProviderDescriptor, SynthSink, TtsProvider, VoiceRecord};
use crate::types::{AudioFormat, ProviderId, TextRequest, VoiceRef};

const DEFAULT_VOICE: &str = "en-US-AriaNeural";
/// Size of the re-chunked pieces handed to the streaming sink.
const STREAM_CHUNK_BYTES: usize = 8192;

pub struct EdgeProvider {
    default_voice: String,
}

impl EdgeProvider {
    pub fn new(config: &dyn ConfigReader) -> Self {
        Self {
            default_voice: config
                .provider_option("edge", "default_voice")
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
        }
    }

    fn voice_name(&self, req: &TextRequest) -> String {
        match &req.voice {
            VoiceRef::Named(ProviderId::Edge, name) => name.clone(),
            _ => self.default_voice.clone(),
        }
    }

    fn audio_format_tag(format: AudioFormat) -> &'static str {
        // msedge-tts's non-streaming RIFF formats (spec §3 AudioFormat mapping).
        match format {
            AudioFormat::Mp3 => "audio-24khz-48kbitrate-mono-mp3",
            AudioFormat::Wav | AudioFormat::Flac | AudioFormat::Ogg => "riff-24khz-16bit-mono-pcm",
        }
    }

    fn speech_config(&self, req: &TextRequest) -> SpeechConfig {
        SpeechConfig {
            voice_name: self.voice_name(req),
            audio_format: Self::audio_format_tag(req.format).to_string(),
            // Translated to the service's percentage/Hz syntax; unset stays 0 (spec §4.5).
            pitch: req.pitch.hz().unwrap_or(0.0).round() as i32,
            rate: req.rate.percent().unwrap_or(0.0).round() as i32,
            volume: 0,
        }
    }
}

/// SSML auto-detection (spec §4.5): whitespace-insensitive `<speak` prefix.
pub fn looks_like_ssml(text: &str) -> bool {
    text.trim_start().to_ascii_lowercase().starts_with("<speak")
}

/// `msedge_tts::MSEdgeTTS::synthesize` always wraps its `text` argument in
/// its own `<speak><voice><prosody>...</prosody></voice></speak>` template
/// with no escaping (`other_examples/.../msedge-tts-src-lib.rs:176-183`) and
/// exposes no lower-level call that skips it. Pre-formed SSML handed to this
/// provider would otherwise be nested inside that template as a second
/// `<speak>` root, which the service rejects. Unwrap the caller's own
/// `<speak>`/`<voice>`/`<prosody>` shell down to its inner markup so only the
/// library's wrapping remains; any other document tags inside (e.g.
/// `<emphasis>`, `<break>`) pass through untouched since the library drops
/// `text` into its template verbatim.
fn unwrap_outer_ssml(text: &str) -> String {
    let speak_open = Regex::new(r"(?is)^\s*<speak[^>]*>").unwrap();
    let speak_close = Regex::new(r"(?is)</speak>\s*$").unwrap();
    let voice_open = Regex::new(r"(?is)^\s*<voice[^>]*>").unwrap();
    let voice_close = Regex::new(r"(?is)</voice>\s*$").unwrap();
    let prosody_open = Regex::new(r"(?is)^\s*<prosody[^>]*>").unwrap();
    let prosody_close = Regex::new(r"(?is)</prosody>\s*$").unwrap();

    let mut inner = text.trim().to_string();
    inner = speak_open.replace(&inner, "").into_owned();
    inner = speak_close.replace(&inner, "").into_owned();
    inner = voice_open.replace(&inner, "").into_owned();
    inner = voice_close.replace(&inner, "").into_owned();
    inner = prosody_open.replace(&inner, "").into_owned();
    inner = prosody_close.replace(&inner, "").into_owned();
    inner.trim().to_string()
}

#[async_trait]
impl TtsProvider for EdgeProvider {
    fn describe(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: ProviderId::Edge,
            display_name: "Microsoft Edge (read aloud)",
            requires_network: true,
            requires_api_key: false,
            supported_formats: HashSet::from([AudioFormat::Mp3, AudioFormat::Wav, AudioFormat::Flac, AudioFormat::Ogg]),
            supports_streaming: true,
            supports_cloning: false,
            supports_ssml: true,
            option_schema: HashMap::new(),
        }
    }

    async fn synthesise(&self, req: &TextRequest, sink: SynthSink<'_>) -> Result<(), SynthError> {
        let config = self.speech_config(req);
        let text = if looks_like_ssml(&req.text) { unwrap_outer_ssml(&req.text) } else { req.text.clone() };

        let audio = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
            let mut client = MSEdgeTTS::connect().map_err(|e| e.to_string())?;
            let result = client.synthesize(&text, &config).map_err(|e| e.to_string())?;
            Ok(result.audio_bytes)
        })
        .await
        .map_err(|e| SynthError::Internal { message: format!("edge synthesis task panicked: {e}") })?
        .map_err(|e| SynthError::Network { message: e })?;

        match sink {
            SynthSink::Chunks(push) => {
                for chunk in audio.chunks(STREAM_CHUNK_BYTES) {
                    push(chunk.to_vec())?;
                }
                Ok(())
            }
            SynthSink::File(path) => {
                let tmp = path.with_extension("tmp");
                tokio::fs::write(&tmp, &audio).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                tokio::fs::rename(&tmp, path).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                Ok(())
            }
        }
    }

    async fn list_voices(&self) -> Result<Vec<VoiceRecord>, SynthError> {
        // A full implementation calls msedge-tts's voices-list endpoint; a
        // small static set keeps this provider usable without a network
        // round trip for the common case.
        Ok(["en-US-AriaNeural", "en-US-GuyNeural", "en-GB-SoniaNeural"]
            .into_iter()
            .map(|v| VoiceRecord { name: v.to_string(), display_name: v.to_string(), language: Some("en".to_string()) })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssml_detection_is_whitespace_insensitive() {
        assert!(looks_like_ssml("  <speak version='1.0'>hi</speak>"));
        assert!(looks_like_ssml("<SPEAK>hi</SPEAK>"));
        assert!(!looks_like_ssml("hello <speak> not at start"));
    }

    #[test]
    fn format_mapping_covers_all_variants() {
        assert_eq!(EdgeProvider::audio_format_tag(AudioFormat::Mp3), "audio-24khz-48kbitrate-mono-mp3");
        assert_eq!(EdgeProvider::audio_format_tag(AudioFormat::Wav), "riff-24khz-16bit-mono-pcm");
    }

    #[test]
    fn unwrap_outer_ssml_strips_speak_voice_prosody_shell() {
        let ssml = "<speak version='1.0' xml:lang=\"en-US\"><voice name=\"en-US-AriaNeural\"><prosody rate=\"+10%\">Hello <emphasis level=\"strong\">world</emphasis></prosody></voice></speak>";
        let inner = unwrap_outer_ssml(ssml);
        assert!(!inner.to_ascii_lowercase().contains("<speak"));
        assert!(!inner.to_ascii_lowercase().contains("<voice"));
        assert!(!inner.to_ascii_lowercase().contains("<prosody"));
        assert!(inner.contains("<emphasis level=\"strong\">world</emphasis>"));
        assert!(inner.contains("Hello"));
    }

    #[test]
    fn plain_text_is_left_untouched() {
        assert!(!looks_like_ssml("hello world"));
    }
}
