//! Core data model (spec §3): `TextRequest`, `VoiceRef`, rate/pitch scalars,
//! `AudioFormat`, provider identity. Grounded on the teacher's
//! `tts/interface.rs` (`TtsParams`, `VoiceProfile`) generalised from a single
//! flat params struct into the tagged `VoiceRef` and bounded rate/pitch
//! scalars the spec requires.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Stable identifier for one of the five built-in back-ends (spec §9:
/// "one enum of provider ids" rather than bare strings through the core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Edge,
    OpenAi,
    ElevenLabs,
    Google,
    LocalNeural,
}

impl ProviderId {
    /// Fixed scan order used by voice-string resolution (spec §4.4 step 3)
    /// and by provider-dispatch determinism (spec §8 property 2).
    pub const SCAN_ORDER: [ProviderId; 5] = [
        ProviderId::Edge,
        ProviderId::OpenAi,
        ProviderId::ElevenLabs,
        ProviderId::Google,
        ProviderId::LocalNeural,
    ];

    pub fn short_alias(self) -> &'static str {
        match self {
            ProviderId::Edge => "edge",
            ProviderId::OpenAi => "openai",
            ProviderId::ElevenLabs => "elevenlabs",
            ProviderId::Google => "google",
            ProviderId::LocalNeural => "local",
        }
    }

    pub fn from_alias(alias: &str) -> Option<Self> {
        Self::SCAN_ORDER.into_iter().find(|p| p.short_alias() == alias)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_alias())
    }
}

/// A resolved voice reference (spec §3 `VoiceRef`).
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceRef {
    Named(ProviderId, String),
    CloneFrom(PathBuf),
    Default,
}

/// Rate adjustment: percentage delta from baseline, `[-50, 200]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateAdjust(Option<f32>);

impl RateAdjust {
    pub const MIN_PCT: f32 = -50.0;
    pub const MAX_PCT: f32 = 200.0;

    pub fn unset() -> Self {
        RateAdjust(None)
    }

    pub fn from_percent(pct: f32) -> Result<Self, crate::error::SynthError> {
        if !(Self::MIN_PCT..=Self::MAX_PCT).contains(&pct) {
            return Err(crate::error::SynthError::bad_option(
                "rate",
                format!("rate {pct}% is outside [{}, {}]", Self::MIN_PCT, Self::MAX_PCT),
            ));
        }
        Ok(RateAdjust(Some(pct)))
    }

    pub fn percent(&self) -> Option<f32> {
        self.0
    }
}

impl Default for RateAdjust {
    fn default() -> Self {
        Self::unset()
    }
}

/// Pitch adjustment: frequency delta in Hz, `[-50, 50]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchAdjust(Option<f32>);

impl PitchAdjust {
    pub const MIN_HZ: f32 = -50.0;
    pub const MAX_HZ: f32 = 50.0;

    pub fn unset() -> Self {
        PitchAdjust(None)
    }

    pub fn from_hz(hz: f32) -> Result<Self, crate::error::SynthError> {
        if !(Self::MIN_HZ..=Self::MAX_HZ).contains(&hz) {
            return Err(crate::error::SynthError::bad_option(
                "pitch",
                format!("pitch {hz}Hz is outside [{}, {}]", Self::MIN_HZ, Self::MAX_HZ),
            ));
        }
        Ok(PitchAdjust(Some(hz)))
    }

    pub fn hz(&self) -> Option<f32> {
        self.0
    }
}

impl Default for PitchAdjust {
    fn default() -> Self {
        Self::unset()
    }
}

/// Audio container format (spec §3). Default `Mp3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Ogg,
    Flac,
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Mp3
    }
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            "ogg" => Some(AudioFormat::Ogg),
            "flac" => Some(AudioFormat::Flac),
            _ => None,
        }
    }
}

/// A scalar provider option value (spec §9 "Dynamic option maps").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Where the synthesised audio should end up.
#[derive(Debug, Clone)]
pub enum SynthDestination {
    Stream,
    File(PathBuf),
}

/// Immutable synthesis request (spec §3 `TextRequest`). Constructed once at
/// orchestration entry and consumed by exactly one provider call.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub text: String,
    pub voice: VoiceRef,
    pub rate: RateAdjust,
    pub pitch: PitchAdjust,
    pub format: AudioFormat,
    pub stream: bool,
    pub provider_options: HashMap<String, OptionValue>,
}

impl TextRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: VoiceRef::Default,
            rate: RateAdjust::unset(),
            pitch: PitchAdjust::unset(),
            format: AudioFormat::default(),
            stream: false,
            provider_options: HashMap::new(),
        }
    }
}
