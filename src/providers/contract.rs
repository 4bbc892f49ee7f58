//! Provider Contract (C3, spec §4.3).
//!
//! Grounded on the teacher's `tts/interface.rs` (`TtsProvider` trait,
//! `ProviderCapabilities`, `VoiceProfile`) generalised per spec: a static
//! `ProviderDescriptor` replaces the loose capability-flags struct, voices
//! carry the richer `VoiceRecord` shape, and `synthesise` takes an explicit
//! sink rather than always returning a byte vector, so streaming providers
//! can write directly to C1 without buffering the whole response (spec
//! §4.3 invariant).

use async_trait::async_trait;
use futures::Stream;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;

use crate::error::SynthError;
use crate::types::{AudioFormat, OptionValue, ProviderId, TextRequest};

/// One entry of a provider's option schema (spec §9 "Dynamic option maps").
#[derive(Debug, Clone)]
pub enum OptionSpec {
    Bool { default: bool },
    Int { min: i64, max: i64, default: i64 },
    Float { min: f64, max: f64, default: f64 },
    Str { allowed: Option<Vec<String>>, default: Option<String> },
}

impl OptionSpec {
    /// Validate and coerce a raw value against this spec, returning the
    /// normalised value or a `BadOption` error (spec §4.3 `validate_options`).
    pub fn validate(&self, key: &str, value: &OptionValue) -> Result<OptionValue, SynthError> {
        match (self, value) {
            (OptionSpec::Bool { .. }, OptionValue::Bool(b)) => Ok(OptionValue::Bool(*b)),
            (OptionSpec::Int { min, max, .. }, OptionValue::Int(i)) => {
                if (*min..=*max).contains(i) {
                    Ok(OptionValue::Int(*i))
                } else {
                    Err(SynthError::bad_option(key, format!("{i} outside [{min}, {max}]")))
                }
            }
            (OptionSpec::Float { min, max, .. }, OptionValue::Float(v)) => {
                let clamped = v.clamp(*min, *max);
                Ok(OptionValue::Float(clamped))
            }
            (OptionSpec::Float { min, max, .. }, OptionValue::Int(i)) => {
                Ok(OptionValue::Float((*i as f64).clamp(*min, *max)))
            }
            (OptionSpec::Str { allowed: Some(allowed), .. }, OptionValue::Str(s)) => {
                if allowed.iter().any(|a| a == s) {
                    Ok(OptionValue::Str(s.clone()))
                } else {
                    Err(SynthError::bad_option(key, format!("'{s}' is not one of {allowed:?}")))
                }
            }
            (OptionSpec::Str { allowed: None, .. }, OptionValue::Str(s)) => Ok(OptionValue::Str(s.clone())),
            _ => Err(SynthError::bad_option(key, "value does not match the expected type")),
        }
    }
}

/// Static per-provider metadata, immutable once the registry loads a
/// provider (spec §3 `Provider Descriptor`).
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: &'static str,
    pub requires_network: bool,
    pub requires_api_key: bool,
    pub supported_formats: HashSet<AudioFormat>,
    pub supports_streaming: bool,
    pub supports_cloning: bool,
    pub supports_ssml: bool,
    pub option_schema: HashMap<String, OptionSpec>,
}

/// One entry from `list_voices` (spec §4.3).
#[derive(Debug, Clone)]
pub struct VoiceRecord {
    pub name: String,
    pub display_name: String,
    pub language: Option<String>,
}

/// A chunk of opaque, ordered audio bytes (spec §3 `Audio Chunk`).
pub type AudioChunk = Vec<u8>;

pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioChunk, SynthError>> + Send>>;

/// Where a non-streaming `synthesise` call writes its output.
pub enum SynthSink<'a> {
    /// Streaming mode: chunks are pushed to this unbounded forwarding closure
    /// as they arrive (ultimately routed to C1's decoder writer).
    Chunks(&'a (dyn Fn(AudioChunk) -> Result<(), SynthError> + Send + Sync)),
    /// Non-streaming mode: the provider must write a complete, valid
    /// container to this path and only return success once the file is
    /// closed (spec §4.3 invariant).
    File(&'a std::path::Path),
}

/// Every synthesis back-end implements this contract (spec §4.3).
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn describe(&self) -> ProviderDescriptor;

    /// The only side-effecting operation (spec §4.3 invariant).
    async fn synthesise(&self, req: &TextRequest, sink: SynthSink<'_>) -> Result<(), SynthError>;

    async fn list_voices(&self) -> Result<Vec<VoiceRecord>, SynthError>;

    /// Validate a raw option map against this provider's schema, returning
    /// the normalised map. Unknown keys are rejected (spec §9).
    fn validate_options(
        &self,
        opts: &HashMap<String, OptionValue>,
    ) -> Result<HashMap<String, OptionValue>, SynthError> {
        let schema = self.describe().option_schema;
        let mut normalised = HashMap::new();
        for (key, value) in opts {
            let spec = schema
                .get(key)
                .ok_or_else(|| SynthError::bad_option(key, "unknown option for this provider"))?;
            normalised.insert(key.clone(), spec.validate(key, value)?);
        }
        Ok(normalised)
    }
}
