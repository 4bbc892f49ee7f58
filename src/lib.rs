//! speakline-core: the synthesis engine behind a multi-backend command-line
//! text-to-speech tool (spec §1 OVERVIEW).
//!
//! This crate is the core — voice resolution, provider dispatch, the
//! document-to-speech pipeline, caching, and the orchestrator that drives
//! them end to end. Argument parsing, the config file format on disk, and
//! process wiring live in a CLI front-end built on top of this library
//! (spec §1 Non-goals).

pub mod audio;
pub mod config;
pub mod document;
pub mod error;
pub mod http_retry;
pub mod orchestrator;
pub mod providers;
pub mod types;
pub mod voice_cache;

pub use error::SynthError;
pub use orchestrator::{SynthesisOrchestrator, SynthesisRequest, TextSource};
pub use types::{AudioFormat, OptionValue, PitchAdjust, ProviderId, RateAdjust, SynthDestination, TextRequest, VoiceRef};
