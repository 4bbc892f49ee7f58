//! Document-to-speech pipeline (C11-C15, spec §4.11-§4.15).
//!
//! The teacher has no document ingestion at all — its inputs are always a
//! chat message or narration string handed straight to a `TtsProvider`. This
//! whole pipeline is therefore grounded on the *shape* of the teacher's
//! other transform stages (`emotion_tts.rs`'s small modifier table,
//! `cache.rs`'s hashed-key store) rather than on a document-specific
//! precedent, generalised per spec §4.11-§4.15.

pub mod cache;
pub mod converter;
pub mod emotion;
pub mod semantic;
pub mod ssml;

pub use cache::{compute_key, DocumentCache, DocumentCacheKey};
pub use converter::{detect_format, to_markdown, DocumentFormat};
pub use emotion::{classify, AnnotatedElement, EmotionProfile};
pub use semantic::{parse_markdown, SemanticElement};
pub use ssml::{emit_plain, emit_ssml, SsmlPlatform};
