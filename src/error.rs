//! Error taxonomy for the synthesis core (spec §4.3, §7).
//!
//! `SynthError` is hand-rolled with a manual `Display`/`Error` impl, matching
//! the shape of the teacher's `TtsError` (`tts/interface.rs`) rather than a
//! `thiserror`-derived enum — the top-level error is the one callers match on
//! by variant, so its `Display` text is curated by hand. Component-local
//! errors that are purely internal plumbing use `thiserror` instead (the
//! teacher carries the dependency but never exercises it; this crate does).

use std::fmt;

/// Every error the core can surface to a caller.
#[derive(Debug, Clone)]
pub enum SynthError {
    Authentication { provider: String, message: String },
    Network { message: String },
    Quota { provider: String, message: String },
    Voice { message: String, suggestions: Vec<String> },
    Format { message: String },
    Dependency { tool: String, message: String },
    Provider { provider: String, status: Option<u16>, message: String },
    BadOption { key: String, message: String, suggestions: Vec<String> },
    Cancelled,
    Internal { message: String },
}

impl SynthError {
    pub fn voice(message: impl Into<String>, suggestions: Vec<String>) -> Self {
        SynthError::Voice { message: message.into(), suggestions }
    }

    pub fn bad_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        SynthError::BadOption { key: key.into(), message: message.into(), suggestions: Vec::new() }
    }

    pub fn dependency(tool: impl Into<String>, message: impl Into<String>) -> Self {
        SynthError::Dependency { tool: tool.into(), message: message.into() }
    }

    /// Whether the orchestrator's retry loop (spec §4.16) may retry this error.
    pub fn is_retriable(&self) -> bool {
        match self {
            SynthError::Network { .. } => true,
            SynthError::Provider { status, .. } => {
                status.map(|s| (500..600).contains(&s)).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// A short remediation hint for authentication/quota failures (spec §7).
    pub fn remediation_hint(&self) -> Option<String> {
        match self {
            SynthError::Authentication { provider, .. } => Some(format!(
                "set the API key for provider '{provider}' in configuration or its environment variable"
            )),
            SynthError::Quota { provider, .. } => Some(format!(
                "provider '{provider}' reported a quota/billing error; check its account limits"
            )),
            _ => None,
        }
    }
}

impl fmt::Display for SynthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthError::Authentication { provider, message } => {
                write!(f, "authentication failed for provider '{provider}': {message}")
            }
            SynthError::Network { message } => write!(f, "network error: {message}"),
            SynthError::Quota { provider, message } => {
                write!(f, "quota exceeded for provider '{provider}': {message}")
            }
            SynthError::Voice { message, suggestions } => {
                if suggestions.is_empty() {
                    write!(f, "voice error: {message}")
                } else {
                    write!(f, "voice error: {message} (did you mean: {})", suggestions.join(", "))
                }
            }
            SynthError::Format { message } => write!(f, "format error: {message}"),
            SynthError::Dependency { tool, message } => {
                write!(f, "missing dependency '{tool}': {message}")
            }
            SynthError::Provider { provider, status, message } => match status {
                Some(code) => write!(f, "provider '{provider}' error ({code}): {message}"),
                None => write!(f, "provider '{provider}' error: {message}"),
            },
            SynthError::BadOption { key, message, suggestions } => {
                if suggestions.is_empty() {
                    write!(f, "bad option '{key}': {message}")
                } else {
                    write!(f, "bad option '{key}': {message} (did you mean: {})", suggestions.join(", "))
                }
            }
            SynthError::Cancelled => write!(f, "synthesis was cancelled"),
            SynthError::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for SynthError {}

impl From<CacheError> for SynthError {
    fn from(e: CacheError) -> Self {
        SynthError::Internal { message: e.to_string() }
    }
}

impl From<DocumentError> for SynthError {
    fn from(e: DocumentError) -> Self {
        SynthError::Internal { message: e.to_string() }
    }
}

/// Errors internal to the voice cache and document cache (C10, C15).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry corrupt: {0}")]
    Corrupt(String),
    #[error("cache journal serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors from the document conversion/parsing pipeline (C11-C14).
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("unrecognised document format")]
    UnknownFormat,
    #[error("malformed JSON document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SSML emission produced inconsistent text content")]
    SsmlMismatch,
}
