//! Document Cache (C15, spec §4.15).
//!
//! Content-addressed store of parse results. Grounded on the teacher's
//! `tts/cache.rs` (`HashMap` keyed on a hashed composite of request fields,
//! JSON-serialisable entries) but backed by a directory of JSON files
//! instead of an in-memory map, per spec §4.15's "one JSON file per key"
//! contract, with the atomic-write and corruption-is-a-miss behaviour the
//! voice-cache journal (`voice_cache.rs`) already established for this
//! crate's on-disk artefacts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::document::emotion::{AnnotatedElement, EmotionProfile};
use crate::document::ssml::SsmlPlatform;
use crate::error::CacheError;

pub type DocumentCacheKey = String;

/// `hash(normalised_content_bytes || format_hint || ssml_platform ||
/// emotion_profile)` (spec §3 `Document Cache Key`).
pub fn compute_key(normalised_content: &str, format_hint: &str, platform: SsmlPlatform, profile: EmotionProfile) -> DocumentCacheKey {
    let mut hasher = Sha256::new();
    hasher.update(normalised_content.as_bytes());
    hasher.update(format_hint.as_bytes());
    hasher.update(platform_tag(platform).as_bytes());
    hasher.update(profile_tag(profile).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn platform_tag(platform: SsmlPlatform) -> &'static str {
    match platform {
        SsmlPlatform::Azure => "azure",
        SsmlPlatform::Google => "google",
        SsmlPlatform::Amazon => "amazon",
        SsmlPlatform::Generic => "generic",
    }
}

fn profile_tag(profile: EmotionProfile) -> &'static str {
    match profile {
        EmotionProfile::Auto => "auto",
        EmotionProfile::Technical => "technical",
        EmotionProfile::Marketing => "marketing",
        EmotionProfile::Narrative => "narrative",
        EmotionProfile::Tutorial => "tutorial",
    }
}

/// On-disk representation of one cached element. `AnnotatedElement` itself
/// has no `Serialize` impl (its `SemanticElement` payload is an enum tuned
/// for in-process matching, not wire stability); this mirrors its fields so
/// cache files stay self-describing JSON (spec §4.15, §9 "Cache safety").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedElement {
    pub kind: String,
    pub text: String,
    pub heading_level: Option<u8>,
    pub link_target: Option<String>,
    pub emphasis: f32,
    pub pause_before_ms: u32,
    pub pause_after_ms: u32,
}

impl From<&AnnotatedElement> for CachedElement {
    fn from(a: &AnnotatedElement) -> Self {
        use crate::document::semantic::SemanticElement::*;
        let (kind, heading_level, link_target) = match &a.element {
            Heading { level, .. } => ("heading", Some(*level), None),
            Paragraph(_) => ("paragraph", None, None),
            Bold(_) => ("bold", None, None),
            Italic(_) => ("italic", None, None),
            Code(_) => ("code", None, None),
            CodeBlock(_) => ("code_block", None, None),
            ListItem(_) => ("list_item", None, None),
            Link { target, .. } => ("link", None, Some(target.clone())),
            Break => ("break", None, None),
        };
        CachedElement {
            kind: kind.to_string(),
            text: a.element.text_content().to_string(),
            heading_level,
            link_target,
            emphasis: a.emphasis,
            pause_before_ms: a.pause_before_ms,
            pause_after_ms: a.pause_after_ms,
        }
    }
}

impl CachedElement {
    pub fn to_annotated(&self, profile: EmotionProfile) -> AnnotatedElement {
        use crate::document::semantic::SemanticElement;
        let element = match self.kind.as_str() {
            "heading" => SemanticElement::Heading { level: self.heading_level.unwrap_or(1), text: self.text.clone() },
            "paragraph" => SemanticElement::Paragraph(self.text.clone()),
            "bold" => SemanticElement::Bold(self.text.clone()),
            "italic" => SemanticElement::Italic(self.text.clone()),
            "code" => SemanticElement::Code(self.text.clone()),
            "code_block" => SemanticElement::CodeBlock(self.text.clone()),
            "list_item" => SemanticElement::ListItem(self.text.clone()),
            "link" => SemanticElement::Link { target: self.link_target.clone().unwrap_or_default(), text: self.text.clone() },
            _ => SemanticElement::Break,
        };
        AnnotatedElement {
            element,
            profile,
            emphasis: self.emphasis,
            pause_before_ms: self.pause_before_ms,
            pause_after_ms: self.pause_after_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    profile: String,
    elements: Vec<CachedElement>,
}

/// `get`/`put`/`clear` over a directory of JSON files, one per key (spec
/// §4.15). Eviction is manual only — a correctness cache, not a capacity
/// cache.
pub struct DocumentCache {
    dir: PathBuf,
}

impl DocumentCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &DocumentCacheKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Legacy binary-pickle cache files are a known hazard (spec §9
    /// "Cache safety") and use a different extension; this store never
    /// writes or trusts them.
    fn legacy_path_for(&self, key: &DocumentCacheKey) -> PathBuf {
        self.dir.join(format!("{key}.pickle"))
    }

    /// `get(key)`: a miss on corruption, removing the offending file
    /// (spec §4.15).
    pub async fn get(&self, key: &DocumentCacheKey, profile: EmotionProfile) -> Option<Vec<AnnotatedElement>> {
        let path = self.path_for(key);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<CacheDocument>(&raw) {
            Ok(doc) => Some(doc.elements.iter().map(|c| c.to_annotated(profile)).collect()),
            Err(e) => {
                tracing::warn!(key, error = %e, "document cache entry corrupt; treating as a miss");
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
        }
    }

    /// `put(key, value)`: atomic (temp file + rename).
    pub async fn put(&self, key: &DocumentCacheKey, elements: &[AnnotatedElement]) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let profile = elements.first().map(|a| profile_tag(a.profile).to_string()).unwrap_or_else(|| "auto".to_string());
        let doc = CacheDocument { profile, elements: elements.iter().map(CachedElement::from).collect() };
        let json = serde_json::to_string_pretty(&doc)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// `clear()`: drop every cache entry, including any legacy pickle files
    /// found alongside the JSON ones (spec §9, §4.15).
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let is_cache_file = path.extension().map(|e| e == "json" || e == "pickle").unwrap_or(false);
            if is_cache_file {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn legacy_marker_path(&self, key: &DocumentCacheKey) -> PathBuf {
        self.legacy_path_for(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::emotion::classify;
    use crate::document::semantic::parse_markdown;

    fn sample_elements() -> Vec<AnnotatedElement> {
        classify(parse_markdown("# Title\n\nHello **world**"), EmotionProfile::Technical)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().to_path_buf());
        let key = compute_key("content", "markdown", SsmlPlatform::Azure, EmotionProfile::Technical);
        let elements = sample_elements();

        cache.put(&key, &elements).await.unwrap();
        let fetched = cache.get(&key, EmotionProfile::Technical).await.unwrap();

        let original_texts: Vec<&str> = elements.iter().map(|a| a.element.text_content()).collect();
        let fetched_texts: Vec<&str> = fetched.iter().map(|a| a.element.text_content()).collect();
        assert_eq!(original_texts, fetched_texts);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().to_path_buf());
        let key = compute_key("x", "markdown", SsmlPlatform::Generic, EmotionProfile::Auto);
        tokio::fs::write(cache.path_for(&key), b"not valid json").await.unwrap();

        assert!(cache.get(&key, EmotionProfile::Auto).await.is_none());
        assert!(!cache.path_for(&key).exists());
    }

    #[tokio::test]
    async fn clear_removes_legacy_pickle_files_too() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(dir.path().to_path_buf());
        let key = compute_key("y", "markdown", SsmlPlatform::Generic, EmotionProfile::Auto);
        cache.put(&key, &sample_elements()).await.unwrap();
        tokio::fs::write(cache.legacy_marker_path(&key), b"legacy pickle bytes").await.unwrap();

        cache.clear().await.unwrap();

        assert!(!cache.path_for(&key).exists());
        assert!(!cache.legacy_marker_path(&key).exists());
    }

    #[test]
    fn key_is_deterministic_and_sensitive_to_inputs() {
        let a = compute_key("content", "markdown", SsmlPlatform::Azure, EmotionProfile::Technical);
        let b = compute_key("content", "markdown", SsmlPlatform::Azure, EmotionProfile::Technical);
        let c = compute_key("content", "markdown", SsmlPlatform::Google, EmotionProfile::Technical);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
