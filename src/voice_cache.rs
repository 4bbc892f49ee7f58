//! Voice Cache Manager (C10, spec §4.10).
//!
//! Grounded on the teacher's `tts/cache.rs` (`HashMap` + a parallel
//! access-order list) but the contract is different: the teacher's cache is
//! an ephemeral, process-lifetime LRU keyed by `(text, voice, provider)`;
//! this one is a small, content-identity-keyed registry that survives
//! restarts via a journal file (spec §4.10) — entries, not audio bytes, are
//! persisted (spec §6 "On-disk artefacts"), and tokens are re-established
//! lazily against the local neural server on next use.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::CacheError;

/// Stable content identity for a reference-audio file: a hash of the
/// normalised audio bytes, not the path string (spec §3 invariant).
pub type AudioFileHash = String;

/// Opaque handle the local neural server returns for a loaded reference.
pub type ServerToken = String;

/// Backend the cache delegates actual reference creation/release to — the
/// local neural provider's server connection (spec §4.9/§4.10).
#[async_trait::async_trait]
pub trait VoiceCloneBackend: Send + Sync {
    async fn create_reference(&self, audio: &[u8]) -> Result<ServerToken, CacheError>;
    async fn release_reference(&self, token: &ServerToken) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceCacheEntry {
    pub identity: AudioFileHash,
    pub source_path: String,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip)]
    pub token: Option<ServerToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub identity: AudioFileHash,
    pub source_path: String,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

/// Journal document persisted at the user config root (spec §6).
#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    entries: Vec<StatusEntry>,
}

pub struct VoiceCacheManager {
    entries: RwLock<HashMap<AudioFileHash, VoiceCacheEntry>>,
    journal_path: PathBuf,
}

/// Hash normalised audio content (spec §3: "hash of normalised audio
/// content, not path string"). Normalisation here means "the file's raw
/// bytes" — container-aware normalisation (e.g. stripping ID3 tags) is a
/// refinement left to whichever decoder front-end reads the file; the
/// identity contract only requires determinism for identical inputs.
pub fn hash_audio_content(bytes: &[u8]) -> AudioFileHash {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl VoiceCacheManager {
    pub fn new(journal_path: PathBuf) -> Self {
        Self { entries: RwLock::new(HashMap::new()), journal_path }
    }

    /// Load the journal from disk, populating `status()` without tokens
    /// (spec §4.10: "tokens are re-established lazily").
    pub async fn restore(&self) -> Result<(), CacheError> {
        if !self.journal_path.exists() {
            return Ok(());
        }
        let raw = tokio::fs::read_to_string(&self.journal_path).await?;
        let journal: Journal = match serde_json::from_str(&raw) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.journal_path.display(), "voice cache journal corrupt; starting empty");
                return Ok(());
            }
        };
        let mut entries = self.entries.write().await;
        for entry in journal.entries {
            entries.insert(
                entry.identity.clone(),
                VoiceCacheEntry { identity: entry.identity, source_path: entry.source_path, loaded_at: entry.loaded_at, token: None },
            );
        }
        Ok(())
    }

    async fn persist_locked(&self, entries: &HashMap<AudioFileHash, VoiceCacheEntry>) -> Result<(), CacheError> {
        let journal = Journal {
            entries: entries
                .values()
                .map(|e| StatusEntry { identity: e.identity.clone(), source_path: e.source_path.clone(), loaded_at: e.loaded_at })
                .collect(),
        };
        if let Some(parent) = self.journal_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.journal_path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&journal)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.journal_path).await?;
        Ok(())
    }

    /// `load(paths...)`: idempotent per identity (spec §4.10, §8 property 5).
    pub async fn load(
        &self,
        paths: &[PathBuf],
        backend: &dyn VoiceCloneBackend,
    ) -> Result<Vec<AudioFileHash>, CacheError> {
        let mut entries = self.entries.write().await;
        let mut identities = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(path).await?;
            let identity = hash_audio_content(&bytes);
            if let Some(existing) = entries.get_mut(&identity) {
                if existing.token.is_none() {
                    existing.token = Some(backend.create_reference(&bytes).await?);
                }
                identities.push(identity);
                continue;
            }
            let token = backend.create_reference(&bytes).await?;
            entries.insert(
                identity.clone(),
                VoiceCacheEntry {
                    identity: identity.clone(),
                    source_path: path.display().to_string(),
                    loaded_at: chrono::Utc::now(),
                    token: Some(token),
                },
            );
            identities.push(identity);
        }
        self.persist_locked(&entries).await?;
        Ok(identities)
    }

    /// `unload(paths...)`: remove entries by identity, releasing server tokens.
    pub async fn unload(&self, paths: &[PathBuf], backend: &dyn VoiceCloneBackend) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        for path in paths {
            let bytes = tokio::fs::read(path).await?;
            let identity = hash_audio_content(&bytes);
            if let Some(entry) = entries.remove(&identity) {
                if let Some(token) = entry.token {
                    backend.release_reference(&token).await?;
                }
            }
        }
        self.persist_locked(&entries).await
    }

    /// `unload_all()`: drop the entire registry.
    pub async fn unload_all(&self, backend: &dyn VoiceCloneBackend) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        for entry in entries.values() {
            if let Some(token) = &entry.token {
                backend.release_reference(token).await?;
            }
        }
        entries.clear();
        self.persist_locked(&entries).await
    }

    /// `lookup(path) -> token?`: total function.
    pub async fn lookup(&self, path: &Path) -> Option<ServerToken> {
        let bytes = tokio::fs::read(path).await.ok()?;
        let identity = hash_audio_content(&bytes);
        self.entries.read().await.get(&identity)?.token.clone()
    }

    /// `status()`: reflects the live registry.
    pub async fn status(&self) -> Vec<StatusEntry> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| StatusEntry { identity: e.identity.clone(), source_path: e.source_path.clone(), loaded_at: e.loaded_at })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBackend {
        creates: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl VoiceCloneBackend for CountingBackend {
        async fn create_reference(&self, _audio: &[u8]) -> Result<ServerToken, CacheError> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{n}"))
        }

        async fn release_reference(&self, _token: &ServerToken) -> Result<(), CacheError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn reloading_same_content_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("voice.wav");
        tokio::fs::write(&wav_path, b"fake audio bytes").await.unwrap();

        let journal = dir.path().join("journal.json");
        let cache = VoiceCacheManager::new(journal);
        let creates = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend { creates: creates.clone(), releases: releases.clone() };

        cache.load(&[wav_path.clone()], &backend).await.unwrap();
        cache.load(&[wav_path.clone()], &backend).await.unwrap();

        assert_eq!(creates.load(Ordering::SeqCst), 1, "second load must not re-create a reference");
        assert_eq!(cache.status().await.len(), 1);

        cache.unload_all(&backend).await.unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(cache.status().await.is_empty());
    }

    #[tokio::test]
    async fn lookup_is_total() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.wav");
        let cache = VoiceCacheManager::new(dir.path().join("journal.json"));
        assert_eq!(cache.lookup(&missing).await, None);
    }

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(hash_audio_content(b"abc"), hash_audio_content(b"abc"));
        assert_ne!(hash_audio_content(b"abc"), hash_audio_content(b"abd"));
    }
}
