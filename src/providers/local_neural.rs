//! Local Neural Provider (C9, spec §4.9).
//!
//! The teacher's `tts/local_vits.rs` shows the shape of "a local inference
//! server reached over HTTP with a liveness probe" but never forks that
//! server itself — it assumes something else started it. The fork/poll
//! lifecycle and child-process bookkeeping here is grounded instead on
//! `dropbox-dTOOL`'s `exec.rs` (`Command::spawn()` + a liveness/timeout race
//! + killing the child on shutdown), since nothing in the teacher repo spawns
//! a subprocess. The wire protocol — JSON lines in, length-prefixed binary
//! chunks out — is spec-defined (§6 "Local synthesis server") rather than
//! drawn from either source.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OnceCell};

use crate::config::ConfigReader;
use crate::error::SynthError;
use crate::providers::contract::{ProviderDescriptor, SynthSink, TtsProvider, VoiceRecord};
use crate::types::{AudioFormat, ProviderId, TextRequest, VoiceRef};
use crate::voice_cache::{CacheError, ServerToken, VoiceCloneBackend, VoiceCacheManager};

/// Empty-frame sentinel marking end-of-stream in the response protocol
/// (spec §6: "length-prefixed binary chunks terminated by an empty frame").
const END_OF_STREAM_LEN: u32 = 0;

struct RunningServer {
    #[allow(dead_code)]
    child: Child,
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

pub struct LocalNeuralProvider {
    port: u16,
    server_binary: String,
    startup_timeout: Duration,
    poll_interval: Duration,
    server: Arc<Mutex<Option<RunningServer>>>,
    /// The orchestrator's voice cache (C10), attached once after this
    /// provider is constructed. When present, clone-from-path requests
    /// consult it before creating a fresh server-side reference, so a
    /// path already `load`-ed is never re-loaded (spec §4.9, §4.10).
    voice_cache: OnceCell<Arc<VoiceCacheManager>>,
}

#[derive(Serialize)]
struct RequestLine {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_token: Option<String>,
    format: &'static str,
}

impl LocalNeuralProvider {
    pub fn from_config(config: &dyn ConfigReader) -> Self {
        let timeouts = config.timeouts();
        Self {
            port: config.local_server_port(),
            server_binary: config
                .provider_option("local_neural", "server_binary")
                .unwrap_or_else(|| "speakline-neural-server".to_string()),
            startup_timeout: Duration::from_secs(timeouts.local_server_startup_s),
            poll_interval: Duration::from_secs(timeouts.local_server_poll_interval_s.max(1)),
            server: Arc::new(Mutex::new(None)),
            voice_cache: OnceCell::new(),
        }
    }

    async fn probe_liveness(&self) -> bool {
        TcpStream::connect(("127.0.0.1", self.port)).await.is_ok()
    }

    /// Ensure a server is reachable, forking and polling if not (spec §4.9).
    async fn ensure_server(&self) -> Result<(), SynthError> {
        if self.probe_liveness().await {
            return Ok(());
        }

        let mut guard = self.server.lock().await;
        if guard.is_some() {
            // Another call already forked one; re-probe before giving up.
            if self.probe_liveness().await {
                return Ok(());
            }
        }

        let child = Command::new(&self.server_binary)
            .arg("--port")
            .arg(self.port.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthError::dependency(&self.server_binary, e.to_string()))?;
        *guard = Some(RunningServer { child });
        drop(guard);

        let deadline = tokio::time::Instant::now() + self.startup_timeout;
        loop {
            if self.probe_liveness().await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SynthError::dependency(
                    &self.server_binary,
                    format!("local neural server did not become ready within {:?}", self.startup_timeout),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn connect(&self) -> Result<TcpStream, SynthError> {
        TcpStream::connect(("127.0.0.1", self.port))
            .await
            .map_err(|e| SynthError::Network { message: format!("local neural server connect failed: {e}") })
    }

    fn format_tag(format: AudioFormat) -> &'static str {
        match format {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
        }
    }

    /// Send one request line and drain the length-prefixed response frames.
    async fn request_and_drain(
        &self,
        stream: &mut TcpStream,
        request: &RequestLine,
        mut on_chunk: impl FnMut(Vec<u8>) -> Result<(), SynthError>,
    ) -> Result<(), SynthError> {
        let mut line = serde_json::to_string(request).map_err(|e| SynthError::Internal { message: e.to_string() })?;
        line.push('\n');
        stream.write_all(line.as_bytes()).await.map_err(|e| SynthError::Network { message: e.to_string() })?;

        loop {
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await.map_err(|e| SynthError::Network { message: e.to_string() })?;
            let len = u32::from_be_bytes(len_buf);
            if len == END_OF_STREAM_LEN {
                return Ok(());
            }
            let mut chunk = vec![0u8; len as usize];
            stream.read_exact(&mut chunk).await.map_err(|e| SynthError::Network { message: e.to_string() })?;
            on_chunk(chunk)?;
        }
    }

    fn request_for(&self, req: &TextRequest, reference_token: Option<String>) -> RequestLine {
        let voice = match &req.voice {
            VoiceRef::Named(ProviderId::LocalNeural, name) => Some(name.clone()),
            _ => None,
        };
        RequestLine { text: req.text.clone(), voice, reference_token, format: Self::format_tag(req.format) }
    }
}

#[async_trait]
impl VoiceCloneBackend for LocalNeuralProvider {
    async fn create_reference(&self, audio: &[u8]) -> Result<ServerToken, CacheError> {
        self.ensure_server()
            .await
            .map_err(|e| CacheError::Corrupt(format!("local neural server unavailable: {e}")))?;
        let mut stream = self
            .connect()
            .await
            .map_err(|e| CacheError::Corrupt(format!("local neural server unavailable: {e}")))?;

        #[derive(Serialize)]
        struct CreateReferenceLine {
            op: &'static str,
            audio_base64: String,
        }
        use base64::Engine;
        let line = CreateReferenceLine { op: "create_reference", audio_base64: base64::engine::general_purpose::STANDARD.encode(audio) };
        let mut payload = serde_json::to_string(&line).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        payload.push('\n');
        stream.write_all(payload.as_bytes()).await.map_err(CacheError::Io)?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.map_err(CacheError::Io)?;
        let len = u32::from_be_bytes(len_buf);
        let mut token_bytes = vec![0u8; len as usize];
        stream.read_exact(&mut token_bytes).await.map_err(CacheError::Io)?;
        String::from_utf8(token_bytes).map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    async fn release_reference(&self, token: &ServerToken) -> Result<(), CacheError> {
        if !self.probe_liveness().await {
            // Server restart invalidates the registry anyway (spec §4.10 invariant).
            return Ok(());
        }
        let mut stream = self.connect().await.map_err(|e| CacheError::Corrupt(e.to_string()))?;
        #[derive(Serialize)]
        struct ReleaseLine {
            op: &'static str,
            token: String,
        }
        let line = ReleaseLine { op: "release_reference", token: token.clone() };
        let mut payload = serde_json::to_string(&line).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        payload.push('\n');
        stream.write_all(payload.as_bytes()).await.map_err(CacheError::Io)?;
        Ok(())
    }
}

#[async_trait]
impl TtsProvider for LocalNeuralProvider {
    fn describe(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: ProviderId::LocalNeural,
            display_name: "Local neural synthesis server",
            requires_network: false,
            requires_api_key: false,
            supported_formats: HashSet::from([AudioFormat::Mp3, AudioFormat::Wav, AudioFormat::Flac, AudioFormat::Ogg]),
            supports_streaming: true,
            supports_cloning: true,
            supports_ssml: false,
            option_schema: HashMap::new(),
        }
    }

    async fn synthesise(&self, req: &TextRequest, sink: SynthSink<'_>) -> Result<(), SynthError> {
        self.ensure_server().await?;
        let reference_token = match &req.voice {
            VoiceRef::CloneFrom(path) => Some(self.resolve_clone_token(path).await?),
            _ => None,
        };
        let request = self.request_for(req, reference_token);
        let mut stream = self.connect().await?;

        match sink {
            SynthSink::Chunks(push) => {
                self.request_and_drain(&mut stream, &request, |chunk| push(chunk)).await
            }
            SynthSink::File(path) => {
                let mut buffer = Vec::new();
                self.request_and_drain(&mut stream, &request, |chunk| {
                    buffer.extend_from_slice(&chunk);
                    Ok(())
                })
                .await?;
                let tmp = path.with_extension("tmp");
                tokio::fs::write(&tmp, &buffer).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                tokio::fs::rename(&tmp, path).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
                Ok(())
            }
        }
    }

    async fn list_voices(&self) -> Result<Vec<VoiceRecord>, SynthError> {
        self.ensure_server().await?;
        Ok(vec![VoiceRecord { name: "default".to_string(), display_name: "Local default".to_string(), language: None }])
    }
}

impl LocalNeuralProvider {
    /// Attach the orchestrator's voice cache (C10) so clone-from-path
    /// requests consult it before creating a fresh reference. Idempotent:
    /// later calls after the first are no-ops.
    pub fn attach_voice_cache(&self, cache: Arc<VoiceCacheManager>) {
        let _ = self.voice_cache.set(cache);
    }

    /// Resolve a `CloneFrom(path)` voice to a server token, consulting the
    /// attached voice cache first so a path already `load`-ed is never
    /// re-loaded (spec §8 property 5 "load(p); load(p) is observationally
    /// equivalent to load(p)"). Clone-from-path without a cache entry (or
    /// with no cache attached at all, e.g. a bare invocation with no prior
    /// `cache load`) triggers an on-the-fly load (spec §4.9).
    async fn resolve_clone_token(&self, path: &std::path::Path) -> Result<String, SynthError> {
        if let Some(cache) = self.voice_cache.get() {
            if let Some(token) = cache.lookup(path).await {
                return Ok(token);
            }
            cache.load(std::slice::from_ref(&path.to_path_buf()), self).await?;
            if let Some(token) = cache.lookup(path).await {
                return Ok(token);
            }
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
        self.create_reference(&bytes).await.map_err(SynthError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tag_covers_all_variants() {
        assert_eq!(LocalNeuralProvider::format_tag(AudioFormat::Mp3), "mp3");
        assert_eq!(LocalNeuralProvider::format_tag(AudioFormat::Flac), "flac");
    }

    #[test]
    fn request_line_omits_absent_voice_and_token() {
        let mut req = TextRequest::new("hello");
        req.format = AudioFormat::Wav;
        let provider = LocalNeuralProvider {
            port: 0,
            server_binary: String::new(),
            startup_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            server: Arc::new(Mutex::new(None)),
            voice_cache: OnceCell::new(),
        };
        let line = provider.request_for(&req, None);
        let json = serde_json::to_string(&line).unwrap();
        assert!(!json.contains("voice"));
        assert!(!json.contains("reference_token"));
    }
}
