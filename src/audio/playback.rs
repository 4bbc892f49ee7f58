//! Audio Playback Manager (C1, spec §4.1).
//!
//! The teacher never spawns a subprocess for audio at all (cloud providers
//! return bytes to the frontend, which plays them via the browser's own
//! audio APIs). The stdin-piped spawn/reap shape here is grounded on the
//! teacher's `mcp/transport.rs` (`StdioTransport::spawn`: piped stdin,
//! `Child` held behind a `Mutex` for later kill), extended with the
//! timeout-race-then-kill pattern from `dropbox-dTOOL`'s `exec.rs` — the
//! teacher has no timeout-bounded subprocess wait to draw on.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use crate::error::SynthError;

/// External decoder-player binary. Any `ffplay`-compatible tool that reads
/// an encoded stream on stdin (or a path argument) and plays it on the
/// default output device works.
pub(crate) const DEFAULT_DECODER_BIN: &str = "ffplay";

#[derive(Debug, Clone)]
pub enum PlaybackError {
    Dependency(String),
    Failed { exit_code: Option<i32> },
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::Dependency(bin) => write!(f, "decoder '{bin}' not found on PATH"),
            PlaybackError::Failed { exit_code } => write!(f, "decoder exited with {exit_code:?}"),
        }
    }
}

impl std::error::Error for PlaybackError {}

fn decoder_args_for_stdin(format_ext: &str) -> Vec<String> {
    vec![
        "-nodisp".into(),
        "-autoexit".into(),
        "-loglevel".into(),
        "quiet".into(),
        "-f".into(),
        format_ext.into(),
        "-".into(),
    ]
}

fn decoder_args_for_path(path: &Path) -> Vec<String> {
    vec!["-nodisp".into(), "-autoexit".into(), "-loglevel".into(), "quiet".into(), path.display().to_string()]
}

/// Owned handle returned by `open_stream`. Exclusively owned by the caller
/// (spec §4.1): dropping it without calling `close` abandons the decoder,
/// which will see EOF on stdin and exit on its own.
pub struct StreamWriter {
    stdin: ChildStdin,
    child: Mutex<Child>,
    idle_timeout: Duration,
}

impl StreamWriter {
    pub async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), SynthError> {
        self.stdin.write_all(bytes).await.map_err(|e| SynthError::Internal { message: format!("decoder stdin write failed: {e}") })
    }

    /// Closing the writer signals end-of-stream to the decoder, then waits
    /// up to the decoder-idle timeout (spec §5: "Decoder idle (no input
    /// received): 5 s after writer close") before killing a decoder that
    /// never exits, the same timeout-race-then-kill shape `play_file` uses.
    pub async fn close(mut self) -> Result<(), SynthError> {
        self.stdin.shutdown().await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
        let mut child = self.child.lock().await;
        let status = match tokio::time::timeout(self.idle_timeout, child.wait()).await {
            Ok(result) => result.map_err(|e| SynthError::Internal { message: e.to_string() })?,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(SynthError::Internal {
                    message: format!("decoder stayed idle past {}s after stream close and was killed", self.idle_timeout.as_secs()),
                });
            }
        };
        if !status.success() {
            tracing::warn!(code = ?status.code(), "decoder exited non-zero after stream close");
        }
        Ok(())
    }
}

pub struct PlaybackManager {
    decoder_bin: String,
    decoder_idle_s: u64,
}

impl Default for PlaybackManager {
    fn default() -> Self {
        Self { decoder_bin: DEFAULT_DECODER_BIN.to_string(), decoder_idle_s: crate::config::TimeoutConfig::default().decoder_idle_s }
    }
}

impl PlaybackManager {
    pub fn new(decoder_bin: impl Into<String>) -> Self {
        Self { decoder_bin: decoder_bin.into(), ..Self::default() }
    }

    /// Construct with an explicit decoder-idle timeout (spec §5), used by
    /// callers that have a `TimeoutConfig` in hand instead of the default.
    pub fn with_idle_timeout(decoder_bin: impl Into<String>, decoder_idle_s: u64) -> Self {
        Self { decoder_bin: decoder_bin.into(), decoder_idle_s }
    }

    fn check_present(&self) -> Result<(), SynthError> {
        which::which(&self.decoder_bin).map(|_| ()).map_err(|_| SynthError::dependency(&self.decoder_bin, "decoder binary not found on PATH"))
    }

    /// Fork a decoder reading `format_ext` from stdin, routing decoded PCM
    /// to the default device (spec §4.1 `open_stream`).
    pub async fn open_stream(&self, format_ext: &str) -> Result<StreamWriter, SynthError> {
        self.check_present()?;
        let mut child = Command::new(&self.decoder_bin)
            .args(decoder_args_for_stdin(format_ext))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthError::dependency(&self.decoder_bin, e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| SynthError::Internal { message: "decoder stdin not piped".into() })?;
        Ok(StreamWriter { stdin, child: Mutex::new(child), idle_timeout: Duration::from_secs(self.decoder_idle_s) })
    }

    /// Fork a decoder consuming `path`, wait up to `timeout_s` (or
    /// indefinitely if unset), then optionally delete the file (spec §4.1
    /// `play_file`). Never blocks the caller for more than `timeout_s`.
    pub async fn play_file(&self, path: &Path, cleanup: bool, timeout_s: Option<u64>) -> Result<(), SynthError> {
        self.check_present()?;
        let mut child = Command::new(&self.decoder_bin)
            .args(decoder_args_for_path(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthError::dependency(&self.decoder_bin, e.to_string()))?;

        let status = match timeout_s {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(result) => result.map_err(|e| SynthError::Internal { message: e.to_string() })?,
                Err(_) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(SynthError::Internal { message: format!("decoder exceeded {secs}s timeout and was killed") });
                }
            },
            None => child.wait().await.map_err(|e| SynthError::Internal { message: e.to_string() })?,
        };

        if !status.success() {
            tracing::warn!(path = %path.display(), code = ?status.code(), "decoder exited non-zero; swallowed per playback error semantics");
        }

        if cleanup {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to clean up playback file");
            }
        }
        Ok(())
    }

    /// Same as `play_file` but returns immediately and reaps in a
    /// background task (spec §4.1 `play_and_forget`).
    pub fn play_and_forget(&self, path: PathBuf, cleanup: bool, timeout_s: Option<u64>) {
        let decoder_bin = self.decoder_bin.clone();
        tokio::spawn(async move {
            let manager = PlaybackManager::new(decoder_bin);
            if let Err(e) = manager.play_file(&path, cleanup, timeout_s).await {
                tracing::warn!(path = %path.display(), error = %e, "background playback failed");
            }
        });
    }
}

/// Legacy convenience entry point kept as a thin forwarder onto a
/// default-constructed manager (spec §4.1: "the legacy free function must
/// be reimplemented as a thin forwarder" — an explicit Open Question in the
/// source material, resolved here rather than dropped, since callers may
/// still reach for the free function instead of owning a `PlaybackManager`).
pub async fn play_file(path: &Path, cleanup: bool, timeout_s: Option<u64>) -> Result<(), SynthError> {
    PlaybackManager::default().play_file(path, cleanup, timeout_s).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_args_select_requested_format() {
        let args = decoder_args_for_stdin("mp3");
        assert!(args.contains(&"mp3".to_string()));
        assert!(args.contains(&"-".to_string()));
    }

    #[test]
    fn path_args_carry_the_file() {
        let args = decoder_args_for_path(Path::new("/tmp/out.wav"));
        assert!(args.iter().any(|a| a == "/tmp/out.wav"));
    }

    #[tokio::test]
    async fn missing_decoder_is_a_dependency_error() {
        let manager = PlaybackManager::new("definitely-not-a-real-binary-xyz");
        let err = manager.open_stream("mp3").await.unwrap_err();
        assert!(matches!(err, SynthError::Dependency { .. }));
    }

    #[tokio::test]
    async fn close_kills_a_decoder_that_stays_idle_past_the_timeout() {
        // A decoder that ignores stdin entirely and keeps running well past
        // the close() timeout, standing in for a hung `ffplay` (spec §5
        // decoder-idle timeout).
        let mut child = Command::new("sh")
            .args(["-c", "sleep 5"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let writer = StreamWriter { stdin, child: Mutex::new(child), idle_timeout: Duration::from_millis(100) };

        let started = std::time::Instant::now();
        let err = writer.close().await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2), "close() should not wait for the full 5s sleep");
        assert!(matches!(err, SynthError::Internal { .. }));
    }

    #[tokio::test]
    async fn close_succeeds_when_decoder_exits_promptly() {
        let mut child =
            Command::new("sh").args(["-c", "cat > /dev/null"]).stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::null()).spawn().unwrap();
        let stdin = child.stdin.take().unwrap();
        let writer = StreamWriter { stdin, child: Mutex::new(child), idle_timeout: Duration::from_secs(5) };
        writer.close().await.unwrap();
    }
}
