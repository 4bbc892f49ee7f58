//! Format Transcoder (C2, spec §4.2).
//!
//! Same grounding as `playback.rs`: the teacher has no subprocess
//! transcoding (cloud providers return the format they were asked for, or
//! the frontend re-encodes via the browser); the spawn/timeout/atomic-write
//! shape is carried over from that module and from `dropbox-dTOOL`'s
//! `exec.rs` timeout race.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::SynthError;
use crate::types::AudioFormat;

const DEFAULT_TRANSCODER_BIN: &str = "ffmpeg";

/// `transcode(input_path, output_path, target_format)` (spec §4.2).
/// Detects transcoder absence and fails with a `Dependency` error before
/// any I/O; writes to a temp file and atomically renames on success so a
/// failed run never leaves a partial file at `output_path`.
pub async fn transcode(
    input_path: &Path,
    output_path: &Path,
    target_format: AudioFormat,
    timeout_s: u64,
) -> Result<(), SynthError> {
    transcode_with_binary(DEFAULT_TRANSCODER_BIN, input_path, output_path, target_format, timeout_s).await
}

async fn transcode_with_binary(
    bin: &str,
    input_path: &Path,
    output_path: &Path,
    target_format: AudioFormat,
    timeout_s: u64,
) -> Result<(), SynthError> {
    which::which(bin).map_err(|_| SynthError::dependency(bin, "transcoder binary not found on PATH"))?;

    let tmp = output_path.with_extension(format!("{}.tmp", target_format.extension()));
    let mut child = Command::new(bin)
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(input_path)
        .arg("-f")
        .arg(target_format.extension())
        .arg(&tmp)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SynthError::dependency(bin, e.to_string()))?;

    let result = tokio::time::timeout(Duration::from_secs(timeout_s), child.wait_with_output()).await;
    let output = match result {
        Ok(r) => r.map_err(|e| SynthError::Internal { message: e.to_string() })?,
        Err(_) => {
            return Err(SynthError::Internal { message: format!("transcode exceeded {timeout_s}s timeout") });
        }
    };

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SynthError::Provider {
            provider: bin.to_string(),
            status: output.status.code().map(|c| c as u16),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    tokio::fs::rename(&tmp, output_path).await.map_err(|e| SynthError::Internal { message: e.to_string() })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_transcoder_fails_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp3");
        let output = dir.path().join("out.wav");
        tokio::fs::write(&input, b"not real audio").await.unwrap();

        let err = transcode_with_binary("definitely-not-a-real-binary-xyz", &input, &output, AudioFormat::Wav, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, SynthError::Dependency { .. }));
        assert!(!output.exists());
    }
}
