use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use streamwatch_common::frame::FrameSample;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, error, info, warn};

use super::ClipSink;

static CLIP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An ffmpeg process turning raw RGB24 frames on stdin into a clip file.
pub struct ClipEncoder {
    child: Child,
    stdin: ChildStdin,
    output_path: PathBuf,
    width: u32,
    height: u32,
    frame_count: u64,
}

pub struct FinishedClip {
    pub bytes: Vec<u8>,
    pub frame_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("frame is {got:?}, encoder expects {expected:?}")]
    FrameSize { expected: (u32, u32), got: (u32, u32) },
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("failed to read ffmpeg output file: {0}")]
    ReadOutput(String),
}

impl ClipEncoder {
    /// Spawn ffmpeg encoding `width` x `height` frames at `fps` with `codec`
    /// into a temp file with extension `container`.
    pub async fn start(
        ffmpeg: &str,
        width: u32,
        height: u32,
        fps: f64,
        codec: &str,
        container: &str,
    ) -> Result<Self, EncoderError> {
        let seq = CLIP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let output_path = std::env::temp_dir().join(format!(
            "streamwatch_clip_{}_{seq}.{container}",
            std::process::id()
        ));

        let size = format!("{width}x{height}");
        let fps_str = fps.to_string();

        let mut child = Command::new(ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel", "error",
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "-s", &size,
                "-r", &fps_str,
                "-i", "pipe:0",
                "-c:v", codec,
                "-pix_fmt", "yuv420p",
                "-y",
            ])
            .arg(&output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EncoderError::Spawn(format!("{ffmpeg}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stdin handle".into()))?;

        debug!(
            codec,
            fps,
            size,
            output = output_path.display().to_string(),
            "clip encoder started"
        );

        Ok(Self {
            child,
            stdin,
            output_path,
            width,
            height,
            frame_count: 0,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Close stdin, wait for ffmpeg and read the clip back. The temp file is
    /// removed on every path.
    pub async fn finish(self) -> Result<FinishedClip, EncoderError> {
        drop(self.stdin);

        let output = self
            .child
            .wait_with_output()
            .await
            .map_err(|e| EncoderError::Wait(e.to_string()));
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                remove_temp(&self.output_path).await;
                return Err(e);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "ffmpeg exited with error");
            remove_temp(&self.output_path).await;
            return Err(EncoderError::FfmpegFailed(stderr.into_owned()));
        }

        let bytes = tokio::fs::read(&self.output_path)
            .await
            .map_err(|e| EncoderError::ReadOutput(e.to_string()));
        remove_temp(&self.output_path).await;
        let bytes = bytes?;

        info!(
            frame_count = self.frame_count,
            bytes = bytes.len(),
            "clip encoding complete"
        );

        Ok(FinishedClip {
            bytes,
            frame_count: self.frame_count,
        })
    }

    /// Kill ffmpeg and discard whatever it wrote.
    pub async fn abort(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "encoder already gone at abort");
        }
        remove_temp(&self.output_path).await;
        debug!(frame_count = self.frame_count, "clip encoder aborted");
    }
}

#[async_trait]
impl ClipSink for ClipEncoder {
    async fn push(&mut self, frame: &FrameSample) -> Result<(), EncoderError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(EncoderError::FrameSize {
                expected: (self.width, self.height),
                got: frame.dimensions(),
            });
        }
        self.stdin
            .write_all(frame.image.as_raw())
            .await
            .map_err(|e| EncoderError::Write(e.to_string()))?;
        self.frame_count += 1;
        Ok(())
    }
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = path.display().to_string(), error = %e, "failed to delete temp clip file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_ffmpeg_fails_to_start() {
        let result = ClipEncoder::start("/nonexistent/ffmpeg-binary", 4, 4, 25.0, "mpeg4", "mp4").await;
        assert!(matches!(result, Err(EncoderError::Spawn(_))));
    }
}
