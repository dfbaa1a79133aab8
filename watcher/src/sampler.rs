use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use streamwatch_common::frame::{FrameError, FrameSample};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::resolver::MediaEndpoint;

/// Keep at most this much of ffmpeg's stderr for error reports.
const STDERR_LIMIT: usize = 4096;

/// A source of frames in strict source order.
#[async_trait]
pub trait FrameReader: Send {
    /// Pull exactly one frame. `SampleError::EndOfStream` once the source is exhausted.
    async fn read(&mut self) -> Result<FrameSample, SampleError>;
}

/// Splits a packed RGB24 byte stream into frames of a fixed size.
pub struct RawFrameReader<R> {
    reader: R,
    width: u32,
    height: u32,
    next_index: u64,
}

impl<R> RawFrameReader<R> {
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        Self {
            reader,
            width,
            height,
            next_index: 0,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn frames_read(&self) -> u64 {
        self.next_index
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameReader for RawFrameReader<R> {
    async fn read(&mut self) -> Result<FrameSample, SampleError> {
        let mut buf = vec![0u8; self.frame_len()];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => {}
            // A partial trailing frame counts as exhaustion too.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(SampleError::EndOfStream {
                    frames_read: self.next_index,
                });
            }
            Err(e) => return Err(SampleError::Read(e.to_string())),
        }
        let frame = FrameSample::from_rgb24(self.width, self.height, buf, self.next_index)?;
        self.next_index += 1;
        Ok(frame)
    }
}

/// Opens decode sessions by piping the endpoint through ffmpeg.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    ffmpeg: String,
}

impl FrameSampler {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Spawn ffmpeg decoding `endpoint` to raw RGB24 on stdout and wait for the
    /// first frame. A source that yields nothing is an open failure, not an
    /// empty session. No retries.
    pub async fn open(&self, endpoint: &MediaEndpoint) -> Result<Session, SampleError> {
        let scale = format!("scale={}:{}", endpoint.width, endpoint.height);
        let mut child = Command::new(&self.ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel", "error",
                "-nostdin",
                "-i", &endpoint.url,
                "-an",
                "-vf", &scale,
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SampleError::Open(format!("failed to spawn {}: {e}", self.ffmpeg)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SampleError::Open("could not get stdout handle".into()))?;
        let stderr_task = match child.stderr.take() {
            Some(mut stderr) => tokio::spawn(async move {
                let mut collected = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if collected.len() < STDERR_LIMIT {
                                collected.extend_from_slice(&chunk[..n]);
                            }
                        }
                    }
                }
                String::from_utf8_lossy(&collected).trim().to_string()
            }),
            None => tokio::spawn(async { String::new() }),
        };

        let mut frames = RawFrameReader::new(stdout, endpoint.width, endpoint.height);
        match frames.read().await {
            Ok(first) => {
                info!(
                    width = endpoint.width,
                    height = endpoint.height,
                    fps = endpoint.fps,
                    "decode session open"
                );
                Ok(Session {
                    child,
                    frames,
                    pending: Some(first),
                    stderr_task,
                })
            }
            Err(SampleError::EndOfStream { .. }) => {
                let _ = child.kill().await;
                let stderr = stderr_task.await.unwrap_or_default();
                warn!(stderr = %stderr, "ffmpeg produced no frames");
                Err(SampleError::Open(if stderr.is_empty() {
                    "source produced no frames".into()
                } else {
                    stderr
                }))
            }
            Err(e) => {
                let _ = child.kill().await;
                stderr_task.abort();
                Err(e)
            }
        }
    }
}

/// A live decode session. The ffmpeg child is killed when the session is
/// closed or dropped.
pub struct Session {
    child: Child,
    frames: RawFrameReader<ChildStdout>,
    pending: Option<FrameSample>,
    stderr_task: JoinHandle<String>,
}

impl Session {
    pub fn frames_read(&self) -> u64 {
        self.frames.frames_read()
    }

    /// Kill and reap the decoder.
    pub async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "ffmpeg already gone at session close");
        }
        self.stderr_task.abort();
        debug!(frames = self.frames.frames_read(), "decode session closed");
    }
}

#[async_trait]
impl FrameReader for Session {
    async fn read(&mut self) -> Result<FrameSample, SampleError> {
        if let Some(first) = self.pending.take() {
            return Ok(first);
        }
        self.frames.read().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("failed to open decode session: {0}")]
    Open(String),
    #[error("source exhausted after {frames_read} frames")]
    EndOfStream { frames_read: u64 },
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}
