pub mod encoder;

use async_trait::async_trait;
use streamwatch_common::config::MotionConfig;
use streamwatch_common::frame::FrameSample;
use tracing::{info, warn};

use self::encoder::{ClipEncoder, EncoderError};
use crate::motion::{MotionError, MotionEvent, MotionSegmenter};
use crate::resolver::MediaEndpoint;
use crate::sampler::{FrameReader, FrameSampler, SampleError};

/// Consumer of recorded frames, in order.
#[async_trait]
pub trait ClipSink: Send {
    async fn push(&mut self, frame: &FrameSample) -> Result<(), EncoderError>;
}

/// A finished recording.
#[derive(Debug)]
pub struct ClipHandle {
    pub bytes: Vec<u8>,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub container: String,
    pub events: Vec<MotionEvent>,
}

/// Frames needed to cover `duration_secs` at `fps`, rounded up.
pub fn frame_budget(duration_secs: f64, fps: f64) -> Result<u64, RecordError> {
    let frames = (duration_secs * fps).ceil();
    // Also rejects NaN.
    if !(frames >= 1.0) {
        return Err(RecordError::EmptyBudget);
    }
    Ok(frames as u64)
}

/// Pull exactly `budget` frames from `reader` into `sink`, segmenting each one
/// first when a segmenter is given. Returns the collected motion events.
pub async fn record_into<R, S>(
    reader: &mut R,
    sink: &mut S,
    budget: u64,
    mut segmenter: Option<&mut MotionSegmenter>,
) -> Result<Vec<MotionEvent>, RecordError>
where
    R: FrameReader + ?Sized,
    S: ClipSink + ?Sized,
{
    let mut events = Vec::new();
    for got in 0..budget {
        let mut frame = match reader.read().await {
            Ok(frame) => frame,
            Err(SampleError::EndOfStream { .. }) => {
                return Err(RecordError::TruncatedCapture {
                    expected: budget,
                    got,
                });
            }
            Err(e) => return Err(RecordError::Sample(e)),
        };
        if let Some(seg) = segmenter.as_deref_mut() {
            events.extend(seg.apply(&mut frame)?.events);
        }
        sink.push(&frame).await?;
    }
    Ok(events)
}

/// Records fixed-length clips from a media endpoint.
#[derive(Debug, Clone)]
pub struct ClipRecorder {
    sampler: FrameSampler,
    ffmpeg: String,
}

impl ClipRecorder {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        let ffmpeg = ffmpeg.into();
        Self {
            sampler: FrameSampler::new(ffmpeg.clone()),
            ffmpeg,
        }
    }

    /// Record `budget` frames. With `motion` set, a fresh segmenter sees every
    /// frame before it is encoded. The decode session is always closed; the
    /// encoder is finished on success and aborted otherwise.
    pub async fn record(
        &self,
        endpoint: &MediaEndpoint,
        budget: u64,
        motion: Option<&MotionConfig>,
    ) -> Result<ClipHandle, RecordError> {
        if budget == 0 {
            return Err(RecordError::EmptyBudget);
        }

        let mut session = self
            .sampler
            .open(endpoint)
            .await
            .map_err(|e| RecordError::Open(e.to_string()))?;

        let mut encoder = match ClipEncoder::start(
            &self.ffmpeg,
            endpoint.width,
            endpoint.height,
            endpoint.fps,
            &endpoint.writer_codec,
            &endpoint.container,
        )
        .await
        {
            Ok(encoder) => encoder,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        let mut segmenter = motion.map(MotionSegmenter::new);
        let result = record_into(&mut session, &mut encoder, budget, segmenter.as_mut()).await;
        session.close().await;

        let events = match result {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, frames = encoder.frame_count(), "recording failed");
                encoder.abort().await;
                return Err(e);
            }
        };

        let finished = encoder.finish().await?;
        info!(
            frames = finished.frame_count,
            events = events.len(),
            bytes = finished.bytes.len(),
            "clip recorded"
        );

        Ok(ClipHandle {
            bytes: finished.bytes,
            frame_count: finished.frame_count,
            width: endpoint.width,
            height: endpoint.height,
            fps: endpoint.fps,
            container: endpoint.container.clone(),
            events,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("{0}")]
    Open(String),
    #[error("duration and frame rate give an empty frame budget")]
    EmptyBudget,
    #[error("source ended after {got} of {expected} frames")]
    TruncatedCapture { expected: u64, got: u64 },
    #[error(transparent)]
    Sample(SampleError),
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::tests::raw_frames;
    use crate::sampler::RawFrameReader;
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::io::Cursor;

    #[derive(Default)]
    struct MemorySink {
        frames: Vec<FrameSample>,
    }

    #[async_trait]
    impl ClipSink for MemorySink {
        async fn push(&mut self, frame: &FrameSample) -> Result<(), EncoderError> {
            self.frames.push(frame.clone());
            Ok(())
        }
    }

    struct QueueReader(VecDeque<FrameSample>);

    #[async_trait]
    impl FrameReader for QueueReader {
        async fn read(&mut self) -> Result<FrameSample, SampleError> {
            self.0
                .pop_front()
                .ok_or(SampleError::EndOfStream { frames_read: 0 })
        }
    }

    fn motion_config() -> MotionConfig {
        MotionConfig {
            history: 20,
            var_threshold: 30.0,
            min_contour_area: 50.0,
            roi: None,
            draw_boxes: false,
            draw_contours: false,
        }
    }

    #[test]
    fn budget_rounds_up() {
        assert_eq!(frame_budget(5.0, 30.0).unwrap(), 150);
        assert_eq!(frame_budget(1.0, 29.97).unwrap(), 30);
        assert_eq!(frame_budget(0.01, 25.0).unwrap(), 1);
    }

    #[test]
    fn empty_budget_is_rejected() {
        assert!(matches!(frame_budget(0.0, 30.0), Err(RecordError::EmptyBudget)));
        assert!(matches!(frame_budget(-1.0, 30.0), Err(RecordError::EmptyBudget)));
        assert!(matches!(frame_budget(f64::NAN, 30.0), Err(RecordError::EmptyBudget)));
    }

    #[tokio::test]
    async fn pulls_exactly_the_budget() {
        let mut reader = RawFrameReader::new(Cursor::new(raw_frames(4, 4, 8)), 4, 4);
        let mut sink = MemorySink::default();
        let events = record_into(&mut reader, &mut sink, 5, None).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(sink.frames.len(), 5);
        let order: Vec<u64> = sink.frames.iter().map(|f| f.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        // The rest of the source is left unread.
        assert_eq!(reader.frames_read(), 5);
    }

    #[tokio::test]
    async fn short_source_is_truncated_capture() {
        let mut reader = RawFrameReader::new(Cursor::new(raw_frames(4, 4, 5)), 4, 4);
        let mut sink = MemorySink::default();
        let result = record_into(&mut reader, &mut sink, 10, None).await;
        assert!(matches!(
            result,
            Err(RecordError::TruncatedCapture { expected: 10, got: 5 })
        ));
        assert_eq!(sink.frames.len(), 5);
    }

    #[tokio::test]
    async fn segmenter_sees_every_frame() {
        let mut frames: VecDeque<FrameSample> = (0..20)
            .map(|i| FrameSample::new(RgbImage::new(48, 32), i))
            .collect();
        let mut moving = RgbImage::new(48, 32);
        for y in 8..20 {
            for x in 10..22 {
                moving.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        frames.push_back(FrameSample::new(moving, 20));

        let mut reader = QueueReader(frames);
        let mut sink = MemorySink::default();
        let mut segmenter = MotionSegmenter::new(&motion_config());
        let events = record_into(&mut reader, &mut sink, 21, Some(&mut segmenter))
            .await
            .unwrap();
        assert_eq!(sink.frames.len(), 21);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame_index, 20);
        assert_eq!(events[0].bbox.x, 10);
        assert_eq!(events[0].bbox.y, 8);
    }

    #[tokio::test]
    async fn zero_budget_records_nothing() {
        let recorder = ClipRecorder::new("/nonexistent/ffmpeg-binary");
        let endpoint = MediaEndpoint {
            url: "https://example.com/live.m3u8".into(),
            fps: 30.0,
            width: 4,
            height: 4,
            container: "mp4".into(),
            source_codec: "avc1".into(),
            writer_codec: "mpeg4".into(),
            format_label: "96 - 4x4".into(),
        };
        assert!(matches!(
            recorder.record(&endpoint, 0, None).await,
            Err(RecordError::EmptyBudget)
        ));
        assert!(matches!(
            recorder.record(&endpoint, 3, None).await,
            Err(RecordError::Open(_))
        ));
    }

    /// A stand-in for ffmpeg: as a decoder it emits `frames` black 4x4 frames,
    /// as an encoder it creates its output file, notes the path in `marker`
    /// and drains stdin.
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &std::path::Path, frames: usize) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let marker = dir.join("output-path");
        let script = format!(
            r#"#!/bin/sh
for arg in "$@"; do
  if [ "$arg" = "pipe:1" ]; then
    head -c {bytes} /dev/zero
    sleep 1
    exit 0
  fi
done
eval "out=\${{$#}}"
: > "$out"
printf '%s' "$out" > "{marker}"
exec cat > /dev/null
"#,
            bytes = frames * 4 * 4 * 3,
            marker = marker.display(),
        );
        let path = dir.join("ffmpeg");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn truncated_recording_removes_the_temp_clip() {
        let dir = std::env::temp_dir().join(format!("streamwatch_recorder_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let ffmpeg = fake_ffmpeg(&dir, 5);

        let endpoint = MediaEndpoint {
            url: "https://example.com/live.m3u8".into(),
            fps: 30.0,
            width: 4,
            height: 4,
            container: "mp4".into(),
            source_codec: "avc1".into(),
            writer_codec: "mpeg4".into(),
            format_label: "96 - 4x4".into(),
        };
        let result = ClipRecorder::new(ffmpeg.display().to_string())
            .record(&endpoint, 10, None)
            .await;
        assert!(matches!(
            result,
            Err(RecordError::TruncatedCapture { expected: 10, got: 5 })
        ));

        let clip_path = std::fs::read_to_string(dir.join("output-path")).unwrap();
        assert!(clip_path.contains("streamwatch_clip_"));
        assert!(!std::path::Path::new(&clip_path).exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
