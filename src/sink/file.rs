use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, FrameGeometry};
use crate::sink::{SinkState, StreamSink};

/// Writes raw packed-BGR frames back to back into a file.
///
/// The output can be played with
/// `ffplay -f rawvideo -pixel_format bgr24 -video_size WxH <file>`.
pub struct RawFileSink {
    path: PathBuf,
    geometry: FrameGeometry,
    writer: Option<BufWriter<File>>,
    state: SinkState,
    frames_written: u64,
}

impl RawFileSink {
    pub fn new<P: AsRef<Path>>(path: P, geometry: FrameGeometry) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            geometry,
            writer: None,
            state: SinkState::Unstarted,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl StreamSink for RawFileSink {
    fn name(&self) -> &'static str {
        "raw-file"
    }

    fn state(&self) -> SinkState {
        self.state
    }

    fn start(&mut self) -> PipelineResult<()> {
        let file = File::create(&self.path).map_err(|source| PipelineError::SinkOpenFailed {
            target: self.path.display().to_string(),
            source,
        })?;
        self.writer = Some(BufWriter::new(file));
        self.state = SinkState::Running;
        info!("RawFileSink: writing {} frames to {}", self.geometry, self.path.display());
        Ok(())
    }

    fn push_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
        self.geometry.check(frame)?;
        let writer = match (self.state, self.writer.as_mut()) {
            (SinkState::Running, Some(writer)) => writer,
            (SinkState::Unstarted, _) => return Err(PipelineError::SinkNotStarted { sink: "raw-file" }),
            _ => {
                return Err(PipelineError::EncoderPipeClosed {
                    reason: "raw file sink closed".to_string(),
                })
            }
        };
        if let Err(err) = writer.write_all(frame.as_bytes()) {
            self.writer = None;
            self.state = SinkState::Terminated;
            return Err(PipelineError::EncoderPipeClosed {
                reason: format!("write to {} failed: {}", self.path.display(), err),
            });
        }
        self.frames_written += 1;
        Ok(())
    }

    fn stop(&mut self) -> PipelineResult<()> {
        self.state = SinkState::Closing;
        let result = match self.writer.take() {
            Some(mut writer) => writer.flush().map_err(|err| PipelineError::EncoderPipeClosed {
                reason: format!("flush of {} failed: {}", self.path.display(), err),
            }),
            None => Ok(()),
        };
        self.state = SinkState::Terminated;
        if result.is_ok() && self.frames_written > 0 {
            info!(
                "RawFileSink: closed {} after {} frames",
                self.path.display(),
                self.frames_written
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_frames_back_to_back() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.bgr");
        let geometry = FrameGeometry::new(4, 2)?;
        let mut sink = RawFileSink::new(&path, geometry);

        sink.start()?;
        sink.push_frame(&Frame::solid(geometry, 1, [1, 2, 3]))?;
        sink.push_frame(&Frame::solid(geometry, 2, [4, 5, 6]))?;
        sink.stop()?;
        sink.stop()?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes.len(), geometry.byte_len() * 2);
        assert_eq!(&bytes[..3], &[1, 2, 3]);
        assert_eq!(&bytes[geometry.byte_len()..geometry.byte_len() + 3], &[4, 5, 6]);
        assert_eq!(sink.state(), SinkState::Terminated);
        Ok(())
    }

    #[test]
    fn open_failure_is_reported() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("missing").join("out.bgr");
        let mut sink = RawFileSink::new(&path, FrameGeometry::new(2, 2)?);
        assert!(matches!(sink.start(), Err(PipelineError::SinkOpenFailed { .. })));
        Ok(())
    }

    #[test]
    fn rejects_wrong_geometry() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut sink = RawFileSink::new(dir.path().join("out.bgr"), FrameGeometry::new(4, 4)?);
        sink.start()?;
        let frame = Frame::solid(FrameGeometry::new(2, 2)?, 1, [0, 0, 0]);
        assert!(matches!(sink.push_frame(&frame), Err(PipelineError::InvalidFrame { .. })));
        Ok(())
    }
}
