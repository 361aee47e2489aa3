//! Frame sinks: where annotated frames go.
//!
//! The broadcast sink owns an ffmpeg subprocess; the raw-file and memory sinks
//! share the same contract for offline inspection and tests.

pub mod encoder;
pub mod ffmpeg;
pub mod file;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

pub use encoder::{EncoderProcess, ExitHook};
pub use ffmpeg::{encoder_args, join_endpoint, EncoderSettings, FfmpegSink};
pub use file::RawFileSink;
pub use memory::{MemoryRecorder, MemorySink, Recording};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Lifecycle of a sink. Input is never accepted outside `Running`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SinkState {
    #[default]
    Unstarted,
    Running,
    Closing,
    Terminated,
}

/// Destination for annotated frames.
///
/// The pipeline calls `start` once, `push_frame` for each frame in capture order,
/// and `stop` exactly once at the end. `stop` must tolerate being called after a
/// failed push or a second time.
pub trait StreamSink: Send {
    fn name(&self) -> &'static str;

    fn state(&self) -> SinkState;

    fn start(&mut self) -> PipelineResult<()>;

    /// Hand one frame over. May block; that is the only backpressure.
    fn push_frame(&mut self, frame: &Frame) -> PipelineResult<()>;

    fn stop(&mut self) -> PipelineResult<()>;
}

impl<S: StreamSink + ?Sized> StreamSink for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn state(&self) -> SinkState {
        (**self).state()
    }

    fn start(&mut self) -> PipelineResult<()> {
        (**self).start()
    }

    fn push_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
        (**self).push_frame(frame)
    }

    fn stop(&mut self) -> PipelineResult<()> {
        (**self).stop()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    /// ffmpeg publishing FLV over RTMP.
    #[default]
    Rtmp,
    RawFile,
    /// Count frames and discard them; a dry run.
    Memory,
}

impl FromStr for SinkKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rtmp" | "ffmpeg" => Ok(Self::Rtmp),
            "raw-file" | "raw_file" | "file" => Ok(Self::RawFile),
            "memory" | "null" => Ok(Self::Memory),
            other => Err(PipelineError::Config(format!(
                "unknown sink kind '{}': expected rtmp, raw-file or memory",
                other
            ))),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rtmp => "rtmp",
            Self::RawFile => "raw-file",
            Self::Memory => "memory",
        })
    }
}

/// Build the sink selected by `config.sink.kind`.
pub fn build_sink(config: &PipelineConfig) -> PipelineResult<Box<dyn StreamSink>> {
    let geometry = config.geometry()?;
    match config.sink.kind {
        SinkKind::Rtmp => Ok(Box::new(FfmpegSink::new(
            geometry,
            &config.stream.base_url,
            &config.stream.stream_key,
            &config.encoder,
        ))),
        SinkKind::RawFile => {
            let output = config.sink.output.as_ref().ok_or_else(|| {
                PipelineError::Config("raw-file sink requires an output path".to_string())
            })?;
            Ok(Box::new(RawFileSink::new(output, geometry)))
        }
        SinkKind::Memory => Ok(Box::new(MemorySink::counting_only())),
    }
}
