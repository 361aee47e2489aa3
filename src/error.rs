//! Failure taxonomy for the frame pipeline.
//!
//! Every component reports through `PipelineError` so the orchestrator can run the
//! ordered shutdown and surface one typed error to the caller. None of these are
//! retried: a live frame has no second chance once its time slot has passed.

use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Camera could not be opened or configured. Fatal at startup.
    #[error("capture device {device} unavailable")]
    DeviceUnavailable {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    /// The device failed while the run was in progress.
    #[error("capture from {device} failed")]
    CaptureFailed {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    /// Encoder subprocess could not be spawned. Fatal at startup.
    #[error("failed to launch encoder `{program}`")]
    EncoderLaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A non-process sink (file) could not be opened.
    #[error("failed to open sink target {target}")]
    SinkOpenFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Write to the encoder input failed because the process is gone.
    #[error("encoder input pipe closed: {reason}")]
    EncoderPipeClosed { reason: String },

    /// Encoder did not exit cleanly after its input was closed.
    #[error("encoder exited abnormally ({status})")]
    EncoderExit { status: ExitStatus },

    /// Waiting on the encoder process failed.
    #[error("failed to reap encoder process")]
    EncoderWait(#[source] std::io::Error),

    /// Frames were pushed before `start()` succeeded.
    #[error("sink {sink} has not been started")]
    SinkNotStarted { sink: &'static str },

    #[error("detector failed on frame #{frame}")]
    DetectionFailure {
        frame: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("annotation failed on frame #{frame}")]
    AnnotationFailure {
        frame: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A frame violated the configured geometry.
    #[error("invalid frame: expected {expected} bytes ({width}x{height} BGR), got {actual}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Short stable code for logs and exit reporting.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::DeviceUnavailable { .. } => "device_unavailable",
            PipelineError::CaptureFailed { .. } => "capture_failed",
            PipelineError::EncoderLaunchFailed { .. } => "encoder_launch_failed",
            PipelineError::SinkOpenFailed { .. } => "sink_open_failed",
            PipelineError::EncoderPipeClosed { .. } => "encoder_pipe_closed",
            PipelineError::EncoderExit { .. } => "encoder_exit",
            PipelineError::EncoderWait(_) => "encoder_wait",
            PipelineError::SinkNotStarted { .. } => "sink_not_started",
            PipelineError::DetectionFailure { .. } => "detection_failure",
            PipelineError::AnnotationFailure { .. } => "annotation_failure",
            PipelineError::InvalidFrame { .. } => "invalid_frame",
            PipelineError::Config(_) => "config",
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
