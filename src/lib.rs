//! Live detection broadcaster
//!
//! Pulls frames from a camera, runs object detection, draws the results and the
//! model's throughput onto each frame, and pipes the annotated frames into a
//! long-running ffmpeg process that publishes an RTMP stream.
//!
//! # Module Structure
//!
//! - `frame`: packed-BGR frame buffers and the configured geometry
//! - `ingest`: frame sources (V4L2 camera, synthetic `stub://`, decoupled capture)
//! - `detect`: detector trait, stub and tract/ONNX YOLOv8 backends
//! - `annotate`: overlay construction and the raster renderer
//! - `sink`: encoder subprocess lifecycle and the sink implementations
//! - `pipeline`: the orchestrator loop and its ordered start-up/shutdown
//! - `config`, `cancel`, `preview`, `ui`: run configuration and operator plumbing

pub mod annotate;
pub mod cancel;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod preview;
pub mod sink;
pub mod ui;

pub use annotate::{Annotator, FpsEstimate, RasterRenderer, Renderer};
pub use cancel::CancellationToken;
pub use config::PipelineConfig;
pub use detect::{Detection, DetectionOutput, Detector, StageTiming, StubDetector};
pub use error::{PipelineError, PipelineResult};
pub use frame::{Frame, FrameGeometry};
pub use ingest::{FrameSource, ReadOutcome, SourceStats};
pub use pipeline::{build_pipeline, Pipeline, Preview, PreviewAction, RunSummary, StopReason};
pub use sink::{SinkKind, SinkState, StreamSink};
