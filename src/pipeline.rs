//! Pipeline orchestrator.
//!
//! Pull-compute-push loop: `read_frame -> detect -> annotate -> push_frame`, one
//! frame at a time, in capture order.
//!
//! Lifecycle:
//! - start-up: detector warm-up, `source.open`, then `sink.start` (a failed start
//!   closes the source before returning)
//! - run: until cancellation, end of stream, a preview stop request, or an error
//! - shutdown: `sink.stop()` then `source.close()`, each exactly once
//!
//! Nothing is retried. The first error ends the run; it is returned after shutdown
//! and any shutdown failure on top of it is only logged.

use std::fmt;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::annotate::{fps_from_timing, Annotator, FpsEstimate, RasterRenderer, Renderer};
use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::detect::{load_detector, Detector};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, FrameGeometry};
use crate::ingest::{CameraSource, DecoupledSource, FrameSource, ReadOutcome, SourceStats};
use crate::preview::SnapshotPreview;
use crate::sink::{build_sink, StreamSink};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Preview hook
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewAction {
    Continue,
    /// End the run as if cancelled.
    Stop,
}

/// Debug view of annotated frames. Preview failures are logged, never fatal.
pub trait Preview: Send {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<PreviewAction>;
}

impl<P: Preview + ?Sized> Preview for Box<P> {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<PreviewAction> {
        (**self).show(frame)
    }
}

// ----------------------------------------------------------------------------
// Run summary
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    EndOfStream,
    PreviewRequested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Cancelled => "cancelled",
            StopReason::EndOfStream => "end of stream",
            StopReason::PreviewRequested => "preview requested stop",
        })
    }
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub frames_pushed: u64,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
    /// Wall-clock frames pushed per second over the whole run.
    pub achieved_fps: f64,
    /// Model-centric estimate from the last frame's stage timings.
    pub last_model_fps: FpsEstimate,
    pub source: SourceStats,
}

#[derive(Default)]
struct Progress {
    frames_pushed: u64,
    last_model_fps: Option<FpsEstimate>,
}

fn achieved_fps(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        frames as f64 / secs
    } else {
        0.0
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

pub struct Pipeline<S, D, R, K>
where
    S: FrameSource,
    D: Detector,
    R: Renderer,
    K: StreamSink,
{
    geometry: FrameGeometry,
    source: S,
    detector: D,
    annotator: Annotator<R>,
    sink: K,
    preview: Option<Box<dyn Preview>>,
}

/// Pipeline assembled from configuration.
pub type BroadcastPipeline = Pipeline<Box<dyn FrameSource>, Box<dyn Detector>, RasterRenderer, Box<dyn StreamSink>>;

impl<S, D, R, K> Pipeline<S, D, R, K>
where
    S: FrameSource,
    D: Detector,
    R: Renderer,
    K: StreamSink,
{
    pub fn new(geometry: FrameGeometry, source: S, detector: D, annotator: Annotator<R>, sink: K) -> Self {
        Self {
            geometry,
            source,
            detector,
            annotator,
            sink,
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: Box<dyn Preview>) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Run to completion. Consumes the pipeline: source and sink are single-use.
    pub fn run(mut self, cancel: &CancellationToken) -> PipelineResult<RunSummary> {
        let started = Instant::now();

        self.detector
            .warm_up()
            .map_err(|source| PipelineError::DetectionFailure { frame: 0, source })?;

        if let Err(err) = self.source.open(self.geometry) {
            if let Err(close_err) = self.source.close() {
                warn!("Pipeline: closing {} after failed open: {}", self.source.device(), close_err);
            }
            return Err(err);
        }
        info!("Pipeline: source {} open at {}", self.source.device(), self.geometry);

        if let Err(err) = self.sink.start() {
            if let Err(close_err) = self.source.close() {
                error!("Pipeline: source close after failed sink start: {}", close_err);
            }
            return Err(err);
        }
        info!(
            "Pipeline: {} sink running, detector {}",
            self.sink.name(),
            self.detector.name()
        );

        let mut progress = Progress::default();
        let outcome = self.run_loop(cancel, &mut progress, started);

        // Ordered shutdown; both run regardless of the loop outcome.
        let stop_result = self.sink.stop();
        let close_result = self.source.close();

        let reason = match outcome {
            Ok(reason) => reason,
            Err(err) => {
                error!(
                    "Pipeline: stopping after {} frames on error [{}]: {}",
                    progress.frames_pushed,
                    err.code(),
                    err
                );
                if let Err(stop_err) = stop_result {
                    error!("Pipeline: sink stop during error shutdown failed: {}", stop_err);
                }
                if let Err(close_err) = close_result {
                    error!("Pipeline: source close during error shutdown failed: {}", close_err);
                }
                return Err(err);
            }
        };
        if let Err(stop_err) = stop_result {
            if let Err(close_err) = close_result {
                error!("Pipeline: source close failed: {}", close_err);
            }
            return Err(stop_err);
        }
        close_result?;

        let elapsed = started.elapsed();
        let summary = RunSummary {
            frames_pushed: progress.frames_pushed,
            stop_reason: reason,
            elapsed,
            achieved_fps: achieved_fps(progress.frames_pushed, elapsed),
            last_model_fps: progress.last_model_fps.unwrap_or(FpsEstimate::Unknown),
            source: self.source.stats(),
        };
        info!(
            "Pipeline: finished ({}): {} frames in {:.1}s, {:.2} fps",
            summary.stop_reason,
            summary.frames_pushed,
            summary.elapsed.as_secs_f64(),
            summary.achieved_fps
        );
        Ok(summary)
    }

    fn run_loop(&mut self, cancel: &CancellationToken, progress: &mut Progress, started: Instant) -> PipelineResult<StopReason> {
        let mut last_health_log = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }

            let frame = match self.source.read_frame()? {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::EndOfStream => return Ok(StopReason::EndOfStream),
            };
            self.geometry.check(&frame)?;

            let output = self
                .detector
                .detect(&frame)
                .map_err(|source| PipelineError::DetectionFailure {
                    frame: frame.sequence(),
                    source,
                })?;
            let annotated = self
                .annotator
                .annotate(&frame, &output.detections, &output.timing)?;
            drop(frame);

            self.sink.push_frame(&annotated)?;
            progress.frames_pushed += 1;
            progress.last_model_fps = Some(fps_from_timing(&output.timing));

            if let Some(preview) = self.preview.as_mut() {
                match preview.show(&annotated) {
                    Ok(PreviewAction::Continue) => {}
                    Ok(PreviewAction::Stop) => return Ok(StopReason::PreviewRequested),
                    Err(err) => warn!("Pipeline: preview failed on frame #{}: {:#}", annotated.sequence(), err),
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.source.stats();
                info!(
                    "Pipeline health: source={} healthy={} captured={} dropped={} pushed={} fps={:.2} model_fps={}",
                    stats.device,
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.frames_dropped,
                    progress.frames_pushed,
                    achieved_fps(progress.frames_pushed, started.elapsed()),
                    progress.last_model_fps.unwrap_or(FpsEstimate::Unknown)
                );
                last_health_log = Instant::now();
            }
        }
    }
}

/// Assemble the source, detector, renderer, sink and preview named by `config`.
pub fn build_pipeline(config: &PipelineConfig) -> PipelineResult<BroadcastPipeline> {
    let geometry = config.geometry()?;

    let camera = CameraSource::new(config.camera())?;
    let source: Box<dyn FrameSource> = if config.capture.decoupled {
        Box::new(DecoupledSource::new(
            Box::new(camera),
            config.capture.queue_depth,
            config.capture.drop_policy,
        ))
    } else {
        Box::new(camera)
    };

    let detector = load_detector(&config.model, config.model_input)?;
    let sink = build_sink(config)?;
    let mut pipeline = Pipeline::new(geometry, source, detector, Annotator::new(RasterRenderer::new()), sink);

    if let Some(dir) = &config.preview.dir {
        let preview = SnapshotPreview::new(dir, config.preview.interval)
            .map_err(|err| PipelineError::Config(format!("preview directory {}: {:#}", dir.display(), err)))?;
        pipeline = pipeline.with_preview(Box::new(preview));
    }
    Ok(pipeline)
}
