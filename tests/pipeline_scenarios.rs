use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use detect_broadcast::ingest::{CameraConfig, CameraSource, SyntheticSource};
use detect_broadcast::sink::{EncoderSettings, FfmpegSink, MemorySink};
use detect_broadcast::{
    Annotator, CancellationToken, FrameGeometry, FrameSource, Pipeline, PipelineError,
    PipelineResult, RasterRenderer, ReadOutcome, SourceStats, StopReason, StubDetector,
};

#[derive(Clone, Default)]
struct Counters {
    opens: Arc<AtomicU64>,
    reads: Arc<AtomicU64>,
    closes: Arc<AtomicU64>,
}

impl Counters {
    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

/// Wraps a source and counts lifecycle calls.
struct CountingSource<S> {
    inner: S,
    counters: Counters,
}

impl<S: FrameSource> FrameSource for CountingSource<S> {
    fn device(&self) -> &str {
        self.inner.device()
    }

    fn open(&mut self, geometry: FrameGeometry) -> PipelineResult<()> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(geometry)
    }

    fn read_frame(&mut self) -> PipelineResult<ReadOutcome> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_frame()
    }

    fn close(&mut self) -> PipelineResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

fn counting<S: FrameSource>(inner: S) -> (CountingSource<S>, Counters) {
    let counters = Counters::default();
    (
        CountingSource {
            inner,
            counters: counters.clone(),
        },
        counters,
    )
}

#[test]
fn ten_stub_frames_reach_the_sink_in_order() -> PipelineResult<()> {
    let geometry = FrameGeometry::new(640, 480)?;
    let (source, counters) = counting(SyntheticSource::finite("e2e", 10));
    let sink = MemorySink::new();
    let recorder = sink.recorder();

    let summary = Pipeline::new(
        geometry,
        source,
        StubDetector::new(),
        Annotator::new(RasterRenderer::new()),
        sink,
    )
    .run(&CancellationToken::new())?;

    let recording = recorder.snapshot();
    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(summary.frames_pushed, 10);
    assert_eq!(recording.sequences, (1..=10).collect::<Vec<u64>>());
    assert_eq!(recording.lengths, vec![921_600; 10]);
    assert_eq!(recording.start_calls, 1);
    assert_eq!(recording.stop_calls, 1);
    assert_eq!(Counters::get(&counters.opens), 1);
    assert_eq!(Counters::get(&counters.closes), 1);
    Ok(())
}

#[test]
fn pipe_closure_on_fifth_push_stops_everything_once() -> PipelineResult<()> {
    let geometry = FrameGeometry::new(64, 48)?;
    let (source, counters) = counting(SyntheticSource::from_device("stub://endless")?);
    let sink = MemorySink::new().failing_at(5);
    let recorder = sink.recorder();

    let result = Pipeline::new(
        geometry,
        source,
        StubDetector::new(),
        Annotator::new(RasterRenderer::new()),
        sink,
    )
    .run(&CancellationToken::new());

    assert!(matches!(result, Err(PipelineError::EncoderPipeClosed { .. })));
    let recording = recorder.snapshot();
    assert_eq!(recording.sequences, vec![1, 2, 3, 4]);
    assert_eq!(recording.push_attempts, 5);
    assert_eq!(recording.stop_calls, 1);
    assert_eq!(Counters::get(&counters.reads), 5);
    assert_eq!(Counters::get(&counters.closes), 1);
    Ok(())
}

#[test]
fn encoder_launch_failure_closes_the_source() -> PipelineResult<()> {
    let geometry = FrameGeometry::new(64, 48)?;
    let (source, counters) = counting(SyntheticSource::finite("launch", 3));
    let settings = EncoderSettings {
        program: "/nonexistent/ffmpeg".to_string(),
        ..EncoderSettings::default()
    };
    let sink = FfmpegSink::new(geometry, "rtmp://localhost/live", "key", &settings);

    let result = Pipeline::new(
        geometry,
        source,
        StubDetector::new(),
        Annotator::new(RasterRenderer::new()),
        sink,
    )
    .run(&CancellationToken::new());

    assert!(matches!(result, Err(PipelineError::EncoderLaunchFailed { .. })));
    assert_eq!(Counters::get(&counters.opens), 1);
    assert_eq!(Counters::get(&counters.reads), 0);
    assert_eq!(Counters::get(&counters.closes), 1);
    Ok(())
}

#[cfg(not(feature = "ingest-v4l2"))]
#[test]
fn missing_camera_backend_is_device_unavailable() -> PipelineResult<()> {
    let geometry = FrameGeometry::new(64, 48)?;
    let camera = CameraSource::new(CameraConfig {
        device: "/dev/video99".to_string(),
        target_fps: 30,
    })?;
    let sink = MemorySink::new();
    let recorder = sink.recorder();

    let result = Pipeline::new(
        geometry,
        camera,
        StubDetector::new(),
        Annotator::new(RasterRenderer::new()),
        sink,
    )
    .run(&CancellationToken::new());

    assert!(matches!(result, Err(PipelineError::DeviceUnavailable { .. })));
    assert_eq!(recorder.snapshot().start_calls, 0);
    Ok(())
}

#[test]
fn cancellation_from_another_thread_ends_the_run() -> PipelineResult<()> {
    let geometry = FrameGeometry::new(32, 32)?;
    let cancel = CancellationToken::new();
    let sink = MemorySink::new();
    let recorder = sink.recorder();

    let trigger = cancel.clone();
    let watcher = recorder.clone();
    let canceller = std::thread::spawn(move || {
        while watcher.snapshot().sequences.len() < 3 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        trigger.cancel();
    });

    let summary = Pipeline::new(
        geometry,
        SyntheticSource::from_device("stub://endless")?,
        StubDetector::new(),
        Annotator::new(RasterRenderer::new()),
        sink,
    )
    .run(&cancel)?;
    canceller.join().expect("canceller thread");

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert!(summary.frames_pushed >= 3);
    let recording = recorder.snapshot();
    let expected: Vec<u64> = (1..=summary.frames_pushed).collect();
    assert_eq!(recording.sequences, expected);
    assert_eq!(recording.stop_calls, 1);
    Ok(())
}
