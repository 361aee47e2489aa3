//! Capture decoupled from inference through a bounded queue.
//!
//! `DecoupledSource` wraps any `FrameSource`, opens it on the caller's thread (so
//! `DeviceUnavailable` surfaces at startup) and then moves it onto a capture thread
//! that feeds a bounded queue. The consumer side is itself a `FrameSource`, so the
//! orchestrator is unchanged.
//!
//! The queue policy is explicit:
//! - `Block`: capture waits when the queue is full. No frame is ever skipped.
//! - `KeepLatest`: the oldest queued frame is dropped to make room. Order is kept,
//!   completeness is not; drops are counted in `SourceStats::frames_dropped`.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::anyhow;
use serde::Deserialize;

use super::{FrameSource, ReadOutcome, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, FrameGeometry};

pub const DEFAULT_QUEUE_DEPTH: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropPolicy {
    #[default]
    Block,
    KeepLatest,
}

impl FromStr for DropPolicy {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(DropPolicy::Block),
            "keep-latest" | "keep_latest" | "latest" => Ok(DropPolicy::KeepLatest),
            other => Err(PipelineError::Config(format!(
                "unknown drop policy `{other}` (expected block or keep-latest)"
            ))),
        }
    }
}

enum Finish {
    EndOfStream,
    Failed(PipelineError),
}

#[derive(Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    finish: Option<Finish>,
    shutdown: bool,
    captured: u64,
    dropped: u64,
}

struct FrameQueue {
    capacity: usize,
    policy: DropPolicy,
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl FrameQueue {
    fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(QueueState::default()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned queue only means the other side panicked; the data is still valid.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns false once the consumer has shut the queue down.
    fn push(&self, frame: Frame) -> bool {
        let mut state = self.lock();
        state.captured += 1;
        match self.policy {
            DropPolicy::Block => {
                while state.frames.len() >= self.capacity && !state.shutdown {
                    state = self
                        .changed
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
            DropPolicy::KeepLatest => {
                while state.frames.len() >= self.capacity {
                    if let Some(stale) = state.frames.pop_front() {
                        state.dropped += 1;
                        log::debug!(
                            "DecoupledSource: dropped frame #{} (queue full)",
                            stale.sequence()
                        );
                    }
                }
            }
        }
        if state.shutdown {
            return false;
        }
        state.frames.push_back(frame);
        self.changed.notify_all();
        true
    }

    fn finish(&self, finish: Finish) {
        let mut state = self.lock();
        state.finish = Some(finish);
        self.changed.notify_all();
    }

    fn pop(&self) -> PipelineResult<ReadOutcome> {
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                self.changed.notify_all();
                return Ok(ReadOutcome::Frame(frame));
            }
            if state.shutdown {
                return Ok(ReadOutcome::EndOfStream);
            }
            match state.finish.take() {
                Some(Finish::Failed(err)) => {
                    state.finish = Some(Finish::EndOfStream);
                    return Err(err);
                }
                Some(Finish::EndOfStream) => {
                    state.finish = Some(Finish::EndOfStream);
                    return Ok(ReadOutcome::EndOfStream);
                }
                None => {}
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        state.frames.clear();
        self.changed.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }
}

type CaptureWorker = JoinHandle<PipelineResult<SourceStats>>;
type CaptureJob = Box<dyn FnOnce() -> PipelineResult<SourceStats> + Send>;

fn spawn_capture_thread(job: CaptureJob) -> std::io::Result<CaptureWorker> {
    std::thread::Builder::new().name("capture".to_string()).spawn(job)
}

pub struct DecoupledSource {
    device: String,
    inner: Option<Box<dyn FrameSource>>,
    queue: Arc<FrameQueue>,
    worker: Option<CaptureWorker>,
    final_stats: Option<SourceStats>,
}

impl DecoupledSource {
    pub fn new(inner: Box<dyn FrameSource>, capacity: usize, policy: DropPolicy) -> Self {
        Self {
            device: inner.device().to_string(),
            inner: Some(inner),
            queue: Arc::new(FrameQueue::new(capacity, policy)),
            worker: None,
            final_stats: None,
        }
    }

    pub fn policy(&self) -> DropPolicy {
        self.queue.policy
    }

    fn open_with<F>(&mut self, geometry: FrameGeometry, spawn: F) -> PipelineResult<()>
    where
        F: FnOnce(CaptureJob) -> std::io::Result<CaptureWorker>,
    {
        let mut inner = self.inner.take().ok_or_else(|| PipelineError::DeviceUnavailable {
            device: self.device.clone(),
            source: anyhow!("decoupled source already opened"),
        })?;
        if let Err(err) = inner.open(geometry) {
            self.inner = Some(inner);
            return Err(err);
        }

        // The opened source stays reachable here until the thread has started.
        let handoff = Arc::new(Mutex::new(Some(inner)));
        let slot = handoff.clone();
        let queue = self.queue.clone();
        let device = self.device.clone();
        let job: CaptureJob = Box::new(move || {
            let taken = slot.lock().unwrap_or_else(|p| p.into_inner()).take();
            match taken {
                Some(source) => capture_loop(source, queue),
                None => Err(PipelineError::CaptureFailed {
                    device,
                    source: anyhow!("capture source missing at thread start"),
                }),
            }
        });

        match spawn(job) {
            Ok(worker) => self.worker = Some(worker),
            Err(err) => {
                let reclaimed = handoff.lock().unwrap_or_else(|p| p.into_inner()).take();
                if let Some(mut inner) = reclaimed {
                    if let Err(close_err) = inner.close() {
                        log::warn!(
                            "DecoupledSource: close after failed spawn failed: {}",
                            close_err
                        );
                    }
                }
                return Err(PipelineError::DeviceUnavailable {
                    device: self.device.clone(),
                    source: anyhow::Error::new(err).context("spawn capture thread"),
                });
            }
        }
        log::info!(
            "DecoupledSource: capturing {} on a background thread (depth {}, {:?})",
            self.device,
            self.queue.capacity,
            self.queue.policy
        );
        Ok(())
    }
}

fn capture_loop(mut source: Box<dyn FrameSource>, queue: Arc<FrameQueue>) -> PipelineResult<SourceStats> {
    loop {
        if queue.is_shutdown() {
            break;
        }
        match source.read_frame() {
            Ok(ReadOutcome::Frame(frame)) => {
                if !queue.push(frame) {
                    break;
                }
            }
            Ok(ReadOutcome::EndOfStream) => {
                queue.finish(Finish::EndOfStream);
                break;
            }
            Err(err) => {
                log::error!("DecoupledSource: capture failed: {}", err);
                queue.finish(Finish::Failed(err));
                break;
            }
        }
    }
    source.close()?;
    Ok(source.stats())
}

impl FrameSource for DecoupledSource {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(&mut self, geometry: FrameGeometry) -> PipelineResult<()> {
        self.open_with(geometry, spawn_capture_thread)
    }

    fn read_frame(&mut self) -> PipelineResult<ReadOutcome> {
        if self.worker.is_none() {
            return Ok(ReadOutcome::EndOfStream);
        }
        self.queue.pop()
    }

    fn close(&mut self) -> PipelineResult<()> {
        if let Some(mut inner) = self.inner.take() {
            // Never opened: release on this thread.
            return inner.close();
        }
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.queue.shutdown();
        let joined = worker.join().map_err(|_| PipelineError::CaptureFailed {
            device: self.device.clone(),
            source: anyhow!("capture thread panicked"),
        })?;
        let mut stats = joined?;
        stats.frames_dropped += self.queue.lock().dropped;
        log::info!(
            "DecoupledSource: capture thread stopped ({} captured, {} dropped)",
            stats.frames_captured,
            stats.frames_dropped
        );
        self.final_stats = Some(stats);
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        if let Some(stats) = &self.final_stats {
            return stats.clone();
        }
        let state = self.queue.lock();
        SourceStats {
            frames_captured: state.captured,
            frames_dropped: state.dropped,
            device: self.device.clone(),
        }
    }
}

impl Drop for DecoupledSource {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("DecoupledSource: close on drop failed: {}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyntheticSource;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn geometry() -> FrameGeometry {
        FrameGeometry::new(8, 4).unwrap()
    }

    fn drain(source: &mut DecoupledSource) -> PipelineResult<Vec<u64>> {
        let mut sequences = Vec::new();
        while let ReadOutcome::Frame(frame) = source.read_frame()? {
            sequences.push(frame.sequence());
        }
        Ok(sequences)
    }

    #[test]
    fn block_policy_delivers_every_frame_in_order() -> PipelineResult<()> {
        let inner = Box::new(SyntheticSource::finite("cam", 25));
        let mut source = DecoupledSource::new(inner, 2, DropPolicy::Block);
        source.open(geometry())?;
        let sequences = drain(&mut source)?;
        assert_eq!(sequences, (1..=25).collect::<Vec<_>>());
        source.close()?;
        assert_eq!(source.stats().frames_dropped, 0);
        assert_eq!(source.stats().frames_captured, 25);
        Ok(())
    }

    #[test]
    fn keep_latest_drops_oldest_but_preserves_order() -> PipelineResult<()> {
        let inner = Box::new(SyntheticSource::finite("cam", 50));
        let mut source = DecoupledSource::new(inner, 1, DropPolicy::KeepLatest);
        source.open(geometry())?;
        // Let the capture thread run ahead so the queue overflows.
        std::thread::sleep(Duration::from_millis(100));
        let sequences = drain(&mut source)?;
        assert!(!sequences.is_empty());
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sequences.last(), Some(&50));
        source.close()?;
        let stats = source.stats();
        assert_eq!(stats.frames_dropped as usize + sequences.len(), 50);
        Ok(())
    }

    #[test]
    fn close_stops_an_endless_source() -> PipelineResult<()> {
        let inner = Box::new(SyntheticSource::from_device("stub://endless")?);
        let mut source = DecoupledSource::new(inner, 2, DropPolicy::Block);
        source.open(geometry())?;
        assert!(matches!(source.read_frame()?, ReadOutcome::Frame(_)));
        source.close()?;
        source.close()?;
        assert!(matches!(source.read_frame()?, ReadOutcome::EndOfStream));
        Ok(())
    }

    struct TrackedSource {
        inner: SyntheticSource,
        closes: Arc<AtomicU32>,
    }

    impl FrameSource for TrackedSource {
        fn device(&self) -> &str {
            self.inner.device()
        }

        fn open(&mut self, geometry: FrameGeometry) -> PipelineResult<()> {
            self.inner.open(geometry)
        }

        fn read_frame(&mut self) -> PipelineResult<ReadOutcome> {
            self.inner.read_frame()
        }

        fn close(&mut self) -> PipelineResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close()
        }

        fn stats(&self) -> SourceStats {
            self.inner.stats()
        }
    }

    #[test]
    fn failed_thread_spawn_still_closes_the_opened_source() {
        let closes = Arc::new(AtomicU32::new(0));
        let inner = Box::new(TrackedSource {
            inner: SyntheticSource::finite("cam", 5),
            closes: closes.clone(),
        });
        let mut source = DecoupledSource::new(inner, 2, DropPolicy::Block);

        let result = source.open_with(geometry(), |_job| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "thread limit reached"))
        });

        assert!(matches!(result, Err(PipelineError::DeviceUnavailable { .. })));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(source.close().is_ok());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(source.read_frame(), Ok(ReadOutcome::EndOfStream)));
    }

    #[test]
    fn parses_drop_policy() {
        assert_eq!("block".parse::<DropPolicy>().unwrap(), DropPolicy::Block);
        assert_eq!(
            "keep-latest".parse::<DropPolicy>().unwrap(),
            DropPolicy::KeepLatest
        );
        assert!("newest".parse::<DropPolicy>().is_err());
    }
}
