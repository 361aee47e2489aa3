use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::sink::{SinkState, StreamSink};

/// What a `MemorySink` saw, shared with the test that created it.
#[derive(Clone, Debug, Default)]
pub struct Recording {
    /// Per-frame history; left empty by a `counting_only` sink.
    pub sequences: Vec<u64>,
    pub lengths: Vec<usize>,
    /// Frame bytes, only kept when the sink was built with `keep_bytes`.
    pub frames: Vec<Vec<u8>>,
    pub start_calls: u32,
    pub stop_calls: u32,
    /// Pushes made while running, including a simulated failure.
    pub push_attempts: u64,
    pub frames_accepted: u64,
    pub bytes_accepted: u64,
    pub last_sequence: Option<u64>,
}

/// Cloneable handle onto a `MemorySink`'s recording.
#[derive(Clone, Debug, Default)]
pub struct MemoryRecorder {
    inner: Arc<Mutex<Recording>>,
}

impl MemoryRecorder {
    pub fn snapshot(&self) -> Recording {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        // Poisoning is ignored; the recording stays readable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process sink that records frames instead of encoding them.
///
/// `failing_at(n)` makes the n-th push (1-based) behave like a closed encoder pipe.
/// `counting_only()` keeps counters and no per-frame history, so memory stays
/// flat for runs of any length.
#[derive(Debug)]
pub struct MemorySink {
    recorder: MemoryRecorder,
    state: SinkState,
    keep_history: bool,
    keep_bytes: bool,
    fail_at: Option<u64>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            recorder: MemoryRecorder::default(),
            state: SinkState::Unstarted,
            keep_history: true,
            keep_bytes: false,
            fail_at: None,
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dry-run sink: counts frames and bytes, records nothing per frame.
    pub fn counting_only() -> Self {
        Self {
            keep_history: false,
            ..Self::default()
        }
    }

    pub fn keep_bytes(mut self) -> Self {
        self.keep_history = true;
        self.keep_bytes = true;
        self
    }

    pub fn failing_at(mut self, push: u64) -> Self {
        self.fail_at = Some(push);
        self
    }

    pub fn recorder(&self) -> MemoryRecorder {
        self.recorder.clone()
    }
}

impl StreamSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn state(&self) -> SinkState {
        self.state
    }

    fn start(&mut self) -> PipelineResult<()> {
        self.recorder.lock().start_calls += 1;
        self.state = SinkState::Running;
        Ok(())
    }

    fn push_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
        let mut recording = self.recorder.lock();
        match self.state {
            SinkState::Running => {}
            SinkState::Unstarted => return Err(PipelineError::SinkNotStarted { sink: "memory" }),
            SinkState::Closing | SinkState::Terminated => {
                return Err(PipelineError::EncoderPipeClosed {
                    reason: "memory sink closed".to_string(),
                })
            }
        }
        recording.push_attempts += 1;
        if self.fail_at == Some(recording.push_attempts) {
            self.state = SinkState::Terminated;
            return Err(PipelineError::EncoderPipeClosed {
                reason: format!("simulated pipe closure on push #{}", recording.push_attempts),
            });
        }
        recording.frames_accepted += 1;
        recording.bytes_accepted += frame.as_bytes().len() as u64;
        recording.last_sequence = Some(frame.sequence());
        if self.keep_history {
            recording.sequences.push(frame.sequence());
            recording.lengths.push(frame.as_bytes().len());
        }
        if self.keep_bytes {
            recording.frames.push(frame.as_bytes().to_vec());
        }
        Ok(())
    }

    fn stop(&mut self) -> PipelineResult<()> {
        self.recorder.lock().stop_calls += 1;
        self.state = SinkState::Terminated;
        Ok(())
    }
}
