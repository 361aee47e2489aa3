//! Long-lived encoder subprocess fed through its stdin.
//!
//! State machine:
//!
//! ```text
//! Unstarted --start--> Running --write ok--> Running
//! Running --finish--> Closing --reaped--> Terminated
//! Running --write fails / child exited--> Terminated
//! ```
//!
//! The stdin handle is dropped on every transition out of `Running`, so the input
//! stream is never open after `Terminated`. The child is always reaped: `finish`
//! waits at most `shutdown_timeout`, then kills and waits again.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::sink::SinkState;

/// Default bound on how long `finish` waits for a clean exit.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Called once with the exit status, before `finish` (or the failing write) returns.
pub type ExitHook = Box<dyn FnOnce(&ExitStatus) + Send>;

pub struct EncoderProcess {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    state: SinkState,
    shutdown_timeout: Duration,
    exit_status: Option<ExitStatus>,
    exit_hook: Option<ExitHook>,
    bytes_written: u64,
}

impl EncoderProcess {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: None,
            stdin: None,
            state: SinkState::Unstarted,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            exit_status: None,
            exit_hook: None,
            bytes_written: 0,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.exit_hook = Some(hook);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// OS process id while the child is alive.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Spawn the child with a piped stdin. Only valid from `Unstarted`.
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.state != SinkState::Unstarted {
            return Err(PipelineError::Config(format!(
                "encoder `{}` cannot be started from state {:?}",
                self.program, self.state
            )));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        // Separate process group: terminal SIGINT must not reach the encoder.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|source| PipelineError::EncoderLaunchFailed {
                program: self.program.clone(),
                source,
            })?;
        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PipelineError::EncoderLaunchFailed {
                    program: self.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdin not captured"),
                });
            }
        };

        info!("EncoderProcess: started `{}` (pid {})", self.program, child.id());
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.state = SinkState::Running;
        Ok(())
    }

    /// Write one buffer to the encoder's stdin; blocks while the pipe is full.
    pub fn write(&mut self, bytes: &[u8]) -> PipelineResult<()> {
        match self.state {
            SinkState::Running => {}
            SinkState::Unstarted => return Err(PipelineError::SinkNotStarted { sink: "encoder" }),
            SinkState::Closing | SinkState::Terminated => {
                return Err(PipelineError::EncoderPipeClosed {
                    reason: "encoder input already closed".to_string(),
                })
            }
        }

        if let Some(status) = self.poll_exit()? {
            self.stdin = None;
            self.terminate_with(status);
            return Err(PipelineError::EncoderPipeClosed {
                reason: format!("encoder exited ({status})"),
            });
        }

        let result = match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(bytes),
            None => Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin missing")),
        };
        match result {
            Ok(()) => {
                self.bytes_written += bytes.len() as u64;
                Ok(())
            }
            Err(err) => {
                warn!("EncoderProcess: write to `{}` failed: {}", self.program, err);
                self.stdin = None;
                match self.reap() {
                    Ok(status) => self.terminate_with(status),
                    Err(reap_err) => {
                        error!("EncoderProcess: failed to reap after write error: {}", reap_err);
                        self.state = SinkState::Terminated;
                    }
                }
                Err(PipelineError::EncoderPipeClosed {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Close stdin, wait for the child to exit and reap it.
    ///
    /// Returns `EncoderExit` when the child exits unsuccessfully or has to be killed.
    /// Calling it again after termination, or before start, is a no-op.
    pub fn finish(&mut self) -> PipelineResult<()> {
        match self.state {
            SinkState::Running => {}
            SinkState::Unstarted => {
                self.state = SinkState::Terminated;
                return Ok(());
            }
            SinkState::Closing | SinkState::Terminated => return Ok(()),
        }

        self.state = SinkState::Closing;
        // EOF on stdin tells the encoder to flush and exit.
        self.stdin = None;
        debug!(
            "EncoderProcess: input closed after {} bytes, waiting for exit",
            self.bytes_written
        );

        let status = match self.reap() {
            Ok(status) => status,
            Err(err) => {
                self.state = SinkState::Terminated;
                return Err(err);
            }
        };
        self.terminate_with(status);
        if status.success() {
            info!("EncoderProcess: `{}` exited cleanly", self.program);
            Ok(())
        } else {
            Err(PipelineError::EncoderExit { status })
        }
    }

    fn poll_exit(&mut self) -> PipelineResult<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        match child.try_wait().map_err(PipelineError::EncoderWait)? {
            Some(status) => {
                self.child = None;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Bounded wait, then kill. Leaves no zombie behind.
    fn reap(&mut self) -> PipelineResult<ExitStatus> {
        let Some(mut child) = self.child.take() else {
            return self
                .exit_status
                .ok_or_else(|| PipelineError::EncoderWait(std::io::Error::other("encoder was never spawned")));
        };

        let deadline = Instant::now() + self.shutdown_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Ok(None) => break,
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PipelineError::EncoderWait(err));
                }
            }
        }

        warn!(
            "EncoderProcess: `{}` still running after {:?}, killing",
            self.program, self.shutdown_timeout
        );
        if let Err(err) = child.kill() {
            // Already exited between the last poll and the kill.
            debug!("EncoderProcess: kill failed: {}", err);
        }
        child.wait().map_err(PipelineError::EncoderWait)
    }

    fn terminate_with(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
        self.state = SinkState::Terminated;
        if let Some(hook) = self.exit_hook.take() {
            hook(&status);
        }
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        if self.state == SinkState::Running {
            if let Err(err) = self.finish() {
                error!("EncoderProcess: shutdown on drop failed: {}", err);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn finish_reaps_and_fires_hook_before_returning() -> PipelineResult<()> {
        let fired = Arc::new(AtomicBool::new(false));
        let observed = fired.clone();
        let mut encoder = EncoderProcess::new("cat", Vec::new())
            .with_exit_hook(Box::new(move |status| {
                assert!(status.success());
                observed.store(true, Ordering::SeqCst);
            }));

        encoder.start()?;
        encoder.write(&[1, 2, 3, 4])?;
        encoder.finish()?;

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(encoder.state(), SinkState::Terminated);
        assert!(encoder.id().is_none());
        assert_eq!(encoder.bytes_written(), 4);
        Ok(())
    }

    #[test]
    fn second_finish_is_noop() -> PipelineResult<()> {
        let calls = Arc::new(AtomicI32::new(0));
        let counter = calls.clone();
        let mut encoder = EncoderProcess::new("cat", Vec::new()).with_exit_hook(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        encoder.start()?;
        encoder.finish()?;
        encoder.finish()?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn write_after_child_exit_is_pipe_closed() -> PipelineResult<()> {
        let mut encoder = EncoderProcess::new("true", Vec::new());
        encoder.start()?;

        let chunk = vec![0u8; 64 * 1024];
        let mut outcome = Ok(());
        for _ in 0..200 {
            outcome = encoder.write(&chunk);
            if outcome.is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(matches!(outcome, Err(PipelineError::EncoderPipeClosed { .. })));
        assert_eq!(encoder.state(), SinkState::Terminated);
        assert!(encoder.exit_status().is_some());

        // Input stays closed and stop is still safe.
        assert!(matches!(encoder.write(&chunk), Err(PipelineError::EncoderPipeClosed { .. })));
        encoder.finish()?;
        Ok(())
    }

    #[test]
    fn write_before_start_is_rejected() {
        let mut encoder = EncoderProcess::new("cat", Vec::new());
        assert!(matches!(encoder.write(&[0]), Err(PipelineError::SinkNotStarted { .. })));
    }

    #[test]
    fn missing_program_is_launch_failure() {
        let mut encoder = EncoderProcess::new("/nonexistent/encoder-binary", Vec::new());
        assert!(matches!(encoder.start(), Err(PipelineError::EncoderLaunchFailed { .. })));
        assert_eq!(encoder.state(), SinkState::Unstarted);
    }

    #[test]
    fn hung_child_is_killed_after_timeout() -> PipelineResult<()> {
        // `sleep` ignores stdin, so closing it does not end the process.
        let mut encoder = EncoderProcess::new("sleep", vec!["30".to_string()])
            .with_shutdown_timeout(Duration::from_millis(100));
        encoder.start()?;
        let started = Instant::now();
        let result = encoder.finish();
        assert!(matches!(result, Err(PipelineError::EncoderExit { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(encoder.state(), SinkState::Terminated);
        Ok(())
    }
}
