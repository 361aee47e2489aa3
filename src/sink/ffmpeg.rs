use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::error::PipelineResult;
use crate::frame::{Frame, FrameGeometry};
use crate::sink::encoder::{EncoderProcess, ExitHook, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::sink::{SinkState, StreamSink};

pub const DEFAULT_PROGRAM: &str = "ffmpeg";
pub const DEFAULT_OUTPUT_FPS: u32 = 25;
pub const DEFAULT_CRF: u32 = 24;
pub const DEFAULT_PRESET: &str = "medium";

/// Encoder tuning. Defaults reproduce the fixed broadcast argument contract.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub program: String,
    pub output_fps: u32,
    pub crf: u32,
    pub preset: String,
    #[serde(with = "secs")]
    pub shutdown_timeout: Duration,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            output_fps: DEFAULT_OUTPUT_FPS,
            crf: DEFAULT_CRF,
            preset: DEFAULT_PRESET.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("shutdown_timeout must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Join base URL and stream key with exactly one `/`.
pub fn join_endpoint(base_url: &str, stream_key: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        stream_key.trim_start_matches('/')
    )
}

/// Encoder command line: raw BGR video on stdin, wall-clock timestamps, constant
/// output rate, synthetic silent audio, H.264/AAC in FLV.
pub fn encoder_args(geometry: FrameGeometry, settings: &EncoderSettings, target: &str) -> Vec<String> {
    let size = format!("{}x{}", geometry.width, geometry.height);
    let fps = settings.output_fps.to_string();
    let crf = settings.crf.to_string();
    [
        "-use_wallclock_as_timestamps",
        "1",
        "-y",
        "-f",
        "rawvideo",
        "-vcodec",
        "rawvideo",
        "-pixel_format",
        "bgr24",
        "-s",
        size.as_str(),
        "-re",
        "-i",
        "-",
        "-vsync",
        "cfr",
        "-r",
        fps.as_str(),
        "-f",
        "lavfi",
        "-i",
        "anullsrc",
        "-c:v",
        "libx264",
        "-c:a",
        "aac",
        "-crf",
        crf.as_str(),
        "-pix_fmt",
        "yuv420p",
        "-preset",
        settings.preset.as_str(),
        "-f",
        "flv",
        target,
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

/// Broadcast sink: pipes every frame into an ffmpeg process publishing to RTMP.
pub struct FfmpegSink {
    geometry: FrameGeometry,
    target: String,
    encoder: EncoderProcess,
    frames_pushed: u64,
}

impl FfmpegSink {
    pub fn new(geometry: FrameGeometry, base_url: &str, stream_key: &str, settings: &EncoderSettings) -> Self {
        let target = join_endpoint(base_url, stream_key);
        let args = encoder_args(geometry, settings, &target);
        let encoder = EncoderProcess::new(settings.program.clone(), args)
            .with_shutdown_timeout(settings.shutdown_timeout);
        Self {
            geometry,
            target,
            encoder,
            frames_pushed: 0,
        }
    }

    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.encoder = self.encoder.with_exit_hook(hook);
        self
    }

    pub fn args(&self) -> &[String] {
        self.encoder.args()
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl StreamSink for FfmpegSink {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn state(&self) -> SinkState {
        self.encoder.state()
    }

    fn start(&mut self) -> PipelineResult<()> {
        self.encoder.start()?;
        info!(
            "FfmpegSink: streaming {} BGR frames to {}",
            self.geometry,
            redact_key(&self.target)
        );
        Ok(())
    }

    fn push_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
        self.geometry.check(frame)?;
        self.encoder.write(frame.as_bytes())?;
        self.frames_pushed += 1;
        Ok(())
    }

    fn stop(&mut self) -> PipelineResult<()> {
        if self.encoder.state() == SinkState::Running {
            info!("FfmpegSink: stopping after {} frames", self.frames_pushed);
        }
        self.encoder.finish()
    }
}

/// Hide the stream key (last path segment) in logs.
fn redact_key(target: &str) -> String {
    match target.rsplit_once('/') {
        Some((base, key)) if !key.is_empty() => format!("{}/{}", base, "*".repeat(key.len().min(8))),
        _ => target.to_string(),
    }
}
