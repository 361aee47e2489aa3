use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::ModelRef;
use crate::error::PipelineResult;
use crate::frame::FrameGeometry;
use crate::ingest::decoupled::DEFAULT_QUEUE_DEPTH;
use crate::ingest::{CameraConfig, DropPolicy};
use crate::sink::{join_endpoint, EncoderSettings, SinkKind};

pub const DEFAULT_MODEL: &str = "yolov8n.onnx";
pub const DEFAULT_MODEL_INPUT: u32 = 640;
pub const DEFAULT_STREAM_URL: &str = "rtmp://a.rtmp.youtube.com/live2";
pub const DEFAULT_STREAM_KEY: &str = "xxxx-xxxx-xxxx-xxxx-xxxx";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_CAPTURE_FPS: u32 = 30;
const DEFAULT_PREVIEW_INTERVAL_MS: u64 = 1000;

pub const CONFIG_ENV: &str = "STREAMER_CONFIG";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamerConfigFile {
    model: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    detector: Option<DetectorConfigFile>,
    stream: Option<StreamConfigFile>,
    capture: Option<CaptureConfigFile>,
    sink: Option<SinkConfigFile>,
    encoder: Option<EncoderSettings>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    url: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    decoupled: Option<bool>,
    queue_depth: Option<usize>,
    drop_policy: Option<DropPolicy>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SinkConfigFile {
    kind: Option<SinkKind>,
    output: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PreviewConfigFile {
    dir: Option<PathBuf>,
    interval_ms: Option<u64>,
    interactive: Option<bool>,
}

/// Everything one run needs. Immutable once the pipeline starts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: String,
    pub model_input: u32,
    pub width: u32,
    pub height: u32,
    pub stream: StreamEndpoint,
    pub capture: CaptureSettings,
    pub sink: SinkSettings,
    pub encoder: EncoderSettings,
    pub preview: PreviewSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub base_url: String,
    pub stream_key: String,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: String,
    pub target_fps: u32,
    pub decoupled: bool,
    pub queue_depth: usize,
    pub drop_policy: DropPolicy,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    /// Directory receiving `preview.jpg`; no preview when unset.
    pub dir: Option<PathBuf>,
    pub interval: Duration,
    /// Cancel on `q` / ESC read from stdin.
    pub interactive: bool,
}

impl PipelineConfig {
    /// Load from the file named by `path` (or `STREAMER_CONFIG`), then apply
    /// `STREAMER_*` environment overrides.
    ///
    /// Only parse errors surface here. Callers layer their own overrides and
    /// then call [`PipelineConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok().filter(|p| !p.trim().is_empty());
        let config_path = path.map(Path::to_path_buf).or_else(|| env_path.map(PathBuf::from));
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: StreamerConfigFile) -> Self {
        let stream = file.stream.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let sink = file.sink.unwrap_or_default();
        let preview = file.preview.unwrap_or_default();
        Self {
            model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            model_input: file
                .detector
                .and_then(|detector| detector.input_size)
                .unwrap_or(DEFAULT_MODEL_INPUT),
            width: file.width.unwrap_or(DEFAULT_WIDTH),
            height: file.height.unwrap_or(DEFAULT_HEIGHT),
            stream: StreamEndpoint {
                base_url: stream.url.unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
                stream_key: stream.key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            },
            capture: CaptureSettings {
                device: capture.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
                target_fps: capture.target_fps.unwrap_or(DEFAULT_CAPTURE_FPS),
                decoupled: capture.decoupled.unwrap_or(false),
                queue_depth: capture.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
                drop_policy: capture.drop_policy.unwrap_or_default(),
            },
            sink: SinkSettings {
                kind: sink.kind.unwrap_or_default(),
                output: sink.output,
            },
            encoder: file.encoder.unwrap_or_default(),
            preview: PreviewSettings {
                dir: preview.dir,
                interval: Duration::from_millis(
                    preview.interval_ms.unwrap_or(DEFAULT_PREVIEW_INTERVAL_MS),
                ),
                interactive: preview.interactive.unwrap_or(false),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("STREAMER_URL") {
            self.stream.base_url = url;
        }
        if let Some(key) = env_value("STREAMER_KEY") {
            self.stream.stream_key = key;
        }
        if let Some(model) = env_value("STREAMER_MODEL") {
            self.model = model;
        }
        if let Some(device) = env_value("STREAMER_DEVICE") {
            self.capture.device = device;
        }
        if let Some(width) = env_value("STREAMER_WIDTH") {
            self.width = width
                .parse()
                .map_err(|_| anyhow!("STREAMER_WIDTH must be a positive integer"))?;
        }
        if let Some(height) = env_value("STREAMER_HEIGHT") {
            self.height = height
                .parse()
                .map_err(|_| anyhow!("STREAMER_HEIGHT must be a positive integer"))?;
        }
        Ok(())
    }

    /// Check cross-field constraints once every override layer is applied.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("frame size {}x{} must be non-zero", self.width, self.height));
        }
        // yuv420p subsamples chroma 2x2.
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(anyhow!(
                "frame size {}x{} must have even width and height",
                self.width,
                self.height
            ));
        }
        self.geometry()?;
        ModelRef::parse(&self.model)?;
        if self.model_input == 0 || self.model_input % 32 != 0 {
            return Err(anyhow!(
                "detector input size {} must be a positive multiple of 32",
                self.model_input
            ));
        }
        if self.capture.device.trim().is_empty() {
            return Err(anyhow!("capture device must not be empty"));
        }
        if self.capture.queue_depth == 0 {
            return Err(anyhow!("capture queue depth must be at least 1"));
        }
        match self.sink.kind {
            SinkKind::Rtmp => {
                if self.stream.base_url.trim().is_empty() {
                    return Err(anyhow!("stream URL must not be empty"));
                }
                if self.stream.stream_key.trim().is_empty() {
                    return Err(anyhow!("stream key must not be empty"));
                }
                if self.encoder.program.trim().is_empty() {
                    return Err(anyhow!("encoder program must not be empty"));
                }
                if self.encoder.output_fps == 0 {
                    return Err(anyhow!("encoder output fps must be greater than zero"));
                }
                if self.encoder.preset.trim().is_empty() {
                    return Err(anyhow!("encoder preset must not be empty"));
                }
            }
            SinkKind::RawFile => {
                if self.sink.output.is_none() {
                    return Err(anyhow!("raw-file sink requires an output path"));
                }
            }
            SinkKind::Memory => {}
        }
        Ok(())
    }

    pub fn geometry(&self) -> PipelineResult<FrameGeometry> {
        FrameGeometry::new(self.width, self.height)
    }

    /// Full publish URL, `{base}/{key}`.
    pub fn endpoint(&self) -> String {
        join_endpoint(&self.stream.base_url, &self.stream.stream_key)
    }

    pub fn camera(&self) -> CameraConfig {
        CameraConfig {
            device: self.capture.device.clone(),
            target_fps: self.capture.target_fps,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(StreamerConfigFile::default())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<StreamerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_broadcast_defaults() -> Result<()> {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        assert_eq!(cfg.model, "yolov8n.onnx");
        assert_eq!((cfg.width, cfg.height), (640, 480));
        assert_eq!(cfg.endpoint(), "rtmp://a.rtmp.youtube.com/live2/xxxx-xxxx-xxxx-xxxx-xxxx");
        assert_eq!(cfg.sink.kind, SinkKind::Rtmp);
        assert_eq!(cfg.capture.queue_depth, 4);
        assert_eq!(cfg.capture.drop_policy, DropPolicy::Block);
        assert_eq!(cfg.encoder.output_fps, 25);
        Ok(())
    }

    #[test]
    fn odd_or_zero_sizes_are_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.width = 641;
        assert!(cfg.validate().is_err());
        cfg.width = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn raw_file_needs_output() {
        let mut cfg = PipelineConfig::default();
        cfg.sink.kind = SinkKind::RawFile;
        assert!(cfg.validate().is_err());
        cfg.sink.output = Some(PathBuf::from("frames.bgr"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_nested_toml() -> Result<()> {
        let file: StreamerConfigFile = toml::from_str(
            r#"
            model = "stub"
            width = 320
            height = 240

            [capture]
            device = "stub://lab"
            decoupled = true
            drop_policy = "keep-latest"

            [encoder]
            crf = 28
            shutdown_timeout = 2.5
            "#,
        )?;
        let cfg = PipelineConfig::from_file(file);
        cfg.validate()?;
        assert_eq!(cfg.capture.drop_policy, DropPolicy::KeepLatest);
        assert!(cfg.capture.decoupled);
        assert_eq!(cfg.encoder.crf, 28);
        assert_eq!(cfg.encoder.preset, "medium");
        assert_eq!(cfg.encoder.shutdown_timeout, Duration::from_millis(2500));
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: std::result::Result<StreamerConfigFile, _> = toml::from_str("frame_rate = 30");
        assert!(parsed.is_err());
    }
}
