//! detect-broadcast - annotate a live camera feed and publish it over RTMP
//!
//! This binary:
//! 1. Loads configuration (file, `STREAMER_*` environment, then flags)
//! 2. Opens the camera and starts the ffmpeg encoder
//! 3. Runs detection and annotation on every frame and pipes it to the encoder
//! 4. Shuts down in order on Ctrl-C, SIGTERM, the stop key, or end of stream

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use detect_broadcast::config::PipelineConfig;
use detect_broadcast::ingest::DropPolicy;
use detect_broadcast::preview::spawn_key_watcher;
use detect_broadcast::ui::Ui;
use detect_broadcast::{build_pipeline, CancellationToken, SinkKind};

#[derive(Parser, Debug)]
#[command(
    name = "detect-broadcast",
    version,
    about = "Run object detection on a camera feed and broadcast the annotated video"
)]
struct Args {
    /// TOML (or .json) config file
    #[arg(long, value_name = "PATH", env = "STREAMER_CONFIG")]
    config: Option<PathBuf>,

    /// Model reference: `stub` or a YOLOv8 .onnx export [default: yolov8n.onnx]
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,

    /// RTMP base URL [default: rtmp://a.rtmp.youtube.com/live2]
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Stream key appended to the URL
    #[arg(long, value_name = "KEY")]
    key: Option<String>,

    /// Frame width in pixels [default: 640]
    #[arg(long)]
    width: Option<u32>,

    /// Frame height in pixels [default: 480]
    #[arg(long)]
    height: Option<u32>,

    /// Camera: /dev/videoN, an index N, or stub://name[?frames=N]
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,

    /// Sink kind: rtmp, raw-file or memory
    #[arg(long, value_name = "KIND")]
    sink: Option<SinkKind>,

    /// Output path for the raw-file sink
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Write a JPEG snapshot of the annotated stream into this directory
    #[arg(long, value_name = "DIR")]
    preview_dir: Option<PathBuf>,

    /// Stop on `q` or ESC (followed by Enter) on stdin
    #[arg(long)]
    interactive: bool,

    /// Capture on a background thread with a bounded queue
    #[arg(long)]
    decoupled: bool,

    /// Queue policy for --decoupled: block or keep-latest
    #[arg(long, value_name = "POLICY")]
    drop_policy: Option<DropPolicy>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

impl Args {
    fn apply(&self, cfg: &mut PipelineConfig) {
        if let Some(model) = &self.model {
            cfg.model = model.clone();
        }
        if let Some(url) = &self.url {
            cfg.stream.base_url = url.clone();
        }
        if let Some(key) = &self.key {
            cfg.stream.stream_key = key.clone();
        }
        if let Some(width) = self.width {
            cfg.width = width;
        }
        if let Some(height) = self.height {
            cfg.height = height;
        }
        if let Some(device) = &self.device {
            cfg.capture.device = device.clone();
        }
        if let Some(kind) = self.sink {
            cfg.sink.kind = kind;
        }
        if let Some(output) = &self.output {
            cfg.sink.output = Some(output.clone());
        }
        if let Some(dir) = &self.preview_dir {
            cfg.preview.dir = Some(dir.clone());
        }
        if self.interactive {
            cfg.preview.interactive = true;
        }
        if self.decoupled {
            cfg.capture.decoupled = true;
        }
        if let Some(policy) = self.drop_policy {
            cfg.capture.drop_policy = policy;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = ui.run_stage("Load configuration", || -> Result<PipelineConfig> {
        let mut cfg = PipelineConfig::load(args.config.as_deref())?;
        args.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    })?;
    log::info!(
        "broadcasting {}x{} from {} with model {} via {} sink",
        cfg.width,
        cfg.height,
        cfg.capture.device,
        cfg.model,
        cfg.sink.kind
    );

    let cancel = CancellationToken::new();
    cancel.install_signal_handler()?;
    if cfg.preview.interactive {
        spawn_key_watcher(cancel.clone()).context("spawn key watcher")?;
        log::info!("interactive mode: press q or ESC, then Enter, to stop");
    }

    let pipeline = ui
        .run_stage("Prepare pipeline", || build_pipeline(&cfg))
        .context("failed to assemble pipeline")?;

    let summary = pipeline.run(&cancel).context("broadcast failed")?;
    log::info!(
        "stopped ({}): {} frames pushed in {:.1}s ({:.2} fps, last model fps {}), source captured {} dropped {}",
        summary.stop_reason,
        summary.frames_pushed,
        summary.elapsed.as_secs_f64(),
        summary.achieved_fps,
        summary.last_model_fps,
        summary.source.frames_captured,
        summary.source.frames_dropped
    );
    Ok(())
}
