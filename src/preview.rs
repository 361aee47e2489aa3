//! Debug views: JPEG snapshots of the annotated stream and a stdin key watcher.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};

use crate::cancel::CancellationToken;
use crate::frame::Frame;
use crate::pipeline::{Preview, PreviewAction};

pub const SNAPSHOT_FILE: &str = "preview.jpg";
const ESC: u8 = 0x1b;

/// Writes the latest annotated frame to `<dir>/preview.jpg`, at most once per
/// interval. The file is replaced atomically so viewers never see a partial image.
pub struct SnapshotPreview {
    dir: PathBuf,
    interval: Duration,
    last_write: Option<Instant>,
    snapshots: u64,
}

impl SnapshotPreview {
    pub fn new<P: AsRef<Path>>(dir: P, interval: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create preview dir {}", dir.display()))?;
        Ok(Self {
            dir,
            interval,
            last_write: None,
            snapshots: 0,
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }

    fn write_snapshot(&self, frame: &Frame) -> Result<()> {
        let mut rgb = Vec::with_capacity(frame.as_bytes().len());
        for px in frame.as_bytes().chunks_exact(3) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        let image = RgbImage::from_raw(frame.width(), frame.height(), rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width(), frame.height()))?;

        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        image
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .with_context(|| format!("encode preview {}", tmp.display()))?;
        let target = self.snapshot_path();
        fs::rename(&tmp, &target).with_context(|| format!("publish preview {}", target.display()))?;
        Ok(())
    }
}

impl Preview for SnapshotPreview {
    fn show(&mut self, frame: &Frame) -> Result<PreviewAction> {
        let due = self
            .last_write
            .map(|at| at.elapsed() >= self.interval)
            .unwrap_or(true);
        if due {
            // Rate limit applies to failed writes too.
            self.last_write = Some(Instant::now());
            self.write_snapshot(frame)?;
            self.snapshots += 1;
            log::debug!("SnapshotPreview: frame #{} -> {}", frame.sequence(), self.snapshot_path().display());
        }
        Ok(PreviewAction::Continue)
    }
}

/// Cancel `token` when `q`, `Q` or ESC is read. Returns at EOF or after cancelling.
///
/// Terminals deliver stdin line by line, so the key takes effect on Enter.
pub fn watch_keys<R: Read>(mut input: R, token: &CancellationToken) -> std::io::Result<()> {
    let mut buf = [0u8; 64];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if buf[..n].iter().any(|&b| b == b'q' || b == b'Q' || b == ESC) {
            log::info!("stop key pressed, finishing current frame");
            token.cancel();
            return Ok(());
        }
        if token.is_cancelled() {
            return Ok(());
        }
    }
}

/// Watch stdin on a background thread for the stop key.
pub fn spawn_key_watcher(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("key-watcher".to_string())
        .spawn(move || {
            if let Err(err) = watch_keys(std::io::stdin().lock(), &token) {
                log::warn!("key watcher stopped: {}", err);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameGeometry;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn writes_rate_limited_jpeg() -> Result<()> {
        let dir = tempdir()?;
        let mut preview = SnapshotPreview::new(dir.path().join("snaps"), Duration::from_secs(3600))?;
        let geometry = FrameGeometry::new(16, 8)?;

        preview.show(&Frame::solid(geometry, 1, [0, 0, 255]))?;
        preview.show(&Frame::solid(geometry, 2, [0, 255, 0]))?;
        assert_eq!(preview.snapshots(), 1);

        let decoded = image::open(preview.snapshot_path())?.to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 8));
        // BGR red became RGB red (JPEG is lossy; check dominance only).
        let px = decoded.get_pixel(8, 4);
        assert!(px[0] > 200 && px[2] < 60);
        Ok(())
    }

    #[test]
    fn stop_keys_cancel() -> std::io::Result<()> {
        let token = CancellationToken::new();
        watch_keys(Cursor::new(b"abc\n".to_vec()), &token)?;
        assert!(!token.is_cancelled());

        watch_keys(Cursor::new(b"xq\n".to_vec()), &token)?;
        assert!(token.is_cancelled());

        let token = CancellationToken::new();
        watch_keys(Cursor::new(vec![ESC]), &token)?;
        assert!(token.is_cancelled());
        Ok(())
    }
}
