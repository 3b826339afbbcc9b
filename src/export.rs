use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::capture::{capture_frames, CapturePlan};
use crate::config::ExportSettings;
use crate::document::AnimationDocument;
use crate::encoder::{mp4_args, FfmpegBinary, FfmpegWorkspace, VideoEncoder, MP4_OUTPUT_NAME};
use crate::error_codes::{describe_chain, StudioError};
use crate::player::AnimationPlayer;
use crate::recorder::{FfmpegStreamRecorder, StreamRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    Mp4,
    Webm,
}

impl VideoFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub format: VideoFormat,
    pub bytes: usize,
    pub frames: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Hands out a fresh encoder or recorder for each export attempt.
pub trait ExportBackends {
    fn load_encoder(&self, settings: &ExportSettings) -> Result<Box<dyn VideoEncoder>>;
    fn start_recorder(
        &self,
        settings: &ExportSettings,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn StreamRecorder>>;
}

pub struct FfmpegBackends;

impl ExportBackends for FfmpegBackends {
    fn load_encoder(&self, settings: &ExportSettings) -> Result<Box<dyn VideoEncoder>> {
        let workspace = FfmpegWorkspace::load(settings.ffmpeg, settings.encoder_load_timeout())?;
        Ok(Box::new(workspace))
    }

    fn start_recorder(
        &self,
        settings: &ExportSettings,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn StreamRecorder>> {
        let binary = FfmpegBinary::resolve(settings.ffmpeg, settings.encoder_load_timeout())?;
        let recorder = FfmpegStreamRecorder::start(binary, width, height, settings.sample_rate)?;
        Ok(Box::new(recorder))
    }
}

/// Allows one export at a time across every session sharing the gate.
#[derive(Debug, Clone, Default)]
pub struct ExportGate {
    busy: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct ExportGuard {
    busy: Arc<AtomicBool>,
}

impl ExportGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Result<ExportGuard, StudioError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StudioError::ExportInProgress)?;
        Ok(ExportGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for ExportGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Exports MP4, falling back once to a live WebM recording.
pub fn export_video(
    document: &AnimationDocument,
    player: &mut dyn AnimationPlayer,
    backends: &dyn ExportBackends,
    settings: &ExportSettings,
    now: DateTime<Utc>,
) -> Result<ExportOutcome> {
    let plan = CapturePlan::new(document.meta(), settings)?;
    info!(
        samples = plan.samples,
        sample_rate = plan.sample_rate,
        width = plan.width,
        height = plan.height,
        "starting mp4 export"
    );

    let primary = match encode_mp4(player, backends, settings, &plan) {
        Ok(bytes) => {
            let path = deliver(&bytes, VideoFormat::Mp4, settings, now)?;
            return Ok(ExportOutcome {
                path,
                format: VideoFormat::Mp4,
                bytes: bytes.len(),
                frames: plan.samples,
                fallback_reason: None,
            });
        }
        Err(error) => error,
    };

    let reason = describe_chain(&primary);
    if !settings.fallback.enabled {
        return Err(primary.context("mp4 export failed and the webm fallback is disabled"));
    }
    warn!(%reason, "mp4 export failed, recording webm fallback");

    match record_webm(player, backends, settings, &plan) {
        Ok((bytes, frames)) => {
            let path = deliver(&bytes, VideoFormat::Webm, settings, now)?;
            Ok(ExportOutcome {
                path,
                format: VideoFormat::Webm,
                bytes: bytes.len(),
                frames,
                fallback_reason: Some(reason),
            })
        }
        Err(fallback) => Err(StudioError::ExportFailed {
            primary: reason,
            fallback: describe_chain(&fallback),
        }
        .into()),
    }
}

fn encode_mp4(
    player: &mut dyn AnimationPlayer,
    backends: &dyn ExportBackends,
    settings: &ExportSettings,
    plan: &CapturePlan,
) -> Result<Vec<u8>> {
    let mut encoder = backends
        .load_encoder(settings)
        .context("failed to load video encoder")?;
    capture_frames(player, encoder.as_mut(), plan)?;
    encoder.run(&mp4_args(plan.sample_rate))?;
    let bytes = encoder.read_file(MP4_OUTPUT_NAME)?;
    check_output_size(&bytes, settings)?;
    Ok(bytes)
}

fn record_webm(
    player: &mut dyn AnimationPlayer,
    backends: &dyn ExportBackends,
    settings: &ExportSettings,
    plan: &CapturePlan,
) -> Result<(Vec<u8>, u32)> {
    let duration = Duration::from_secs_f64(settings.fallback.duration_seconds);
    let frames = (settings.fallback.duration_seconds * f64::from(plan.sample_rate)).ceil() as u32;
    let interval = Duration::from_secs_f64(1.0 / f64::from(plan.sample_rate));
    let mut recorder = backends.start_recorder(settings, plan.width, plan.height)?;

    player.seek(plan.in_point())?;
    player.play();
    let started = Instant::now();
    let recorded = (|| -> Result<()> {
        for index in 0..frames {
            if settings.fallback.realtime {
                let due = interval * index;
                if let Some(wait) = due.checked_sub(started.elapsed()) {
                    thread::sleep(wait);
                }
            }
            let frame = player
                .rasterize(plan.width, plan.height)
                .with_context(|| format!("failed to rasterize recorded frame {index}"))?;
            recorder.write_frame(frame)?;
            player.tick(interval);
        }
        Ok(())
    })();
    player.pause();
    recorded?;

    let bytes = recorder.finish()?;
    check_output_size(&bytes, settings)?;
    info!(frames, duration = ?duration, bytes = bytes.len(), "webm fallback recorded");
    Ok((bytes, frames))
}

fn check_output_size(bytes: &[u8], settings: &ExportSettings) -> Result<()> {
    if bytes.len() < settings.min_output_bytes {
        return Err(StudioError::UndersizedOutput {
            actual: bytes.len(),
            minimum: settings.min_output_bytes,
        }
        .into());
    }
    Ok(())
}

pub fn output_file_name(prefix: &str, format: VideoFormat, now: DateTime<Utc>) -> String {
    format!(
        "{prefix}-{}.{}",
        now.format("%Y%m%d-%H%M%S-%3f"),
        format.extension()
    )
}

fn deliver(
    bytes: &[u8],
    format: VideoFormat,
    settings: &ExportSettings,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let dir: &Path = &settings.output.dir;
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    let path = dir.join(output_file_name(&settings.output.prefix, format, now));
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), ?format, "export written");
    Ok(path)
}
