use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbaImage};
use tracing::{debug, info};

use crate::config::ExportSettings;
use crate::document::AnimationMeta;
use crate::encoder::VideoEncoder;
use crate::error_codes::StudioError;
use crate::player::{AnimationPlayer, RgbaFrame};

/// Which Lottie frames to sample and how large to rasterize them.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePlan {
    pub sample_rate: u32,
    pub samples: u32,
    pub width: u32,
    pub height: u32,
    in_point: f64,
    frame_rate: f64,
}

impl CapturePlan {
    pub fn new(meta: &AnimationMeta, settings: &ExportSettings) -> Result<Self> {
        let captured_seconds = meta
            .duration_seconds()
            .min(settings.max_duration_seconds);
        let samples = (captured_seconds * f64::from(settings.sample_rate)).ceil();
        if !(samples.is_finite() && samples >= 1.0) {
            return Err(StudioError::NoSamples.into());
        }
        let (width, height) = settings.raster_size(meta.width, meta.height)?;

        Ok(Self {
            sample_rate: settings.sample_rate,
            samples: samples as u32,
            width,
            height,
            in_point: meta.in_point,
            frame_rate: meta.frame_rate,
        })
    }

    pub fn timestamp(&self, sample: u32) -> f64 {
        f64::from(sample) / f64::from(self.sample_rate)
    }

    /// Lottie frame shown at `sample`.
    pub fn frame_at(&self, sample: u32) -> f64 {
        self.in_point + self.timestamp(sample) * self.frame_rate
    }

    pub fn in_point(&self) -> f64 {
        self.in_point
    }

    pub fn file_name(sample: u32) -> String {
        format!("frame_{sample:05}.png")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureReport {
    pub submitted: u32,
    pub blank: u32,
}

/// Seeks, rasterizes and submits every sample of `plan` to `encoder`.
///
/// Any failure aborts the sequence. The player's frame and play state are
/// put back afterwards either way.
pub fn capture_frames(
    player: &mut dyn AnimationPlayer,
    encoder: &mut dyn VideoEncoder,
    plan: &CapturePlan,
) -> Result<CaptureReport> {
    let resume_frame = player.current_frame();
    let was_playing = player.is_playing();

    let result = capture_samples(player, encoder, plan);

    if player.is_loaded() {
        player.seek(resume_frame)?;
        if was_playing {
            player.play();
        }
    }
    result
}

fn capture_samples(
    player: &mut dyn AnimationPlayer,
    encoder: &mut dyn VideoEncoder,
    plan: &CapturePlan,
) -> Result<CaptureReport> {
    let mut report = CaptureReport {
        submitted: 0,
        blank: 0,
    };

    for sample in 0..plan.samples {
        let frame_number = plan.frame_at(sample);
        player
            .seek(frame_number)
            .with_context(|| format!("failed to seek to frame {frame_number:.2}"))?;
        let frame = player
            .rasterize(plan.width, plan.height)
            .with_context(|| format!("failed to rasterize sample {sample}"))?;
        if frame.is_blank() {
            report.blank += 1;
        }

        let png = encode_png(&frame)?;
        encoder
            .write_file(&CapturePlan::file_name(sample), &png)
            .with_context(|| format!("failed to submit sample {sample}"))?;
        report.submitted += 1;

        if sample % plan.sample_rate == 0 {
            debug!(sample, of = plan.samples, frame = frame_number, "captured sample");
        }
    }

    if report.submitted > 0 && report.blank == report.submitted {
        return Err(StudioError::BlankFrames(report.blank).into());
    }
    info!(
        submitted = report.submitted,
        blank = report.blank,
        width = plan.width,
        height = plan.height,
        "frame capture complete"
    );
    Ok(report)
}

pub fn encode_png(frame: &RgbaFrame) -> Result<Vec<u8>> {
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| {
            anyhow!(
                "frame buffer of {} bytes does not match {}x{}",
                frame.pixels.len(),
                frame.width,
                frame.height
            )
        })?;
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .context("failed to encode frame as png")?;
    Ok(png.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(frame_rate: f64, out_point: f64) -> AnimationMeta {
        AnimationMeta {
            version: "5.7.0".to_owned(),
            name: None,
            frame_rate,
            in_point: 0.0,
            out_point,
            width: 100,
            height: 80,
            layer_count: 1,
        }
    }

    #[test]
    fn samples_cover_the_capped_duration() {
        let settings = ExportSettings::default();

        let short = CapturePlan::new(&meta(24.0, 36.0), &settings).unwrap();
        assert_eq!(short.samples, 45);
        assert_eq!((short.width, short.height), (100, 80));

        let long = CapturePlan::new(&meta(30.0, 30.0 * 60.0), &settings).unwrap();
        assert_eq!(long.samples, 300);
    }

    #[test]
    fn sample_times_map_onto_lottie_frames() {
        let mut animation = meta(60.0, 120.0);
        animation.in_point = 10.0;
        let plan = CapturePlan::new(&animation, &ExportSettings::default()).unwrap();

        assert_eq!(plan.frame_at(0), 10.0);
        assert_eq!(plan.frame_at(15), 40.0);
        assert!(plan.frame_at(plan.samples - 1) < 120.0);
    }

    #[test]
    fn zero_length_animation_has_no_samples() {
        let error = CapturePlan::new(&meta(30.0, 0.0), &ExportSettings::default()).unwrap_err();
        assert!(matches!(
            crate::error_codes::find_studio_error(&error),
            Some(StudioError::NoSamples)
        ));
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(CapturePlan::file_name(0), "frame_00000.png");
        assert_eq!(CapturePlan::file_name(123), "frame_00123.png");
    }

    #[test]
    fn png_encoding_checks_buffer_size() {
        let frame = RgbaFrame::solid(3, 2, [1, 2, 3, 255]);
        let png = encode_png(&frame).unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let truncated = RgbaFrame {
            width: 3,
            height: 2,
            pixels: vec![0; 5],
        };
        assert!(encode_png(&truncated).is_err());
    }
}
