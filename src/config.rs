use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{de::Error as DeError, Deserialize, Deserializer};

use crate::document::Rgb;
use crate::encoder::FfmpegMode;

/// Export tuning, loaded from an optional YAML file.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportSettings {
    /// Frame samples captured per second of animation.
    pub sample_rate: u32,
    /// Ceiling on captured animation time.
    pub max_duration_seconds: f64,
    /// Raster surface; defaults to the document's `w`x`h`.
    pub resolution: Option<Resolution>,
    #[serde(deserialize_with = "deserialize_rgb")]
    pub background: Rgb,
    pub min_output_bytes: usize,
    pub encoder_load_timeout_ms: u64,
    pub ffmpeg: FfmpegMode,
    pub fallback: FallbackSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FallbackSettings {
    pub enabled: bool,
    /// Wall-clock length of the live recording.
    pub duration_seconds: f64,
    /// Pace recorded frames against the wall clock.
    pub realtime: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            sample_rate: 30,
            max_duration_seconds: 10.0,
            resolution: None,
            background: Rgb::WHITE,
            min_output_bytes: 1024,
            encoder_load_timeout_ms: 15_000,
            ffmpeg: FfmpegMode::Auto,
            fallback: FallbackSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_seconds: 5.0,
            realtime: true,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "lottie-export".to_owned(),
        }
    }
}

impl ExportSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read export settings {}", path.display()))?;
        let settings = Self::from_yaml(&contents).map_err(|error| {
            anyhow!("invalid export settings in {}: {error:#}", path.display())
        })?;
        Ok(settings)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self = serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!("failed to parse yaml at {location}: {error}")
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("sample_rate must be > 0");
        }
        if !(self.max_duration_seconds.is_finite() && self.max_duration_seconds > 0.0) {
            bail!("max_duration_seconds must be > 0");
        }
        if let Some(resolution) = self.resolution {
            if resolution.width == 0 || resolution.height == 0 {
                bail!(
                    "resolution must be positive, got {}x{}",
                    resolution.width,
                    resolution.height
                );
            }
        }
        if self.fallback.enabled
            && !(self.fallback.duration_seconds.is_finite() && self.fallback.duration_seconds > 0.0)
        {
            bail!("fallback.duration_seconds must be > 0");
        }
        if self.output.prefix.trim().is_empty() {
            bail!("output.prefix cannot be empty");
        }
        if self
            .output
            .prefix
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            bail!("output.prefix must be a plain file name prefix");
        }
        Ok(())
    }

    pub fn encoder_load_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_load_timeout_ms)
    }

    /// Raster size for a document, rounded up to even dimensions for yuv420p.
    pub fn raster_size(&self, document_width: u32, document_height: u32) -> Result<(u32, u32)> {
        let (width, height) = match self.resolution {
            Some(resolution) => (resolution.width, resolution.height),
            None => (document_width, document_height),
        };
        if width == 0 || height == 0 {
            bail!("animation has no size (w/h); set `resolution` in the export settings");
        }
        Ok((round_up_even(width), round_up_even(height)))
    }
}

fn round_up_even(value: u32) -> u32 {
    value + (value % 2)
}

fn deserialize_rgb<'de, D>(deserializer: D) -> std::result::Result<Rgb, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<Rgb>().map_err(D::Error::custom)
}
