use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error_codes::StudioError;

pub const FRAME_PATTERN: &str = "frame_%05d.png";
pub const MP4_OUTPUT_NAME: &str = "output.mp4";
const STDERR_KEEP_BYTES: usize = 4096;

/// Encoder working on a filesystem keyed by plain file names.
pub trait VideoEncoder {
    fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()>;
    /// Runs the encoder with a command-line style argument list.
    fn run(&mut self, args: &[String]) -> Result<()>;
    fn read_file(&self, name: &str) -> Result<Vec<u8>>;
    fn file_names(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FfmpegMode {
    Auto,
    System,
    Sidecar,
}

/// ffmpeg binary resolved for one export.
#[derive(Debug, Clone)]
pub struct FfmpegBinary {
    pub path: PathBuf,
    pub mode_label: &'static str,
}

impl FfmpegBinary {
    /// Picks the ffmpeg binary for `mode` and checks it answers within
    /// `timeout`.
    pub fn resolve(mode: FfmpegMode, timeout: Duration) -> Result<Self> {
        match mode {
            FfmpegMode::Auto => Self::resolve_auto(Self::system(), timeout),
            FfmpegMode::System => {
                let binary = Self::system();
                binary.probe(timeout)?;
                Ok(binary)
            }
            FfmpegMode::Sidecar => {
                #[cfg(feature = "sidecar_ffmpeg")]
                {
                    let binary = Self::sidecar()?;
                    binary.probe(timeout)?;
                    Ok(binary)
                }
                #[cfg(not(feature = "sidecar_ffmpeg"))]
                {
                    Err(StudioError::EncoderUnavailable(
                        "sidecar mode requested but lottie-studio was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`.".to_owned(),
                    )
                    .into())
                }
            }
        }
    }

    fn resolve_auto(system: Self, timeout: Duration) -> Result<Self> {
        match system.probe(timeout) {
            Ok(()) => Ok(system),
            #[cfg(feature = "sidecar_ffmpeg")]
            Err(error)
                if matches!(
                    crate::error_codes::find_studio_error(&error),
                    Some(StudioError::EncoderUnavailable(_))
                ) =>
            {
                debug!(%error, "system ffmpeg unavailable, trying sidecar");
                let sidecar = Self::sidecar()?;
                sidecar.probe(timeout)?;
                Ok(sidecar)
            }
            Err(error) => Err(error),
        }
    }

    fn system() -> Self {
        Self {
            path: PathBuf::from("ffmpeg"),
            mode_label: "system",
        }
    }

    #[cfg(feature = "sidecar_ffmpeg")]
    fn sidecar() -> Result<Self> {
        let path = ffmpeg_sidecar::paths::ffmpeg_path();
        if !path.exists() {
            info!("downloading ffmpeg sidecar binary");
            ffmpeg_sidecar::download::auto_download().map_err(|error| {
                StudioError::EncoderUnavailable(format!(
                    "failed to auto-download ffmpeg sidecar binary: {error}"
                ))
            })?;
        }
        Ok(Self {
            path,
            mode_label: "sidecar",
        })
    }

    /// Runs `ffmpeg -version`, killing it if it outlives `timeout`.
    pub fn probe(&self, timeout: Duration) -> Result<()> {
        let mut child = Command::new(&self.path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| self.spawn_error(error, &["-version".to_owned()]))?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().context("failed polling ffmpeg probe")? {
                if !status.success() {
                    return Err(StudioError::EncoderUnavailable(format!(
                        "`{} -version` exited with {status}",
                        self.path.display()
                    ))
                    .into());
                }
                debug!(mode = self.mode_label, path = %self.path.display(), "ffmpeg probe ok");
                return Ok(());
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(StudioError::EncoderLoadTimeout(timeout).into());
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    pub(crate) fn spawn_error(&self, error: std::io::Error, args: &[String]) -> anyhow::Error {
        if error.kind() == ErrorKind::NotFound {
            StudioError::EncoderUnavailable(format!(
                "ffmpeg executable not found (mode={}, resolved_path={}). Install ffmpeg (system mode) or use sidecar mode with `--features sidecar_ffmpeg`.",
                self.mode_label,
                self.path.display()
            ))
            .into()
        } else {
            anyhow!(
                "failed to spawn ffmpeg process (mode={}, resolved_path={}, args='{}'): {error}",
                self.mode_label,
                self.path.display(),
                args.join(" ")
            )
        }
    }
}

/// ffmpeg driven through a scratch directory that stands in for the
/// encoder's in-memory filesystem.
pub struct FfmpegWorkspace {
    binary: FfmpegBinary,
    dir: TempDir,
    files: BTreeSet<String>,
}

impl FfmpegWorkspace {
    pub fn load(mode: FfmpegMode, timeout: Duration) -> Result<Self> {
        Self::with_binary(FfmpegBinary::resolve(mode, timeout)?)
    }

    pub fn with_binary(binary: FfmpegBinary) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("lottie-studio-")
            .tempdir()
            .context("failed to create encoder scratch directory")?;
        info!(mode = binary.mode_label, dir = %dir.path().display(), "encoder workspace ready");
        Ok(Self {
            binary,
            dir,
            files: BTreeSet::new(),
        })
    }
}

impl VideoEncoder for FfmpegWorkspace {
    fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        validate_file_name(name)?;
        fs::write(self.dir.path().join(name), bytes)
            .with_context(|| format!("failed to write encoder input {name}"))?;
        self.files.insert(name.to_owned());
        Ok(())
    }

    fn run(&mut self, args: &[String]) -> Result<()> {
        let mut child = Command::new(&self.binary.path)
            .args(args)
            .current_dir(self.dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| self.binary.spawn_error(error, args))?;

        let stderr_drain = drain_stderr(child.stderr.take())?;
        let status = child.wait().context("failed waiting for ffmpeg process")?;
        let stderr_tail = join_stderr(stderr_drain);
        if !status.success() {
            return Err(StudioError::EncodeFailed(format!(
                "ffmpeg failed with status {status} (mode={}, args='{}', stderr_tail='{}')",
                self.binary.mode_label,
                args.join(" "),
                stderr_tail
            ))
            .into());
        }

        // Pick up whatever ffmpeg produced so read_file sees it.
        for entry in fs::read_dir(self.dir.path()).context("failed listing encoder outputs")? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                self.files.insert(name.to_owned());
            }
        }
        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        validate_file_name(name)?;
        fs::read(self.dir.path().join(name))
            .with_context(|| format!("encoder produced no file named {name}"))
    }

    fn file_names(&self) -> Vec<String> {
        self.files.iter().cloned().collect()
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(|c| c.is_control())
    {
        bail!("invalid encoder file name '{name}'");
    }
    Ok(())
}

/// Image sequence to H.264 MP4.
pub fn mp4_args(sample_rate: u32) -> Vec<String> {
    let rate = sample_rate.to_string();
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-framerate",
        rate.as_str(),
        "-i",
        FRAME_PATTERN,
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        MP4_OUTPUT_NAME,
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Raw RGBA on stdin to VP9 WebM.
pub fn webm_stream_args(width: u32, height: u32, fps: u32, output_path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s:v".to_owned(),
        format!("{width}x{height}"),
        "-r".to_owned(),
        fps.to_string(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
        "-c:v".to_owned(),
        "libvpx-vp9".to_owned(),
        "-pix_fmt".to_owned(),
        "yuv420p".to_owned(),
        "-b:v".to_owned(),
        "0".to_owned(),
        "-crf".to_owned(),
        "31".to_owned(),
        "-deadline".to_owned(),
        "realtime".to_owned(),
        output_path.to_string_lossy().into_owned(),
    ]
}

/// Collects the tail of a child's stderr on a helper thread while the child
/// runs.
pub(crate) fn drain_stderr(stderr: Option<ChildStderr>) -> Result<JoinHandle<String>> {
    thread::Builder::new()
        .name("lottie-studio-ffmpeg-stderr".to_owned())
        .spawn(move || {
            let Some(mut pipe) = stderr else {
                return String::new();
            };
            let mut tail = Vec::new();
            let mut chunk = [0_u8; 4096];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => {
                        tail.extend_from_slice(&chunk[..read]);
                        if tail.len() > STDERR_KEEP_BYTES {
                            tail.drain(..tail.len() - STDERR_KEEP_BYTES);
                        }
                    }
                    Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            last_n_chars(&String::from_utf8_lossy(&tail), 500)
        })
        .context("failed to spawn ffmpeg stderr reader")
}

pub(crate) fn join_stderr(drain: JoinHandle<String>) -> String {
    drain
        .join()
        .unwrap_or_else(|_| "<stderr reader panicked>".to_owned())
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let skip = s.chars().count().saturating_sub(max_chars);
    s.chars().skip(skip).collect::<String>().trim().to_owned()
}

/// Writes an executable shell script that stands in for ffmpeg.
#[cfg(all(test, unix))]
pub(crate) fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script should write");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("script should chmod");
    path
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::error_codes::find_studio_error;

    #[test]
    fn mp4_args_reference_frame_pattern_and_output() {
        let args = mp4_args(24);
        let joined = args.join(" ");
        assert!(joined.contains("-framerate 24 -i frame_%05d.png"));
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p"));
        assert_eq!(args.last().map(String::as_str), Some(MP4_OUTPUT_NAME));
    }

    #[test]
    fn webm_args_describe_raw_input() {
        let args = webm_stream_args(640, 360, 30, Path::new("out.webm"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s:v 640x360 -r 30 -i -"));
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert_eq!(args.last().map(String::as_str), Some("out.webm"));
    }

    #[test]
    fn file_names_cannot_escape_the_workspace() {
        for bad in ["", ".", "..", "../x.png", "a/b.png", "a\\b.png", "x\n.png"] {
            assert!(validate_file_name(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_file_name("frame_00001.png").is_ok());
    }

    #[test]
    fn workspace_round_trips_files_without_running_ffmpeg() {
        let mut workspace = FfmpegWorkspace::with_binary(FfmpegBinary {
            path: PathBuf::from("ffmpeg"),
            mode_label: "system",
        })
        .unwrap();

        workspace.write_file("frame_00000.png", b"png").unwrap();
        assert_eq!(workspace.read_file("frame_00000.png").unwrap(), b"png");
        assert_eq!(workspace.file_names(), vec!["frame_00000.png".to_owned()]);
        assert!(workspace.read_file("missing.mp4").is_err());
    }

    #[test]
    fn missing_binary_is_reported_as_unavailable() {
        let binary = FfmpegBinary {
            path: PathBuf::from("/nonexistent/lottie-studio-ffmpeg"),
            mode_label: "system",
        };
        let error = binary.probe(Duration::from_secs(1)).unwrap_err();
        let classified = find_studio_error(&error).unwrap();
        assert_eq!(classified.code(), "encoder_unavailable");
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        assert_eq!(last_n_chars("abcdef", 3), "def");
        assert_eq!(last_n_chars(" ab ", 10), "ab");
    }

    #[cfg(unix)]
    #[test]
    fn run_drains_a_flooded_stderr() {
        let scripts = tempfile::tempdir().unwrap();
        let path = fake_ffmpeg(
            scripts.path(),
            "head -c 200000 /dev/zero | tr '\\0' x >&2\nexit 1",
        );
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let mut workspace = FfmpegWorkspace::with_binary(FfmpegBinary {
                path,
                mode_label: "system",
            })
            .unwrap();
            let _ = sender.send(workspace.run(&["-version".to_owned()]));
        });

        let error = receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("ffmpeg run should not block on stderr")
            .unwrap_err();
        assert_eq!(find_studio_error(&error).unwrap().code(), "encode_failed");
        assert!(error.to_string().contains("xxxxxxxx"), "{error}");
    }

    #[cfg(unix)]
    #[test]
    fn auto_resolution_is_bounded_by_the_load_timeout() {
        let scripts = tempfile::tempdir().unwrap();
        let system = FfmpegBinary {
            path: fake_ffmpeg(scripts.path(), "sleep 5"),
            mode_label: "system",
        };

        let started = Instant::now();
        let error = FfmpegBinary::resolve_auto(system, Duration::from_millis(200)).unwrap_err();
        assert_eq!(find_studio_error(&error).unwrap().code(), "encoder_load_timeout");
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
