use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use tempfile::TempDir;
use tracing::debug;

use crate::encoder::{drain_stderr, join_stderr, webm_stream_args, FfmpegBinary};
use crate::error_codes::StudioError;
use crate::player::RgbaFrame;

/// Live recorder used by the fallback path: frames go in as they are
/// played, a finished WebM comes out.
pub trait StreamRecorder {
    fn write_frame(&mut self, frame: RgbaFrame) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

pub struct FfmpegStreamRecorder {
    width: u32,
    height: u32,
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
    output_path: PathBuf,
    _scratch: TempDir,
}

impl FfmpegStreamRecorder {
    pub fn start(binary: FfmpegBinary, width: u32, height: u32, fps: u32) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("lottie-studio-rec-")
            .tempdir()
            .context("failed to create recorder scratch directory")?;
        let output_path = scratch.path().join("recording.webm");
        let args = webm_stream_args(width, height, fps, &output_path);
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);
        let worker_name = format!("lottie-studio-recorder-{}", binary.mode_label);

        let worker = thread::Builder::new()
            .name(worker_name)
            .spawn(move || run_recorder_process(&binary, &args, receiver))
            .context("failed to spawn recorder thread")?;

        Ok(Self {
            width,
            height,
            sender: Some(sender),
            worker: Some(worker),
            output_path,
            _scratch: scratch,
        })
    }
}

impl StreamRecorder for FfmpegStreamRecorder {
    fn write_frame(&mut self, frame: RgbaFrame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame is {}x{}, recorder expects {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("recorder has already been finalized"))?;
        if sender.send(frame.pixels).is_ok() {
            return Ok(());
        }

        // The worker hung up; its own error says why.
        self.sender = None;
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Err(error))) => Err(error.context("recorder stopped accepting frames")),
            _ => Err(anyhow!("recorder stopped accepting frames")),
        }
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        drop(self.sender.take());

        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("recorder thread missing"))?;
        match handle.join() {
            Ok(result) => result?,
            Err(_) => return Err(anyhow!("recorder thread panicked")),
        }

        fs::read(&self.output_path)
            .with_context(|| format!("recorder produced no file at {}", self.output_path.display()))
    }
}

impl Drop for FfmpegStreamRecorder {
    fn drop(&mut self) {
        // Closing the channel ends ffmpeg's input; wait for it before the
        // scratch directory goes away.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_recorder_process(
    binary: &FfmpegBinary,
    args: &[String],
    receiver: mpsc::Receiver<Vec<u8>>,
) -> Result<()> {
    let mut child = Command::new(&binary.path)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| binary.spawn_error(error, args))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
    let stderr_drain = drain_stderr(child.stderr.take())?;

    let mut frames = 0_u64;
    let mut write_error = None;
    while let Ok(frame) = receiver.recv() {
        if let Err(error) = stdin.write_all(&frame) {
            write_error = Some(error);
            break;
        }
        frames += 1;
    }
    drop(stdin);

    let status = child.wait().context("failed waiting for ffmpeg process")?;
    let stderr_tail = join_stderr(stderr_drain);
    if !status.success() {
        return Err(StudioError::RecordingFailed(format!(
            "ffmpeg failed with status {status} after {frames} frames (mode={}, stderr_tail='{}')",
            binary.mode_label, stderr_tail
        ))
        .into());
    }
    if let Some(error) = write_error {
        return Err(anyhow!(error).context("failed to write frame to ffmpeg stdin"));
    }
    debug!(frames, "recorder process finished");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::encoder::fake_ffmpeg;
    use crate::error_codes::find_studio_error;

    fn fake_binary(path: PathBuf) -> FfmpegBinary {
        FfmpegBinary {
            path,
            mode_label: "system",
        }
    }

    #[test]
    fn frames_must_match_the_recorder_size() {
        let scripts = tempfile::tempdir().unwrap();
        let binary = fake_binary(fake_ffmpeg(scripts.path(), "cat > /dev/null"));
        let mut recorder = FfmpegStreamRecorder::start(binary, 4, 4, 10).unwrap();

        let error = recorder.write_frame(RgbaFrame::solid(2, 2, [0; 4])).unwrap_err();
        assert!(error.to_string().contains("recorder expects 4x4"), "{error}");
    }

    #[test]
    fn stderr_flood_does_not_stall_recording() {
        let scripts = tempfile::tempdir().unwrap();
        let binary = fake_binary(fake_ffmpeg(
            scripts.path(),
            "head -c 200000 /dev/zero | tr '\\0' x >&2\ncat > /dev/null\nexit 1",
        ));
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let result = (|| -> Result<Vec<u8>> {
                let mut recorder = Box::new(FfmpegStreamRecorder::start(binary, 8, 8, 10)?);
                for _ in 0..16 {
                    recorder.write_frame(RgbaFrame::solid(8, 8, [9, 9, 9, 255]))?;
                }
                recorder.finish()
            })();
            let _ = sender.send(result);
        });

        let error = receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("recording should not block on stderr")
            .unwrap_err();
        assert_eq!(find_studio_error(&error).unwrap().code(), "recording_failed");
        assert!(error.to_string().contains("after 16 frames"), "{error}");
    }

    #[test]
    fn dropping_an_unfinished_recorder_waits_for_ffmpeg() {
        let scripts = tempfile::tempdir().unwrap();
        let marker = scripts.path().join("stdin-closed");
        let binary = fake_binary(fake_ffmpeg(
            scripts.path(),
            &format!("cat > /dev/null\necho done > '{}'", marker.display()),
        ));

        let mut recorder = FfmpegStreamRecorder::start(binary, 2, 2, 10).unwrap();
        recorder.write_frame(RgbaFrame::solid(2, 2, [1, 2, 3, 255])).unwrap();
        drop(recorder);

        assert!(marker.exists(), "ffmpeg should have exited before drop returned");
    }
}
