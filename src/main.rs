use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::error;

use lottie_studio::capture::encode_png;
use lottie_studio::config::ExportSettings;
use lottie_studio::edits::{Assignment, EditRequest};
use lottie_studio::encoder::FfmpegMode;
use lottie_studio::error_codes::{error_envelope, StudioError};
use lottie_studio::export::FfmpegBackends;
use lottie_studio::player::{AnimationPlayer, HeadlessPlayer};
use lottie_studio::session::Session;
use lottie_studio::studio::run_studio;
use lottie_studio::velato_player::VelatoPlayer;

#[derive(Debug, Parser)]
#[command(name = "lottie-studio")]
#[command(about = "Inspect, retext, recolor and export Lottie animations")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate an animation and list its editable text layers
    Inspect {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Apply text/color edits and write the modified JSON
    Edit {
        file: PathBuf,
        #[command(flatten)]
        edits: EditArgs,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Render a single frame to PNG
    Preview {
        file: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        frame: f64,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Export MP4, falling back to a WebM recording
    Export {
        file: PathBuf,
        #[command(flatten)]
        edits: EditArgs,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long = "out-dir")]
        out_dir: Option<PathBuf>,
        #[arg(long, value_enum)]
        ffmpeg: Option<FfmpegMode>,
        #[arg(long = "no-fallback")]
        no_fallback: bool,
        #[arg(long)]
        json: bool,
    },
    /// Interactive session reading commands from stdin
    Studio {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct EditArgs {
    /// Replace text: CHOICE=TEXT (repeatable)
    #[arg(long = "text", value_name = "CHOICE=TEXT")]
    text: Vec<Assignment>,
    /// Recolor text: CHOICE=#rrggbb (repeatable)
    #[arg(long = "color", value_name = "CHOICE=#RRGGBB")]
    color: Vec<Assignment>,
}

impl EditArgs {
    fn requests(&self) -> Vec<EditRequest> {
        self.text
            .iter()
            .cloned()
            .map(EditRequest::text)
            .chain(self.color.iter().cloned().map(EditRequest::color))
            .collect()
    }
}

fn version_string() -> &'static str {
    match option_env!("LOTTIE_STUDIO_GIT_HASH") {
        Some(hash) => {
            let version = format!("{} ({hash})", env!("CARGO_PKG_VERSION"));
            Box::leak(version.into_boxed_str())
        }
        None => env!("CARGO_PKG_VERSION"),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let json_errors = matches!(
        cli.command,
        Commands::Inspect { json: true, .. } | Commands::Export { json: true, .. }
    );

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if json_errors {
                let envelope = error_envelope(&error);
                match serde_json::to_string_pretty(&envelope) {
                    Ok(text) => println!("{text}"),
                    Err(_) => println!("{{\"ok\":false}}"),
                }
            } else {
                error!("{error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Inspect { file, json } => run_inspect(&file, json),
        Commands::Edit {
            file,
            edits,
            output,
        } => run_edit(&file, &edits, &output),
        Commands::Preview {
            file,
            frame,
            config,
            output,
        } => run_preview(&file, frame, config.as_deref(), &output),
        Commands::Export {
            file,
            edits,
            config,
            out_dir,
            ffmpeg,
            no_fallback,
            json,
        } => {
            let mut settings = load_settings(config.as_deref())?;
            if let Some(out_dir) = out_dir {
                settings.output.dir = out_dir;
            }
            if let Some(mode) = ffmpeg {
                settings.ffmpeg = mode;
            }
            if no_fallback {
                settings.fallback.enabled = false;
            }
            run_export(&file, &edits, settings, json)
        }
        Commands::Studio { config } => {
            let settings = load_settings(config.as_deref())?;
            let player = VelatoPlayer::new(settings.background);
            let mut session = Session::new(settings, Box::new(player), Box::new(FfmpegBackends));
            let stdin = io::stdin();
            run_studio(&mut session, stdin.lock(), io::stdout())
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<ExportSettings> {
    match path {
        Some(path) => ExportSettings::load(path),
        None => Ok(ExportSettings::default()),
    }
}

fn headless_session(file: &Path) -> Result<Session> {
    let mut session = Session::new(
        ExportSettings::default(),
        Box::new(HeadlessPlayer::new()),
        Box::new(FfmpegBackends),
    );
    session.upload_path(file)?;
    Ok(session)
}

fn run_inspect(file: &Path, json: bool) -> Result<()> {
    let session = headless_session(file)?;
    let document = session.document().ok_or(StudioError::NoAnimation)?;
    let meta = document.meta();

    if json {
        let report = json!({
            "ok": true,
            "file": file.display().to_string(),
            "version": meta.version,
            "name": meta.name,
            "frame_rate": meta.frame_rate,
            "in_point": meta.in_point,
            "out_point": meta.out_point,
            "total_frames": meta.total_frames(),
            "duration_seconds": meta.duration_seconds(),
            "width": meta.width,
            "height": meta.height,
            "layers": meta.layer_count,
            "text_layers": session.text_layers().entries(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
        return Ok(());
    }

    println!(
        "OK: {} (v{}, {}x{}, {} fps, {} frames, {:.2}s)",
        file.display(),
        meta.version,
        meta.width,
        meta.height,
        meta.frame_rate,
        meta.total_frames(),
        meta.duration_seconds()
    );
    println!("Layers: {}", meta.layer_count);
    println!("Text layers: {}", session.text_layers().len());
    for entry in session.text_layers().entries() {
        println!(
            "  [{}] {} (layer {}): {}",
            entry.choice, entry.name, entry.layer_index, entry.text
        );
    }
    Ok(())
}

fn run_edit(file: &Path, edits: &EditArgs, output: &Path) -> Result<()> {
    let mut session = headless_session(file)?;
    for request in edits.requests() {
        session.apply(&request)?;
    }
    session.save(output)?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn run_preview(file: &Path, frame: f64, config: Option<&Path>, output: &Path) -> Result<()> {
    let settings = load_settings(config)?;
    let player = VelatoPlayer::new(settings.background);
    let mut session = Session::new(settings, Box::new(player), Box::new(FfmpegBackends));
    let meta = session.upload_path(file)?.meta().clone();
    let (width, height) = session.settings().raster_size(meta.width, meta.height)?;

    let player = session.player_mut();
    player.seek(frame)?;
    let raster = player.rasterize(width, height)?;
    let png = encode_png(&raster)?;
    std::fs::write(output, png).with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {} ({}x{}, frame {:.2})", output.display(), width, height, frame);
    Ok(())
}

fn run_export(file: &Path, edits: &EditArgs, settings: ExportSettings, json: bool) -> Result<()> {
    let player = VelatoPlayer::new(settings.background);
    let mut session = Session::new(settings, Box::new(player), Box::new(FfmpegBackends));
    session.upload_path(file)?;
    for request in edits.requests() {
        session.apply(&request)?;
    }

    let outcome = session.export()?;
    if json {
        let report = json!({ "ok": true, "export": outcome });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        if let Some(reason) = &outcome.fallback_reason {
            println!("MP4 export failed ({reason}); recorded WebM instead");
        }
        println!(
            "Wrote {} ({} bytes, {} frames)",
            outcome.path.display(),
            outcome.bytes,
            outcome.frames
        );
    }
    Ok(())
}
