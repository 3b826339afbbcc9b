use std::io::{BufRead, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::notices::{Notice, NoticeLevel};
use crate::session::Session;

const HELP: &str = "\
commands:
  load <path>            upload a Lottie JSON file
  layers                 list editable text layers
  text <n> <text...>     replace the text of text layer n
  color <n> <#rrggbb>    recolor text layer n
  seek <frame>           go to a frame and stop
  play | pause           control playback
  tick <ms>              advance playback by ms
  export                 export MP4 (WebM fallback)
  save <path>            write the edited JSON
  notices                show notices from the last 10 seconds
  help                   show this help
  quit                   leave the studio";

enum Flow {
    Continue,
    Quit,
}

/// Line-driven studio loop. Failures become notices; only I/O on the
/// terminal itself ends the loop early.
pub fn run_studio<R: BufRead, W: Write>(session: &mut Session, input: R, mut output: W) -> Result<()> {
    writeln!(output, "lottie-studio ready. Type `help` for commands.")?;
    for line in input.lines() {
        let line = line.context("failed reading studio input")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match dispatch(session, line, &mut output) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(error) => {
                let summary = summary_for(line);
                let notice = session
                    .notices_mut()
                    .error(summary, &error, Instant::now())
                    .clone();
                print_notice(&mut output, &notice)?;
            }
        }
    }
    Ok(())
}

fn dispatch<W: Write>(session: &mut Session, line: &str, output: &mut W) -> Result<Flow> {
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(command, rest)| (command, rest.trim()));

    match command {
        "load" => {
            let path = required(rest, "load <path>")?;
            let meta = session.upload_path(Path::new(path))?.meta().clone();
            let message = format!(
                "loaded {} (v{}, {} layers, {:.2}s, {} text layers)",
                path,
                meta.version,
                meta.layer_count,
                meta.duration_seconds(),
                session.text_layers().len()
            );
            info_notice(session, output, message)?;
        }
        "layers" => {
            if session.document().is_none() {
                return Err(crate::error_codes::StudioError::NoAnimation.into());
            }
            if session.text_layers().is_empty() {
                writeln!(output, "no editable text layers")?;
            }
            for entry in session.text_layers().entries() {
                writeln!(
                    output,
                    "[{}] {} (layer {}): {}",
                    entry.choice, entry.name, entry.layer_index, entry.text
                )?;
            }
        }
        "text" => {
            let (choice, text) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: text <n> <text...>"))?;
            session.set_text(parse_choice(choice)?, text.trim())?;
            info_notice(session, output, format!("text layer {choice} updated"))?;
        }
        "color" => {
            let (choice, color) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: color <n> <#rrggbb>"))?;
            session.set_color(parse_choice(choice)?, color.trim())?;
            info_notice(session, output, format!("text layer {choice} recolored"))?;
        }
        "seek" => {
            let frame = required(rest, "seek <frame>")?
                .parse::<f64>()
                .context("frame must be a number")?;
            session.player_mut().seek(frame)?;
            writeln!(output, "frame {:.2}", session.player().current_frame())?;
        }
        "play" => session.player_mut().play(),
        "pause" => session.player_mut().pause(),
        "tick" => {
            let millis = required(rest, "tick <ms>")?
                .parse::<u64>()
                .context("tick expects milliseconds")?;
            session.player_mut().tick(Duration::from_millis(millis));
            writeln!(output, "frame {:.2}", session.player().current_frame())?;
        }
        "export" => {
            let outcome = session.export()?;
            let mut message = format!(
                "exported {} ({} bytes, {} frames)",
                outcome.path.display(),
                outcome.bytes,
                outcome.frames
            );
            if let Some(reason) = &outcome.fallback_reason {
                message.push_str(&format!(" using webm fallback after: {reason}"));
            }
            info_notice(session, output, message)?;
        }
        "save" => {
            let path = required(rest, "save <path>")?;
            session.save(Path::new(path))?;
            info_notice(session, output, format!("saved {path}"))?;
        }
        "notices" => {
            let active = session.notices_mut().active(Instant::now()).to_vec();
            if active.is_empty() {
                writeln!(output, "no recent notices")?;
            }
            for notice in &active {
                print_notice(output, notice)?;
            }
        }
        "help" => writeln!(output, "{HELP}")?,
        "quit" | "exit" => return Ok(Flow::Quit),
        other => return Err(anyhow!("unknown command '{other}', try `help`")),
    }
    Ok(Flow::Continue)
}

fn required<'a>(rest: &'a str, usage: &str) -> Result<&'a str> {
    if rest.is_empty() {
        Err(anyhow!("usage: {usage}"))
    } else {
        Ok(rest)
    }
}

fn parse_choice(raw: &str) -> Result<usize> {
    raw.parse::<usize>()
        .with_context(|| format!("'{raw}' is not a text layer number"))
}

fn summary_for(line: &str) -> &'static str {
    match line.split_whitespace().next().unwrap_or_default() {
        "load" => "Upload failed",
        "text" => "Text update failed",
        "color" => "Color update failed",
        "export" => "Export failed",
        "save" => "Save failed",
        _ => "Command failed",
    }
}

fn info_notice<W: Write>(session: &mut Session, output: &mut W, message: String) -> Result<()> {
    let notice = session.notices_mut().info(message, Instant::now()).clone();
    print_notice(output, &notice)
}

fn print_notice<W: Write>(output: &mut W, notice: &Notice) -> Result<()> {
    match notice.level {
        NoticeLevel::Info => writeln!(output, "{}", notice.message)?,
        NoticeLevel::Error => match notice.code {
            Some(code) => writeln!(output, "error [{code}]: {}", notice.message)?,
            None => writeln!(output, "error: {}", notice.message)?,
        },
    }
    Ok(())
}
