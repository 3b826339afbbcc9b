use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::document::{AnimationDocument, Rgb};
use crate::error_codes::StudioError;
use crate::player::AnimationPlayer;
use crate::text_layers::TextLayerIndex;

/// Replaces the text of the layer behind `choice`.
///
/// The player is mutated first; the document only changes once the player
/// accepted the edit. The index is rebuilt afterwards.
pub fn set_text(
    document: &mut AnimationDocument,
    player: &mut dyn AnimationPlayer,
    index: &mut TextLayerIndex,
    choice: usize,
    text: &str,
) -> Result<()> {
    if text.trim().is_empty() {
        return Err(StudioError::EmptyText.into());
    }
    let layer_index = index.layer_index(choice)?;

    player
        .set_text(layer_index, text)
        .with_context(|| format!("renderer rejected text for layer {layer_index}"))?;
    document.set_layer_text(layer_index, text)?;
    *index = TextLayerIndex::build(document);

    info!(choice, layer_index, chars = text.chars().count(), "text updated");
    Ok(())
}

pub fn set_fill_color(
    document: &mut AnimationDocument,
    player: &mut dyn AnimationPlayer,
    index: &TextLayerIndex,
    choice: usize,
    color: &str,
) -> Result<()> {
    let color: Rgb = color.parse()?;
    let layer_index = index.layer_index(choice)?;

    player
        .set_fill_color(layer_index, color)
        .with_context(|| format!("renderer rejected color for layer {layer_index}"))?;
    document.set_layer_fill_color(layer_index, color)?;

    info!(choice, layer_index, %color, "fill color updated");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKind {
    Text(String),
    Color(String),
}

/// One `CHOICE=VALUE` edit from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub choice: usize,
    pub kind: EditKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub choice: usize,
    pub value: String,
}

impl FromStr for Assignment {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let Some((choice, value)) = raw.split_once('=') else {
            bail!("expected CHOICE=VALUE, got '{raw}'");
        };
        let choice = choice
            .trim()
            .parse::<usize>()
            .with_context(|| format!("'{}' is not a text layer number", choice.trim()))?;
        Ok(Self {
            choice,
            value: value.to_owned(),
        })
    }
}

impl EditRequest {
    pub fn text(assignment: Assignment) -> Self {
        Self {
            choice: assignment.choice,
            kind: EditKind::Text(assignment.value),
        }
    }

    pub fn color(assignment: Assignment) -> Self {
        Self {
            choice: assignment.choice,
            kind: EditKind::Color(assignment.value),
        }
    }
}
