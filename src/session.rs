use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::config::ExportSettings;
use crate::document::AnimationDocument;
use crate::edits::{self, EditKind, EditRequest};
use crate::error_codes::StudioError;
use crate::export::{export_video, ExportBackends, ExportGate, ExportOutcome};
use crate::notices::NoticeBoard;
use crate::player::AnimationPlayer;
use crate::text_layers::TextLayerIndex;

/// Everything one upload/edit/export cycle works on.
pub struct Session {
    settings: ExportSettings,
    player: Box<dyn AnimationPlayer>,
    backends: Box<dyn ExportBackends>,
    document: Option<AnimationDocument>,
    text_layers: TextLayerIndex,
    gate: ExportGate,
    notices: NoticeBoard,
}

impl Session {
    pub fn new(
        settings: ExportSettings,
        player: Box<dyn AnimationPlayer>,
        backends: Box<dyn ExportBackends>,
    ) -> Self {
        Self {
            settings,
            player,
            backends,
            document: None,
            text_layers: TextLayerIndex::default(),
            gate: ExportGate::new(),
            notices: NoticeBoard::default(),
        }
    }

    /// Shares an export gate with other sessions.
    pub fn with_gate(mut self, gate: ExportGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn document(&self) -> Option<&AnimationDocument> {
        self.document.as_ref()
    }

    pub fn player(&self) -> &dyn AnimationPlayer {
        self.player.as_ref()
    }

    pub fn player_mut(&mut self) -> &mut dyn AnimationPlayer {
        self.player.as_mut()
    }

    pub fn text_layers(&self) -> &TextLayerIndex {
        &self.text_layers
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn notices_mut(&mut self) -> &mut NoticeBoard {
        &mut self.notices
    }

    pub fn upload_path(&mut self, path: &Path) -> Result<&AnimationDocument> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read animation {}", path.display()))?;
        self.upload_str(&source)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    /// Replaces the current animation.
    ///
    /// Malformed input leaves the current animation in place. Once the input
    /// validates the previous player instance is torn down, so a renderer
    /// failure leaves no animation loaded.
    pub fn upload_str(&mut self, source: &str) -> Result<&AnimationDocument> {
        let document = AnimationDocument::parse(source)?;

        self.player.destroy();
        self.document = None;
        self.text_layers = TextLayerIndex::default();

        self.player.load(&document)?;
        self.text_layers = TextLayerIndex::build(&document);
        info!(
            version = %document.meta().version,
            layers = document.meta().layer_count,
            text_layers = self.text_layers.len(),
            frames = document.meta().total_frames(),
            "animation loaded"
        );
        Ok(&*self.document.insert(document))
    }

    pub fn set_text(&mut self, choice: usize, text: &str) -> Result<()> {
        let document = self.document.as_mut().ok_or(StudioError::NoAnimation)?;
        edits::set_text(
            document,
            self.player.as_mut(),
            &mut self.text_layers,
            choice,
            text,
        )
    }

    pub fn set_color(&mut self, choice: usize, color: &str) -> Result<()> {
        let document = self.document.as_mut().ok_or(StudioError::NoAnimation)?;
        edits::set_fill_color(
            document,
            self.player.as_mut(),
            &self.text_layers,
            choice,
            color,
        )
    }

    pub fn apply(&mut self, edit: &EditRequest) -> Result<()> {
        match &edit.kind {
            EditKind::Text(text) => self
                .set_text(edit.choice, text)
                .with_context(|| format!("failed to set text of text layer {}", edit.choice)),
            EditKind::Color(color) => self
                .set_color(edit.choice, color)
                .with_context(|| format!("failed to set color of text layer {}", edit.choice)),
        }
    }

    pub fn export(&mut self) -> Result<ExportOutcome> {
        let _guard = self.gate.try_acquire()?;
        let document = self.document.as_ref().ok_or(StudioError::NoAnimation)?;
        export_video(
            document,
            self.player.as_mut(),
            self.backends.as_ref(),
            &self.settings,
            Utc::now(),
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let document = self.document.as_ref().ok_or(StudioError::NoAnimation)?;
        document.save(path)
    }
}
