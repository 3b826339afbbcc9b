use std::time::Duration;

use anyhow::Error;
use serde::Serialize;
use thiserror::Error;

/// Broad buckets used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MalformedInput,
    Renderer,
    Edit,
    Export,
    Usage,
}

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("file is not valid animation JSON: {0}")]
    MalformedInput(String),
    #[error("animation is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("animation field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("renderer initialization failed: {0}")]
    RendererInit(String),
    #[error("renderer rejected animation data: {0}")]
    DataFailed(String),
    #[error("no animation is loaded")]
    NoAnimation,
    #[error("text layer selection {choice} is out of range ({available} text layers)")]
    SelectionOutOfRange { choice: usize, available: usize },
    #[error("replacement text is empty")]
    EmptyText,
    #[error("invalid color '{0}', expected #rrggbb")]
    InvalidColor(String),
    #[error("an export is already in progress")]
    ExportInProgress,
    #[error("video encoder is unavailable: {0}")]
    EncoderUnavailable(String),
    #[error("video encoder did not load within {0:?}")]
    EncoderLoadTimeout(Duration),
    #[error("animation has no frames to capture")]
    NoSamples,
    #[error("all {0} captured frames are blank")]
    BlankFrames(u32),
    #[error("video encoding failed: {0}")]
    EncodeFailed(String),
    #[error("encoded output is {actual} bytes, expected at least {minimum}")]
    UndersizedOutput { actual: usize, minimum: usize },
    #[error("fallback recording failed: {0}")]
    RecordingFailed(String),
    #[error("export failed (mp4: {primary}; webm fallback: {fallback})")]
    ExportFailed { primary: String, fallback: String },
}

impl StudioError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::RendererInit(_) => "renderer_init",
            Self::DataFailed(_) => "data_failed",
            Self::NoAnimation => "no_animation",
            Self::SelectionOutOfRange { .. } => "selection_out_of_range",
            Self::EmptyText => "empty_text",
            Self::InvalidColor(_) => "invalid_color",
            Self::ExportInProgress => "export_in_progress",
            Self::EncoderUnavailable(_) => "encoder_unavailable",
            Self::EncoderLoadTimeout(_) => "encoder_load_timeout",
            Self::NoSamples => "no_samples",
            Self::BlankFrames(_) => "blank_frames",
            Self::EncodeFailed(_) => "encode_failed",
            Self::UndersizedOutput { .. } => "undersized_output",
            Self::RecordingFailed(_) => "recording_failed",
            Self::ExportFailed { .. } => "export_failed",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedInput(_) | Self::MissingField(_) | Self::InvalidField { .. } => {
                ErrorCategory::MalformedInput
            }
            Self::RendererInit(_) | Self::DataFailed(_) => ErrorCategory::Renderer,
            Self::NoAnimation
            | Self::SelectionOutOfRange { .. }
            | Self::EmptyText
            | Self::InvalidColor(_) => ErrorCategory::Edit,
            Self::ExportInProgress => ErrorCategory::Usage,
            Self::EncoderUnavailable(_)
            | Self::EncoderLoadTimeout(_)
            | Self::NoSamples
            | Self::BlankFrames(_)
            | Self::EncodeFailed(_)
            | Self::UndersizedOutput { .. }
            | Self::RecordingFailed(_)
            | Self::ExportFailed { .. } => ErrorCategory::Export,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

/// Finds the first classified failure anywhere in an error chain.
pub fn find_studio_error(error: &Error) -> Option<&StudioError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StudioError>())
}

pub fn error_envelope(error: &Error) -> ErrorEnvelope {
    let classified = find_studio_error(error);
    ErrorEnvelope {
        ok: false,
        error: ErrorEnvelopeBody {
            code: classified.map_or("internal", StudioError::code).to_owned(),
            category: classified.map(StudioError::category),
            message: error.to_string(),
            causes: error.chain().skip(1).map(ToString::to_string).collect(),
        },
    }
}

/// One-line rendering of an error and its causes, used for notices.
pub fn describe_chain(error: &Error) -> String {
    error
        .chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};

    use super::*;

    #[test]
    fn classification_survives_added_context() {
        let error = Err::<(), _>(StudioError::EmptyText)
            .context("failed to edit layer 2")
            .unwrap_err();

        let found = find_studio_error(&error).expect("studio error should be in chain");
        assert_eq!(found.code(), "empty_text");
        assert_eq!(found.category(), ErrorCategory::Edit);
    }

    #[test]
    fn envelope_uses_internal_code_for_unclassified_errors() {
        let envelope = error_envelope(&anyhow!("boom"));
        assert!(!envelope.ok);
        assert_eq!(envelope.error.code, "internal");
        assert!(envelope.error.category.is_none());
    }

    #[test]
    fn envelope_lists_causes_outermost_first() {
        let error = Err::<(), _>(StudioError::MissingField("fr"))
            .context("failed to load intro.json")
            .unwrap_err();
        let envelope = error_envelope(&error);

        assert_eq!(envelope.error.code, "missing_field");
        assert_eq!(envelope.error.message, "failed to load intro.json");
        assert_eq!(
            envelope.error.causes,
            vec!["animation is missing required field `fr`".to_owned()]
        );
        assert_eq!(
            describe_chain(&error),
            "failed to load intro.json: animation is missing required field `fr`"
        );
    }
}
