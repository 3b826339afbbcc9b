use serde::Serialize;

use crate::document::AnimationDocument;
use crate::error_codes::StudioError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextLayerEntry {
    /// Position in the user-facing selection list.
    pub choice: usize,
    /// Position of the layer in the document's `layers` array.
    pub layer_index: usize,
    pub name: String,
    pub text: String,
}

/// Layers whose text resolves to non-empty content, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextLayerIndex {
    entries: Vec<TextLayerEntry>,
}

impl TextLayerIndex {
    pub fn build(document: &AnimationDocument) -> Self {
        let entries = document
            .layers()
            .into_iter()
            .filter_map(|layer| {
                let text = layer.text?;
                Some((layer.index, layer.name, text))
            })
            .enumerate()
            .map(|(choice, (layer_index, name, text))| TextLayerEntry {
                choice,
                layer_index,
                name: name.unwrap_or_else(|| format!("Layer {}", layer_index + 1)),
                text,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[TextLayerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, choice: usize) -> Result<&TextLayerEntry, StudioError> {
        self.entries
            .get(choice)
            .ok_or(StudioError::SelectionOutOfRange {
                choice,
                available: self.entries.len(),
            })
    }

    pub fn layer_index(&self, choice: usize) -> Result<usize, StudioError> {
        self.resolve(choice).map(|entry| entry.layer_index)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn text_layer(name: Option<&str>, text: &str) -> serde_json::Value {
        let mut layer = json!({
            "ty": 5,
            "t": { "d": { "k": [ { "t": 0, "s": { "t": text } } ] } }
        });
        if let Some(name) = name {
            layer["nm"] = json!(name);
        }
        layer
    }

    #[test]
    fn maps_choices_to_underlying_layer_positions() {
        let document = AnimationDocument::from_value(json!({
            "v": "5.5.2",
            "fr": 24,
            "op": 48,
            "layers": [
                { "ty": 4, "nm": "shape" },
                text_layer(Some("headline"), "Big sale"),
                text_layer(Some("empty"), ""),
                { "ty": 5, "nm": "broken", "t": { "d": { "k": [] } } },
                text_layer(None, "50% off")
            ]
        }))
        .unwrap();

        let index = TextLayerIndex::build(&document);
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[0].name, "headline");
        assert_eq!(index.layer_index(0).unwrap(), 1);
        assert_eq!(index.entries()[1].name, "Layer 5");
        assert_eq!(index.entries()[1].text, "50% off");
        assert_eq!(index.layer_index(1).unwrap(), 4);
    }

    #[test]
    fn out_of_range_choice_reports_available_count() {
        let document = AnimationDocument::from_value(json!({
            "v": "5.5.2",
            "fr": 24,
            "layers": [text_layer(Some("only"), "hi")]
        }))
        .unwrap();
        let index = TextLayerIndex::build(&document);

        match index.resolve(3) {
            Err(StudioError::SelectionOutOfRange { choice, available }) => {
                assert_eq!((choice, available), (3, 1));
            }
            other => panic!("expected out-of-range error, got {other:?}"),
        }
    }
}
