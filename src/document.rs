use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error_codes::StudioError;

/// An uploaded Lottie document.
///
/// The whole JSON tree is kept so that keys this crate never looks at survive
/// an edit-and-save cycle. [`AnimationMeta`] is a typed view of the header
/// fields, refreshed whenever the tree is re-validated.
#[derive(Debug, Clone)]
pub struct AnimationDocument {
    root: Value,
    meta: AnimationMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationMeta {
    pub version: String,
    pub name: Option<String>,
    pub frame_rate: f64,
    pub in_point: f64,
    pub out_point: f64,
    pub width: u32,
    pub height: u32,
    pub layer_count: usize,
}

impl AnimationMeta {
    pub fn total_frames(&self) -> f64 {
        (self.out_point - self.in_point).max(0.0)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.total_frames() / self.frame_rate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub index: usize,
    pub name: Option<String>,
    pub ind: Option<i64>,
    pub layer_type: Option<i64>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(default)]
    v: Option<Value>,
    #[serde(default)]
    nm: Option<String>,
    #[serde(default)]
    fr: Option<Value>,
    #[serde(default)]
    ip: Option<f64>,
    #[serde(default)]
    op: Option<f64>,
    #[serde(default)]
    w: Option<f64>,
    #[serde(default)]
    h: Option<f64>,
    #[serde(default)]
    layers: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLayer {
    #[serde(default)]
    nm: Option<String>,
    #[serde(default)]
    ind: Option<i64>,
    #[serde(default)]
    ty: Option<i64>,
}

impl AnimationDocument {
    pub fn parse(source: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(source).map_err(|error| {
            StudioError::MalformedInput(format!(
                "line {}, column {}: {error}",
                error.line(),
                error.column()
            ))
        })?;
        Self::from_value(root)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read animation {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn from_value(root: Value) -> Result<Self> {
        let meta = validate(&root)?;
        Ok(Self { root, meta })
    }

    pub fn meta(&self) -> &AnimationMeta {
        &self.meta
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn layers(&self) -> Vec<LayerSummary> {
        layer_array(&self.root)
            .iter()
            .enumerate()
            .map(|(index, layer)| {
                let raw = RawLayer::deserialize(layer).unwrap_or_default();
                LayerSummary {
                    index,
                    name: raw.nm,
                    ind: raw.ind,
                    layer_type: raw.ty,
                    text: text_at(layer).map(str::to_owned),
                }
            })
            .collect()
    }

    pub fn layer_text(&self, layer_index: usize) -> Option<&str> {
        layer_array(&self.root).get(layer_index).and_then(text_at)
    }

    pub fn layer_fill_color(&self, layer_index: usize) -> Option<Rgb> {
        let style = layer_array(&self.root)
            .get(layer_index)
            .and_then(text_style)?;
        Rgb::from_unit_floats(style.get("fc")?)
    }

    pub fn set_layer_text(&mut self, layer_index: usize, text: &str) -> Result<()> {
        set_text_in(&mut self.root, layer_index, text)
    }

    pub fn set_layer_fill_color(&mut self, layer_index: usize, color: Rgb) -> Result<()> {
        set_fill_color_in(&mut self.root, layer_index, color)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(&self.root).context("failed to serialize animation")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json_string()?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }
}

fn validate(root: &Value) -> Result<AnimationMeta> {
    if !root.is_object() {
        return Err(StudioError::MalformedInput("top level must be a JSON object".to_owned()).into());
    }
    let header = RawHeader::deserialize(root)
        .map_err(|error| StudioError::MalformedInput(error.to_string()))?;

    let version = match header.v {
        Some(Value::String(version)) if !version.trim().is_empty() => version,
        Some(Value::Number(number)) if number.as_f64() != Some(0.0) => number.to_string(),
        Some(_) | None => return Err(StudioError::MissingField("v").into()),
    };

    let layer_count = match header.layers {
        Some(Value::Array(layers)) => layers.len(),
        Some(_) => {
            return Err(StudioError::InvalidField {
                field: "layers",
                reason: "expected an array".to_owned(),
            }
            .into())
        }
        None => return Err(StudioError::MissingField("layers").into()),
    };

    let frame_rate = match header.fr {
        Some(value) => value.as_f64().ok_or(StudioError::InvalidField {
            field: "fr",
            reason: "expected a number".to_owned(),
        })?,
        None => return Err(StudioError::MissingField("fr").into()),
    };
    if !(frame_rate.is_finite() && frame_rate > 0.0) {
        return Err(StudioError::InvalidField {
            field: "fr",
            reason: format!("frame rate must be > 0, got {frame_rate}"),
        }
        .into());
    }

    let in_point = header.ip.unwrap_or(0.0);
    let out_point = header.op.unwrap_or(in_point);

    Ok(AnimationMeta {
        version,
        name: header.nm,
        frame_rate,
        in_point,
        out_point,
        width: dimension(header.w),
        height: dimension(header.h),
        layer_count,
    })
}

fn dimension(value: Option<f64>) -> u32 {
    value
        .filter(|value| value.is_finite() && *value > 0.0)
        .map_or(0, |value| value.round() as u32)
}

fn layer_array(root: &Value) -> &[Value] {
    root.get("layers")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

// Text lives at layers[i].t.d.k[0].s; nothing else is searched.
fn text_style(layer: &Value) -> Option<&Map<String, Value>> {
    layer
        .pointer("/t/d/k/0/s")
        .and_then(Value::as_object)
}

fn text_style_mut(root: &mut Value, layer_index: usize) -> Result<&mut Map<String, Value>> {
    let layer_count = layer_array(root).len();
    let layer = root
        .get_mut("layers")
        .and_then(Value::as_array_mut)
        .and_then(|layers| layers.get_mut(layer_index))
        .ok_or(StudioError::SelectionOutOfRange {
            choice: layer_index,
            available: layer_count,
        })?;
    layer
        .pointer_mut("/t/d/k/0/s")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            StudioError::InvalidField {
                field: "layers",
                reason: format!("layer {layer_index} has no text document"),
            }
            .into()
        })
}

fn text_at(layer: &Value) -> Option<&str> {
    text_style(layer)?
        .get("t")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

/// Writes `text` into the text document of `layers[layer_index]`.
pub(crate) fn set_text_in(root: &mut Value, layer_index: usize, text: &str) -> Result<()> {
    let style = text_style_mut(root, layer_index)?;
    style.insert("t".to_owned(), Value::String(text.to_owned()));
    Ok(())
}

pub(crate) fn set_fill_color_in(root: &mut Value, layer_index: usize, color: Rgb) -> Result<()> {
    let style = text_style_mut(root, layer_index)?;
    style.insert("fc".to_owned(), color.to_unit_floats());
    Ok(())
}

/// 8-bit RGB color as entered through a `#rrggbb` color field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    pub fn to_unit_floats(self) -> Value {
        let channel = |value: u8| {
            let unit = f64::from(value) / 255.0;
            // Keep the JSON short: 0.2 instead of 0.20000000298023224.
            Value::from((unit * 1000.0).round() / 1000.0)
        };
        Value::Array(vec![channel(self.r), channel(self.g), channel(self.b)])
    }

    /// Lottie stores colors as `[r, g, b(, a)]` in `0..=1`.
    pub fn from_unit_floats(value: &Value) -> Option<Self> {
        let channels = value.as_array()?;
        if channels.len() < 3 {
            return None;
        }
        let channel = |index: usize| -> Option<u8> {
            let unit = channels[index].as_f64()?;
            Some((unit.clamp(0.0, 1.0) * 255.0).round() as u8)
        };
        Some(Self {
            r: channel(0)?,
            g: channel(1)?,
            b: channel(2)?,
        })
    }
}

impl FromStr for Rgb {
    type Err = StudioError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || StudioError::InvalidColor(raw.to_owned());
        let hex = raw.trim().strip_prefix('#').ok_or_else(invalid)?;
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error_codes::find_studio_error;

    fn sample() -> Value {
        json!({
            "v": "5.7.4",
            "nm": "greeting",
            "fr": 30,
            "ip": 0,
            "op": 90,
            "w": 512,
            "h": 256,
            "meta": { "g": "bodymovin" },
            "layers": [
                { "ty": 4, "nm": "background", "ind": 1, "shapes": [] },
                {
                    "ty": 5,
                    "nm": "title",
                    "ind": 2,
                    "t": { "d": { "k": [ { "t": 0, "s": { "t": "Hello", "s": 48, "fc": [1, 0, 0] } } ] } }
                }
            ]
        })
    }

    fn error_code(error: anyhow::Error) -> &'static str {
        find_studio_error(&error)
            .map(StudioError::code)
            .expect("error should be classified")
    }

    #[test]
    fn reads_header_metadata() {
        let document = AnimationDocument::from_value(sample()).expect("document should load");
        let meta = document.meta();

        assert_eq!(meta.version, "5.7.4");
        assert_eq!(meta.name.as_deref(), Some("greeting"));
        assert_eq!(meta.frame_rate, 30.0);
        assert_eq!(meta.total_frames(), 90.0);
        assert_eq!(meta.duration_seconds(), 3.0);
        assert_eq!((meta.width, meta.height), (512, 256));
        assert_eq!(meta.layer_count, 2);
    }

    #[test]
    fn rejects_missing_required_fields() {
        for field in ["v", "layers", "fr"] {
            let mut root = sample();
            root.as_object_mut().unwrap().remove(field);
            let error = AnimationDocument::from_value(root).unwrap_err();
            assert_eq!(error_code(error), "missing_field", "field {field}");
        }
    }

    #[test]
    fn rejects_zero_frame_rate_and_non_object_input() {
        let mut root = sample();
        root["fr"] = json!(0);
        assert_eq!(
            error_code(AnimationDocument::from_value(root).unwrap_err()),
            "invalid_field"
        );

        assert_eq!(
            error_code(AnimationDocument::parse("[1, 2, 3]").unwrap_err()),
            "malformed_input"
        );
        assert_eq!(
            error_code(AnimationDocument::parse("{ not json").unwrap_err()),
            "malformed_input"
        );
    }

    #[test]
    fn resolves_text_only_through_the_fixed_path() {
        let document = AnimationDocument::from_value(sample()).unwrap();
        let layers = document.layers();

        assert_eq!(layers[0].text, None);
        assert_eq!(layers[1].text.as_deref(), Some("Hello"));
        assert_eq!(layers[1].ind, Some(2));
        assert_eq!(document.layer_fill_color(1), Some(Rgb { r: 255, g: 0, b: 0 }));
    }

    #[test]
    fn mutations_preserve_unknown_keys() {
        let mut document = AnimationDocument::from_value(sample()).unwrap();
        document.set_layer_text(1, "Bonjour").unwrap();
        document
            .set_layer_fill_color(1, "#3366ff".parse().unwrap())
            .unwrap();

        let reparsed = AnimationDocument::parse(&document.to_json_string().unwrap()).unwrap();
        assert_eq!(reparsed.layer_text(1), Some("Bonjour"));
        assert_eq!(reparsed.layer_fill_color(1), Some(Rgb { r: 0x33, g: 0x66, b: 0xff }));
        assert_eq!(reparsed.root()["meta"]["g"], "bodymovin");
        assert_eq!(reparsed.root()["layers"][1]["t"]["d"]["k"][0]["s"]["s"], 48);
    }

    #[test]
    fn mutating_a_layer_without_text_fails() {
        let mut document = AnimationDocument::from_value(sample()).unwrap();
        assert!(document.set_layer_text(0, "nope").is_err());
        assert_eq!(
            error_code(document.set_layer_text(9, "nope").unwrap_err()),
            "selection_out_of_range"
        );
    }

    #[test]
    fn parses_and_formats_hex_colors() {
        let color: Rgb = "#0A0b0C".parse().unwrap();
        assert_eq!(color, Rgb { r: 10, g: 11, b: 12 });
        assert_eq!(color.to_string(), "#0a0b0c");

        for bad in ["0a0b0c", "#0a0b0", "#zzzzzz", ""] {
            assert!(bad.parse::<Rgb>().is_err(), "{bad:?} should not parse");
        }
    }
}
