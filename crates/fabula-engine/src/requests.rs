//! Canonical requests handed to provider adapters, and the results they
//! return.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use fabula_contracts::validation::clamp_num_results;
use fabula_contracts::ProviderError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::imaging::{load_from_bytes, prepare_for_vision, CanonicalImage};

pub const MAX_FEW_SHOT_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 1000,
            top_p: 1.0,
            top_k: None,
            thinking_budget: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub image_base64: String,
    pub story: String,
}

impl FewShotExample {
    /// `None` when either side is blank. A `data:<mime>;base64,` prefix is
    /// dropped from the image.
    pub fn new(image_base64: &str, story: &str) -> Option<Self> {
        let image = strip_data_url_prefix(image_base64.trim());
        let story = story.trim();
        if image.is_empty() || story.is_empty() {
            return None;
        }
        Some(Self {
            image_base64: image.to_string(),
            story: story.to_string(),
        })
    }

    /// Reads a JSON array of `{image_base64, story}` objects. Only the first
    /// five entries are looked at; incomplete entries among them are dropped.
    pub fn parse_list(value: &Value) -> Vec<Self> {
        let Some(rows) = value.as_array() else {
            return Vec::new();
        };
        rows.iter()
            .take(MAX_FEW_SHOT_EXAMPLES)
            .filter_map(|row| {
                let image = row.get("image_base64").and_then(Value::as_str)?;
                let story = row.get("story").and_then(Value::as_str)?;
                Self::new(image, story)
            })
            .collect()
    }

    /// Decodes the example image and re-encodes it exactly like a request
    /// image, so every image an adapter sends is a bounded base64 JPEG.
    pub fn normalized(&self, max_dimension: u32) -> Result<Self, ProviderError> {
        let compact: String = self
            .image_base64
            .chars()
            .filter(|ch| !ch.is_ascii_whitespace())
            .collect();
        let bytes = BASE64.decode(compact.as_bytes()).map_err(|err| {
            ProviderError::image_decode(format!("Invalid few-shot example image: {err}"))
        })?;
        let image = load_from_bytes(&bytes)?;
        Ok(Self {
            image_base64: prepare_for_vision(image, max_dimension)?,
            story: self.story.clone(),
        })
    }
}

/// The prefix of `examples` an adapter is allowed to send.
pub fn honored_examples(examples: &[FewShotExample]) -> &[FewShotExample] {
    &examples[..examples.len().min(MAX_FEW_SHOT_EXAMPLES)]
}

fn strip_data_url_prefix(raw: &str) -> &str {
    if raw.starts_with("data:") {
        if let Some((_, payload)) = raw.split_once(',') {
            return payload.trim();
        }
    }
    raw
}

/// Built once per story call and moved into exactly one adapter.
pub struct GenerationRequest {
    pub images: Vec<CanonicalImage>,
    pub api_key: String,
    pub model: String,
    pub sampling: SamplingParams,
    pub few_shot_examples: Vec<FewShotExample>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub api_key: String,
    pub num_results: usize,
    pub engine_id: Option<String>,
}

impl SearchRequest {
    pub fn new(
        query: impl Into<String>,
        api_key: impl Into<String>,
        num_results: i64,
        engine_id: Option<String>,
    ) -> Self {
        Self {
            query: query.into(),
            api_key: api_key.into(),
            num_results: clamp_num_results(num_results),
            engine_id: engine_id
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct ImageGenRequest {
    pub prompt: String,
    pub api_key: String,
    pub model: String,
    pub options: Map<String, Value>,
}

impl ImageGenRequest {
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Accepts JSON numbers and numeric strings (CLI `--option n=2`).
    pub fn option_i64(&self, key: &str) -> Option<i64> {
        match self.options.get(key)? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value.round() as i64)),
            Value::String(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn option_f64(&self, key: &str) -> Option<f64> {
        match self.options.get(key)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub thumbnail: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A generated image: a remote URL, or inline base64. Serialized as a plain
/// string either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ImageReference {
    Url(String),
    Base64(String),
}
