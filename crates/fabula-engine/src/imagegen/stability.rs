use fabula_contracts::providers::NamedProvider;
use fabula_contracts::ProviderError;
use serde_json::{json, Map, Value};

use super::{dimension_option, ImageGenProvider, IMAGE_TIMEOUT_FACTOR};
use crate::requests::{ImageGenRequest, ImageReference};
use crate::transport::HttpRequest;
use crate::ProviderContext;

const PROVIDER: &str = "Stability AI";
const DEFAULT_CFG_SCALE: f64 = 7.0;
const DEFAULT_STEPS: i64 = 30;
const DEFAULT_SAMPLES: i64 = 1;

pub struct StabilityImageProvider {
    api_base: String,
    ctx: ProviderContext,
}

impl StabilityImageProvider {
    pub fn new(ctx: ProviderContext, api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ctx,
        }
    }

    fn endpoint(&self, engine: &str) -> String {
        format!(
            "{}/v1/generation/{}/text-to-image",
            self.api_base,
            engine.trim()
        )
    }

    fn build_payload(request: &ImageGenRequest) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "text_prompts".to_string(),
            json!([{"text": request.prompt, "weight": 1}]),
        );
        payload.insert(
            "cfg_scale".to_string(),
            json!(request.option_f64("cfg_scale").unwrap_or(DEFAULT_CFG_SCALE)),
        );
        payload.insert(
            "width".to_string(),
            json!(dimension_option(request, "width")),
        );
        payload.insert(
            "height".to_string(),
            json!(dimension_option(request, "height")),
        );
        payload.insert(
            "steps".to_string(),
            json!(request.option_i64("steps").unwrap_or(DEFAULT_STEPS)),
        );
        payload.insert(
            "samples".to_string(),
            json!(request.option_i64("samples").unwrap_or(DEFAULT_SAMPLES)),
        );
        if let Some(seed) = request.option_i64("seed") {
            payload.insert("seed".to_string(), json!(seed));
        }
        Value::Object(payload)
    }

    fn extract_images(payload: &Value) -> Vec<ImageReference> {
        payload
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("base64").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(|value| ImageReference::Base64(value.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl NamedProvider for StabilityImageProvider {
    fn name(&self) -> &str {
        "stability"
    }
}

impl ImageGenProvider for StabilityImageProvider {
    fn generate_image(&self, request: ImageGenRequest) -> Result<Vec<ImageReference>, ProviderError> {
        let payload = Self::build_payload(&request);
        let http_request = HttpRequest::post_json(self.endpoint(&request.model), payload)
            .bearer(&request.api_key)
            .header("Accept", "application/json");
        let response = self.ctx.send_json(
            PROVIDER,
            &http_request,
            self.ctx.timeout(IMAGE_TIMEOUT_FACTOR),
        )?;
        let images = Self::extract_images(&response);
        if images.is_empty() {
            return Err(ProviderError::empty_response(PROVIDER));
        }
        Ok(images)
    }
}
