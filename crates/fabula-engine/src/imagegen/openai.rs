use fabula_contracts::providers::NamedProvider;
use fabula_contracts::ProviderError;
use serde_json::{json, Map, Value};

use super::{ImageGenProvider, IMAGE_TIMEOUT_FACTOR};
use crate::requests::{ImageGenRequest, ImageReference};
use crate::transport::HttpRequest;
use crate::ProviderContext;

const PROVIDER: &str = "OpenAI DALL-E";
const DEFAULT_SIZE: &str = "1024x1024";
const DEFAULT_QUALITY: &str = "standard";
const DEFAULT_STYLE: &str = "vivid";

pub struct OpenAiImageProvider {
    api_base: String,
    ctx: ProviderContext,
}

impl OpenAiImageProvider {
    pub fn new(ctx: ProviderContext, api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ctx,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.api_base)
    }

    /// `n` is only honored by dall-e-2; `quality` and `style` only exist for
    /// dall-e-3.
    fn build_payload(request: &ImageGenRequest) -> Value {
        let model = request.model.trim();
        let n = if model == "dall-e-2" {
            request.option_i64("n").unwrap_or(1).clamp(1, 10)
        } else {
            1
        };
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(model));
        payload.insert("prompt".to_string(), json!(request.prompt));
        payload.insert("n".to_string(), json!(n));
        payload.insert(
            "size".to_string(),
            json!(request.option_str("size").unwrap_or(DEFAULT_SIZE)),
        );
        if model == "dall-e-3" {
            payload.insert(
                "quality".to_string(),
                json!(request.option_str("quality").unwrap_or(DEFAULT_QUALITY)),
            );
            payload.insert(
                "style".to_string(),
                json!(request.option_str("style").unwrap_or(DEFAULT_STYLE)),
            );
        }
        Value::Object(payload)
    }

    fn extract_images(payload: &Value) -> Vec<ImageReference> {
        payload
            .get("data")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let url = row.get("url").and_then(Value::as_str).map(str::trim);
                        let b64 = row.get("b64_json").and_then(Value::as_str).map(str::trim);
                        match (url, b64) {
                            (Some(url), _) if !url.is_empty() => {
                                Some(ImageReference::Url(url.to_string()))
                            }
                            (_, Some(b64)) if !b64.is_empty() => {
                                Some(ImageReference::Base64(b64.to_string()))
                            }
                            _ => None,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl NamedProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai"
    }
}

impl ImageGenProvider for OpenAiImageProvider {
    fn generate_image(&self, request: ImageGenRequest) -> Result<Vec<ImageReference>, ProviderError> {
        let payload = Self::build_payload(&request);
        let http_request = HttpRequest::post_json(self.endpoint(), payload).bearer(&request.api_key);
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
