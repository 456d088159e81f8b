use fabula_contracts::providers::NamedProvider;
use fabula_contracts::ProviderError;
use serde_json::{json, Map, Value};

use super::{
    conversation, encode_images, non_empty_story, StoryProvider, Turn, IMAGE_MIME,
    STORY_TIMEOUT_FACTOR,
};
use crate::requests::{GenerationRequest, SamplingParams};
use crate::transport::HttpRequest;
use crate::ProviderContext;

const PROVIDER: &str = "Anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicStoryProvider {
    api_base: String,
    ctx: ProviderContext,
}

impl AnthropicStoryProvider {
    pub fn new(ctx: ProviderContext, api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ctx,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.api_base)
    }

    fn build_payload(model: &str, sampling: &SamplingParams, turns: &[Turn<'_>]) -> Value {
        let messages: Vec<Value> = turns
            .iter()
            .map(|turn| match turn {
                Turn::User { text, images } => {
                    let mut content: Vec<Value> = images
                        .iter()
                        .map(|image| {
                            json!({
                                "type": "image",
                                "source": {
                                    "type": "base64",
                                    "media_type": IMAGE_MIME,
                                    "data": image,
                                },
                            })
                        })
                        .collect();
                    content.push(json!({"type": "text", "text": text}));
                    json!({"role": "user", "content": content})
                }
                Turn::Assistant { text } => json!({"role": "assistant", "content": text}),
            })
            .collect();

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(model));
        payload.insert("messages".to_string(), Value::Array(messages));
        payload.insert("max_tokens".to_string(), json!(sampling.max_tokens));
        payload.insert("temperature".to_string(), json!(sampling.temperature));
        payload.insert("top_p".to_string(), json!(sampling.top_p));
        if let Some(top_k) = sampling.top_k {
            payload.insert("top_k".to_string(), json!(top_k));
        }
        Value::Object(payload)
    }

    /// First `text` block of `content`.
    fn extract_story(payload: &Value) -> Option<String> {
        payload
            .get("content")
            .and_then(Value::as_array)?
            .iter()
            .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl NamedProvider for AnthropicStoryProvider {
    fn name(&self) -> &str {
        "anthropic"
    }
}

impl StoryProvider for AnthropicStoryProvider {
    fn generate_story(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let images = encode_images(request.images, self.ctx.image_max_dimension)?;
        let turns = conversation(&request.few_shot_examples, &images);
        let payload = Self::build_payload(&request.model, &request.sampling, &turns);

        let http_request = HttpRequest::post_json(self.endpoint(), payload)
            .header("x-api-key", request.api_key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION);
        let response = self.ctx.send_json(
            PROVIDER,
            &http_request,
            self.ctx.timeout(STORY_TIMEOUT_FACTOR),
        )?;
        let story = Self::extract_story(&response)
            .ok_or_else(|| ProviderError::empty_response(PROVIDER))?;
        non_empty_story(PROVIDER, story)
    }
}
