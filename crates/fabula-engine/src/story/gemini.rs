use fabula_contracts::models::supports_thinking;
use fabula_contracts::providers::NamedProvider;
use fabula_contracts::ProviderError;
use serde_json::{json, Map, Value};

use super::{
    conversation, encode_images, non_empty_story, StoryProvider, Turn, IMAGE_MIME,
    STORY_TIMEOUT_FACTOR,
};
use crate::requests::{GenerationRequest, SamplingParams};
use crate::transport::{response_json_or_error, HttpRequest, HttpResponse};
use crate::ProviderContext;

const PROVIDER: &str = "Gemini";

pub struct GeminiStoryProvider {
    api_base: String,
    ctx: ProviderContext,
}

impl GeminiStoryProvider {
    pub fn new(ctx: ProviderContext, api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ctx,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base, model.trim())
    }

    fn build_payload(model: &str, sampling: &SamplingParams, turns: &[Turn<'_>]) -> Value {
        let contents: Vec<Value> = turns
            .iter()
            .map(|turn| match turn {
                Turn::User { text, images } => {
                    let mut parts = vec![json!({"text": text})];
                    for image in images {
                        parts.push(json!({
                            "inline_data": {"mime_type": IMAGE_MIME, "data": image},
                        }));
                    }
                    json!({"role": "user", "parts": parts})
                }
                Turn::Assistant { text } => json!({"role": "model", "parts": [{"text": text}]}),
            })
            .collect();

        let mut generation_config = Map::new();
        generation_config.insert("temperature".to_string(), json!(sampling.temperature));
        generation_config.insert("maxOutputTokens".to_string(), json!(sampling.max_tokens));
        generation_config.insert("topP".to_string(), json!(sampling.top_p));
        if let Some(top_k) = sampling.top_k {
            generation_config.insert("topK".to_string(), json!(top_k));
        }
        if let Some(budget) = sampling.thinking_budget {
            if supports_thinking(model) {
                generation_config.insert(
                    "thinkingConfig".to_string(),
                    json!({"thinkingBudget": budget}),
                );
            }
        }

        json!({
            "contents": contents,
            "generationConfig": Value::Object(generation_config),
        })
    }

    /// Concatenates the answer text of the first candidate; thought parts
    /// from thinking models are skipped.
    fn extract_story(payload: &Value) -> Option<String> {
        let parts = payload
            .get("candidates")
            .and_then(Value::as_array)?
            .first()?
            .get("content")?
            .get("parts")
            .and_then(Value::as_array)?;
        let text = parts
            .iter()
            .filter(|part| part.get("thought").and_then(Value::as_bool) != Some(true))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("");
        Some(text)
    }
}

/// Gemini reports a bad key as a 400 carrying `API_KEY_INVALID`.
fn classify_gemini_response(provider: &str, response: &HttpResponse) -> Result<Value, ProviderError> {
    if response.status == 400 && response.text().contains("API_KEY_INVALID") {
        return Err(ProviderError::auth(
            provider,
            format!("Invalid {provider} API key"),
        ));
    }
    response_json_or_error(provider, response)
}

impl NamedProvider for GeminiStoryProvider {
    fn name(&self) -> &str {
        "google"
    }
}

impl StoryProvider for GeminiStoryProvider {
    fn generate_story(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let images = encode_images(request.images, self.ctx.image_max_dimension)?;
        let turns = conversation(&request.few_shot_examples, &images);
        let payload = Self::build_payload(&request.model, &request.sampling, &turns);

        let http_request = HttpRequest::post_json(self.endpoint(&request.model), payload)
            .query("key", request.api_key.as_str());
        let response = self.ctx.send_json_with(
            PROVIDER,
            &http_request,
            self.ctx.timeout(STORY_TIMEOUT_FACTOR),
            classify_gemini_response,
        )?;
        let story = Self::extract_story(&response)
            .ok_or_else(|| ProviderError::empty_response(PROVIDER))?;
        non_empty_story(PROVIDER, story)
    }
}
