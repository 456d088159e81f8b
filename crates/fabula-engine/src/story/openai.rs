use fabula_contracts::providers::NamedProvider;
use fabula_contracts::ProviderError;
use serde_json::{json, Value};

use super::{
    conversation, encode_images, non_empty_story, StoryProvider, Turn, IMAGE_MIME,
    STORY_TIMEOUT_FACTOR,
};
use crate::requests::{GenerationRequest, SamplingParams};
use crate::transport::HttpRequest;
use crate::ProviderContext;

const PROVIDER: &str = "OpenAI";

pub struct OpenAiStoryProvider {
    api_base: String,
    ctx: ProviderContext,
}

impl OpenAiStoryProvider {
    pub fn new(ctx: ProviderContext, api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ctx,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn build_payload(model: &str, sampling: &SamplingParams, turns: &[Turn<'_>]) -> Value {
        let messages: Vec<Value> = turns
            .iter()
            .map(|turn| match turn {
                Turn::User { text, images } => {
                    let mut content = vec![json!({"type": "text", "text": text})];
                    for image in images {
                        content.push(json!({
                            "type": "image_url",
                            "image_url": {"url": format!("data:{IMAGE_MIME};base64,{image}")},
                        }));
                    }
                    json!({"role": "user", "content": content})
                }
                Turn::Assistant { text } => json!({"role": "assistant", "content": text}),
            })
            .collect();
        json!({
            "model": model,
            "messages": messages,
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_tokens,
            "top_p": sampling.top_p,
        })
    }

    fn extract_story(payload: &Value) -> Option<String> {
        payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl NamedProvider for OpenAiStoryProvider {
    fn name(&self) -> &str {
        "openai"
    }
}

impl StoryProvider for OpenAiStoryProvider {
    fn generate_story(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let GenerationRequest {
            images,
            api_key,
            model,
            sampling,
            few_shot_examples,
        } = request;
        let images = encode_images(images, self.ctx.image_max_dimension)?;
        let turns = conversation(&few_shot_examples, &images);
        let payload = Self::build_payload(&model, &sampling, &turns);

        let http_request = HttpRequest::post_json(self.endpoint(), payload).bearer(&api_key);
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
