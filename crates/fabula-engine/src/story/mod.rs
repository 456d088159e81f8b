//! Vision-to-text adapters: images (plus optional few-shot examples) in,
//! story text out.

mod anthropic;
mod gemini;
mod openai;

use fabula_contracts::config::ApiBases;
use fabula_contracts::providers::{NamedProvider, ProviderRegistry};
use fabula_contracts::ProviderError;

use crate::imaging::{prepare_for_vision, CanonicalImage, TransportFormat};
use crate::requests::{honored_examples, FewShotExample, GenerationRequest};
use crate::ProviderContext;

pub use anthropic::AnthropicStoryProvider;
pub use gemini::GeminiStoryProvider;
pub use openai::OpenAiStoryProvider;

pub const EXAMPLE_INSTRUCTION: &str = "Generate a creative story based on this image.";
pub const STORY_INSTRUCTION: &str = "Generate a creative story based on these images.";

/// Every image a vision adapter sends, few-shot examples included.
pub(crate) const IMAGE_MIME: &str = TransportFormat::Jpeg.mime_type();

/// Vision calls get twice the base timeout.
pub const STORY_TIMEOUT_FACTOR: u32 = 2;

pub trait StoryProvider: NamedProvider + Send + Sync {
    fn generate_story(&self, request: GenerationRequest) -> Result<String, ProviderError>;
}

pub type StoryRegistry = ProviderRegistry<Box<dyn StoryProvider>>;

pub fn default_story_providers(ctx: &ProviderContext, bases: &ApiBases) -> StoryRegistry {
    let mut registry: StoryRegistry = ProviderRegistry::default();
    registry.register(Box::new(OpenAiStoryProvider::new(ctx.clone(), &bases.openai)));
    registry.register(Box::new(AnthropicStoryProvider::new(
        ctx.clone(),
        &bases.anthropic,
    )));
    registry.register(Box::new(GeminiStoryProvider::new(ctx.clone(), &bases.gemini)));
    registry
}

/// One conversational turn, provider-neutral. Images are base64 JPEG.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Turn<'a> {
    User {
        text: &'static str,
        images: Vec<&'a str>,
    },
    Assistant {
        text: &'a str,
    },
}

/// Few-shot pairs (capped) in order, then the real request.
pub(crate) fn conversation<'a>(
    examples: &'a [FewShotExample],
    images: &'a [String],
) -> Vec<Turn<'a>> {
    let mut turns = Vec::new();
    for example in honored_examples(examples) {
        turns.push(Turn::User {
            text: EXAMPLE_INSTRUCTION,
            images: vec![example.image_base64.as_str()],
        });
        turns.push(Turn::Assistant {
            text: example.story.as_str(),
        });
    }
    turns.push(Turn::User {
        text: STORY_INSTRUCTION,
        images: images.iter().map(String::as_str).collect(),
    });
    turns
}

/// Consumes the decoded images, resized and transcoded in input order.
pub(crate) fn encode_images(
    images: Vec<CanonicalImage>,
    max_dimension: u32,
) -> Result<Vec<String>, ProviderError> {
    images
        .into_iter()
        .map(|image| prepare_for_vision(image, max_dimension))
        .collect()
}

pub(crate) fn non_empty_story(provider: &str, text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        return Err(ProviderError::empty_response(provider));
    }
    Ok(text)
}
