//! Text-to-image adapters.

mod openai;
mod replicate;
mod stability;

use fabula_contracts::config::ApiBases;
use fabula_contracts::providers::{NamedProvider, ProviderRegistry};
use fabula_contracts::ProviderError;

use crate::requests::{ImageGenRequest, ImageReference};
use crate::ProviderContext;

pub use openai::OpenAiImageProvider;
pub use replicate::{PollMachine, PollState, PredictionHandle, PredictionStatus, ReplicateImageProvider};
pub use stability::StabilityImageProvider;

/// Synchronous generation calls get three times the base timeout.
pub const IMAGE_TIMEOUT_FACTOR: u32 = 3;

pub const DEFAULT_IMAGE_SIZE: u32 = 1024;

pub trait ImageGenProvider: NamedProvider + Send + Sync {
    fn generate_image(&self, request: ImageGenRequest) -> Result<Vec<ImageReference>, ProviderError>;
}

pub type ImageGenRegistry = ProviderRegistry<Box<dyn ImageGenProvider>>;

pub fn default_image_providers(ctx: &ProviderContext, bases: &ApiBases) -> ImageGenRegistry {
    let mut registry: ImageGenRegistry = ProviderRegistry::default();
    registry.register(Box::new(OpenAiImageProvider::new(ctx.clone(), &bases.openai)));
    registry.register(Box::new(StabilityImageProvider::new(
        ctx.clone(),
        &bases.stability,
    )));
    registry.register(Box::new(ReplicateImageProvider::new(
        ctx.clone(),
        &bases.replicate,
    )));
    registry
}

/// Width/height option as a positive pixel count, else the default.
pub(crate) fn dimension_option(request: &ImageGenRequest, key: &str) -> u32 {
    request
        .option_i64(key)
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_IMAGE_SIZE)
}
