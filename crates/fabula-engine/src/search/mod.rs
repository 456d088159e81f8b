//! Image-search adapters.

mod bing;
mod google;

use fabula_contracts::config::ApiBases;
use fabula_contracts::providers::{NamedProvider, ProviderRegistry};
use fabula_contracts::ProviderError;
use serde_json::Value;

use crate::requests::{SearchRequest, SearchResult};
use crate::ProviderContext;

pub use bing::BingImageSearch;
pub use google::GoogleImageSearch;

pub trait ImageSearchProvider: NamedProvider + Send + Sync {
    fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, ProviderError>;
}

pub type SearchRegistry = ProviderRegistry<Box<dyn ImageSearchProvider>>;

pub fn default_search_providers(ctx: &ProviderContext, bases: &ApiBases) -> SearchRegistry {
    let mut registry: SearchRegistry = ProviderRegistry::default();
    registry.register(Box::new(GoogleImageSearch::new(
        ctx.clone(),
        &bases.google_search,
    )));
    registry.register(Box::new(BingImageSearch::new(ctx.clone(), &bases.bing)));
    registry
}

pub(crate) fn dimension(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(number) => number.as_u64().and_then(|raw| u32::try_from(raw).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    }
}

pub(crate) fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}
