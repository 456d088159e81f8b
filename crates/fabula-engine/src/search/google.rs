use fabula_contracts::providers::NamedProvider;
use fabula_contracts::validation::require_engine_id;
use fabula_contracts::ProviderError;
use serde_json::Value;

use super::{dimension, non_empty_str, ImageSearchProvider};
use crate::requests::{SearchRequest, SearchResult};
use crate::transport::HttpRequest;
use crate::ProviderContext;

const PROVIDER: &str = "Google";

pub struct GoogleImageSearch {
    endpoint: String,
    ctx: ProviderContext,
}

impl GoogleImageSearch {
    pub fn new(ctx: ProviderContext, endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            ctx,
        }
    }

    fn parse_items(payload: &Value) -> Vec<SearchResult> {
        let Some(items) = payload.get("items").and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let link = non_empty_str(item.get("link"))?;
                let image = item.get("image");
                let thumbnail = non_empty_str(image.and_then(|meta| meta.get("thumbnailLink")))
                    .unwrap_or(link);
                Some(SearchResult {
                    url: link.to_string(),
                    thumbnail: thumbnail.to_string(),
                    title: item
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    width: dimension(image.and_then(|meta| meta.get("width"))),
                    height: dimension(image.and_then(|meta| meta.get("height"))),
                })
            })
            .collect()
    }
}

impl NamedProvider for GoogleImageSearch {
    fn name(&self) -> &str {
        "google"
    }
}

impl ImageSearchProvider for GoogleImageSearch {
    fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, ProviderError> {
        let engine_id = require_engine_id(request.engine_id.as_deref())?;
        let http_request = HttpRequest::get(self.endpoint.as_str())
            .query("key", request.api_key.as_str())
            .query("cx", engine_id)
            .query("q", request.query.as_str())
            .query("searchType", "image")
            .query("num", request.num_results.to_string())
            .query("safe", "active");
        let payload = self
            .ctx
            .send_json(PROVIDER, &http_request, self.ctx.timeout(1))?;
        Ok(Self::parse_items(&payload))
    }
}
