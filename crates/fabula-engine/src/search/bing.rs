use fabula_contracts::providers::NamedProvider;
use fabula_contracts::ProviderError;
use serde_json::Value;

use super::{dimension, non_empty_str, ImageSearchProvider};
use crate::requests::{SearchRequest, SearchResult};
use crate::transport::HttpRequest;
use crate::ProviderContext;

const PROVIDER: &str = "Bing";

pub struct BingImageSearch {
    api_base: String,
    ctx: ProviderContext,
}

impl BingImageSearch {
    pub fn new(ctx: ProviderContext, api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ctx,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/images/search", self.api_base)
    }

    fn parse_values(payload: &Value) -> Vec<SearchResult> {
        let Some(values) = payload.get("value").and_then(Value::as_array) else {
            return Vec::new();
        };
        values
            .iter()
            .filter_map(|item| {
                let url = non_empty_str(item.get("contentUrl"))?;
                Some(SearchResult {
                    url: url.to_string(),
                    thumbnail: non_empty_str(item.get("thumbnailUrl"))
                        .unwrap_or(url)
                        .to_string(),
                    title: item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    width: dimension(item.get("width")),
                    height: dimension(item.get("height")),
                })
            })
            .collect()
    }
}

impl NamedProvider for BingImageSearch {
    fn name(&self) -> &str {
        "bing"
    }
}

impl ImageSearchProvider for BingImageSearch {
    fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, ProviderError> {
        let http_request = HttpRequest::get(self.endpoint())
            .header("Ocp-Apim-Subscription-Key", request.api_key.as_str())
            .query("q", request.query.as_str())
            .query("count", request.num_results.to_string())
            .query("safeSearch", "Moderate");
        let payload = self
            .ctx
            .send_json(PROVIDER, &http_request, self.ctx.timeout(1))?;
        Ok(Self::parse_values(&payload))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::test_support::{context, FakeTransport, RecordingSleeper};
    use crate::transport::TransportError;

    fn provider(transport: &Arc<FakeTransport>, sleeper: &Arc<RecordingSleeper>) -> BingImageSearch {
        BingImageSearch::new(context(transport, sleeper), "https://bing.test/v7.0")
    }

    #[test]
    fn subscription_key_header_and_result_mapping() {
        let transport = FakeTransport::new();
        let sleeper = RecordingSleeper::new();
        transport.push_json(
            200,
            json!({"value": [
                {"contentUrl": "https://img.test/a.jpg", "thumbnailUrl": "https://tse.test/a",
                 "name": "A cat", "width": 1200, "height": 900}
            ]}),
        );
        let results = provider(&transport, &sleeper)
            .search(SearchRequest::new("cats", "bing-key-0123456789", 4, None))
            .unwrap();
        assert_eq!(
            results,
            vec![SearchResult {
                url: "https://img.test/a.jpg".to_string(),
                thumbnail: "https://tse.test/a".to_string(),
                title: "A cat".to_string(),
                width: Some(1200),
                height: Some(900),
            }]
        );

        let requests = transport.requests();
        let sent = &requests[0];
        assert_eq!(sent.url, "https://bing.test/v7.0/images/search");
        assert_eq!(
            sent.header_value("Ocp-Apim-Subscription-Key"),
            Some("bing-key-0123456789")
        );
        assert_eq!(sent.query_value("count"), Some("4"));
        assert_eq!(sent.query_value("safeSearch"), Some("Moderate"));
    }

    #[test]
    fn missing_value_means_no_results() {
        let transport = FakeTransport::new();
        let sleeper = RecordingSleeper::new();
        transport.push_json(200, json!({"_type": "Images"}));
        let results = provider(&transport, &sleeper)
            .search(SearchRequest::new("cats", "bing-key-0123456789", 4, None))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn connection_resets_are_retried() {
        let transport = FakeTransport::new();
        let sleeper = RecordingSleeper::new();
        transport.push_error(TransportError::Connect("reset".into()));
        transport.push_error(TransportError::Connect("reset".into()));
        transport.push_json(200, json!({"value": []}));
        let results = provider(&transport, &sleeper)
            .search(SearchRequest::new("cats", "bing-key-0123456789", 4, None))
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(transport.call_count(), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn rejected_key_surfaces_auth() {
        let transport = FakeTransport::new();
        let sleeper = RecordingSleeper::new();
        transport.push_json(401, json!({"error": {"code": "401", "message": "Access denied"}}));
        let err = provider(&transport, &sleeper)
            .search(SearchRequest::new("cats", "bing-key-0123456789", 4, None))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid Bing API key");
        assert_eq!(err.status_code(), 401);
        assert!(sleeper.delays().is_empty());
    }
}
