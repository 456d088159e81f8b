//! Outbound HTTP seam. Adapters build [`HttpRequest`] values and hand them to
//! an [`HttpTransport`]; production uses blocking reqwest, tests script
//! responses.

use std::time::Duration;

use fabula_contracts::ProviderError;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;

const ERROR_BODY_MAX_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            json: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            json: Some(body),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request failed: {0}")]
    Other(String),
}

pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        };
        builder = builder.timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.json.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(classify_reqwest_error)?.to_vec();
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    let message = err.to_string();
    if err.is_builder() {
        TransportError::InvalidRequest(message)
    } else if err.is_timeout() {
        TransportError::Timeout(message)
    } else if err.is_connect() || err.is_request() {
        TransportError::Connect(message)
    } else {
        TransportError::Other(message)
    }
}

/// Maps a transport failure onto the shared taxonomy for `provider`.
pub fn transport_failure(provider: &str, err: &TransportError) -> ProviderError {
    match err {
        TransportError::Timeout(_) => {
            ProviderError::timeout(provider, format!("{provider} API request timeout"))
        }
        TransportError::Connect(detail) | TransportError::Other(detail) => {
            ProviderError::transport(provider, format!("{provider} request failed: {detail}"))
        }
        // A malformed endpoint or header fails the same way on every attempt.
        TransportError::InvalidRequest(detail) => {
            ProviderError::internal(format!("{provider} request could not be built: {detail}"))
        }
    }
}

/// 2xx bodies parse as JSON; 401 and 429 get their own variants; anything
/// else keeps the provider's status and best-effort message.
pub fn response_json_or_error(provider: &str, response: &HttpResponse) -> Result<Value, ProviderError> {
    match response.status {
        401 => {
            return Err(ProviderError::auth(
                provider,
                format!("Invalid {provider} API key"),
            ))
        }
        429 => {
            return Err(ProviderError::rate_limit(
                provider,
                format!("{provider} API rate limit exceeded"),
            ))
        }
        _ => {}
    }
    if !response.is_success() {
        let detail = extract_error_message(&response.body)
            .unwrap_or_else(|| truncate_text(response.text().trim(), ERROR_BODY_MAX_CHARS));
        return Err(ProviderError::upstream(
            provider,
            response.status,
            format!("{provider} API error: {detail}"),
        ));
    }
    serde_json::from_slice(&response.body).map_err(|err| {
        ProviderError::upstream(
            provider,
            502,
            format!("{provider} returned invalid JSON payload: {err}"),
        )
    })
}

/// Pulls `error.message`, a bare `error` string, or top-level `message`.
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let parsed: Value = serde_json::from_slice(body).ok()?;
    let candidate = parsed
        .get("error")
        .and_then(|error| match error {
            Value::Object(obj) => obj.get("message").and_then(Value::as_str),
            Value::String(text) => Some(text.as_str()),
            _ => None,
        })
        .or_else(|| parsed.get("message").and_then(Value::as_str))?;
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_text(trimmed, ERROR_BODY_MAX_CHARS))
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            content_type: None,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn builder_errors_are_not_transient() {
        let err = HttpClient::new().get("http://[::1").build().unwrap_err();
        let classified = classify_reqwest_error(err);
        assert!(matches!(classified, TransportError::InvalidRequest(_)));

        let mapped = transport_failure("Stability AI", &classified);
        assert!(!mapped.is_transport());
        assert_eq!(mapped.status_code(), 500);
        assert!(mapped
            .to_string()
            .starts_with("Stability AI request could not be built"));

        assert!(transport_failure("Bing", &TransportError::Connect("reset".into())).is_transport());
    }

    #[test]
    fn auth_and_rate_limit_are_classified_first() {
        let auth = response_json_or_error("OpenAI", &raw(401, "{}")).unwrap_err();
        assert_eq!(auth, ProviderError::auth("OpenAI", "Invalid OpenAI API key"));

        let limited = response_json_or_error("Bing", &raw(429, "slow")).unwrap_err();
        assert_eq!(limited.status_code(), 429);
        assert_eq!(limited.provider(), Some("Bing"));
    }

    #[test]
    fn provider_message_is_preferred_over_raw_body() {
        let body = json!({"error": {"message": "model not found", "type": "invalid"}});
        let err = response_json_or_error("OpenAI", &HttpResponse::json(404, &body)).unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "OpenAI API error: model not found");

        let err = response_json_or_error("Replicate", &raw(422, "plain failure")).unwrap_err();
        assert_eq!(err.to_string(), "Replicate API error: plain failure");

        let err =
            response_json_or_error("Bing", &HttpResponse::json(403, &json!({"error": "denied"})))
                .unwrap_err();
        assert_eq!(err.to_string(), "Bing API error: denied");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        let err = response_json_or_error("Stability AI", &raw(500, &body)).unwrap_err();
        assert!(err.to_string().chars().count() < 600);
        assert!(err.to_string().ends_with('…'));
    }

    #[test]
    fn success_requires_json() {
        let ok = response_json_or_error("Google", &HttpResponse::json(200, &json!({"items": []})));
        assert_eq!(ok.unwrap(), json!({"items": []}));

        let bad = response_json_or_error("Google", &raw(200, "<html>")).unwrap_err();
        assert_eq!(bad.status_code(), 502);
    }

    #[test]
    fn transport_failures_map_to_timeout_or_transport() {
        let timeout = transport_failure("Anthropic", &TransportError::Timeout("slow".into()));
        assert_eq!(timeout.status_code(), 408);
        assert_eq!(timeout.to_string(), "Anthropic API request timeout");

        let reset = transport_failure("Anthropic", &TransportError::Connect("reset".into()));
        assert_eq!(reset.status_code(), 500);
        assert!(reset.is_transport());
    }

    #[test]
    fn request_builder_collects_headers_and_query() {
        let request = HttpRequest::get("https://example.test/search")
            .bearer("sk-test")
            .query("q", "cats")
            .query("num", "3");
        assert_eq!(request.header_value("authorization"), Some("Bearer sk-test"));
        assert_eq!(request.query_value("num"), Some("3"));
        assert!(request.json.is_none());
    }
}
