use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fabula_contracts::ProviderError;
use fabula_engine::{
    FewShotExample, Gateway, ImageCall, ImageOutcome, SamplingParams, SearchCall, SearchOutcome,
    StoryCall, StoryOutcome, Upload,
};
use serde_json::{json, Value};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Failure envelope: `{error, provider?}` with the mapped status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    provider: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            provider: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            provider: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    fn body(&self) -> Value {
        let mut body = json!({ "error": self.message });
        if let Some(provider) = &self.provider {
            body["provider"] = json!(provider);
        }
        body
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.message(),
            provider: err.provider().map(str::to_string),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

/// Text fields and files of a story form, collected before any of them is
/// interpreted.
#[derive(Debug, Default)]
pub struct StoryForm {
    fields: BTreeMap<String, String>,
    uploads: Vec<Upload>,
}

impl StoryForm {
    pub fn set_field(&mut self, name: &str, value: String) {
        self.fields.insert(name.to_string(), value);
    }

    /// Parts without a filename are ignored.
    pub fn push_file(&mut self, file_name: &str, bytes: Vec<u8>) {
        if file_name.trim().is_empty() {
            return;
        }
        self.uploads.push(Upload {
            file_name: file_name.to_string(),
            bytes,
        });
    }

    fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn number<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, ApiError> {
        match self.text(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| ApiError::bad_request(format!("Invalid parameter value: {name}={raw}"))),
        }
    }

    fn json_field(&self, name: &str) -> Result<Option<Value>, ApiError> {
        match self.text(name) {
            None => Ok(None),
            Some(raw) => serde_json::from_str::<Value>(&raw)
                .map(Some)
                .map_err(|_| ApiError::bad_request(format!("Invalid {name} JSON"))),
        }
    }

    pub fn into_call(self) -> Result<StoryCall, ApiError> {
        let defaults = SamplingParams::default();
        let sampling = SamplingParams {
            temperature: self.number("temperature")?.unwrap_or(defaults.temperature),
            max_tokens: self.number("max_tokens")?.unwrap_or(defaults.max_tokens),
            top_p: self.number("top_p")?.unwrap_or(defaults.top_p),
            top_k: self.number("top_k")?,
            thinking_budget: self.number("thinking_budget")?,
        };

        let image_urls = match self.json_field("image_urls")? {
            None => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect(),
            Some(_) => return Err(ApiError::bad_request("Invalid image_urls JSON")),
        };

        let few_shot_examples = match self.json_field("few_shot_examples")? {
            None => Vec::new(),
            Some(value @ Value::Array(_)) => FewShotExample::parse_list(&value),
            Some(_) => return Err(ApiError::bad_request("Invalid few_shot_examples JSON")),
        };

        Ok(StoryCall {
            provider: self.text("provider"),
            model: self.text("model"),
            api_key: self.text("api_key"),
            uploads: self.uploads,
            image_urls,
            sampling,
            few_shot_examples,
        })
    }
}

pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let body_limit = gateway.config().max_request_body();
    Router::new()
        .route("/api/generate-story", post(generate_story))
        .route("/api/search", post(search_images))
        .route("/api/generate-image", post(generate_image))
        .route("/api/providers", get(list_providers))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(create_cors_layer())
        .with_state(gateway)
}

fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn serve(gateway: Arc<Gateway>) -> Result<()> {
    let address = gateway.config().bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "gateway listening");
    axum::serve(listener, build_router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated")?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Runs a gateway call on the blocking pool; retries and polls sleep there.
async fn run_blocking<T, F>(gateway: Arc<Gateway>, context: &'static str, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Gateway) -> Result<T, ProviderError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&gateway))
        .await
        .map_err(|err| {
            error!(error = %err, "{context}");
            ApiError::internal(format!("{context}: {err}"))
        })?
        .map_err(ApiError::from)
}

async fn generate_story(
    State(gateway): State<Arc<Gateway>>,
    mut multipart: Multipart,
) -> Result<Json<StoryOutcome>, ApiError> {
    let mut form = StoryForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("Invalid form data: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "files" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::bad_request(format!("Invalid form data: {err}")))?;
            form.push_file(&file_name, bytes.to_vec());
        } else {
            let value = field
                .text()
                .await
                .map_err(|err| ApiError::bad_request(format!("Invalid form data: {err}")))?;
            form.set_field(&name, value);
        }
    }
    let call = form.into_call()?;
    let outcome = run_blocking(gateway, "Story generation failed", move |gateway| {
        gateway.generate_story(call)
    })
    .await?;
    Ok(Json(outcome))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::MissingJsonContentType(_)) => {
            Err(ApiError::bad_request("No data provided"))
        }
        Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
    }
}

async fn search_images(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<SearchCall>, JsonRejection>,
) -> Result<Json<SearchOutcome>, ApiError> {
    let call = json_body(payload)?;
    let outcome =
        run_blocking(gateway, "Image search failed", move |gateway| gateway.search(call)).await?;
    Ok(Json(outcome))
}

async fn generate_image(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<ImageCall>, JsonRejection>,
) -> Result<Json<ImageOutcome>, ApiError> {
    let call = json_body(payload)?;
    let outcome = run_blocking(gateway, "Image generation failed", move |gateway| {
        gateway.generate_image(call)
    })
    .await?;
    Ok(Json(outcome))
}

async fn list_providers(State(gateway): State<Arc<Gateway>>) -> Response {
    Json(gateway.providers()).into_response()
}

async fn health() -> Response {
    Json(json!({ "status": "healthy" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(fields: &[(&str, &str)]) -> StoryForm {
        let mut form = StoryForm::default();
        for (name, value) in fields {
            form.set_field(name, value.to_string());
        }
        form
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn blank_form_uses_sampling_defaults() {
        let call = form(&[("provider", "anthropic"), ("model", "  ")]).into_call().unwrap();
        assert_eq!(call.provider.as_deref(), Some("anthropic"));
        assert_eq!(call.model, None);
        assert_eq!(call.sampling, SamplingParams::default());
        assert!(call.image_urls.is_empty());
        assert!(call.few_shot_examples.is_empty());
    }

    #[test]
    fn numeric_fields_are_parsed() {
        let call = form(&[
            ("temperature", "0.4"),
            ("max_tokens", "600"),
            ("top_p", "0.9"),
            ("top_k", "40"),
            ("thinking_budget", "2048"),
        ])
        .into_call()
        .unwrap();
        assert_eq!(call.sampling.temperature, 0.4);
        assert_eq!(call.sampling.max_tokens, 600);
        assert_eq!(call.sampling.top_k, Some(40));
        assert_eq!(call.sampling.thinking_budget, Some(2048));
    }

    #[test]
    fn unparseable_number_is_a_bad_request() {
        let err = form(&[("max_tokens", "lots")]).into_call().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid parameter value: max_tokens=lots");
    }

    #[test]
    fn image_urls_must_be_a_json_array() {
        let call = form(&[("image_urls", r#"["https://img.test/a.png", " ", 7]"#)])
            .into_call()
            .unwrap();
        assert_eq!(call.image_urls, vec!["https://img.test/a.png".to_string()]);

        let err = form(&[("image_urls", "https://img.test/a.png")])
            .into_call()
            .unwrap_err();
        assert_eq!(err.message, "Invalid image_urls JSON");
        let err = form(&[("image_urls", r#"{"url": "x"}"#)]).into_call().unwrap_err();
        assert_eq!(err.message, "Invalid image_urls JSON");
    }

    #[test]
    fn few_shot_examples_drop_incomplete_entries() {
        let call = form(&[(
            "few_shot_examples",
            r#"[{"image_base64": "data:image/png;base64,QUJD", "story": "Once."},
                {"image_base64": "", "story": "skipped"}]"#,
        )])
        .into_call()
        .unwrap();
        assert_eq!(call.few_shot_examples.len(), 1);
        assert_eq!(call.few_shot_examples[0].image_base64, "QUJD");

        let err = form(&[("few_shot_examples", "[{")]).into_call().unwrap_err();
        assert_eq!(err.message, "Invalid few_shot_examples JSON");
    }

    #[test]
    fn files_without_names_are_ignored() {
        let mut story_form = StoryForm::default();
        story_form.push_file("", vec![1, 2, 3]);
        story_form.push_file("cat.png", vec![4, 5]);
        let call = story_form.into_call().unwrap();
        assert_eq!(call.uploads.len(), 1);
        assert_eq!(call.uploads[0].file_name, "cat.png");
    }

    #[tokio::test]
    async fn provider_errors_carry_status_and_provider() {
        let response =
            ApiError::from(ProviderError::rate_limit("Anthropic", "Rate limit exceeded")).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["provider"], "Anthropic");
        assert!(body["error"].as_str().unwrap().contains("Rate limit"));
    }

    #[tokio::test]
    async fn unclassified_failures_omit_the_provider() {
        let response = ApiError::internal("Story generation failed: task panicked").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body, json!({"error": "Story generation failed: task panicked"}));
    }

    #[test]
    fn validation_errors_map_to_bad_request() {
        let err = ApiError::from(ProviderError::validation("Search query is required"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.provider, None);
    }
}
