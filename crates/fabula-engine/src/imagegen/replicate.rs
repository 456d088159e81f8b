//! Replicate runs predictions asynchronously: submit once, then poll the
//! prediction until it reaches a terminal status.

use std::time::Duration;

use fabula_contracts::providers::NamedProvider;
use fabula_contracts::ProviderError;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{dimension_option, ImageGenProvider};
use crate::requests::{ImageGenRequest, ImageReference};
use crate::retry::Sleeper;
use crate::transport::{response_json_or_error, HttpRequest, HttpResponse};
use crate::ProviderContext;

const PROVIDER: &str = "Replicate";
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_POLLS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    Other(String),
}

impl PredictionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "starting" => Self::Starting,
            "processing" => Self::Processing,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionHandle {
    pub id: String,
    pub status: PredictionStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl PredictionHandle {
    /// `known_id` covers poll responses that omit the id.
    pub fn from_payload(payload: &Value, known_id: Option<&str>) -> Result<Self, ProviderError> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or(known_id)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::upstream(PROVIDER, 502, "Replicate response missing prediction id")
            })?;
        let status = PredictionStatus::parse(
            payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        let error = match payload.get("error") {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Some(Value::Null) | None => None,
            Some(Value::String(_)) => None,
            Some(other) => Some(other.to_string()),
        };
        Ok(Self {
            id,
            status,
            output: payload.get("output").filter(|value| !value.is_null()).cloned(),
            error,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Pending { id: String, polls: u32 },
    Succeeded(Value),
    Failed(String),
    TimedOut { polls: u32 },
}

/// Drives a prediction to a terminal state: sleep, fetch, observe, repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollMachine {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollMachine {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }
}

impl PollMachine {
    /// State after seeing `handle` on poll number `polls` (0 = submission).
    pub fn observe(&self, handle: PredictionHandle, polls: u32) -> PollState {
        match handle.status {
            PredictionStatus::Succeeded => PollState::Succeeded(handle.output.unwrap_or(Value::Null)),
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                let detail = handle
                    .error
                    .unwrap_or_else(|| format!("prediction {}", status_label(&handle.status)));
                PollState::Failed(detail)
            }
            PredictionStatus::Starting
            | PredictionStatus::Processing
            | PredictionStatus::Other(_) => {
                if polls >= self.max_polls {
                    PollState::TimedOut { polls }
                } else {
                    PollState::Pending {
                        id: handle.id,
                        polls,
                    }
                }
            }
        }
    }

    /// Any error from `fetch` ends the loop immediately.
    pub fn run<F>(
        &self,
        sleeper: &dyn Sleeper,
        submitted: PredictionHandle,
        mut fetch: F,
    ) -> Result<Value, ProviderError>
    where
        F: FnMut(&str) -> Result<PredictionHandle, ProviderError>,
    {
        let mut state = self.observe(submitted, 0);
        loop {
            state = match state {
                PollState::Pending { id, polls } => {
                    sleeper.sleep(self.interval);
                    let handle = fetch(&id)?;
                    debug!(
                        prediction_id = %id,
                        poll = polls + 1,
                        status = status_label(&handle.status),
                        "replicate poll"
                    );
                    self.observe(handle, polls + 1)
                }
                PollState::Succeeded(output) => return Ok(output),
                PollState::Failed(detail) => {
                    return Err(ProviderError::generation_failed(
                        PROVIDER,
                        format!("Image generation failed: {detail}"),
                    ))
                }
                PollState::TimedOut { polls } => {
                    return Err(ProviderError::generation_timeout(
                        PROVIDER,
                        format!("Image generation timeout after {polls} status checks"),
                    ))
                }
            };
        }
    }
}

fn status_label(status: &PredictionStatus) -> &str {
    match status {
        PredictionStatus::Starting => "starting",
        PredictionStatus::Processing => "processing",
        PredictionStatus::Succeeded => "succeeded",
        PredictionStatus::Failed => "failed",
        PredictionStatus::Canceled => "canceled",
        PredictionStatus::Other(raw) => raw.as_str(),
    }
}

pub struct ReplicateImageProvider {
    api_base: String,
    ctx: ProviderContext,
    poll: PollMachine,
}

impl ReplicateImageProvider {
    pub fn new(ctx: ProviderContext, api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ctx,
            poll: PollMachine::default(),
        }
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/predictions", self.api_base)
    }

    /// `owner/name:<version>` pins a version; `owner/name` and
    /// `owner/name:latest` run the model's current version.
    fn model_reference(model: &str) -> (&'static str, String) {
        let model = model.trim();
        match model.split_once(':') {
            Some((_, version)) if !version.trim().is_empty() && version.trim() != "latest" => {
                ("version", version.trim().to_string())
            }
            Some((name, _)) => ("model", name.trim().to_string()),
            None => ("model", model.to_string()),
        }
    }

    fn build_payload(request: &ImageGenRequest) -> Value {
        let mut input = Map::new();
        input.insert("prompt".to_string(), json!(request.prompt));
        input.insert(
            "width".to_string(),
            json!(dimension_option(request, "width")),
        );
        input.insert(
            "height".to_string(),
            json!(dimension_option(request, "height")),
        );
        if let Some(extra) = request.options.get("replicate_params").and_then(Value::as_object) {
            for (key, value) in extra {
                if key == "prompt" {
                    continue;
                }
                input.insert(key.clone(), value.clone());
            }
        }

        let (field, reference) = Self::model_reference(&request.model);
        let mut payload = Map::new();
        payload.insert(field.to_string(), json!(reference));
        payload.insert("input".to_string(), Value::Object(input));
        Value::Object(payload)
    }

    fn fetch_prediction(&self, id: &str, api_key: &str) -> Result<PredictionHandle, ProviderError> {
        let request =
            HttpRequest::get(format!("{}/{}", self.predictions_endpoint(), id)).bearer(api_key);
        let payload =
            self.ctx
                .send_once_with(PROVIDER, &request, self.ctx.timeout(1), classify_poll_response)?;
        PredictionHandle::from_payload(&payload, Some(id))
    }

    /// Output may be a URL, a list of URLs, or objects carrying them.
    fn extract_output_urls(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(url) => {
                let trimmed = url.trim();
                if trimmed.starts_with("http") && !out.iter().any(|existing| existing == trimmed) {
                    out.push(trimmed.to_string());
                }
            }
            Value::Array(rows) => {
                for row in rows {
                    Self::extract_output_urls(row, out);
                }
            }
            Value::Object(obj) => {
                for key in ["url", "urls", "output"] {
                    if let Some(nested) = obj.get(key) {
                        Self::extract_output_urls(nested, out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// A poll that is not a 2xx ends the generation with the poll's status.
fn classify_poll_response(provider: &str, response: &HttpResponse) -> Result<Value, ProviderError> {
    if !response.is_success() && !matches!(response.status, 401 | 429) {
        return Err(ProviderError::upstream(
            provider,
            response.status,
            "Failed to check prediction status",
        ));
    }
    response_json_or_error(provider, response)
}

impl NamedProvider for ReplicateImageProvider {
    fn name(&self) -> &str {
        "replicate"
    }
}

impl ImageGenProvider for ReplicateImageProvider {
    fn generate_image(&self, request: ImageGenRequest) -> Result<Vec<ImageReference>, ProviderError> {
        let payload = Self::build_payload(&request);
        let submit = HttpRequest::post_json(self.predictions_endpoint(), payload)
            .bearer(&request.api_key);
        let submitted = self
            .ctx
            .send_json(PROVIDER, &submit, self.ctx.timeout(1))?;
        let handle = PredictionHandle::from_payload(&submitted, None)?;
        info!(prediction_id = %handle.id, status = status_label(&handle.status), "replicate prediction submitted");

        let output = self.poll.run(self.ctx.sleeper.as_ref(), handle, |id| {
            self.fetch_prediction(id, &request.api_key)
        })?;

        let mut urls = Vec::new();
        Self::extract_output_urls(&output, &mut urls);
        if urls.is_empty() {
            return Err(ProviderError::empty_response(PROVIDER));
        }
        Ok(urls.into_iter().map(ImageReference::Url).collect())
    }
}
