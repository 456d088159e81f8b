//! Provider dispatch behind one entry point per operation: validate, apply
//! defaults, build the canonical request, call exactly one adapter.

use std::time::Instant;

use fabula_contracts::events::{EventPayload, EventWriter};
use fabula_contracts::models::{ModelCatalog, CAPABILITY_IMAGE, CAPABILITY_SEARCH, CAPABILITY_STORY};
use fabula_contracts::validation::{
    validate_api_key, validate_image_count, validate_prompt, validate_query, validate_upload,
};
use fabula_contracts::{GatewayConfig, ProviderError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::imagegen::{default_image_providers, ImageGenRegistry};
use crate::imaging::{load_from_bytes, load_from_url, CanonicalImage};
use crate::requests::{
    honored_examples, FewShotExample, GenerationRequest, ImageGenRequest, ImageReference,
    SamplingParams, SearchRequest, SearchResult,
};
use crate::search::{default_search_providers, SearchRegistry};
use crate::story::{default_story_providers, StoryRegistry};
use crate::ProviderContext;

const DEFAULT_STORY_PROVIDER: &str = "openai";
const DEFAULT_SEARCH_PROVIDER: &str = "google";
const DEFAULT_IMAGE_PROVIDER: &str = "openai";
const DEFAULT_NUM_RESULTS: i64 = 10;

/// One uploaded file as received; nothing about it is trusted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct StoryCall {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub uploads: Vec<Upload>,
    pub image_urls: Vec<String>,
    pub sampling: SamplingParams,
    pub few_shot_examples: Vec<FewShotExample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryOutcome {
    pub story: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchCall {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cse_id: Option<String>,
    #[serde(default)]
    pub num_results: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub images: Vec<SearchResult>,
    pub count: usize,
    pub provider: String,
}

/// Unrecognized JSON keys land in `options` and reach the adapter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageCall {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageOutcome {
    pub images: Vec<ImageReference>,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub default_model: Option<String>,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderListing {
    pub story: Vec<ProviderInfo>,
    pub search: Vec<ProviderInfo>,
    pub image: Vec<ProviderInfo>,
}

pub struct Gateway {
    config: GatewayConfig,
    ctx: ProviderContext,
    catalog: ModelCatalog,
    story: StoryRegistry,
    search: SearchRegistry,
    imagegen: ImageGenRegistry,
    events: Option<EventWriter>,
}

impl Gateway {
    /// Builds the production transport; call outside any async runtime.
    pub fn new(config: GatewayConfig) -> Self {
        let ctx = ProviderContext::from_config(&config);
        Self::with_context(config, ctx)
    }

    pub fn with_context(config: GatewayConfig, ctx: ProviderContext) -> Self {
        let story = default_story_providers(&ctx, &config.api_bases);
        let search = default_search_providers(&ctx, &config.api_bases);
        let imagegen = default_image_providers(&ctx, &config.api_bases);
        Self {
            config,
            ctx,
            catalog: ModelCatalog::default(),
            story,
            search,
            imagegen,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn generate_story(&self, call: StoryCall) -> Result<StoryOutcome, ProviderError> {
        let provider_name = provider_key(call.provider.as_deref(), DEFAULT_STORY_PROVIDER);
        let provider = self
            .story
            .get(&provider_name)
            .ok_or_else(|| ProviderError::validation(format!("Invalid provider: {provider_name}")))?;
        let api_key = validate_api_key(call.api_key.as_deref(), &provider_name)?;
        let model = self
            .catalog
            .resolve(call.model.as_deref(), &provider_name, CAPABILITY_STORY);

        let mut started = EventPayload::new();
        started.insert("provider".to_string(), json!(provider_name));
        started.insert("model".to_string(), json!(model));
        started.insert("uploads".to_string(), json!(call.uploads.len()));
        started.insert("image_urls".to_string(), json!(call.image_urls.len()));
        started.insert(
            "few_shot_examples".to_string(),
            json!(call.few_shot_examples.len()),
        );

        self.tracked("story_requested", started, || {
            for upload in &call.uploads {
                validate_upload(&upload.file_name, upload.bytes.len() as u64, &self.config)?;
            }
            validate_image_count(
                call.uploads.len() + call.image_urls.len(),
                self.config.max_images_per_request,
            )?;
            let images = self.load_images(&call.uploads, &call.image_urls)?;
            let few_shot_examples = honored_examples(&call.few_shot_examples)
                .iter()
                .map(|example| example.normalized(self.config.image_max_dimension))
                .collect::<Result<Vec<_>, _>>()?;

            let request = GenerationRequest {
                images,
                api_key,
                model: model.clone(),
                sampling: call.sampling,
                few_shot_examples,
            };
            let story = provider.generate_story(request)?;
            Ok(StoryOutcome {
                story,
                provider: provider_name.clone(),
                model: model.clone(),
            })
        })
    }

    pub fn search(&self, call: SearchCall) -> Result<SearchOutcome, ProviderError> {
        let query = validate_query(&call.query)?;
        let provider_name = provider_key(call.provider.as_deref(), DEFAULT_SEARCH_PROVIDER);
        let provider = self.search.get(&provider_name).ok_or_else(|| {
            ProviderError::validation("Invalid provider. Use \"google\" or \"bing\"")
        })?;
        let api_key = validate_api_key(call.api_key.as_deref(), &provider_name)?;
        let request = SearchRequest::new(
            query,
            api_key,
            call.num_results.unwrap_or(DEFAULT_NUM_RESULTS),
            call.cse_id,
        );

        let mut started = EventPayload::new();
        started.insert("provider".to_string(), json!(provider_name));
        started.insert("num_results".to_string(), json!(request.num_results));

        self.tracked("search_requested", started, || {
            let images = provider.search(request)?;
            Ok(SearchOutcome {
                count: images.len(),
                images,
                provider: provider_name.clone(),
            })
        })
    }

    pub fn generate_image(&self, call: ImageCall) -> Result<ImageOutcome, ProviderError> {
        let prompt = validate_prompt(&call.prompt)?;
        let provider_name = provider_key(call.provider.as_deref(), DEFAULT_IMAGE_PROVIDER);
        let provider = self
            .imagegen
            .get(&provider_name)
            .ok_or_else(|| ProviderError::validation(format!("Invalid provider: {provider_name}")))?;
        let api_key = validate_api_key(call.api_key.as_deref(), &provider_name)?;
        let model = self
            .catalog
            .resolve(call.model.as_deref(), &provider_name, CAPABILITY_IMAGE);

        let mut started = EventPayload::new();
        started.insert("provider".to_string(), json!(provider_name));
        started.insert("model".to_string(), json!(model));
        started.insert("prompt_chars".to_string(), json!(prompt.chars().count()));

        self.tracked("image_requested", started, || {
            let request = ImageGenRequest {
                prompt,
                api_key,
                model: model.clone(),
                options: call.options,
            };
            let images = provider.generate_image(request)?;
            Ok(ImageOutcome {
                images,
                provider: provider_name.clone(),
                model: model.clone(),
            })
        })
    }

    pub fn providers(&self) -> ProviderListing {
        ProviderListing {
            story: self.describe(self.story.list(), CAPABILITY_STORY),
            search: self.describe(self.search.list(), CAPABILITY_SEARCH),
            image: self.describe(self.imagegen.list(), CAPABILITY_IMAGE),
        }
    }

    fn describe(&self, names: Vec<String>, capability: &str) -> Vec<ProviderInfo> {
        names
            .into_iter()
            .map(|name| ProviderInfo {
                default_model: self
                    .catalog
                    .default_for(&name, capability)
                    .map(str::to_string),
                models: self
                    .catalog
                    .for_provider(&name, capability)
                    .into_iter()
                    .map(|spec| spec.name)
                    .collect(),
                name,
            })
            .collect()
    }

    /// Uploads first, then URLs, in the order given.
    fn load_images(
        &self,
        uploads: &[Upload],
        urls: &[String],
    ) -> Result<Vec<CanonicalImage>, ProviderError> {
        let mut images = Vec::with_capacity(uploads.len() + urls.len());
        for upload in uploads {
            images.push(load_from_bytes(&upload.bytes)?);
        }
        for url in urls {
            images.push(load_from_url(
                self.ctx.transport.as_ref(),
                url,
                self.config.image_fetch_timeout,
                self.config.max_content_length,
            )?);
        }
        Ok(images)
    }

    /// Wraps one provider operation with a request id, timing and events.
    fn tracked<T, F>(&self, event_type: &str, payload: EventPayload, op: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Result<T, ProviderError>,
    {
        let request_id = Uuid::new_v4().to_string();
        let provider = payload
            .get("provider")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!(%request_id, %provider, event = event_type, "request started");
        self.emit(event_type, &request_id, payload);

        let started = Instant::now();
        let result = op();
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut outcome = EventPayload::new();
        outcome.insert("provider".to_string(), json!(provider));
        outcome.insert("latency_ms".to_string(), json!(latency_ms));
        match &result {
            Ok(_) => {
                info!(%request_id, %provider, latency_ms, "request completed");
                self.emit("request_completed", &request_id, outcome);
            }
            Err(err) => {
                warn!(
                    %request_id,
                    %provider,
                    latency_ms,
                    status = err.status_code(),
                    kind = err.kind(),
                    error = %err,
                    "request failed"
                );
                outcome.insert("status".to_string(), json!(err.status_code()));
                outcome.insert("kind".to_string(), json!(err.kind()));
                outcome.insert("error".to_string(), json!(err.to_string()));
                self.emit("request_failed", &request_id, outcome);
            }
        }
        result
    }

    fn emit(&self, event_type: &str, request_id: &str, payload: EventPayload) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event_type, request_id, payload) {
            warn!(error = %err, path = %events.path().display(), "failed to write request event");
        }
    }
}

fn provider_key(raw: Option<&str>, default: &str) -> String {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| default.to_string())
}
