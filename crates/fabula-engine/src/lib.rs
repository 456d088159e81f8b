pub mod gateway;
pub mod imagegen;
pub mod imaging;
pub mod requests;
pub mod retry;
pub mod search;
pub mod story;
pub mod transport;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use fabula_contracts::{GatewayConfig, ProviderError};
use serde_json::Value;
use tracing::debug;

pub use gateway::{
    Gateway, ImageCall, ImageOutcome, SearchCall, SearchOutcome, StoryCall, StoryOutcome, Upload,
};
pub use imagegen::ImageGenProvider;
pub use requests::{
    FewShotExample, GenerationRequest, ImageGenRequest, ImageReference, SamplingParams,
    SearchRequest, SearchResult,
};
pub use search::ImageSearchProvider;
pub use story::StoryProvider;

use retry::{RetryPolicy, Sleeper, ThreadSleeper};
use transport::{
    response_json_or_error, transport_failure, HttpRequest, HttpResponse, HttpTransport,
    ReqwestTransport,
};

/// Shared plumbing every provider adapter calls through.
#[derive(Clone)]
pub struct ProviderContext {
    pub transport: Arc<dyn HttpTransport>,
    pub sleeper: Arc<dyn Sleeper>,
    pub retry: RetryPolicy,
    pub base_timeout: Duration,
    pub image_max_dimension: u32,
}

impl ProviderContext {
    /// Blocking reqwest client and real sleeps. Must be built outside any
    /// async runtime.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()), Arc::new(ThreadSleeper))
    }

    pub fn with_transport(
        config: &GatewayConfig,
        transport: Arc<dyn HttpTransport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            transport,
            sleeper,
            retry: RetryPolicy::default().with_max_attempts(config.max_retries),
            base_timeout: config.request_timeout,
            image_max_dimension: config.image_max_dimension,
        }
    }

    pub fn timeout(&self, factor: u32) -> Duration {
        self.base_timeout.saturating_mul(factor.max(1))
    }

    /// Sends with the retry policy and the standard response classification.
    pub fn send_json(
        &self,
        provider: &str,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        self.send_json_with(provider, request, timeout, response_json_or_error)
    }

    /// Same as [`send_json`](Self::send_json) with a provider-specific
    /// classifier applied to every response.
    pub fn send_json_with<C>(
        &self,
        provider: &str,
        request: &HttpRequest,
        timeout: Duration,
        classify: C,
    ) -> Result<Value, ProviderError>
    where
        C: Fn(&str, &HttpResponse) -> Result<Value, ProviderError>,
    {
        self.retry.run(self.sleeper.as_ref(), provider, |attempt| {
            debug!(provider, attempt, url = %request.url, "provider request");
            let response = self
                .transport
                .send(request, timeout)
                .map_err(|err| transport_failure(provider, &err))?;
            classify(provider, &response)
        })
    }

    /// Single attempt, no retry.
    pub fn send_once_with<C>(
        &self,
        provider: &str,
        request: &HttpRequest,
        timeout: Duration,
        classify: C,
    ) -> Result<Value, ProviderError>
    where
        C: Fn(&str, &HttpResponse) -> Result<Value, ProviderError>,
    {
        debug!(provider, url = %request.url, "provider request (single attempt)");
        let response = self
            .transport
            .send(request, timeout)
            .map_err(|err| transport_failure(provider, &err))?;
        classify(provider, &response)
    }
}
