use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_IMAGES_PER_REQUEST: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT_S: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_IMAGE_MAX_DIMENSION: u32 = 2048;
pub const DEFAULT_IMAGE_FETCH_TIMEOUT_S: u64 = 10;

/// Process-wide settings, read once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub max_content_length: u64,
    pub max_images_per_request: usize,
    pub allowed_extensions: BTreeSet<String>,
    pub image_max_dimension: u32,
    pub image_fetch_timeout: Duration,
    pub api_bases: ApiBases,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiBases {
    pub openai: String,
    pub anthropic: String,
    pub gemini: String,
    pub stability: String,
    pub replicate: String,
    pub google_search: String,
    pub bing: String,
}

impl Default for ApiBases {
    fn default() -> Self {
        Self {
            openai: "https://api.openai.com/v1".to_string(),
            anthropic: "https://api.anthropic.com/v1".to_string(),
            gemini: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            stability: "https://api.stability.ai".to_string(),
            replicate: "https://api.replicate.com/v1".to_string(),
            google_search: "https://www.googleapis.com/customsearch/v1".to_string(),
            bing: "https://api.bing.microsoft.com/v7.0".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str| get(key).and_then(|raw| raw.parse::<u64>().ok());
        let base = |key: &str, fallback: String| {
            get(key)
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(fallback)
        };

        let allowed_extensions = get("ALLOWED_EXTENSIONS")
            .map(|raw| parse_extensions(&raw))
            .filter(|set| !set.is_empty())
            .unwrap_or_else(|| parse_extensions("png,jpg,jpeg,webp"));

        let defaults = ApiBases::default();
        Self {
            host: get("FABULA_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("FABULA_PORT")
                .and_then(|raw| raw.parse::<u16>().ok())
                .unwrap_or(5000),
            request_timeout: Duration::from_secs(
                number("REQUEST_TIMEOUT")
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
                    .clamp(1, 600),
            ),
            max_retries: number("MAX_RETRIES")
                .map(|value| value.clamp(1, 10) as u32)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            max_content_length: number("MAX_CONTENT_LENGTH")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_CONTENT_LENGTH),
            max_images_per_request: number("MAX_IMAGES_PER_REQUEST")
                .filter(|value| *value > 0)
                .map(|value| value as usize)
                .unwrap_or(DEFAULT_MAX_IMAGES_PER_REQUEST),
            allowed_extensions,
            image_max_dimension: number("IMAGE_MAX_DIMENSION")
                .map(|value| value.clamp(64, 8192) as u32)
                .unwrap_or(DEFAULT_IMAGE_MAX_DIMENSION),
            image_fetch_timeout: Duration::from_secs(
                number("IMAGE_FETCH_TIMEOUT")
                    .unwrap_or(DEFAULT_IMAGE_FETCH_TIMEOUT_S)
                    .clamp(1, 120),
            ),
            api_bases: ApiBases {
                openai: base("OPENAI_API_BASE", defaults.openai),
                anthropic: base("ANTHROPIC_API_BASE", defaults.anthropic),
                gemini: base("GEMINI_API_BASE", defaults.gemini),
                stability: base("STABILITY_API_BASE", defaults.stability),
                replicate: base("REPLICATE_API_BASE", defaults.replicate),
                google_search: base("GOOGLE_SEARCH_API_BASE", defaults.google_search),
                bing: base("BING_API_BASE", defaults.bing),
            },
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upper bound for a whole multipart request body.
    pub fn max_request_body(&self) -> usize {
        let per_file = usize::try_from(self.max_content_length).unwrap_or(usize::MAX);
        per_file.saturating_mul(self.max_images_per_request.saturating_add(1))
    }
}

fn parse_extensions(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|item| item.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
