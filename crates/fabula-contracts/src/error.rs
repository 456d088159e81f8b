use thiserror::Error;

/// Uniform failure taxonomy shared by every provider adapter.
///
/// Each variant knows the HTTP status the boundary layer should answer with
/// and, where relevant, which provider produced it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{message}")]
    Auth { provider: String, message: String },
    #[error("{message}")]
    RateLimit { provider: String, message: String },
    #[error("{message}")]
    Timeout { provider: String, message: String },
    #[error("{message}")]
    Validation { message: String },
    #[error("{message}")]
    Upstream {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("No response from {provider}")]
    EmptyResponse { provider: String },
    #[error("{message}")]
    GenerationFailed { provider: String, message: String },
    #[error("{message}")]
    GenerationTimeout { provider: String, message: String },
    #[error("{message}")]
    ImageDecode { message: String },
    #[error("{message}")]
    ImageFetch { message: String },
    #[error("{message}")]
    Transport { provider: String, message: String },
    #[error("{message}")]
    Internal { message: String },
}

impl ProviderError {
    pub fn auth(provider: &str, message: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn rate_limit(provider: &str, message: impl Into<String>) -> Self {
        Self::RateLimit {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(provider: &str, message: impl Into<String>) -> Self {
        Self::Timeout {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn upstream(provider: &str, status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn empty_response(provider: &str) -> Self {
        Self::EmptyResponse {
            provider: provider.to_string(),
        }
    }

    pub fn generation_failed(provider: &str, message: impl Into<String>) -> Self {
        Self::GenerationFailed {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn generation_timeout(provider: &str, message: impl Into<String>) -> Self {
        Self::GenerationTimeout {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn image_decode(message: impl Into<String>) -> Self {
        Self::ImageDecode {
            message: message.into(),
        }
    }

    pub fn image_fetch(message: impl Into<String>) -> Self {
        Self::ImageFetch {
            message: message.into(),
        }
    }

    pub fn transport(provider: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status the boundary layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Auth { .. } => 401,
            Self::RateLimit { .. } => 429,
            Self::Timeout { .. } | Self::GenerationTimeout { .. } => 408,
            Self::Validation { .. } | Self::ImageDecode { .. } | Self::ImageFetch { .. } => 400,
            Self::Upstream { status, .. } => {
                if (400..=599).contains(status) {
                    *status
                } else {
                    500
                }
            }
            Self::EmptyResponse { .. }
            | Self::GenerationFailed { .. }
            | Self::Transport { .. }
            | Self::Internal { .. } => 500,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Auth { provider, .. }
            | Self::RateLimit { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Upstream { provider, .. }
            | Self::EmptyResponse { provider }
            | Self::GenerationFailed { provider, .. }
            | Self::GenerationTimeout { provider, .. }
            | Self::Transport { provider, .. } => Some(provider.as_str()),
            Self::Validation { .. }
            | Self::ImageDecode { .. }
            | Self::ImageFetch { .. }
            | Self::Internal { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Transport-level failures are the only ones worth another attempt.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::RateLimit { .. } => "rate_limit",
            Self::Timeout { .. } => "timeout",
            Self::Validation { .. } => "validation",
            Self::Upstream { .. } => "provider",
            Self::EmptyResponse { .. } => "empty_response",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::GenerationTimeout { .. } => "generation_timeout",
            Self::ImageDecode { .. } => "image_decode",
            Self::ImageFetch { .. } => "image_fetch",
            Self::Transport { .. } => "transport",
            Self::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ProviderError;

    #[test]
    fn status_codes_follow_http_semantics() {
        assert_eq!(ProviderError::auth("OpenAI", "bad key").status_code(), 401);
        assert_eq!(ProviderError::rate_limit("Bing", "slow down").status_code(), 429);
        assert_eq!(ProviderError::timeout("Google", "late").status_code(), 408);
        assert_eq!(ProviderError::validation("nope").status_code(), 400);
        assert_eq!(ProviderError::image_decode("bad").status_code(), 400);
        assert_eq!(ProviderError::image_fetch("gone").status_code(), 400);
        assert_eq!(
            ProviderError::generation_timeout("Replicate", "late").status_code(),
            408
        );
        assert_eq!(
            ProviderError::generation_failed("Replicate", "boom").status_code(),
            500
        );
        assert_eq!(ProviderError::empty_response("Google Gemini").status_code(), 500);
        assert_eq!(ProviderError::internal("oops").status_code(), 500);
    }

    #[test]
    fn upstream_status_passes_through_error_codes_only() {
        assert_eq!(ProviderError::upstream("OpenAI", 400, "bad").status_code(), 400);
        assert_eq!(ProviderError::upstream("OpenAI", 503, "down").status_code(), 503);
        assert_eq!(ProviderError::upstream("OpenAI", 302, "moved").status_code(), 500);
        assert_eq!(ProviderError::upstream("OpenAI", 200, "odd").status_code(), 500);
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(ProviderError::timeout("OpenAI", "late").is_transport());
        assert!(ProviderError::transport("OpenAI", "reset").is_transport());
        assert!(!ProviderError::auth("OpenAI", "bad key").is_transport());
        assert!(!ProviderError::rate_limit("OpenAI", "slow").is_transport());
        assert!(!ProviderError::upstream("OpenAI", 500, "down").is_transport());
    }

    #[test]
    fn provider_identity_is_attached_to_provider_failures() {
        assert_eq!(
            ProviderError::auth("Anthropic", "bad key").provider(),
            Some("Anthropic")
        );
        assert_eq!(ProviderError::validation("bad input").provider(), None);
        assert_eq!(
            ProviderError::empty_response("Google Gemini").to_string(),
            "No response from Google Gemini"
        );
    }
}
