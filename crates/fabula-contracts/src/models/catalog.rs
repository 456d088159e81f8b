use indexmap::IndexMap;
use serde::Serialize;

pub const CAPABILITY_STORY: &str = "story";
pub const CAPABILITY_IMAGE: &str = "image";
pub const CAPABILITY_SEARCH: &str = "search";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known models, in preference order. The first model a provider lists for
/// a capability is that provider's default.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: default_models(),
        }
    }
}

impl ModelCatalog {
    pub fn for_provider(&self, provider: &str, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider && model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn default_for(&self, provider: &str, capability: &str) -> Option<&str> {
        self.models
            .values()
            .find(|model| model.provider == provider && model.supports(capability))
            .map(|model| model.name.as_str())
    }

    /// Caller's model when given, else the provider default, else empty.
    pub fn resolve(&self, requested: Option<&str>, provider: &str, capability: &str) -> String {
        requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_for(provider, capability).map(str::to_string))
            .unwrap_or_default()
    }
}

/// Name-based guess at "thinking" support; providers expose no capability
/// query for it, so a renamed model silently loses the budget.
pub fn supports_thinking(model: &str) -> bool {
    model.to_ascii_lowercase().contains("thinking")
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert("gpt-4o", "openai", &[CAPABILITY_STORY]);
    insert("gpt-4o-mini", "openai", &[CAPABILITY_STORY]);
    insert("claude-3-5-sonnet-20241022", "anthropic", &[CAPABILITY_STORY]);
    insert("claude-3-opus-20240229", "anthropic", &[CAPABILITY_STORY]);
    insert("claude-3-haiku-20240307", "anthropic", &[CAPABILITY_STORY]);
    insert("gemini-1.5-flash", "google", &[CAPABILITY_STORY]);
    insert("gemini-1.5-pro", "google", &[CAPABILITY_STORY]);
    insert("gemini-2.0-flash-thinking-exp", "google", &[CAPABILITY_STORY]);
    insert("dall-e-3", "openai", &[CAPABILITY_IMAGE]);
    insert("dall-e-2", "openai", &[CAPABILITY_IMAGE]);
    insert(
        "stable-diffusion-xl-1024-v1-0",
        "stability",
        &[CAPABILITY_IMAGE],
    );
    insert("stability-ai/sdxl:latest", "replicate", &[CAPABILITY_IMAGE]);
    insert("google-custom-search", "google", &[CAPABILITY_SEARCH]);
    insert("bing-image-search", "bing", &[CAPABILITY_SEARCH]);

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_defaults_match_gateway_contract() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.default_for("openai", CAPABILITY_STORY), Some("gpt-4o"));
        assert_eq!(
            catalog.default_for("anthropic", CAPABILITY_STORY),
            Some("claude-3-5-sonnet-20241022")
        );
        assert_eq!(
            catalog.default_for("google", CAPABILITY_STORY),
            Some("gemini-1.5-flash")
        );
        assert_eq!(catalog.default_for("openai", CAPABILITY_IMAGE), Some("dall-e-3"));
        assert_eq!(
            catalog.default_for("stability", CAPABILITY_IMAGE),
            Some("stable-diffusion-xl-1024-v1-0")
        );
        assert_eq!(
            catalog.default_for("replicate", CAPABILITY_IMAGE),
            Some("stability-ai/sdxl:latest")
        );
        assert_eq!(catalog.default_for("bing", CAPABILITY_STORY), None);
    }

    #[test]
    fn resolve_prefers_explicit_model() {
        let catalog = ModelCatalog::default();
        assert_eq!(
            catalog.resolve(Some(" gpt-4o-mini "), "openai", CAPABILITY_STORY),
            "gpt-4o-mini"
        );
        assert_eq!(catalog.resolve(Some(""), "openai", CAPABILITY_STORY), "gpt-4o");
        assert_eq!(catalog.resolve(None, "unknown", CAPABILITY_STORY), "");
    }

    #[test]
    fn thinking_heuristic_is_case_insensitive() {
        assert!(supports_thinking("gemini-2.0-flash-THINKING-exp"));
        assert!(!supports_thinking("gemini-1.5-pro"));
    }

    #[test]
    fn for_provider_keeps_catalog_order() {
        let catalog = ModelCatalog::default();
        let names: Vec<String> = catalog
            .for_provider("google", CAPABILITY_STORY)
            .into_iter()
            .map(|model| model.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "gemini-1.5-flash",
                "gemini-1.5-pro",
                "gemini-2.0-flash-thinking-exp"
            ]
        );
    }
}
