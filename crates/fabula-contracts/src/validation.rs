//! Syntactic checks run before any provider is contacted.

use crate::config::GatewayConfig;
use crate::error::ProviderError;

pub const MAX_PROMPT_CHARS: usize = 4000;
pub const MAX_SEARCH_RESULTS: usize = 10;
pub const MIN_API_KEY_CHARS: usize = 10;

/// Returns the trimmed key, or an auth failure naming the provider.
pub fn validate_api_key(api_key: Option<&str>, provider: &str) -> Result<String, ProviderError> {
    let trimmed = api_key.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(ProviderError::auth(
            provider,
            format!("API key required for {provider}"),
        ));
    }
    if trimmed.chars().count() < MIN_API_KEY_CHARS {
        return Err(ProviderError::auth(provider, "API key too short"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_image_count(count: usize, max_images: usize) -> Result<(), ProviderError> {
    if count > max_images {
        return Err(ProviderError::validation(format!(
            "Too many images. Maximum {max_images} allowed"
        )));
    }
    if count < 1 {
        return Err(ProviderError::validation("At least one image required"));
    }
    Ok(())
}

/// Extension and size ceiling for one upload. Content is verified later by
/// decoding, so a passing extension proves nothing about the bytes.
pub fn validate_upload(
    file_name: &str,
    size_bytes: u64,
    config: &GatewayConfig,
) -> Result<(), ProviderError> {
    if file_name.trim().is_empty() {
        return Err(ProviderError::validation("Invalid image: No filename"));
    }
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if extension.is_empty() || !config.allowed_extensions.contains(&extension) {
        let allowed = config
            .allowed_extensions
            .iter()
            .cloned()
            .collect::<Vec<String>>()
            .join(", ");
        return Err(ProviderError::validation(format!(
            "Invalid image: Invalid file type. Allowed: {allowed}"
        )));
    }
    if size_bytes > config.max_content_length {
        let limit_mb = config.max_content_length as f64 / (1024.0 * 1024.0);
        return Err(ProviderError::validation(format!(
            "Invalid image: File size exceeds {limit_mb:.0}MB limit"
        )));
    }
    Ok(())
}

pub fn validate_prompt(prompt: &str) -> Result<String, ProviderError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::validation("Prompt is required"));
    }
    if trimmed.chars().count() > MAX_PROMPT_CHARS {
        return Err(ProviderError::validation(format!(
            "Prompt too long (max {MAX_PROMPT_CHARS} characters)"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_query(query: &str) -> Result<String, ProviderError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::validation("Search query is required"));
    }
    Ok(trimmed.to_string())
}

pub fn require_engine_id(engine_id: Option<&str>) -> Result<String, ProviderError> {
    engine_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::validation("Google Custom Search Engine ID (cse_id) is required")
        })
}

pub fn clamp_num_results(requested: i64) -> usize {
    requested.clamp(1, MAX_SEARCH_RESULTS as i64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_presence_and_length() {
        let missing = validate_api_key(None, "openai").unwrap_err();
        assert_eq!(missing.status_code(), 401);
        assert_eq!(missing.to_string(), "API key required for openai");

        let blank = validate_api_key(Some("   "), "bing").unwrap_err();
        assert_eq!(blank.to_string(), "API key required for bing");

        let short = validate_api_key(Some("abc"), "google").unwrap_err();
        assert_eq!(short.to_string(), "API key too short");

        assert_eq!(
            validate_api_key(Some("  sk-1234567890  "), "openai").unwrap(),
            "sk-1234567890"
        );
    }

    #[test]
    fn image_count_bounds() {
        let none = validate_image_count(0, 10).unwrap_err();
        assert_eq!(none.status_code(), 400);
        assert_eq!(none.to_string(), "At least one image required");

        let many = validate_image_count(11, 10).unwrap_err();
        assert_eq!(many.to_string(), "Too many images. Maximum 10 allowed");

        assert!(validate_image_count(1, 10).is_ok());
        assert!(validate_image_count(10, 10).is_ok());
    }

    #[test]
    fn upload_extension_and_size() {
        let config = GatewayConfig::default();
        assert!(validate_upload("photo.JPG", 1024, &config).is_ok());
        assert!(validate_upload("archive.tar.png", 1024, &config).is_ok());

        let wrong = validate_upload("notes.txt", 10, &config).unwrap_err();
        assert!(wrong.to_string().contains("Invalid file type"));

        let no_ext = validate_upload("photo", 10, &config).unwrap_err();
        assert!(no_ext.to_string().contains("Invalid file type"));

        let big = validate_upload("photo.png", config.max_content_length + 1, &config).unwrap_err();
        assert_eq!(big.to_string(), "Invalid image: File size exceeds 5MB limit");

        let unnamed = validate_upload("", 10, &config).unwrap_err();
        assert_eq!(unnamed.to_string(), "Invalid image: No filename");
    }

    #[test]
    fn prompt_rules() {
        assert_eq!(validate_prompt("  a lighthouse  ").unwrap(), "a lighthouse");
        assert_eq!(
            validate_prompt(" ").unwrap_err().to_string(),
            "Prompt is required"
        );
        let long = "x".repeat(MAX_PROMPT_CHARS + 1);
        assert_eq!(
            validate_prompt(&long).unwrap_err().to_string(),
            "Prompt too long (max 4000 characters)"
        );
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_CHARS)).is_ok());
    }

    #[test]
    fn search_inputs() {
        assert_eq!(clamp_num_results(50), 10);
        assert_eq!(clamp_num_results(0), 1);
        assert_eq!(clamp_num_results(7), 7);
        assert!(validate_query("   ").is_err());
        assert!(require_engine_id(None).is_err());
        assert!(require_engine_id(Some("  ")).is_err());
        assert_eq!(require_engine_id(Some(" cx-1 ")).unwrap(), "cx-1");
    }
}
