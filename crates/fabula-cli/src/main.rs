mod server;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fabula_contracts::events::EventWriter;
use fabula_contracts::GatewayConfig;
use fabula_engine::{
    FewShotExample, Gateway, ImageCall, SamplingParams, SearchCall, StoryCall, Upload,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "fabula",
    version,
    about = "Story generation, image search and image generation gateway"
)]
struct Cli {
    /// Tracing filter, overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve(ServeArgs),
    Story(StoryArgs),
    Search(SearchArgs),
    Image(ImageArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct StoryArgs {
    #[arg(long, default_value = "openai")]
    provider: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long = "image-url")]
    image_urls: Vec<String>,
    /// JSON file holding `[{image_base64, story}, ...]`.
    #[arg(long)]
    few_shot: Option<PathBuf>,
    #[arg(long, default_value_t = 1.0)]
    temperature: f64,
    #[arg(long, default_value_t = 1000)]
    max_tokens: u32,
    #[arg(long, default_value_t = 1.0)]
    top_p: f64,
    #[arg(long)]
    top_k: Option<u32>,
    #[arg(long)]
    thinking_budget: Option<u32>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SearchArgs {
    #[arg(long, default_value = "google")]
    provider: String,
    #[arg(long)]
    query: String,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    cse_id: Option<String>,
    #[arg(long, default_value_t = 10)]
    num_results: i64,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ImageArgs {
    #[arg(long, default_value = "openai")]
    provider: String,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Provider option as `key=value`; JSON values are decoded.
    #[arg(long = "option")]
    options: Vec<String>,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("fabula error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;
    let config = GatewayConfig::from_env();
    match cli.command {
        Command::Serve(args) => run_serve(config, args),
        Command::Story(args) => run_story(config, args),
        Command::Search(args) => run_search(config, args),
        Command::Image(args) => run_image(config, args),
    }
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log level {directive:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_gateway(config: GatewayConfig, events: Option<PathBuf>) -> Gateway {
    let gateway = Gateway::new(config);
    match events {
        Some(path) => gateway.with_events(EventWriter::new(path)),
        None => gateway,
    }
}

fn run_serve(mut config: GatewayConfig, args: ServeArgs) -> Result<i32> {
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = &args.events {
        info!(path = %path.display(), "writing request events");
    }
    // The gateway owns blocking HTTP clients; build it before the runtime
    // and drop the last handle after the runtime is gone.
    let gateway = Arc::new(build_gateway(config, args.events));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(server::serve(Arc::clone(&gateway)))?;
    drop(runtime);
    drop(gateway);
    Ok(0)
}

fn run_story(config: GatewayConfig, args: StoryArgs) -> Result<i32> {
    let uploads = args
        .images
        .iter()
        .map(|path| read_upload(path))
        .collect::<Result<Vec<_>>>()?;
    let few_shot_examples = match &args.few_shot {
        Some(path) => read_few_shot(path)?,
        None => Vec::new(),
    };
    let api_key = args
        .api_key
        .or_else(|| story_key_from_env(&args.provider, |name| env::var(name).ok()));
    let call = StoryCall {
        provider: Some(args.provider),
        model: args.model,
        api_key,
        uploads,
        image_urls: args.image_urls,
        sampling: SamplingParams {
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            top_p: args.top_p,
            top_k: args.top_k,
            thinking_budget: args.thinking_budget,
        },
        few_shot_examples,
    };
    let outcome = build_gateway(config, args.events).generate_story(call)?;
    print_json(&outcome)?;
    Ok(0)
}

fn run_search(config: GatewayConfig, args: SearchArgs) -> Result<i32> {
    let lookup = |name: &str| env::var(name).ok();
    let api_key = args
        .api_key
        .or_else(|| search_key_from_env(&args.provider, lookup));
    let cse_id = args.cse_id.or_else(|| non_empty(lookup("GOOGLE_CSE_ID")));
    let call = SearchCall {
        query: args.query,
        provider: Some(args.provider),
        api_key,
        cse_id,
        num_results: Some(args.num_results),
    };
    let outcome = build_gateway(config, args.events).search(call)?;
    print_json(&outcome)?;
    Ok(0)
}

fn run_image(config: GatewayConfig, args: ImageArgs) -> Result<i32> {
    let options = parse_options(&args.options)?;
    let api_key = args
        .api_key
        .or_else(|| image_key_from_env(&args.provider, |name| env::var(name).ok()));
    let call = ImageCall {
        prompt: args.prompt,
        provider: Some(args.provider),
        api_key,
        model: args.model,
        options,
    };
    let outcome = build_gateway(config, args.events).generate_image(call)?;
    print_json(&outcome)?;
    Ok(0)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Upload { file_name, bytes })
}

fn read_few_shot(path: &Path) -> Result<Vec<FewShotExample>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid few-shot JSON in {}", path.display()))?;
    if !value.is_array() {
        bail!("few-shot file {} must hold a JSON array", path.display());
    }
    Ok(FewShotExample::parse_list(&value))
}

fn parse_options(raw: &[String]) -> Result<Map<String, Value>> {
    let mut options = Map::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("option {entry:?} must be key=value");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("option {entry:?} has an empty key");
        }
        let value = serde_json::from_str::<Value>(value.trim())
            .unwrap_or_else(|_| Value::String(value.to_string()));
        options.insert(key.to_string(), value);
    }
    Ok(options)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn first_env<F>(names: &[&str], lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names.iter().find_map(|name| non_empty(lookup(name)))
}

fn story_key_from_env<F: Fn(&str) -> Option<String>>(provider: &str, lookup: F) -> Option<String> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "openai" => first_env(&["OPENAI_API_KEY"], lookup),
        "anthropic" => first_env(&["ANTHROPIC_API_KEY"], lookup),
        "google" => first_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"], lookup),
        _ => None,
    }
}

fn search_key_from_env<F: Fn(&str) -> Option<String>>(provider: &str, lookup: F) -> Option<String> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "google" => first_env(&["GOOGLE_API_KEY"], lookup),
        "bing" => first_env(&["BING_API_KEY"], lookup),
        _ => None,
    }
}

fn image_key_from_env<F: Fn(&str) -> Option<String>>(provider: &str, lookup: F) -> Option<String> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "openai" => first_env(&["OPENAI_API_KEY"], lookup),
        "stability" => first_env(&["STABILITY_API_KEY"], lookup),
        "replicate" => first_env(&["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"], lookup),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn options_decode_json_values_and_keep_plain_strings() {
        let options = parse_options(&[
            "n=2".to_string(),
            "quality=hd".to_string(),
            r#"replicate_params={"steps": 20}"#.to_string(),
            "size=1024x1024".to_string(),
        ])
        .unwrap();
        assert_eq!(options["n"], json!(2));
        assert_eq!(options["quality"], json!("hd"));
        assert_eq!(options["replicate_params"], json!({"steps": 20}));
        assert_eq!(options["size"], json!("1024x1024"));
    }

    #[test]
    fn malformed_options_are_rejected() {
        assert!(parse_options(&["novalue".to_string()]).is_err());
        assert!(parse_options(&["=1".to_string()]).is_err());
    }

    #[test]
    fn gemini_key_prefers_gemini_variable() {
        let vars = lookup(&[("GOOGLE_API_KEY", "google-key"), ("GEMINI_API_KEY", "gemini-key")]);
        assert_eq!(story_key_from_env("google", &vars).as_deref(), Some("gemini-key"));
        assert_eq!(search_key_from_env("google", &vars).as_deref(), Some("google-key"));
        assert_eq!(story_key_from_env("openai", &vars), None);
    }

    #[test]
    fn blank_env_values_are_skipped() {
        let vars = lookup(&[("REPLICATE_API_TOKEN", "  "), ("REPLICATE_API_KEY", "r8_key")]);
        assert_eq!(image_key_from_env("Replicate", &vars).as_deref(), Some("r8_key"));
        assert_eq!(image_key_from_env("midjourney", &vars), None);
    }

    #[test]
    fn story_command_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "fabula",
            "story",
            "--provider",
            "anthropic",
            "--image",
            "a.png",
            "--image",
            "b.jpg",
            "--image-url",
            "https://img.test/c.png",
            "--top-k",
            "40",
        ])
        .unwrap();
        let Command::Story(args) = cli.command else {
            panic!("expected story command");
        };
        assert_eq!(args.images.len(), 2);
        assert_eq!(args.image_urls, vec!["https://img.test/c.png".to_string()]);
        assert_eq!(args.top_k, Some(40));
        assert_eq!(args.max_tokens, 1000);
    }

    #[test]
    fn log_level_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["fabula", "serve", "--port", "8080", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.port, Some(8080));
    }

    #[test]
    fn few_shot_file_must_hold_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("examples.json");
        fs::write(&good, r#"[{"image_base64": "QUJD", "story": "A tale."}]"#).unwrap();
        assert_eq!(read_few_shot(&good).unwrap().len(), 1);

        let bad = dir.path().join("object.json");
        fs::write(&bad, r#"{"image_base64": "QUJD"}"#).unwrap();
        assert!(read_few_shot(&bad).is_err());
    }
}
