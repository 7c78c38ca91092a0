pub mod retry;

use anyhow::{Context, Result, bail};
use config::{Environment, File, FileFormat};
use std::path::Path;
use tracing::info;
use url::Url;

use crate::models::common::Config;

pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config> {
    // Build the path to the config file
    let manifest_dir = env!("CARGO_MANIFEST_DIR").to_string();
    let config_path = Path::new(&manifest_dir).join(file_name);
    info!("Config path: {}", config_path.to_string_lossy());

    // YAML first, then FEED_* environment overrides (e.g. FEED_RPC_URL)
    let mut config: Config = config::Config::builder()
        .add_source(File::from(config_path.as_path()).format(FileFormat::Yaml))
        .add_source(
            Environment::with_prefix("FEED")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .context("failed to read config file")?
        .try_deserialize()
        .context("failed to parse config YAML")?;

    // Convert hyphens to underscores so the name is usable as a metric label
    config.chain_name = config.chain_name.replace('-', "_");

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    let url: Url = config
        .rpc_url
        .parse()
        .with_context(|| format!("invalid rpc_url: {}", config.rpc_url))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        bail!(
            "rpc_url must be a websocket endpoint (ws:// or wss://) for log subscriptions, got {}",
            url.scheme()
        );
    }
    if config.feed_capacity == 0 {
        bail!("feed_capacity must be greater than 0");
    }
    Ok(())
}

/// Shortens an address for display: `0x1234...abcd`.
pub fn truncate_addr(value: &str, n: usize) -> String {
    if value.is_ascii() && value.len() > n && value.len() >= 4 {
        format!("{}...{}", &value[..n], &value[value.len() - 4..])
    } else {
        value.to_string()
    }
}

pub(crate) fn strip_html(error: &str) -> String {
    // If the error contains HTML tags, extract just the text content
    if error.contains("<!doctype html>") || error.contains("<html>") {
        // Remove all HTML tags and return the first non-empty line of text
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        error.to_string()
    }
}
