//! Layered configuration loading
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, then `DEXARB__SECTION__KEY` environment variables (a `.env` file is
//! read into the environment first).

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use std::path::Path;
use tracing::info;

use dexarb_core::ResolverConfig;

/// Default settings file, looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "dexarb.toml";

pub const ENV_PREFIX: &str = "DEXARB";

/// Load and validate configuration from file and environment
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ResolverConfig> {
    dotenvy::dotenv().ok();

    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
    };

    let settings = Config::builder()
        .add_source(file)
        .add_source(environment())
        .build()
        .context("failed to read resolver settings")?;

    let config = finish(settings)?;
    info!(
        "Loaded settings: max path length {}, relay {}",
        config.search.max_path_length,
        if config.execution.use_relay { "enabled" } else { "disabled" }
    );
    Ok(config)
}

/// Parse and validate a TOML document, without consulting the environment
pub fn settings_from_toml(toml: &str) -> anyhow::Result<ResolverConfig> {
    let settings = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .context("failed to parse resolver settings")?;
    finish(settings)
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("search.preferred_exchanges")
        .with_list_parse_key("search.disabled_exchanges")
        .with_list_parse_key("search.token_allowlist")
        .with_list_parse_key("search.token_denylist")
}

fn finish(settings: Config) -> anyhow::Result<ResolverConfig> {
    let config: ResolverConfig = settings
        .try_deserialize()
        .context("resolver settings have the wrong shape")?;
    config.validate().context("invalid resolver settings")?;
    Ok(config)
}
