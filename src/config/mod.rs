//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pubcache";
const DEFAULT_COLLECT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_NOTIFICATION_BATCH_LIMIT: u64 = 100;
const DEFAULT_COLLECT_BATCH_SIZE: u64 = 256;
const DEFAULT_SIDE_STORE_DIR: &str = "side-store";

/// Command-line arguments for the pubcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "pubcache",
    version,
    about = "Published content snapshot cache tools"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PUBCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the converted property values of one node as JSON.
    Inspect(InspectArgs),
    /// Regenerate the durable side store.
    Rebuild(RebuildArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the JSON fixture the in-memory repositories are loaded from.
    #[arg(long = "fixture", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub fixture: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the culture used when a read names none.
    #[arg(long = "default-culture", value_name = "CULTURE")]
    pub default_culture: Option<String>,

    /// Override the side store directory.
    #[arg(long = "side-store-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub side_store_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// Document id to inspect.
    #[arg(value_name = "NODE_ID")]
    pub node_id: i32,

    /// Read through a previewing snapshot (draft data wins when present).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub preview: bool,

    /// Culture to read variant values for.
    #[arg(long, value_name = "CULTURE")]
    pub culture: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RebuildArgs {
    /// Document type ids to rebuild; pass the flag without ids for every type.
    #[arg(long = "content-types", value_name = "IDS", value_delimiter = ',', num_args = 0..)]
    pub content_types: Option<Vec<i32>>,

    /// Media type ids to rebuild; pass the flag without ids for every type.
    #[arg(long = "media-types", value_name = "IDS", value_delimiter = ',', num_args = 0..)]
    pub media_types: Option<Vec<i32>>,

    /// Member type ids to rebuild; pass the flag without ids for every type.
    #[arg(long = "member-types", value_name = "IDS", value_delimiter = ',', num_args = 0..)]
    pub member_types: Option<Vec<i32>>,
}

impl RebuildArgs {
    /// No scope flag at all means every kind, every type.
    pub fn is_unscoped(&self) -> bool {
        self.content_types.is_none() && self.media_types.is_none() && self.member_types.is_none()
    }
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub side_store: SideStoreSettings,
    pub fixture: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub collect_interval_ms: u64,
    pub notification_batch_limit: usize,
    pub collect_batch_size: usize,
    pub default_culture: String,
    pub preview_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SideStoreSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PUBCACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    side_store: RawSideStoreSettings,
    fixture: Option<PathBuf>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(path) = overrides.fixture.as_ref() {
            self.fixture = Some(path.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(culture) = overrides.default_culture.as_ref() {
            self.cache.default_culture = Some(culture.clone());
        }
        if let Some(directory) = overrides.side_store_dir.as_ref() {
            self.side_store.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            side_store,
            fixture,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let side_store = build_side_store_settings(side_store);

        Ok(Self {
            logging,
            cache,
            side_store,
            fixture,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let collect_interval_ms = cache
        .collect_interval_ms
        .unwrap_or(DEFAULT_COLLECT_INTERVAL_MS);
    if collect_interval_ms == 0 {
        return Err(LoadError::invalid(
            "cache.collect_interval_ms",
            "must be greater than zero",
        ));
    }
    let notification_batch_limit = non_zero_usize(
        cache
            .notification_batch_limit
            .unwrap_or(DEFAULT_NOTIFICATION_BATCH_LIMIT),
        "cache.notification_batch_limit",
    )?;
    let collect_batch_size = non_zero_usize(
        cache.collect_batch_size.unwrap_or(DEFAULT_COLLECT_BATCH_SIZE),
        "cache.collect_batch_size",
    )?;
    let default_culture = cache
        .default_culture
        .map(|value| value.trim().to_string())
        .unwrap_or_default();

    Ok(CacheSettings {
        collect_interval_ms,
        notification_batch_limit,
        collect_batch_size,
        default_culture,
        preview_enabled: cache.preview_enabled.unwrap_or(true),
    })
}

fn build_side_store_settings(side_store: RawSideStoreSettings) -> SideStoreSettings {
    SideStoreSettings {
        directory: side_store
            .directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SIDE_STORE_DIR)),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    collect_interval_ms: Option<u64>,
    notification_batch_limit: Option<u64>,
    collect_batch_size: Option<u64>,
    default_culture: Option<String>,
    preview_enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSideStoreSettings {
    directory: Option<PathBuf>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
