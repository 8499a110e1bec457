//! Locate, parse and layer the configuration document.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, then
//! `FILERELAY_*` environment variables.

use std::io;
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::{ConfigError, ConfigResult};
use crate::model::RelayConfig;

/// Variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "FILERELAY_CONFIG";
/// File read when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "filerelay.yaml";

const SOURCE_ROOT_ENV: &str = "FILERELAY_SOURCE_ROOT";
const SOURCE_PATH_ENV: &str = "FILERELAY_SOURCE_PATH";
const STORE_BUCKET_ENV: &str = "FILERELAY_STORE_BUCKET";
const STORE_ENDPOINT_ENV: &str = "FILERELAY_STORE_ENDPOINT";
const STORE_REGION_ENV: &str = "FILERELAY_STORE_REGION";
const STORE_ACCESS_KEY_ENV: &str = "FILERELAY_STORE_ACCESS_KEY_ID";
const STORE_SECRET_KEY_ENV: &str = "FILERELAY_STORE_SECRET_ACCESS_KEY";
const DELETE_AFTER_TRANSFER_ENV: &str = "FILERELAY_DELETE_AFTER_TRANSFER";
const LOG_LEVEL_ENV: &str = "FILERELAY_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "FILERELAY_LOG_FORMAT";

/// Load configuration from the process environment.
///
/// # Errors
///
/// See [`load_with`].
pub fn load() -> ConfigResult<RelayConfig> {
    load_with(|name| env::var(name).ok())
}

/// Load configuration, resolving variables through `lookup`.
///
/// A missing default file is tolerated when `FILERELAY_SOURCE_ROOT` supplies
/// the one field without a default; a missing explicit file is an error.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] when there is neither a file nor a
/// source root, and propagates read, parse and validation failures.
pub fn load_with<F>(lookup: F) -> ConfigResult<RelayConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(explicit) = non_blank(&lookup, CONFIG_PATH_ENV) {
        return load_from_path(Path::new(&explicit), lookup);
    }

    let path = Path::new(DEFAULT_CONFIG_PATH);
    match read(path) {
        Ok(raw) => finish(parse_document(&raw, Some(path))?, &lookup),
        Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            if non_blank(&lookup, SOURCE_ROOT_ENV).is_none() {
                return Err(ConfigError::MissingEnv {
                    name: SOURCE_ROOT_ENV,
                });
            }
            finish(RelayConfig::default(), &lookup)
        }
        Err(err) => Err(err),
    }
}

/// Load the file at `path`, then apply overrides from `lookup` and validate.
///
/// # Errors
///
/// Returns [`ConfigError::Io`], [`ConfigError::Parse`] or
/// [`ConfigError::InvalidField`].
pub fn load_from_path<F>(path: &Path, lookup: F) -> ConfigResult<RelayConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = read(path)?;
    finish(parse_document(&raw, Some(path))?, &lookup)
}

/// Parse a YAML document without overrides or validation.
///
/// An empty document yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed YAML or unknown keys.
pub fn parse_yaml(raw: &str) -> ConfigResult<RelayConfig> {
    parse_document(raw, None)
}

fn parse_document(raw: &str, path: Option<&Path>) -> ConfigResult<RelayConfig> {
    if raw.trim().is_empty() {
        return Ok(RelayConfig::default());
    }
    serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.map(PathBuf::from),
        source,
    })
}

fn read(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn finish<F>(mut config: RelayConfig, lookup: &F) -> ConfigResult<RelayConfig>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup)?;
    config.validate()?;
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: &F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = non_blank(lookup, SOURCE_ROOT_ENV) {
        config.source.root = PathBuf::from(root);
    }
    if let Some(path) = non_blank(lookup, SOURCE_PATH_ENV) {
        config.source.path = path;
    }
    if let Some(raw) = non_blank(lookup, DELETE_AFTER_TRANSFER_ENV) {
        config.source.delete_after_transfer =
            parse_flag(&raw).ok_or_else(|| {
                ConfigError::invalid(
                    "source",
                    "delete_after_transfer",
                    Some(raw.clone()),
                    "expected a boolean flag",
                )
            })?;
    }

    let store = &mut config.store;
    for (name, slot) in [
        (STORE_BUCKET_ENV, &mut store.bucket),
        (STORE_ENDPOINT_ENV, &mut store.endpoint),
        (STORE_REGION_ENV, &mut store.region),
        (STORE_ACCESS_KEY_ENV, &mut store.access_key_id),
        (STORE_SECRET_KEY_ENV, &mut store.secret_access_key),
    ] {
        if let Some(value) = non_blank(lookup, name) {
            *slot = Some(value);
        }
    }

    if let Some(level) = non_blank(lookup, LOG_LEVEL_ENV) {
        config.logging.level = level;
    }
    if let Some(format) = non_blank(lookup, LOG_FORMAT_ENV) {
        config.logging.format = Some(format);
    }
    Ok(())
}

fn non_blank<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
