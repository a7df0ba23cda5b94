use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8402;
const DEFAULT_REGION: &str = "br";
const DEFAULT_ALIASES: &str = "br=eu";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// A variable that is set but can't be used. Only ever seen at startup.
#[derive(Debug, Fail)]
#[fail(display = "invalid value {:?} for {}", value, key)]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub alpr_bin: String,
    pub default_region: String,
    /// Region codes rewritten before they reach `alpr`, e.g. `br` -> `eu`.
    pub region_aliases: HashMap<String, String>,
    pub fallback_regions: Vec<String>,
    pub top_n: Option<u32>,
    pub timeout: Duration,
    pub scratch_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Config {
            port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            alpr_bin: get("ALPR_BIN").unwrap_or_else(|| "alpr".to_string()),
            default_region: get("ALPR_REGION")
                .unwrap_or_else(|| DEFAULT_REGION.to_string())
                .to_ascii_lowercase(),
            region_aliases: parse_aliases(
                get("ALPR_REGION_ALIASES")
                    .as_deref()
                    .unwrap_or(DEFAULT_ALIASES),
            )?,
            fallback_regions: get("ALPR_FALLBACK_REGIONS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            top_n: match get("ALPR_TOP_N") {
                Some(v) => Some(parse("ALPR_TOP_N", &v)?),
                None => None,
            },
            timeout: Duration::from_secs(parse_or(
                get("ALPR_TIMEOUT_SECS"),
                "ALPR_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            scratch_dir: get("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            max_upload_bytes: parse_or(
                get("MAX_UPLOAD_BYTES"),
                "MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
        })
    }

    /// Lowercases the requested region (or the default) and applies the
    /// alias table. The result is handed to `alpr` as-is.
    pub fn resolve_region(&self, requested: Option<&str>) -> String {
        let region = requested
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(self.default_region.as_str())
            .to_ascii_lowercase();
        match self.region_aliases.get(&region) {
            Some(alias) => alias.clone(),
            None => region,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match value {
        Some(v) => parse(key, &v),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_aliases(value: &str) -> Result<HashMap<String, String>, ConfigError> {
    split_list(value)
        .into_iter()
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some(from), Some(to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
                    Ok((from.trim().to_string(), to.trim().to_string()))
                }
                _ => Err(ConfigError {
                    key: "ALPR_REGION_ALIASES".to_string(),
                    value: pair.clone(),
                }),
            }
        })
        .collect()
}
