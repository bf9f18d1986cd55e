use crate::Error;
use std::{fmt::Display, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(PartialEq, Eq, Serialize, Deserialize, Default, Copy, Clone, Debug)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    #[serde(alias = "off")]
    Silent,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Silent => write!(f, "off"),
        }
    }
}

/// A value written either as a single item or as a sequence.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Listable<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for Listable<T> {
    fn default() -> Self {
        Listable::Many(Vec::new())
    }
}

impl<T> Listable<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Listable::One(v) => vec![v],
            Listable::Many(v) => v,
        }
    }
}

impl<T> From<Vec<T>> for Listable<T> {
    fn from(value: Vec<T>) -> Self {
        Listable::Many(value)
    }
}

/// Example
/// ```yaml
/// ---
/// log-level: info
/// cache-dir: providers
/// providers:
///   - tag: airport
///     provider_type: url
///     url: https://example.com/sub?token=xxx
///     interval: 1h
///     policy: url-test
///     url_test:
///       url: http://www.gstatic.com/generate_204
///       interval: 1m
///       tolerance: 50
///     include_key_words: [HK, JP]
///     exclude_key_words: [expire]
///   - tag: local
///     provider_type: file
///     path: [./nodes.yaml]
///     policy: select
///     default: JP-01
/// ```
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    #[serde(alias = "log_level")]
    pub log_level: LogLevel,
    /// Where caches for url providers without an explicit path are kept,
    /// relative to the working directory
    #[serde(alias = "cache_dir")]
    pub cache_dir: Option<String>,
    pub providers: Vec<ProviderDef>,
}

impl TryFrom<PathBuf> for Config {
    type Error = Error;

    fn try_from(value: PathBuf) -> Result<Self, Self::Error> {
        let content = std::fs::read_to_string(value)?;
        let config = content.parse::<Config>()?;
        Ok(config)
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s).map_err(|x| {
            Error::InvalidConfig(format!("could not parse config content: {x}"))
        })
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(default)]
pub struct ProviderDef {
    pub tag: String,
    #[serde(alias = "provider-type")]
    pub provider_type: String,
    pub url: Listable<String>,
    pub path: Listable<String>,
    #[serde(rename = "default")]
    pub default_tag: String,
    pub interval: String,
    pub policy: String,
    pub prune: bool,
    #[serde(alias = "url-test")]
    pub url_test: UrlTestDef,
    #[serde(alias = "include-key-words")]
    pub include_key_words: Listable<String>,
    #[serde(alias = "exclude-key-words")]
    pub exclude_key_words: Listable<String>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(default)]
pub struct UrlTestDef {
    pub url: String,
    pub interval: String,
    /// milliseconds
    pub tolerance: u16,
    #[serde(alias = "max-age")]
    pub max_age: String,
}
