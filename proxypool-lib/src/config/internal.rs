use std::{
    collections::HashSet,
    fmt::Display,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Serialize;
use tracing::warn;

use crate::{
    Error,
    common::utils::md5_str,
    config::def::{self, LogLevel, ProviderDef},
};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_PROBE_URL: &str = "http://www.gstatic.com/generate_204";
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LOAD_BALANCE_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CACHE_DIR: &str = "providers";
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct InternalConfig {
    pub log_level: LogLevel,
    pub cache_dir: PathBuf,
    pub providers: Vec<ProviderOptions>,
}

impl InternalConfig {
    pub fn try_from_def(def: def::Config, cwd: &Path) -> crate::Result<Self> {
        let cache_dir = PathBuf::from(
            def.cache_dir
                .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_owned()),
        );
        let cache_dir = if cache_dir.is_absolute() {
            cache_dir
        } else {
            cwd.join(cache_dir)
        };

        let mut seen = HashSet::new();
        let mut providers = Vec::with_capacity(def.providers.len());
        for p in def.providers {
            let opts = ProviderOptions::try_from_def(p, &cache_dir)?;
            if !seen.insert(opts.tag.clone()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate provider tag: {}",
                    opts.tag
                )));
            }
            providers.push(opts);
        }

        Ok(Self {
            log_level: def.log_level,
            cache_dir,
            providers,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Url,
    File,
}

impl Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Url => write!(f, "url"),
            ProviderType::File => write!(f, "file"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    UrlTest,
    LoadBalance,
    Select,
    Unknown(String),
}

impl Policy {
    /// Accepts `url-test`, `url_test` and `urlTest` spellings alike.
    pub fn parse(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "" | "urltest" => Policy::UrlTest,
            "loadbalance" => Policy::LoadBalance,
            "select" | "selector" => Policy::Select,
            _ => Policy::Unknown(name.to_owned()),
        }
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::UrlTest => write!(f, "url-test"),
            Policy::LoadBalance => write!(f, "load-balance"),
            Policy::Select => write!(f, "select"),
            Policy::Unknown(name) => write!(f, "{name}"),
        }
    }
}

/// One place subscription bytes come from. File providers only carry a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceOptions {
    pub url: Option<String>,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlTestOptions {
    pub url: String,
    pub interval: Duration,
    /// milliseconds a candidate must beat the current best by
    pub tolerance: u16,
    pub max_age: Duration,
}

impl Default for UrlTestOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROBE_URL.to_owned(),
            interval: DEFAULT_PROBE_INTERVAL,
            tolerance: 0,
            max_age: DEFAULT_PROBE_INTERVAL * 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderOptions {
    pub tag: String,
    pub provider_type: ProviderType,
    pub sources: Vec<SourceOptions>,
    pub default_tag: Option<String>,
    pub interval: Duration,
    pub policy: Policy,
    pub prune: bool,
    pub url_test: UrlTestOptions,
    pub load_balance_interval: Duration,
    pub include_key_words: Vec<String>,
    pub exclude_key_words: Vec<String>,
}

impl ProviderOptions {
    pub fn try_from_def(def: ProviderDef, cache_dir: &Path) -> crate::Result<Self> {
        if def.tag.is_empty() {
            return Err(Error::InvalidConfig("missing provider tag".to_owned()));
        }

        let provider_type = match def.provider_type.as_str() {
            "" | "url" | "http" => ProviderType::Url,
            "file" => ProviderType::File,
            other => {
                return Err(Error::InvalidConfig(format!(
                    "provider {}: unknown provider type {other}",
                    def.tag
                )));
            }
        };

        let urls: Vec<String> = def
            .url
            .into_vec()
            .into_iter()
            .filter(|u| !u.is_empty())
            .collect();
        let paths: Vec<String> = def
            .path
            .into_vec()
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();

        let sources = match provider_type {
            ProviderType::Url => {
                if urls.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "provider {}: missing provider url",
                        def.tag
                    )));
                }
                if paths.len() > urls.len() {
                    warn!(
                        "provider {}: {} paths given for {} urls, extra paths ignored",
                        def.tag,
                        paths.len(),
                        urls.len()
                    );
                }
                urls.into_iter()
                    .enumerate()
                    .map(|(i, url)| {
                        let path = match paths.get(i) {
                            Some(p) => PathBuf::from(p),
                            None => cache_path(cache_dir, &def.tag, &url),
                        };
                        SourceOptions {
                            url: Some(url),
                            path,
                        }
                    })
                    .collect()
            }
            ProviderType::File => {
                if paths.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "provider {}: missing provider path",
                        def.tag
                    )));
                }
                paths
                    .into_iter()
                    .map(|p| SourceOptions {
                        url: None,
                        path: PathBuf::from(p),
                    })
                    .collect()
            }
        };

        let interval = refresh_interval(&def.tag, &def.interval);

        let probe_interval = match def.url_test.interval.as_str() {
            "" => DEFAULT_PROBE_INTERVAL,
            s => at_least_min(parse_duration(s).map_err(|e| {
                Error::InvalidConfig(format!(
                    "provider {}: invalid url_test interval {s}: {e}",
                    def.tag
                ))
            })?),
        };
        let max_age = match def.url_test.max_age.as_str() {
            "" => probe_interval * 3,
            s => parse_duration(s).map_err(|e| {
                Error::InvalidConfig(format!(
                    "provider {}: invalid url_test max_age {s}: {e}",
                    def.tag
                ))
            })?,
        };
        let url_test = UrlTestOptions {
            url: if def.url_test.url.is_empty() {
                DEFAULT_PROBE_URL.to_owned()
            } else {
                def.url_test.url
            },
            interval: probe_interval,
            tolerance: def.url_test.tolerance,
            max_age,
        };

        Ok(Self {
            tag: def.tag,
            provider_type,
            sources,
            default_tag: Some(def.default_tag).filter(|t| !t.is_empty()),
            interval,
            policy: Policy::parse(&def.policy),
            prune: def.prune,
            url_test,
            load_balance_interval: DEFAULT_LOAD_BALANCE_INTERVAL,
            include_key_words: def.include_key_words.into_vec(),
            exclude_key_words: def.exclude_key_words.into_vec(),
        })
    }
}

/// `<cache_dir>/<tag>_<md5(url)>`
pub fn cache_path(cache_dir: &Path, tag: &str, url: &str) -> PathBuf {
    cache_dir.join(format!("{tag}_{}", md5_str(url.as_bytes())))
}

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s.trim())
}

fn at_least_min(d: Duration) -> Duration {
    d.max(MIN_INTERVAL)
}

fn refresh_interval(tag: &str, raw: &str) -> Duration {
    if raw.is_empty() {
        return DEFAULT_REFRESH_INTERVAL;
    }
    match parse_duration(raw) {
        Ok(d) if d.is_zero() => {
            warn!("provider {tag}: zero refresh interval, using the default");
            DEFAULT_REFRESH_INTERVAL
        }
        Ok(d) => at_least_min(d),
        Err(e) => {
            warn!("provider {tag}: invalid refresh interval {raw}: {e}, using the default");
            DEFAULT_REFRESH_INTERVAL
        }
    }
}
