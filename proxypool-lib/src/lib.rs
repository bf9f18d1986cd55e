use crate::{
    app::outbound::manager::OutboundManager,
    config::{def, internal::InternalConfig},
    proxy::{OutboundHandler, converters::DefaultOutboundBuilder},
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};
use thiserror::Error;
use tracing::{error, info};

pub mod app;
pub mod common;
pub mod config;
pub mod proxy;
pub mod session;

pub use config::def::{Config as ProxyPoolConfigDef, LogLevel};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("provider {0} has no outbound left")]
    EmptyProvider(String),
    #[error("unsupported outbound kind: {0}")]
    Unsupported(String),
    #[error("operation error: {0}")]
    Operation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Options {
    pub config: Config,
    pub cwd: Option<String>,
    pub rt: Option<TokioRuntime>,
    pub log_file: Option<String>,
}

pub enum TokioRuntime {
    MultiThread,
    SingleThread,
}

pub enum Config {
    Def(ProxyPoolConfigDef),
    File(String),
    Str(String),
}

impl Config {
    pub fn try_parse(self, cwd: &Path) -> Result<InternalConfig> {
        let def = match self {
            Config::Def(c) => c,
            Config::File(file) => {
                let path = PathBuf::from(file);
                let path = if path.is_absolute() {
                    path
                } else {
                    cwd.join(path)
                };
                def::Config::try_from(path)?
            }
            Config::Str(s) => s.parse::<def::Config>()?,
        };
        InternalConfig::try_from_def(def, cwd)
    }
}

static CRYPTO_PROVIDER_LOCK: OnceLock<()> = OnceLock::new();

pub fn setup_default_crypto_provider() {
    CRYPTO_PROVIDER_LOCK.get_or_init(|| {
        #[cfg(feature = "aws-lc-rs")]
        {
            _ = rustls::crypto::aws_lc_rs::default_provider().install_default()
        }
        #[cfg(feature = "ring")]
        {
            _ = rustls::crypto::ring::default_provider().install_default()
        }
    });
}

/// Parses the config, validates it and exits.
pub fn test_config(config: Config, cwd: Option<String>) -> Result<InternalConfig> {
    let cwd = PathBuf::from(cwd.unwrap_or_else(|| ".".to_string()));
    config.try_parse(&cwd)
}

/// Builds a runtime, starts every configured provider and blocks until
/// Ctrl-C is received.
pub fn start_scaffold(opts: Options) -> Result<()> {
    let rt = match opts.rt.as_ref().unwrap_or(&TokioRuntime::MultiThread) {
        TokioRuntime::MultiThread => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?,
        TokioRuntime::SingleThread => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?,
    };
    let cwd = opts.cwd.unwrap_or_else(|| ".".to_string());
    let config = opts.config.try_parse(Path::new(&cwd))?;

    app::logging::setup_logging(config.log_level, &cwd, opts.log_file);

    rt.block_on(async {
        match start(config).await {
            Err(e) => {
                eprintln!("start error: {e}");
                Err(e)
            }
            Ok(_) => Ok(()),
        }
    })
}

pub async fn start(config: InternalConfig) -> Result<()> {
    setup_default_crypto_provider();

    let manager =
        OutboundManager::new(config.providers, Arc::new(DefaultOutboundBuilder))?;
    manager.start().await;

    for provider in manager.providers() {
        info!(
            "provider {} ready with {} outbounds",
            provider.name(),
            provider.all().len()
        );
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutting down");
    manager.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Config, test_config};
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn initialize() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
            crate::setup_default_crypto_provider();
        });
    }

    #[test]
    fn test_config_from_str() {
        initialize();
        let conf = r#"
        log-level: debug
        cache-dir: /tmp/proxypool
        providers:
          - tag: sub
            url: https://example.com/sub
        "#;

        let config = test_config(Config::Str(conf.to_owned()), None)
            .expect("config should parse");
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].tag, "sub");
    }

    #[test]
    fn test_config_rejects_missing_url() {
        initialize();
        let conf = r#"
        providers:
          - tag: sub
            provider_type: url
        "#;

        let err = test_config(Config::Str(conf.to_owned()), None).unwrap_err();
        assert!(err.to_string().contains("missing provider url"));
    }
}
