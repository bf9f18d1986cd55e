//! Selection policies. A policy maps one dispatch request to an inner
//! outbound of the live pool; it never dials by itself.

use std::sync::Arc;

use tracing::error;

use crate::{
    app::remote_content_manager::{
        ProxyManager, healthcheck::HealthCheck, providers::proxy_provider::ProxySet,
    },
    config::internal::{Policy, ProviderOptions},
    proxy::AnyOutboundHandler,
    session::Network,
};

pub mod loadbalance;
pub mod selector;
pub mod urltest;

pub enum Selector {
    UrlTest(urltest::UrlTest),
    LoadBalance(Arc<loadbalance::LoadBalance>),
    Select(selector::Select),
    /// Selects nothing, every dial fails.
    Unknown(String),
}

impl Selector {
    pub fn new(opts: &ProviderOptions, proxy_manager: ProxyManager) -> Self {
        match &opts.policy {
            Policy::UrlTest => Selector::UrlTest(urltest::UrlTest::new(Arc::new(
                HealthCheck::new(&opts.tag, &opts.url_test, proxy_manager),
            ))),
            Policy::LoadBalance => Selector::LoadBalance(Arc::new(
                loadbalance::LoadBalance::new(&opts.tag, opts.load_balance_interval),
            )),
            Policy::Select => {
                Selector::Select(selector::Select::new(&opts.tag, opts.default_tag.clone()))
            }
            Policy::Unknown(name) => {
                error!(
                    "provider {}: unknown policy {name}, no outbound will be selected",
                    opts.tag
                );
                Selector::Unknown(name.clone())
            }
        }
    }

    /// Re-evaluated for every dial, never cached.
    pub fn select(&self, set: &ProxySet, network: Network) -> Option<AnyOutboundHandler> {
        match self {
            Selector::UrlTest(s) => s.select(set, network),
            Selector::LoadBalance(s) => s.select(set, network),
            Selector::Select(s) => s.select(set, network),
            Selector::Unknown(_) => None,
        }
    }

    pub fn healthcheck(&self) -> Option<&Arc<HealthCheck>> {
        match self {
            Selector::UrlTest(s) => Some(s.healthcheck()),
            _ => None,
        }
    }

    pub fn policy(&self) -> Policy {
        match self {
            Selector::UrlTest(_) => Policy::UrlTest,
            Selector::LoadBalance(_) => Policy::LoadBalance,
            Selector::Select(_) => Policy::Select,
            Selector::Unknown(name) => Policy::Unknown(name.clone()),
        }
    }
}
