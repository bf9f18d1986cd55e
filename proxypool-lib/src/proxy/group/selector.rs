use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info};

use crate::{
    Error, app::remote_content_manager::providers::proxy_provider::ProxySet,
    proxy::AnyOutboundHandler, session::Network,
};

/// Explicit choice: the active tag, else the configured default, else the
/// first inserted inner.
pub struct Select {
    name: String,
    default_tag: Option<String>,
    active: ArcSwapOption<String>,
}

impl Select {
    pub fn new(name: &str, default_tag: Option<String>) -> Self {
        Self {
            name: name.to_owned(),
            default_tag,
            active: ArcSwapOption::empty(),
        }
    }

    pub fn set_active(&self, set: &ProxySet, tag: &str) -> crate::Result<()> {
        if !set.contains(tag) {
            return Err(Error::Operation(format!(
                "outbound {tag} not found in provider {}",
                self.name
            )));
        }
        info!("{} selected {tag}", self.name);
        self.active.store(Some(Arc::new(tag.to_owned())));
        Ok(())
    }

    pub fn active(&self) -> Option<String> {
        self.active.load_full().map(|t| t.as_ref().clone())
    }

    fn chosen<'a>(&self, set: &'a ProxySet) -> Option<&'a AnyOutboundHandler> {
        let active = self.active.load();
        active
            .as_deref()
            .and_then(|t| set.get(t))
            .or_else(|| self.default_tag.as_deref().and_then(|t| set.get(t)))
            .or_else(|| set.iter().next())
    }

    pub fn select(&self, set: &ProxySet, network: Network) -> Option<AnyOutboundHandler> {
        let h = self.chosen(set)?;
        if h.networks().supports(network) {
            Some(h.clone())
        } else {
            debug!("{}: {} does not carry {network}", self.name, h.name());
            None
        }
    }
}
