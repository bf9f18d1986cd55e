pub mod proxy_set_provider;

pub use proxy_set_provider::ProxySetProvider;

use std::{collections::HashMap, sync::Arc};

use crate::{
    app::remote_content_manager::providers::Provider,
    config::descriptor::OutboundDescriptor,
    proxy::{AnyOutboundHandler, Networks},
    session::Network,
};

pub type ThreadSafeProxyProvider = Arc<dyn ProxyProvider + Send + Sync>;

pub trait ProxyProvider: Provider {
    /// The live pool. The snapshot never changes; refreshes publish a new one.
    fn proxies(&self) -> Arc<ProxySet>;
}

#[derive(Clone, Debug)]
struct Inner {
    descriptor: Option<OutboundDescriptor>,
    handler: AnyOutboundHandler,
}

/// An immutable pool of inner outbounds: unique tags in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct ProxySet {
    tags: Vec<String>,
    inners: HashMap<String, Inner>,
}

impl ProxySet {
    /// A pool of ready made handlers, keyed by their names. Later duplicates
    /// replace earlier ones in place.
    pub fn from_handlers(handlers: Vec<AnyOutboundHandler>) -> Self {
        let mut set = Self::default();
        for handler in handlers {
            set.upsert(None, handler);
        }
        set
    }

    pub(crate) fn upsert(
        &mut self,
        descriptor: Option<OutboundDescriptor>,
        handler: AnyOutboundHandler,
    ) {
        let tag = handler.name().to_owned();
        if !self.inners.contains_key(&tag) {
            self.tags.push(tag.clone());
        }
        self.inners.insert(tag, Inner {
            descriptor,
            handler,
        });
    }

    pub(crate) fn retain(&mut self, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let (kept, removed): (Vec<String>, Vec<String>) =
            self.tags.drain(..).partition(|t| keep(t));
        for tag in &removed {
            self.inners.remove(tag);
        }
        self.tags = kept;
        removed
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.inners.contains_key(tag)
    }

    pub fn get(&self, tag: &str) -> Option<&AnyOutboundHandler> {
        self.inners.get(tag).map(|i| &i.handler)
    }

    pub fn descriptor(&self, tag: &str) -> Option<&OutboundDescriptor> {
        self.inners.get(tag).and_then(|i| i.descriptor.as_ref())
    }

    /// Handlers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &AnyOutboundHandler> {
        self.tags.iter().filter_map(|t| self.get(t))
    }

    pub fn handlers(&self) -> Vec<AnyOutboundHandler> {
        self.iter().cloned().collect()
    }

    pub fn networks(&self) -> Networks {
        self.iter()
            .fold(Networks::NONE, |acc, h| acc.union(h.networks()))
    }

    pub fn first_supporting(&self, network: Network) -> Option<&AnyOutboundHandler> {
        self.iter().find(|h| h.networks().supports(network))
    }
}
