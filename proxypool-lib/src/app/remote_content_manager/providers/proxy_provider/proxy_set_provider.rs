use std::{collections::HashSet, sync::Arc, time::Duration};

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::Uri;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::{ProxyProvider, ProxySet};
use crate::{
    Error,
    app::remote_content_manager::providers::{
        Provider, ProviderType, ProviderVehicleType, RefreshSummary,
        ThreadSafeProviderVehicle,
        fetcher::{Fetched, Fetcher},
        file_vehicle, http_vehicle,
    },
    config::{convert, descriptor::OutboundDescriptor, internal::ProviderOptions},
    proxy::converters::OutboundBuilder,
};

const LOOPBACK_SERVER: &str = "127.0.0.1";

/// Keeps the pool of one provider in sync with its sources.
pub struct ProxySetProvider {
    name: String,
    fetchers: Vec<Fetcher>,
    builder: Arc<dyn OutboundBuilder>,
    include_key_words: Vec<String>,
    exclude_key_words: Vec<String>,
    prune: bool,
    set: ArcSwap<ProxySet>,
    updated_at: ArcSwapOption<DateTime<Utc>>,
    refresh: tokio::sync::Mutex<()>,
}

impl ProxySetProvider {
    pub fn new(
        name: String,
        interval: Duration,
        vehicles: Vec<ThreadSafeProviderVehicle>,
        builder: Arc<dyn OutboundBuilder>,
    ) -> Self {
        let fetchers = vehicles
            .into_iter()
            .enumerate()
            .map(|(i, v)| Fetcher::new(format!("{name}#{i}"), interval, v))
            .collect();
        Self {
            name,
            fetchers,
            builder,
            include_key_words: vec![],
            exclude_key_words: vec![],
            prune: false,
            set: ArcSwap::from_pointee(ProxySet::default()),
            updated_at: ArcSwapOption::empty(),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// One http vehicle per url source, one file vehicle per path source.
    pub fn from_options(
        opts: &ProviderOptions,
        builder: Arc<dyn OutboundBuilder>,
    ) -> crate::Result<Self> {
        let mut vehicles: Vec<ThreadSafeProviderVehicle> =
            Vec::with_capacity(opts.sources.len());
        for source in &opts.sources {
            match &source.url {
                Some(url) => {
                    let uri: Uri = url.parse().map_err(|e| {
                        Error::InvalidConfig(format!(
                            "provider {}: invalid url {url}: {e}",
                            opts.tag
                        ))
                    })?;
                    vehicles.push(Arc::new(http_vehicle::Vehicle::new(uri, &source.path)?));
                }
                None => vehicles.push(Arc::new(file_vehicle::Vehicle::new(&source.path))),
            }
        }

        Ok(Self::new(opts.tag.clone(), opts.interval, vehicles, builder)
            .with_filters(
                opts.include_key_words.clone(),
                opts.exclude_key_words.clone(),
            )
            .with_prune(opts.prune))
    }

    pub fn with_filters(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.include_key_words = include.into_iter().filter(|k| !k.is_empty()).collect();
        self.exclude_key_words = exclude.into_iter().filter(|k| !k.is_empty()).collect();
        self
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    fn accepts(&self, d: &OutboundDescriptor) -> bool {
        if d.server == LOOPBACK_SERVER {
            debug!("{}: dropping loopback outbound {}", self.name, d.tag);
            return false;
        }
        if !self.include_key_words.is_empty()
            && !self.include_key_words.iter().any(|k| d.tag.contains(k))
        {
            return false;
        }
        if self.exclude_key_words.iter().any(|k| d.tag.contains(k)) {
            return false;
        }
        true
    }

    async fn initial_list(&self, f: &Fetcher) -> crate::Result<(Vec<OutboundDescriptor>, bool)> {
        let fetched = f.initial().await?;
        match convert::decode(&fetched.content) {
            Ok(list) => Ok((list, fetched.stale)),
            Err(e) if fetched.from_cache => {
                warn!("{}: cache {} undecodable ({e}), fetching", f.name(), f.path().display());
                let fetched = f.update().await?;
                Ok((convert::decode(&fetched.content)?, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Merges descriptors from every source into the live pool and publishes
    /// a new snapshot. Known tags with identical descriptors keep their
    /// handler; changed ones are rebuilt in place. With pruning enabled and
    /// every source loaded, tags that were not seen are dropped.
    pub fn reconcile(
        &self,
        lists: Vec<Vec<OutboundDescriptor>>,
        complete: bool,
    ) -> RefreshSummary {
        let current = self.set.load_full();
        let mut next = ProxySet::clone(&current);
        let mut summary = RefreshSummary::default();

        let mut seen = HashSet::new();
        let mut decoded = 0usize;
        for d in lists.into_iter().flatten() {
            decoded += 1;
            if !self.accepts(&d) {
                continue;
            }
            seen.insert(d.tag.clone());

            match next.descriptor(&d.tag) {
                Some(existing) if *existing == d => continue,
                _ => {}
            }
            let known = next.contains(&d.tag);

            let handler = match self.builder.build(&d) {
                Ok(h) => h,
                Err(e) => {
                    warn!("{}: skipping outbound {}: {e}", self.name, d.tag);
                    continue;
                }
            };
            if handler.name() != d.tag {
                warn!(
                    "{}: outbound {} built with name {}, skipped",
                    self.name,
                    d.tag,
                    handler.name()
                );
                continue;
            }

            if known {
                // the same tag twice in one cycle counts once
                if !summary.added.contains(&d.tag) && !summary.rebuilt.contains(&d.tag) {
                    summary.rebuilt.push(d.tag.clone());
                }
            } else {
                summary.added.push(d.tag.clone());
            }
            next.upsert(Some(d), handler);
        }

        if self.prune && complete {
            summary.removed = next.retain(|t| seen.contains(t));
        }

        if decoded > 0 && seen.is_empty() {
            warn!("{}: every outbound was filtered out", self.name);
        }

        summary.total = next.len();
        if !summary.added.is_empty() || !summary.rebuilt.is_empty() || !summary.removed.is_empty()
        {
            self.set.store(Arc::new(next));
        }
        self.updated_at.store(Some(Arc::new(Utc::now())));
        summary
    }
}

#[async_trait]
impl Provider for ProxySetProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn vehicle_type(&self) -> ProviderVehicleType {
        if self
            .fetchers
            .iter()
            .any(|f| f.vehicle_type() == ProviderVehicleType::Http)
        {
            ProviderVehicleType::Http
        } else {
            ProviderVehicleType::File
        }
    }

    fn typ(&self) -> ProviderType {
        ProviderType::Proxy
    }

    async fn initialize(&self) -> crate::Result<RefreshSummary> {
        let _refresh = self.refresh.lock().await;

        let mut lists = Vec::with_capacity(self.fetchers.len());
        let mut first_err = None;
        let mut stale = false;
        for f in &self.fetchers {
            match self.initial_list(f).await {
                Ok((list, s)) => {
                    stale |= s;
                    lists.push(list);
                }
                Err(e) => {
                    error!("{}: initial load failed: {e}", f.name());
                    first_err.get_or_insert(e);
                }
            }
        }

        if lists.is_empty() {
            return Err(first_err.unwrap_or_else(|| Error::EmptyProvider(self.name.clone())));
        }
        let complete = first_err.is_none();
        let mut summary = self.reconcile(lists, complete);
        summary.stale = stale;
        info!(
            "{} initialized with {} outbounds",
            self.name, summary.total
        );
        Ok(summary)
    }

    async fn update(&self) -> crate::Result<RefreshSummary> {
        let _refresh = self.refresh.lock().await;

        let mut lists = Vec::with_capacity(self.fetchers.len());
        let mut first_err = None;
        let mut unchanged = true;
        for f in &self.fetchers {
            let decoded = f.update().await.and_then(|Fetched { content, unchanged: same, .. }| {
                unchanged &= same;
                convert::decode(&content)
            });
            match decoded {
                Ok(list) => lists.push(list),
                Err(e) => {
                    error!("{}: refresh failed: {e}", f.name());
                    first_err.get_or_insert(e);
                }
            }
        }

        if lists.is_empty() {
            return Err(first_err.unwrap_or_else(|| Error::EmptyProvider(self.name.clone())));
        }
        let complete = first_err.is_none();
        if complete && unchanged {
            debug!("{}: sources unchanged", self.name);
            self.updated_at.store(Some(Arc::new(Utc::now())));
            return Ok(RefreshSummary {
                total: self.set.load().len(),
                unchanged: true,
                ..Default::default()
            });
        }

        let summary = self.reconcile(lists, complete);
        info!(
            "{} refreshed: {} added, {} rebuilt, {} removed, {} total",
            self.name,
            summary.added.len(),
            summary.rebuilt.len(),
            summary.removed.len(),
            summary.total
        );
        Ok(summary)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.load_full().map(|t| *t)
    }

    fn as_map(&self) -> serde_json::Map<String, Value> {
        let mut m = serde_json::Map::new();
        m.insert("name".to_owned(), json!(self.name));
        m.insert("type".to_owned(), json!(self.typ().to_string()));
        m.insert(
            "vehicleType".to_owned(),
            json!(self.vehicle_type().to_string()),
        );
        m.insert("updatedAt".to_owned(), json!(self.updated_at()));
        m
    }
}

impl ProxyProvider for ProxySetProvider {
    fn proxies(&self) -> Arc<ProxySet> {
        self.set.load_full()
    }
}
