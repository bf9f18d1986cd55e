//! A provider fronting its pool as one outbound.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    Error,
    app::remote_content_manager::{
        DelayHistory, ProxyManager,
        healthcheck::HealthCheck,
        providers::{
            Provider, RefreshSummary,
            proxy_provider::{ProxySet, ProxySetProvider, ThreadSafeProxyProvider},
        },
    },
    common::timer::spawn_ticker,
    config::internal::ProviderOptions,
    proxy::{
        AnyOutboundDatagram, AnyOutboundHandler, AnyStream, Networks, OutboundHandler,
        OutboundType, ProxyError, converters::OutboundBuilder, group::Selector,
    },
    session::{Network, Session},
};

pub struct Handler {
    opts: ProviderOptions,
    provider: ThreadSafeProxyProvider,
    selector: Selector,
    proxy_manager: ProxyManager,

    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.opts.tag)
            .field("policy", &self.opts.policy)
            .finish()
    }
}

impl Handler {
    pub fn new(
        opts: ProviderOptions,
        builder: Arc<dyn OutboundBuilder>,
    ) -> crate::Result<Self> {
        let provider = Arc::new(ProxySetProvider::from_options(&opts, builder)?);
        Ok(Self::with_provider(opts, provider))
    }

    pub fn with_provider(opts: ProviderOptions, provider: ThreadSafeProxyProvider) -> Self {
        let proxy_manager = ProxyManager::new();
        let selector = Selector::new(&opts, proxy_manager.clone());
        Self {
            opts,
            provider,
            selector,
            proxy_manager,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Loads the pool and starts the background work: the refresh
    /// scheduler, the health check and the load balance picker.
    ///
    /// A failed initial load is logged and retried by the refresh scheduler
    /// one interval later, for remote and local sources alike. A stale cache
    /// is refreshed right away.
    pub async fn start(self: &Arc<Self>) {
        let refresh_now = match self.provider.initialize().await {
            Ok(summary) => {
                if summary.total == 0 {
                    warn!("provider {} started without outbounds", self.name());
                }
                summary.stale
            }
            Err(e) => {
                error!("provider {} initial load failed: {e}", self.name());
                false
            }
        };

        let first = if refresh_now {
            Instant::now()
        } else {
            Instant::now() + self.opts.interval
        };
        let weak = Arc::downgrade(self);
        let handle = spawn_ticker(
            format!("{} refresh", self.name()),
            first,
            self.opts.interval,
            self.token.child_token(),
            move || {
                let weak = weak.clone();
                async move {
                    let Some(handler) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = handler.update().await {
                        error!("provider {} refresh failed: {e}", handler.name());
                    }
                }
            },
        );
        self.track(handle);

        match &self.selector {
            Selector::UrlTest(s) => {
                let provider = self.provider.clone();
                let handle = s
                    .healthcheck()
                    .kick_off(move || provider.proxies().handlers(), self.token.child_token());
                self.track(handle);
            }
            Selector::LoadBalance(lb) => {
                let provider = self.provider.clone();
                let handle = lb.kick_off(move || provider.proxies(), self.token.child_token());
                self.track(handle);
            }
            Selector::Select(_) | Selector::Unknown(_) => {}
        }
    }

    /// Cancels the background work and waits for it to exit. Later dials
    /// fail.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks_guard());
        for t in tasks {
            if let Err(e) = t.await {
                debug!("provider {} task ended abnormally: {e}", self.name());
            }
        }
        info!("provider {} closed", self.name());
    }

    fn tasks_guard(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks_guard();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    pub fn proxies(&self) -> Arc<ProxySet> {
        self.provider.proxies()
    }

    /// The inner a tcp dial would use right now.
    pub fn now(&self) -> Option<String> {
        self.selector
            .select(&self.proxies(), Network::Tcp)
            .map(|h| h.name().to_owned())
    }

    pub fn all(&self) -> Vec<String> {
        self.proxies().tags().to_vec()
    }

    pub fn all_outbounds(&self) -> Vec<AnyOutboundHandler> {
        self.proxies().handlers()
    }

    pub fn select_outbound(&self, tag: &str) -> crate::Result<()> {
        match &self.selector {
            Selector::Select(s) => s.set_active(&self.proxies(), tag),
            _ => Err(Error::Operation(format!(
                "provider {} with policy {} does not support selecting",
                self.name(),
                self.opts.policy
            ))),
        }
    }

    /// Runs one refresh cycle now.
    pub async fn update(&self) -> crate::Result<RefreshSummary> {
        let summary = self.provider.update().await?;
        self.proxy_manager.remove(&summary.removed);

        if !summary.added.is_empty() {
            if let Some(hc) = self.selector.healthcheck() {
                self.probe_in_background(hc.clone());
            }
        }
        Ok(summary)
    }

    fn probe_in_background(&self, hc: Arc<HealthCheck>) {
        let proxies = self.proxies().handlers();
        let token = self.token.child_token();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = hc.check(proxies) => {}
            }
        });
        self.track(handle);
    }

    /// Runs one probe round now. Returns `false` when a round was already
    /// running.
    pub async fn healthcheck(&self) -> crate::Result<bool> {
        match self.selector.healthcheck() {
            Some(hc) => Ok(hc.check(self.proxies().handlers()).await),
            None => Err(Error::Operation(format!(
                "provider {} with policy {} has no health check",
                self.name(),
                self.opts.policy
            ))),
        }
    }

    pub fn delay(&self, tag: &str) -> u16 {
        self.proxy_manager.last_delay(tag)
    }

    pub fn delay_history(&self, tag: &str) -> Vec<DelayHistory> {
        self.proxy_manager.delay_history(tag)
    }

    pub fn as_map(&self) -> serde_json::Map<String, Value> {
        let mut m = self.provider.as_map();
        m.insert("policy".to_owned(), json!(self.opts.policy.to_string()));
        m.insert("now".to_owned(), json!(self.now()));
        m.insert("all".to_owned(), json!(self.all()));
        m
    }

    fn pick(&self, network: Network) -> io::Result<AnyOutboundHandler> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProxyError::Closed(self.name().to_owned()).into());
        }
        self.selector
            .select(&self.proxies(), network)
            .ok_or_else(|| {
                ProxyError::NoHealthyOutbound {
                    provider: self.name().to_owned(),
                    network,
                }
                .into()
            })
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[async_trait]
impl OutboundHandler for Handler {
    fn name(&self) -> &str {
        &self.opts.tag
    }

    fn proto(&self) -> OutboundType {
        OutboundType::Provider
    }

    fn networks(&self) -> Networks {
        self.proxies().networks()
    }

    async fn connect_stream(&self, sess: &Session) -> io::Result<AnyStream> {
        let inner = self.pick(Network::Tcp)?;
        debug!("{} dialing {sess} via {}", self.name(), inner.name());
        inner.connect_stream(sess).await
    }

    async fn connect_datagram(
        &self,
        sess: &Session,
    ) -> io::Result<AnyOutboundDatagram> {
        let inner = self.pick(Network::Udp)?;
        debug!("{} opening udp {sess} via {}", self.name(), inner.name());
        inner.connect_datagram(sess).await
    }
}
