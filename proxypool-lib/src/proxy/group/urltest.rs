use std::sync::Arc;

use tracing::trace;

use crate::{
    app::remote_content_manager::{
        healthcheck::HealthCheck, providers::proxy_provider::ProxySet,
    },
    proxy::AnyOutboundHandler,
    session::Network,
};

pub struct UrlTest {
    healthcheck: Arc<HealthCheck>,
}

impl UrlTest {
    pub fn new(healthcheck: Arc<HealthCheck>) -> Self {
        Self { healthcheck }
    }

    pub fn healthcheck(&self) -> &Arc<HealthCheck> {
        &self.healthcheck
    }

    /// The best ranked inner that can carry `network`. Before any probe
    /// succeeded, and when none of the ranked tags is in the pool anymore, the
    /// first inserted inner is used. A stale election selects nothing.
    pub fn select(&self, set: &ProxySet, network: Network) -> Option<AnyOutboundHandler> {
        let election = self.healthcheck.election();
        if self.healthcheck.is_stale(&election) {
            trace!("election stale after {} rounds", election.rounds);
            return None;
        }

        let mut any_ranked = false;
        for tag in &election.ranked {
            let Some(h) = set.get(tag) else {
                continue;
            };
            any_ranked = true;
            if h.networks().supports(network) {
                return Some(h.clone());
            }
        }

        if any_ranked {
            None
        } else {
            set.first_supporting(network).cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        app::remote_content_manager::ProxyManager,
        config::internal::UrlTestOptions,
        proxy::{Networks, mocks::ScriptedOutbound},
    };

    fn healthcheck(max_age: Duration) -> Arc<HealthCheck> {
        let opts = UrlTestOptions {
            url: "http://probe.test/".to_owned(),
            interval: Duration::from_secs(10),
            tolerance: 0,
            max_age,
        };
        Arc::new(HealthCheck::new("p", &opts, ProxyManager::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_follows_election() {
        let a = ScriptedOutbound::tcp("a", 120);
        let b = ScriptedOutbound::tcp("b", 30);
        let c = ScriptedOutbound::tcp("c", 80);
        let set = ProxySet::from_handlers(vec![a.handle(), b.handle(), c.handle()]);
        let hc = healthcheck(Duration::from_secs(30));
        let s = UrlTest::new(hc.clone());

        // nothing probed yet
        assert_eq!(s.select(&set, Network::Tcp).unwrap().name(), "a");

        hc.check(set.handlers()).await;
        assert_eq!(s.select(&set, Network::Tcp).unwrap().name(), "b");

        a.set_delay(Some(Duration::from_millis(90)));
        b.set_delay(None);
        hc.check(set.handlers()).await;
        assert_eq!(s.select(&set, Network::Tcp).unwrap().name(), "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_falls_through_by_network() {
        let fast = ScriptedOutbound::tcp("fast", 10);
        let udp = ScriptedOutbound::new(
            "udp",
            Networks::TCP_UDP,
            Some(Duration::from_millis(50)),
        );
        let set = ProxySet::from_handlers(vec![fast.handle(), udp.handle()]);
        let hc = healthcheck(Duration::from_secs(30));
        let s = UrlTest::new(hc.clone());
        hc.check(set.handlers()).await;

        assert_eq!(s.select(&set, Network::Tcp).unwrap().name(), "fast");
        assert_eq!(s.select(&set, Network::Udp).unwrap().name(), "udp");

        udp.set_delay(None);
        hc.check(set.handlers()).await;
        assert!(s.select(&set, Network::Udp).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_election_selects_nothing() {
        let a = ScriptedOutbound::tcp("a", 10);
        let set = ProxySet::from_handlers(vec![a.handle()]);
        let hc = healthcheck(Duration::from_secs(30));
        let s = UrlTest::new(hc.clone());
        hc.check(set.handlers()).await;
        assert!(s.select(&set, Network::Tcp).is_some());

        a.set_delay(None);
        tokio::time::advance(Duration::from_secs(31)).await;
        hc.check(set.handlers()).await;
        assert!(s.select(&set, Network::Tcp).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unranked_pool_falls_back_to_first() {
        let a = ScriptedOutbound::tcp("a", 10);
        let hc = healthcheck(Duration::from_secs(30));
        let s = UrlTest::new(hc.clone());
        hc.check(vec![a.handle()]).await;

        let b = ScriptedOutbound::tcp("b", 10);
        let set = ProxySet::from_handlers(vec![b.handle()]);
        assert_eq!(s.select(&set, Network::Tcp).unwrap().name(), "b");
    }
}
