use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use rand::seq::IndexedRandom;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    app::remote_content_manager::providers::proxy_provider::ProxySet,
    common::timer::spawn_ticker, proxy::AnyOutboundHandler, session::Network,
};

/// Sticks to one randomly picked inner for a whole period, so a burst of
/// connections leaves through the same outbound.
pub struct LoadBalance {
    name: String,
    interval: Duration,
    pick: ArcSwapOption<String>,
}

impl LoadBalance {
    pub fn new(name: &str, interval: Duration) -> Self {
        Self {
            name: name.to_owned(),
            interval,
            pick: ArcSwapOption::empty(),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.pick.load_full().map(|t| t.as_ref().clone())
    }

    pub fn repick(&self, set: &ProxySet) {
        let pick = set.tags().choose(&mut rand::rng()).cloned();
        debug!("{} load balance picked {:?}", self.name, pick);
        self.pick.store(pick.map(Arc::new));
    }

    /// Repicks now and then once per interval.
    pub fn kick_off<F>(self: &Arc<Self>, set: F, token: CancellationToken) -> JoinHandle<()>
    where
        F: Fn() -> Arc<ProxySet> + Send + Sync + 'static,
    {
        let lb = self.clone();
        spawn_ticker(
            format!("{} load balance", self.name),
            Instant::now(),
            self.interval,
            token,
            move || {
                lb.repick(&set());
                futures::future::ready(())
            },
        )
    }

    /// The current pick when it is still in the pool and carries `network`,
    /// otherwise any inner that does.
    pub fn select(&self, set: &ProxySet, network: Network) -> Option<AnyOutboundHandler> {
        let pick = self.pick.load();
        let picked = pick
            .as_deref()
            .and_then(|tag| set.get(tag))
            .filter(|h| h.networks().supports(network))
            .cloned();
        if picked.is_some() {
            return picked;
        }

        let candidates: Vec<&AnyOutboundHandler> = set
            .iter()
            .filter(|h| h.networks().supports(network))
            .collect();
        candidates.choose(&mut rand::rng()).map(|h| (*h).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Networks, mocks::ScriptedOutbound};

    #[test]
    fn test_pick_is_sticky() {
        let set = ProxySet::from_handlers(
            ["a", "b", "c", "d"]
                .iter()
                .map(|t| ScriptedOutbound::tcp(t, 10).handle())
                .collect(),
        );
        let lb = LoadBalance::new("p", Duration::from_secs(600));
        lb.repick(&set);
        let pick = lb.current().unwrap();
        for _ in 0..50 {
            assert_eq!(lb.select(&set, Network::Tcp).unwrap().name(), pick);
        }
    }

    #[test]
    fn test_single_inner_always_selected() {
        let set = ProxySet::from_handlers(vec![ScriptedOutbound::tcp("only", 10).handle()]);
        let lb = LoadBalance::new("p", Duration::from_secs(600));
        assert_eq!(lb.select(&set, Network::Tcp).unwrap().name(), "only");
        lb.repick(&set);
        assert_eq!(lb.select(&set, Network::Tcp).unwrap().name(), "only");
        assert!(lb.select(&set, Network::Udp).is_none());
    }

    #[test]
    fn test_unsuitable_pick_falls_back() {
        let tcp = ScriptedOutbound::tcp("tcp", 10);
        let udp = ScriptedOutbound::new("udp", Networks::TCP_UDP, None);
        let set = ProxySet::from_handlers(vec![tcp.handle(), udp.handle()]);
        let lb = LoadBalance::new("p", Duration::from_secs(600));
        lb.pick.store(Some(Arc::new("tcp".to_owned())));
        assert_eq!(lb.select(&set, Network::Udp).unwrap().name(), "udp");

        lb.pick.store(Some(Arc::new("gone".to_owned())));
        assert!(lb.select(&set, Network::Tcp).is_some());
        assert!(lb.select(&ProxySet::default(), Network::Tcp).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_off_repicks_on_cadence() {
        let set = Arc::new(ProxySet::from_handlers(vec![
            ScriptedOutbound::tcp("a", 10).handle(),
        ]));
        let lb = Arc::new(LoadBalance::new("p", Duration::from_secs(600)));
        let token = CancellationToken::new();
        let handle = {
            let set = set.clone();
            lb.kick_off(move || set.clone(), token.clone())
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(lb.current().as_deref(), Some("a"));

        token.cancel();
        handle.await.unwrap();
    }
}
