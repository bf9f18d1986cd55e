use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    common::timer::spawn_ticker, config::internal::UrlTestOptions,
    proxy::AnyOutboundHandler,
};

use super::ProxyManager;

/// Outcome of the latest probe rounds, republished as a whole after each
/// round.
#[derive(Debug, Clone)]
pub struct Election {
    /// Tags that answered the last successful round, best first.
    pub ranked: Vec<String>,
    pub rounds: u64,
    /// When a round last had at least one successful probe, or when the
    /// check was created.
    pub last_ok_at: Instant,
}

impl Election {
    fn new(now: Instant) -> Self {
        Self {
            ranked: vec![],
            rounds: 0,
            last_ok_at: now,
        }
    }

    pub fn best(&self) -> Option<&str> {
        self.ranked.first().map(String::as_str)
    }
}

/// Ranks the round's successful probes by rtt, insertion order breaking
/// ties. The incumbent keeps first place unless the winner beats it by at
/// least `tolerance` ms. A round without any success keeps the previous
/// ranking.
pub(crate) fn elect(
    prev: &Election,
    results: &[(String, u16)],
    tolerance: u16,
    now: Instant,
) -> Election {
    let mut ok: Vec<&(String, u16)> = results.iter().filter(|(_, rtt)| *rtt > 0).collect();
    if ok.is_empty() {
        return Election {
            ranked: prev.ranked.clone(),
            rounds: prev.rounds + 1,
            last_ok_at: prev.last_ok_at,
        };
    }
    ok.sort_by_key(|(_, rtt)| *rtt);

    let winner = ok[0];
    let best = match prev
        .best()
        .and_then(|incumbent| ok.iter().find(|(tag, _)| tag == incumbent))
    {
        Some(incumbent) if winner.1.saturating_add(tolerance) > incumbent.1 => {
            *incumbent
        }
        _ => winner,
    };

    let mut ranked = Vec::with_capacity(ok.len());
    ranked.push(best.0.clone());
    ranked.extend(
        ok.iter()
            .filter(|(tag, _)| *tag != best.0)
            .map(|(tag, _)| tag.clone()),
    );

    Election {
        ranked,
        rounds: prev.rounds + 1,
        last_ok_at: now,
    }
}

pub struct HealthCheck {
    name: String,
    url: String,
    interval: Duration,
    tolerance: u16,
    max_age: Duration,
    proxy_manager: ProxyManager,
    election: ArcSwap<Election>,
    round: tokio::sync::Mutex<()>,
}

impl HealthCheck {
    pub fn new(name: &str, opts: &UrlTestOptions, proxy_manager: ProxyManager) -> Self {
        Self {
            name: name.to_owned(),
            url: opts.url.clone(),
            interval: opts.interval,
            tolerance: opts.tolerance,
            max_age: opts.max_age,
            proxy_manager,
            election: ArcSwap::from_pointee(Election::new(Instant::now())),
            round: tokio::sync::Mutex::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn election(&self) -> Arc<Election> {
        self.election.load_full()
    }

    /// No round has succeeded for longer than `max_age`.
    pub fn is_stale(&self, election: &Election) -> bool {
        election.last_ok_at.elapsed() > self.max_age
    }

    /// Runs one probe round over `proxies`, each probe bounded by the probe
    /// interval, and publishes the new election. Returns `false` without
    /// probing when another round is in flight.
    pub async fn check(&self, proxies: Vec<AnyOutboundHandler>) -> bool {
        let Ok(_round) = self.round.try_lock() else {
            debug!("{} healthcheck round already running, skipped", self.name);
            return false;
        };

        let results = self
            .proxy_manager
            .check(&proxies, &self.url, self.interval)
            .await;

        let prev = self.election.load();
        let next = elect(&prev, &results, self.tolerance, Instant::now());
        if prev.best() != next.best() {
            info!(
                "{} best outbound changed: {:?} -> {:?}",
                self.name,
                prev.best(),
                next.best()
            );
        }
        self.election.store(Arc::new(next));
        true
    }

    /// Starts the periodic rounds, the first one immediately.
    pub fn kick_off<F>(
        self: &Arc<Self>,
        proxies: F,
        token: CancellationToken,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Vec<AnyOutboundHandler> + Send + Sync + 'static,
    {
        let hc = self.clone();
        let proxies = Arc::new(proxies);
        debug!("kicking off healthcheck for: {}", self.name);
        spawn_ticker(
            format!("{} healthcheck", self.name),
            Instant::now(),
            self.interval,
            token,
            move || {
                let hc = hc.clone();
                let proxies = proxies.clone();
                async move {
                    hc.check(proxies()).await;
                }
            },
        )
    }
}
