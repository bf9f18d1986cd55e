use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicI64, AtomicU16, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::FuturesUnordered};
use http::{Request, Uri, header};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::Instant,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, trace};

use crate::{
    common::{
        errors::{map_io_error, new_io_error},
        http::DEFAULT_USER_AGENT,
        tls::client_config,
        utils::current_timestamp_millis,
    },
    proxy::AnyOutboundHandler,
    session::{Session, SocksAddr},
};

pub mod healthcheck;
pub mod providers;

const MAX_HISTORY: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayOutcome {
    Ok,
    Timeout,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DelayHistory {
    pub time: DateTime<Utc>,
    pub delay: u16,
    #[serde(rename = "meanDelay")]
    pub mean_delay: u16,
    pub outcome: DelayOutcome,
}

/// Latency cells of one outbound. Probe tasks write, selectors read.
#[derive(Default)]
struct ProxyState {
    latest_rtt: AtomicU16,
    last_ok_at: AtomicI64,
    delay_history: Mutex<VecDeque<DelayHistory>>,
}

impl ProxyState {
    fn record(&self, delay: u16, outcome: DelayOutcome) {
        self.latest_rtt.store(delay, Ordering::Release);
        if delay > 0 {
            self.last_ok_at
                .store(current_timestamp_millis(), Ordering::Release);
        }

        let mut history = match self.delay_history.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ok: Vec<u32> = history
            .iter()
            .map(|h| h.delay)
            .chain(std::iter::once(delay))
            .filter(|d| *d > 0)
            .map(u32::from)
            .collect();
        let mean_delay = if ok.is_empty() {
            0
        } else {
            (ok.iter().sum::<u32>() / ok.len() as u32) as u16
        };
        history.push_back(DelayHistory {
            time: Utc::now(),
            delay,
            mean_delay,
            outcome,
        });
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }
}

/// ProxyManager is the latency registry of one provider.
#[derive(Clone, Default)]
pub struct ProxyManager {
    proxy_state: Arc<RwLock<HashMap<String, Arc<ProxyState>>>>,
}

impl ProxyManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, name: &str) -> Arc<ProxyState> {
        if let Some(s) = self.read_map().get(name) {
            return s.clone();
        }
        let mut map = match self.proxy_state.write() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(name.to_owned()).or_default().clone()
    }

    fn read_map(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ProxyState>>> {
        match self.proxy_state.read() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Probes every proxy concurrently and returns `(name, rtt)` in input
    /// order, `0` meaning failed. The probes are polled by the caller's task,
    /// so dropping the future drops all of them.
    pub async fn check(
        &self,
        proxies: &[AnyOutboundHandler],
        url: &str,
        timeout: Duration,
    ) -> Vec<(String, u16)> {
        let mut results: Vec<(String, u16)> = proxies
            .iter()
            .map(|p| (p.name().to_owned(), 0))
            .collect();

        let mut probes: FuturesUnordered<_> = proxies
            .iter()
            .enumerate()
            .map(|(i, proxy)| async move {
                let rtt = self
                    .url_test(proxy.clone(), url, timeout)
                    .await
                    .inspect_err(|e| debug!("healthcheck failed: {e}"))
                    .unwrap_or(0);
                (i, rtt)
            })
            .collect();

        while let Some((i, rtt)) = probes.next().await {
            results[i].1 = rtt;
        }
        results
    }

    pub fn alive(&self, name: &str) -> bool {
        self.last_delay(name) > 0
    }

    /// Last measured rtt in milliseconds, `0` if unknown or failed.
    pub fn last_delay(&self, name: &str) -> u16 {
        self.read_map()
            .get(name)
            .map(|s| s.latest_rtt.load(Ordering::Acquire))
            .unwrap_or_default()
    }

    /// Unix milliseconds of the last successful probe.
    pub fn last_ok_at(&self, name: &str) -> Option<i64> {
        self.read_map()
            .get(name)
            .map(|s| s.last_ok_at.load(Ordering::Acquire))
            .filter(|t| *t > 0)
    }

    pub fn delay_history(&self, name: &str) -> Vec<DelayHistory> {
        self.read_map()
            .get(name)
            .map(|s| match s.delay_history.lock() {
                Ok(h) => h.iter().cloned().collect(),
                Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
            })
            .unwrap_or_default()
    }

    /// Drops the samples of outbounds that left the pool.
    pub fn remove(&self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let mut map = match self.proxy_state.write() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        for name in names {
            map.remove(name);
        }
    }

    /// Measures the time from dial start to the first response byte and
    /// records it. Failures record `0` with a timeout or error outcome.
    #[instrument(skip(self, proxy), fields(proxy = proxy.name()))]
    pub async fn url_test(
        &self,
        proxy: AnyOutboundHandler,
        url: &str,
        timeout: Duration,
    ) -> io::Result<u16> {
        let name = proxy.name().to_owned();
        let start = Instant::now();

        let (result, outcome) = match tokio::time::timeout(timeout, probe(&proxy, url)).await {
            Ok(Ok(status)) => {
                let delay = rtt_millis(start.elapsed());
                trace!(
                    "urltest for proxy {name} with url {url} returned {status} in \
                     {delay}ms"
                );
                (Ok(delay), DelayOutcome::Ok)
            }
            Ok(Err(e)) => {
                debug!("urltest for proxy {name} with url {url} failed: {e}");
                (Err(e), DelayOutcome::Error)
            }
            Err(_) => (
                Err(new_io_error(format!("timeout for {url}"))),
                DelayOutcome::Timeout,
            ),
        };

        self.state(&name)
            .record(*result.as_ref().unwrap_or(&0), outcome);
        result
    }
}

fn rtt_millis(elapsed: Duration) -> u16 {
    elapsed.as_millis().clamp(1, u16::MAX as u128) as u16
}

async fn probe(proxy: &AnyOutboundHandler, url: &str) -> io::Result<http::StatusCode> {
    let uri: Uri = url
        .parse()
        .map_err(|e| new_io_error(format!("invalid probe url {url}: {e}")))?;
    let https = uri.scheme_str() == Some("https");
    let host = uri
        .host()
        .ok_or_else(|| new_io_error(format!("probe url {url} without host")))?
        .to_owned();
    let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

    let sess = Session::tcp(SocksAddr::from_host_port(&host, port));
    let stream = proxy.connect_stream(&sess).await?;

    if https {
        let config = client_config(&[b"http/1.1"]).map_err(map_io_error)?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(
            host.trim_start_matches('[').trim_end_matches(']').to_owned(),
        )
        .map_err(map_io_error)?;
        let stream = connector.connect(server_name, stream).await?;
        head_request(stream, &uri).await
    } else {
        head_request(stream, &uri).await
    }
}

/// Sends a GET and resolves once the response head arrived.
async fn head_request<S>(io: S, uri: &Uri) -> io::Result<http::StatusCode>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(map_io_error)?;

    let authority = uri
        .authority()
        .map(|a| a.as_str().to_owned())
        .unwrap_or_default();
    let path = uri
        .path_and_query()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());
    let req = Request::get(path)
        .header(header::HOST, authority)
        .header(header::USER_AGENT, DEFAULT_USER_AGENT)
        .header(header::CONNECTION, "close")
        .body(Empty::<Bytes>::new())
        .map_err(map_io_error)?;

    // the connection is driven in this task until the head arrives
    let send = sender.send_request(req);
    tokio::pin!(conn, send);
    let res = tokio::select! {
        biased;
        res = &mut send => res,
        closed = &mut conn => {
            if let Err(e) = closed {
                trace!("probe connection closed: {e}");
            }
            send.await
        }
    };
    Ok(res.map_err(map_io_error)?.status())
}
