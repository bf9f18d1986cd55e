#![allow(dead_code)]

use std::{
    collections::HashMap,
    io,
    path::Path,
    sync::{Arc, Mutex, Once},
    time::Duration,
};

use async_trait::async_trait;
use proxypool_lib::{
    config::{
        def::ProviderDef,
        descriptor::OutboundDescriptor,
        internal::ProviderOptions,
    },
    proxy::{
        AnyOutboundDatagram, AnyOutboundHandler, AnyStream, Networks, OutboundHandler,
        OutboundType, converters::OutboundBuilder,
    },
    session::Session,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

static INIT: Once = Once::new();

pub fn initialize() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        proxypool_lib::setup_default_crypto_provider();
    });
}

/// Per tag latency script shared between a test and the outbounds it builds.
/// A missing entry answers at once, `None` refuses every dial.
#[derive(Clone, Default)]
pub struct Script {
    delays: Arc<Mutex<HashMap<String, Option<Duration>>>>,
    dials: Arc<Mutex<HashMap<String, usize>>>,
}

impl Script {
    pub fn set(&self, tag: &str, delay: Option<Duration>) {
        self.delays.lock().unwrap().insert(tag.to_owned(), delay);
    }

    pub fn dials(&self, tag: &str) -> usize {
        self.dials.lock().unwrap().get(tag).copied().unwrap_or_default()
    }

    fn delay(&self, tag: &str) -> Option<Duration> {
        self.delays
            .lock()
            .unwrap()
            .get(tag)
            .copied()
            .unwrap_or(Some(Duration::ZERO))
    }

    fn dialed(&self, tag: &str) {
        *self.dials.lock().unwrap().entry(tag.to_owned()).or_default() += 1;
    }
}

/// Builds in-memory outbounds for any descriptor kind.
#[derive(Clone, Default)]
pub struct ScriptedBuilder {
    pub script: Script,
}

impl OutboundBuilder for ScriptedBuilder {
    fn build(&self, d: &OutboundDescriptor) -> proxypool_lib::Result<AnyOutboundHandler> {
        Ok(Arc::new(ScriptedOutbound {
            name: d.tag.clone(),
            server: d.server.clone(),
            script: self.script.clone(),
        }))
    }
}

pub struct ScriptedOutbound {
    pub name: String,
    pub server: String,
    script: Script,
}

impl std::fmt::Debug for ScriptedOutbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedOutbound")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl OutboundHandler for ScriptedOutbound {
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> OutboundType {
        OutboundType::Direct
    }

    fn networks(&self) -> Networks {
        Networks::TCP
    }

    async fn connect_stream(&self, _sess: &Session) -> io::Result<AnyStream> {
        self.script.dialed(&self.name);
        let Some(delay) = self.script.delay(&self.name) else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} is down", self.name),
            ));
        };

        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match server.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            tokio::time::sleep(delay).await;
            let _ = server
                .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                .await;
            let _ = server.shutdown().await;
        });
        Ok(Box::new(client))
    }

    async fn connect_datagram(&self, _sess: &Session) -> io::Result<AnyOutboundDatagram> {
        Err(io::Error::other("no datagrams"))
    }
}

/// A sing-box outbound list of socks servers, one per tag.
pub fn native_list(tags: &[&str]) -> String {
    let items: Vec<Value> = tags
        .iter()
        .enumerate()
        .map(|(i, t)| {
            json!({
                "type": "socks",
                "tag": t,
                "server": format!("10.0.{}.{}", i / 250, i % 250 + 1),
                "server_port": 1080,
            })
        })
        .collect();
    serde_json::to_string(&items).unwrap()
}

pub fn options(def: ProviderDef, cache_dir: &Path) -> ProviderOptions {
    ProviderOptions::try_from_def(def, cache_dir).unwrap()
}
