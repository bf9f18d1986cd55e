use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    proxy::{
        AnyOutboundDatagram, AnyOutboundHandler, AnyStream, Networks, OutboundHandler,
        OutboundType,
    },
    session::Session,
};

/// An outbound whose every stream is an in-memory HTTP server answering
/// `204` after a configurable delay. `None` makes dials fail.
#[derive(Debug)]
pub struct ScriptedOutbound {
    name: String,
    networks: Networks,
    delay: Mutex<Option<Duration>>,
    dials: AtomicUsize,
}

impl ScriptedOutbound {
    pub fn new(name: &str, networks: Networks, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            networks,
            delay: Mutex::new(delay),
            dials: AtomicUsize::new(0),
        })
    }

    pub fn tcp(name: &str, delay_ms: u64) -> Arc<Self> {
        Self::new(name, Networks::TCP, Some(Duration::from_millis(delay_ms)))
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn handle(self: &Arc<Self>) -> AnyOutboundHandler {
        self.clone()
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
        self.networks
    }

    async fn connect_stream(&self, _sess: &Session) -> io::Result<AnyStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        let Some(delay) = delay else {
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

    async fn connect_datagram(
        &self,
        _sess: &Session,
    ) -> io::Result<AnyOutboundDatagram> {
        Err(io::Error::other("datagrams are not scripted"))
    }
}
