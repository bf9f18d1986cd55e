use std::{
    fmt::Debug,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::{common::errors::new_io_error, session::SocksAddr};

/// A packet flow bound to one remote: whatever is sent goes to `remote()`,
/// whatever is received came back from it.
#[async_trait]
pub trait OutboundDatagram: Send + Sync + Debug {
    async fn send(&self, data: &[u8]) -> io::Result<usize>;

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn remote(&self) -> &SocksAddr;
}
pub type AnyOutboundDatagram = Box<dyn OutboundDatagram>;

#[derive(Debug)]
pub struct OutboundDatagramImpl {
    inner: UdpSocket,
    remote: SocksAddr,
}

impl OutboundDatagramImpl {
    /// Resolves `remote`, binds a socket of the matching family and connects
    /// it.
    pub async fn connect(remote: SocksAddr) -> io::Result<Self> {
        let target = resolve(&remote).await?;
        let bind = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let inner = UdpSocket::bind(bind).await?;
        inner.connect(target).await?;
        Ok(Self { inner, remote })
    }
}

pub async fn resolve(addr: &SocksAddr) -> io::Result<SocketAddr> {
    match addr {
        SocksAddr::Ip(ip) => Ok(*ip),
        SocksAddr::Domain(host, port) => tokio::net::lookup_host((host.as_str(), *port))
            .await?
            .next()
            .ok_or_else(|| new_io_error(format!("no dns result for {host}"))),
    }
}

#[async_trait]
impl OutboundDatagram for OutboundDatagramImpl {
    async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.inner.send(data).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }

    fn remote(&self) -> &SocksAddr {
        &self.remote
    }
}
