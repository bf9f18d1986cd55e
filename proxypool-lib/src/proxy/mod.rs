use crate::session::{Network, Session, SocksAddr};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use std::{
    fmt::{Debug, Display},
    io,
    sync::Arc,
};

use tokio::io::{AsyncRead, AsyncWrite};

pub mod converters;
pub mod datagram;
pub mod direct;
pub mod group;
pub mod http;
pub mod provider;
#[cfg(feature = "shadowsocks")]
pub mod shadowsocks;
pub mod socks;

#[cfg(test)]
pub mod mocks;

pub use datagram::{AnyOutboundDatagram, OutboundDatagram};

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("proxy error: {0}")]
    General(String),
    #[error("provider {provider}: no healthy outbound for {network}")]
    NoHealthyOutbound { provider: String, network: Network },
    #[error("provider {0} is closed")]
    Closed(String),
    #[error("socks5 error: {0}")]
    Socks5(String),
}

impl From<ProxyError> for io::Error {
    fn from(value: ProxyError) -> Self {
        match value {
            ProxyError::Io(e) => e,
            e @ ProxyError::NoHealthyOutbound { .. } => {
                io::Error::new(io::ErrorKind::NotConnected, e)
            }
            e => io::Error::other(e),
        }
    }
}

/// Tells a selection failure apart from an ordinary dial error.
pub fn is_no_healthy_outbound(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<ProxyError>())
        .is_some_and(|e| matches!(e, ProxyError::NoHealthyOutbound { .. }))
}

pub fn is_closed(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<ProxyError>())
        .is_some_and(|e| matches!(e, ProxyError::Closed(_)))
}

pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Sync + Unpin + Debug {}
impl<T> ProxyStream for T where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + Debug
{
}
pub type AnyStream = Box<dyn ProxyStream>;

/// The network families an outbound can carry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize)]
pub struct Networks {
    pub tcp: bool,
    pub udp: bool,
}

impl Networks {
    pub const NONE: Networks = Networks {
        tcp: false,
        udp: false,
    };
    pub const TCP: Networks = Networks {
        tcp: true,
        udp: false,
    };
    pub const TCP_UDP: Networks = Networks {
        tcp: true,
        udp: true,
    };

    pub fn supports(&self, network: Network) -> bool {
        match network {
            Network::Tcp => self.tcp,
            Network::Udp => self.udp,
        }
    }

    pub fn union(self, other: Networks) -> Networks {
        Networks {
            tcp: self.tcp || other.tcp,
            udp: self.udp || other.udp,
        }
    }

    pub fn to_vec(&self) -> Vec<Network> {
        let mut rv = Vec::with_capacity(2);
        if self.tcp {
            rv.push(Network::Tcp);
        }
        if self.udp {
            rv.push(Network::Udp);
        }
        rv
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundType {
    Shadowsocks,
    Socks5,
    Http,
    Direct,
    Provider,
}

impl Display for OutboundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundType::Shadowsocks => write!(f, "Shadowsocks"),
            OutboundType::Socks5 => write!(f, "Socks5"),
            OutboundType::Http => write!(f, "Http"),
            OutboundType::Direct => write!(f, "Direct"),
            OutboundType::Provider => write!(f, "Provider"),
        }
    }
}

/// The uniform capability of every dialer: the concrete protocols, and the
/// provider that fronts a pool of them.
#[async_trait]
pub trait OutboundHandler: Sync + Send + Unpin + Debug {
    /// The tag of the outbound handler
    fn name(&self) -> &str;

    /// The protocol of the outbound handler
    /// only contains Type information, do not rely on the underlying value
    fn proto(&self) -> OutboundType;

    /// Which network families can be dialed through this handler
    fn networks(&self) -> Networks;

    /// connect to remote target via TCP
    async fn connect_stream(&self, sess: &Session) -> io::Result<AnyStream>;

    /// open a packet flow bound to the session destination
    async fn connect_datagram(
        &self,
        sess: &Session,
    ) -> io::Result<AnyOutboundDatagram>;

    /// The upstream server this handler talks to, if it has one
    fn remote_addr(&self) -> Option<SocksAddr> {
        None
    }
}
pub type AnyOutboundHandler = Arc<dyn OutboundHandler>;
