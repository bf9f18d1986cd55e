mod datagram;
mod socks5;

use std::{fmt::Debug, net::SocketAddr};

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tracing::trace;

use crate::{
    common::errors::new_io_error,
    proxy::{
        AnyOutboundDatagram, AnyStream, Networks, OutboundHandler, OutboundType,
        datagram::resolve,
    },
    session::{Session, SocksAddr},
};

use datagram::Socks5Datagram;
use socks5::{client_handshake, socks_command};

#[derive(Default, Clone)]
pub struct HandlerOptions {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub udp: bool,
}

pub struct Handler {
    opts: HandlerOptions,
}

impl Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5")
            .field("name", &self.opts.name)
            .finish()
    }
}

impl Handler {
    pub fn new(opts: HandlerOptions) -> Self {
        Self { opts }
    }

    async fn dial_server(&self) -> std::io::Result<AnyStream> {
        let s = TcpStream::connect((self.opts.server.as_str(), self.opts.port))
            .await
            .map_err(|e| {
                new_io_error(format!(
                    "dial outbound {}:{}: {e}",
                    self.opts.server, self.opts.port
                ))
            })?;
        s.set_nodelay(true)?;
        Ok(Box::new(s))
    }
}

#[async_trait]
impl OutboundHandler for Handler {
    fn name(&self) -> &str {
        &self.opts.name
    }

    fn proto(&self) -> OutboundType {
        OutboundType::Socks5
    }

    fn networks(&self) -> Networks {
        Networks {
            tcp: true,
            udp: self.opts.udp,
        }
    }

    fn remote_addr(&self) -> Option<SocksAddr> {
        Some(SocksAddr::from_host_port(&self.opts.server, self.opts.port))
    }

    async fn connect_stream(&self, sess: &Session) -> std::io::Result<AnyStream> {
        let mut s = self.dial_server().await?;
        client_handshake(
            &mut s,
            &sess.destination,
            socks_command::CONNECT,
            self.opts.user.as_deref(),
            self.opts.password.as_deref(),
        )
        .await?;
        Ok(s)
    }

    async fn connect_datagram(
        &self,
        sess: &Session,
    ) -> std::io::Result<AnyOutboundDatagram> {
        let mut s = self.dial_server().await?;
        let bind_addr = client_handshake(
            &mut s,
            &sess.destination,
            socks_command::UDP_ASSOCIATE,
            self.opts.user.as_deref(),
            self.opts.password.as_deref(),
        )
        .await?;

        let relay = match bind_addr {
            SocksAddr::Ip(ip) if ip.ip().is_unspecified() => {
                trace!("bind address is unspecified, using server address");
                let server = resolve(&SocksAddr::from_host_port(
                    &self.opts.server,
                    self.opts.port,
                ))
                .await?;
                SocketAddr::new(server.ip(), ip.port())
            }
            other => resolve(&other).await?,
        };
        trace!("socks5 udp relay at {relay}");

        let socket = UdpSocket::bind(if relay.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        })
        .await?;
        socket.connect(relay).await?;

        Ok(Box::new(Socks5Datagram::new(
            s,
            socket,
            sess.destination.clone(),
        )))
    }
}
