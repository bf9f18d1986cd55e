use std::{fmt::Debug, io, sync::Arc};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use rustls::pki_types::ServerName;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use crate::{
    common::{
        errors::{map_io_error, new_io_error},
        tls::client_config,
    },
    proxy::{
        AnyOutboundDatagram, AnyStream, Networks, OutboundHandler, OutboundType,
        ProxyError,
    },
    session::{Session, SocksAddr},
};

const MAX_RESPONSE_HEAD: usize = 8 * 1024;

#[derive(Clone, Default)]
pub struct HandlerOptions {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Wraps the proxy connection in TLS, using this name for SNI.
    pub tls_server_name: Option<String>,
}

pub struct Handler {
    opts: HandlerOptions,
}

impl Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http").field("name", &self.opts.name).finish()
    }
}

impl Handler {
    pub fn new(opts: HandlerOptions) -> Self {
        Self { opts }
    }

    fn connect_request(&self, destination: &SocksAddr) -> String {
        let authority = match destination {
            SocksAddr::Ip(std::net::SocketAddr::V6(addr)) => {
                format!("[{}]:{}", addr.ip(), addr.port())
            }
            other => other.to_string(),
        };
        let mut req = format!(
            "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nProxy-Connection: \
             Keep-Alive\r\n"
        );
        if let Some(user) = self.opts.user.as_deref() {
            let password = self.opts.password.as_deref().unwrap_or_default();
            let token = STANDARD.encode(format!("{user}:{password}"));
            req.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
        }
        req.push_str("\r\n");
        req
    }
}

/// Sends a CONNECT request and consumes the response head byte by byte, so
/// nothing the tunnel carries after it is swallowed.
async fn connect_tunnel<S>(s: &mut S, req: &str) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    s.write_all(req.as_bytes()).await?;

    let mut head = Vec::with_capacity(256);
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(new_io_error("http proxy response head too large"));
        }
        head.push(s.read_u8().await?);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(new_io_error(format!(
            "invalid http proxy response: {status_line}"
        )));
    }
    if code != "200" {
        return Err(new_io_error(format!(
            "http proxy refused tunnel: {status_line}"
        )));
    }
    Ok(())
}

#[async_trait]
impl OutboundHandler for Handler {
    fn name(&self) -> &str {
        &self.opts.name
    }

    fn proto(&self) -> OutboundType {
        OutboundType::Http
    }

    fn networks(&self) -> Networks {
        Networks::TCP
    }

    fn remote_addr(&self) -> Option<SocksAddr> {
        Some(SocksAddr::from_host_port(&self.opts.server, self.opts.port))
    }

    async fn connect_stream(&self, sess: &Session) -> io::Result<AnyStream> {
        let tcp = TcpStream::connect((self.opts.server.as_str(), self.opts.port))
            .await
            .map_err(|e| {
                new_io_error(format!(
                    "dial outbound {}:{}: {e}",
                    self.opts.server, self.opts.port
                ))
            })?;
        tcp.set_nodelay(true)?;

        let req = self.connect_request(&sess.destination);
        match self.opts.tls_server_name.as_deref() {
            None => {
                let mut s = tcp;
                connect_tunnel(&mut s, &req).await?;
                Ok(Box::new(s))
            }
            Some(sni) => {
                let config = client_config(&[]).map_err(map_io_error)?;
                let connector = TlsConnector::from(Arc::new(config));
                let name = ServerName::try_from(sni.to_owned())
                    .map_err(|e| new_io_error(format!("invalid sni {sni}: {e}")))?;
                let mut s = connector.connect(name, tcp).await?;
                connect_tunnel(&mut s, &req).await?;
                Ok(Box::new(s))
            }
        }
    }

    async fn connect_datagram(
        &self,
        _sess: &Session,
    ) -> io::Result<AnyOutboundDatagram> {
        Err(ProxyError::General(format!(
            "{}: http proxies only carry tcp",
            self.opts.name
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_connect_tunnel_keeps_trailing_bytes() {
        let mut s = tokio_test::io::Builder::new()
            .write(b"CONNECT example.com:443 HTTP/1.1\r\n")
            .read(b"HTTP/1.1 200 Connection established\r\n\r\nhello")
            .build();
        connect_tunnel(&mut s, "CONNECT example.com:443 HTTP/1.1\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 5];
        s.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_connect_tunnel_refused() {
        let mut s = tokio_test::io::Builder::new()
            .write(b"X")
            .read(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
            .build();
        let err = connect_tunnel(&mut s, "X").await.unwrap_err();
        assert!(err.to_string().contains("407"));
    }

    #[test]
    fn test_connect_request_with_auth() {
        let h = Handler::new(HandlerOptions {
            name: "http".to_owned(),
            server: "127.0.0.1".to_owned(),
            port: 8080,
            user: Some("user".to_owned()),
            password: Some("pass".to_owned()),
            tls_server_name: None,
        });
        let req = h.connect_request(&SocksAddr::Domain("example.com".to_owned(), 443));
        assert!(req.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(req.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
        assert!(req.ends_with("\r\n\r\n"));

        let v6 = h.connect_request(&SocksAddr::Ip("[::1]:80".parse().unwrap()));
        assert!(v6.starts_with("CONNECT [::1]:80 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_connect_stream_through_local_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            while !head.ends_with(b"\r\n\r\n") {
                head.push(s.read_u8().await.unwrap());
            }
            assert!(head.starts_with(b"CONNECT example.com:80 "));
            s.write_all(b"HTTP/1.0 200 OK\r\n\r\npong").await.unwrap();
        });

        let h = Handler::new(HandlerOptions {
            name: "http".to_owned(),
            server: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        });
        let mut s = h
            .connect_stream(&Session::tcp(SocksAddr::Domain(
                "example.com".to_owned(),
                80,
            )))
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        s.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
        assert!(h.connect_datagram(&Session::default()).await.is_err());
    }
}
