mod stream;

use std::{fmt::Debug, io};

use async_trait::async_trait;
use shadowsocks::{
    ProxyClientStream, ServerConfig, config::ServerType, context::Context,
    crypto::CipherKind,
};
use tokio::net::TcpStream;

use crate::{
    common::errors::new_io_error,
    proxy::{
        AnyOutboundDatagram, AnyStream, Networks, OutboundHandler, OutboundType,
        ProxyError,
    },
    session::{Session, SocksAddr},
};

use stream::ShadowsocksStream;

pub(crate) fn map_cipher(cipher: &str) -> io::Result<CipherKind> {
    match cipher {
        "aes-128-gcm" => Ok(CipherKind::AES_128_GCM),
        "aes-256-gcm" => Ok(CipherKind::AES_256_GCM),
        "chacha20-ietf-poly1305" => Ok(CipherKind::CHACHA20_POLY1305),

        "2022-blake3-aes-128-gcm" => Ok(CipherKind::AEAD2022_BLAKE3_AES_128_GCM),
        "2022-blake3-aes-256-gcm" => Ok(CipherKind::AEAD2022_BLAKE3_AES_256_GCM),
        "2022-blake3-chacha20-poly1305" | "2022-blake3-chacha20-ietf-poly1305" => {
            Ok(CipherKind::AEAD2022_BLAKE3_CHACHA20_POLY1305)
        }

        "rc4-md5" => Ok(CipherKind::SS_RC4_MD5),
        _ => Err(new_io_error(format!("unsupported cipher {cipher}"))),
    }
}

#[derive(Clone, Default)]
pub struct HandlerOptions {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub password: String,
    pub cipher: String,
}

pub struct Handler {
    opts: HandlerOptions,
    cfg: ServerConfig,
}

impl Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shadowsocks")
            .field("name", &self.opts.name)
            .finish()
    }
}

impl Handler {
    /// Fails when the cipher is unknown or the key does not fit it.
    pub fn new(opts: HandlerOptions) -> io::Result<Self> {
        let cfg = ServerConfig::new(
            (opts.server.clone(), opts.port),
            opts.password.clone(),
            map_cipher(&opts.cipher)?,
        )
        .map_err(|e| new_io_error(format!("invalid shadowsocks config: {e}")))?;
        Ok(Self { opts, cfg })
    }
}

#[async_trait]
impl OutboundHandler for Handler {
    fn name(&self) -> &str {
        &self.opts.name
    }

    fn proto(&self) -> OutboundType {
        OutboundType::Shadowsocks
    }

    fn networks(&self) -> Networks {
        Networks::TCP
    }

    fn remote_addr(&self) -> Option<SocksAddr> {
        Some(SocksAddr::from_host_port(&self.opts.server, self.opts.port))
    }

    async fn connect_stream(&self, sess: &Session) -> io::Result<AnyStream> {
        let s = TcpStream::connect((self.opts.server.as_str(), self.opts.port))
            .await
            .map_err(|e| {
                new_io_error(format!(
                    "dial outbound {}:{}: {e}",
                    self.opts.server, self.opts.port
                ))
            })?;
        s.set_nodelay(true)?;
        let s: AnyStream = Box::new(s);

        let ctx = Context::new_shared(ServerType::Local);
        let stream = ProxyClientStream::from_stream(
            ctx,
            s,
            &self.cfg,
            (sess.destination.host(), sess.destination.port()),
        );
        Ok(Box::new(ShadowsocksStream(stream)))
    }

    async fn connect_datagram(
        &self,
        _sess: &Session,
    ) -> io::Result<AnyOutboundDatagram> {
        Err(ProxyError::General(format!(
            "{}: udp is not supported by this dialer",
            self.opts.name
        ))
        .into())
    }
}
