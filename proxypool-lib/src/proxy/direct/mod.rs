use std::fmt::Debug;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::{
    proxy::{
        AnyOutboundDatagram, AnyStream, Networks, OutboundHandler, OutboundType,
        datagram::OutboundDatagramImpl,
    },
    session::Session,
};

pub const PROXY_DIRECT: &str = "DIRECT";

/// Dials the destination without any upstream.
#[derive(Clone)]
pub struct Handler {
    pub name: String,
}

impl Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Direct").field("name", &self.name).finish()
    }
}

impl Handler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new(PROXY_DIRECT)
    }
}

#[async_trait]
impl OutboundHandler for Handler {
    fn name(&self) -> &str {
        &self.name
    }

    fn proto(&self) -> OutboundType {
        OutboundType::Direct
    }

    fn networks(&self) -> Networks {
        Networks::TCP_UDP
    }

    async fn connect_stream(&self, sess: &Session) -> std::io::Result<AnyStream> {
        let s = TcpStream::connect((
            sess.destination.host().as_str(),
            sess.destination.port(),
        ))
        .await?;
        s.set_nodelay(true)?;
        Ok(Box::new(s))
    }

    async fn connect_datagram(
        &self,
        sess: &Session,
    ) -> std::io::Result<AnyOutboundDatagram> {
        let d = OutboundDatagramImpl::connect(sess.destination.clone()).await?;
        Ok(Box::new(d))
    }
}
