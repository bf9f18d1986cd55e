//! Turns decoded outbound descriptors into dialers.

use std::sync::Arc;

use crate::{
    Error,
    config::descriptor::{OutboundDescriptor, ProxyKind},
    proxy::AnyOutboundHandler,
};

pub mod http;
#[cfg(feature = "shadowsocks")]
pub mod shadowsocks;
pub mod socks5;

/// Builds the dialer behind one descriptor. Providers are generic over this
/// so a host can plug in its own protocol suite.
#[cfg_attr(test, mockall::automock)]
pub trait OutboundBuilder: Send + Sync {
    fn build(&self, descriptor: &OutboundDescriptor) -> crate::Result<AnyOutboundHandler>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOutboundBuilder;

impl OutboundBuilder for DefaultOutboundBuilder {
    fn build(&self, d: &OutboundDescriptor) -> crate::Result<AnyOutboundHandler> {
        match d.kind {
            ProxyKind::Socks => {
                Ok(Arc::new(crate::proxy::socks::Handler::try_from(d)?))
            }
            ProxyKind::Http => Ok(Arc::new(crate::proxy::http::Handler::try_from(d)?)),
            #[cfg(feature = "shadowsocks")]
            ProxyKind::Shadowsocks => Ok(Arc::new(
                crate::proxy::shadowsocks::Handler::try_from(d)?,
            )),
            kind => Err(Error::Unsupported(format!(
                "{kind} for outbound {}",
                d.tag
            ))),
        }
    }
}
