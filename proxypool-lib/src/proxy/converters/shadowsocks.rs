use crate::{
    Error,
    config::descriptor::OutboundDescriptor,
    proxy::shadowsocks::{Handler, HandlerOptions},
};

impl TryFrom<&OutboundDescriptor> for Handler {
    type Error = crate::Error;

    fn try_from(d: &OutboundDescriptor) -> Result<Self, Self::Error> {
        if let Some(plugin) = d.str_param("plugin") {
            return Err(Error::Unsupported(format!(
                "shadowsocks plugin {plugin} on outbound {}",
                d.tag
            )));
        }
        let method = d.str_param("method").ok_or_else(|| {
            Error::InvalidConfig(format!("shadowsocks outbound {} without method", d.tag))
        })?;
        Handler::new(HandlerOptions {
            name: d.tag.to_owned(),
            server: d.server.to_owned(),
            port: d.server_port,
            password: d.str_param("password").unwrap_or_default().to_owned(),
            cipher: method.to_owned(),
        })
        .map_err(|e| Error::InvalidConfig(format!("outbound {}: {e}", d.tag)))
    }
}
