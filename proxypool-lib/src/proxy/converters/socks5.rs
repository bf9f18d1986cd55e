use crate::{
    Error,
    config::descriptor::OutboundDescriptor,
    proxy::socks::{Handler, HandlerOptions},
};

impl TryFrom<&OutboundDescriptor> for Handler {
    type Error = crate::Error;

    fn try_from(d: &OutboundDescriptor) -> Result<Self, Self::Error> {
        match d.str_param("version") {
            None | Some("5") => {}
            Some(v) => {
                return Err(Error::Unsupported(format!(
                    "socks{v} outbound {}",
                    d.tag
                )));
            }
        }
        Ok(Handler::new(HandlerOptions {
            name: d.tag.to_owned(),
            server: d.server.to_owned(),
            port: d.server_port,
            user: d.str_param("username").map(str::to_owned),
            password: d.str_param("password").map(str::to_owned),
            udp: d.network() != Some("tcp"),
        }))
    }
}
