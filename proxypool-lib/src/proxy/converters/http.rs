use crate::{
    config::descriptor::OutboundDescriptor,
    proxy::http::{Handler, HandlerOptions},
};

impl TryFrom<&OutboundDescriptor> for Handler {
    type Error = crate::Error;

    fn try_from(d: &OutboundDescriptor) -> Result<Self, Self::Error> {
        let tls_server_name = d.tls_enabled().then(|| {
            d.params
                .get("tls")
                .and_then(|t| t.get("server_name"))
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(&d.server)
                .to_owned()
        });
        Ok(Handler::new(HandlerOptions {
            name: d.tag.to_owned(),
            server: d.server.to_owned(),
            port: d.server_port,
            user: d.str_param("username").map(str::to_owned),
            password: d.str_param("password").map(str::to_owned),
            tls_server_name,
        }))
    }
}
