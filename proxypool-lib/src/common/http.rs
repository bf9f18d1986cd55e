use bytes::Bytes;
use http_body_util::Empty;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};

use crate::common::{errors::map_io_error, tls::client_config};

pub const DEFAULT_USER_AGENT: &str =
    concat!("proxypool/", env!("CARGO_PKG_VERSION"));

pub type HttpClient =
    Client<hyper_rustls::HttpsConnector<HttpConnector>, Empty<Bytes>>;

pub fn new_http_client() -> std::io::Result<HttpClient> {
    let tls_config = client_config(&[]).map_err(map_io_error)?;

    let mut connector = HttpConnector::new();
    connector.enforce_http(false);

    let connector: hyper_rustls::HttpsConnector<HttpConnector> =
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(connector);

    Ok(Client::builder(TokioExecutor::new()).build(connector))
}
