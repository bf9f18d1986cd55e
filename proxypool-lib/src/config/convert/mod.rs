//! Subscription decoding.
//!
//! A subscription blob is tried as a sing-box JSON outbound list, then as a
//! base64 wrapped list of share links, then as a Clash YAML `proxies:`
//! document. The first strategy that produces at least one outbound wins.

use serde_json::{Value, json};
use tracing::debug;

use crate::{
    Error,
    config::descriptor::{OutboundDescriptor, Params},
};

pub mod clash;
pub mod native;
pub mod v2ray;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn decode(content: &[u8]) -> crate::Result<Vec<OutboundDescriptor>> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);

    let first_err = match native::decode(content) {
        Ok(list) if !list.is_empty() => return Ok(list),
        Ok(_) => "json outbound list is empty".to_owned(),
        Err(e) => e.to_string(),
    };
    debug!("not a json outbound list: {first_err}");

    match v2ray::decode(content) {
        Ok(list) if !list.is_empty() => return Ok(list),
        Ok(_) => debug!("no share link decoded"),
        Err(e) => debug!("not a share link list: {e}"),
    }

    match clash::decode(content) {
        Ok(list) if !list.is_empty() => return Ok(list),
        Ok(_) => debug!("clash proxies list is empty"),
        Err(e) => debug!("not a clash proxies document: {e}"),
    }

    Err(Error::Decode(first_err))
}

/// Encodes outbounds as a sing-box JSON outbound list.
pub fn to_native(list: &[OutboundDescriptor]) -> crate::Result<Vec<u8>> {
    serde_json::to_vec_pretty(list).map_err(|e| Error::Decode(e.to_string()))
}

pub(crate) fn tls_options(
    enabled: bool,
    server_name: Option<String>,
    insecure: bool,
    alpn: Vec<String>,
) -> Option<Value> {
    if !enabled {
        return None;
    }
    Params::new()
        .flag("enabled", Some(true))
        .str("server_name", server_name)
        .flag("insecure", Some(insecure))
        .list("alpn", alpn)
        .into_value()
}

pub(crate) fn transport_options(
    network: &str,
    host: Option<String>,
    path: Option<String>,
    service_name: Option<String>,
) -> Option<Value> {
    let host = host.filter(|h| !h.is_empty());
    match network {
        "ws" | "websocket" => Params::new()
            .str("type", Some("ws"))
            .str("path", path)
            .obj("headers", host.map(|h| json!({ "Host": h })))
            .into_value(),
        "grpc" => Params::new()
            .str("type", Some("grpc"))
            .str("service_name", service_name)
            .into_value(),
        "h2" | "http" => Params::new()
            .str("type", Some("http"))
            .list("host", host.into_iter().collect())
            .str("path", path)
            .into_value(),
        "httpupgrade" => Params::new()
            .str("type", Some("httpupgrade"))
            .str("host", host)
            .str("path", path)
            .into_value(),
        _ => None,
    }
}

pub(crate) fn split_alpn(alpn: Option<&str>) -> Vec<String> {
    alpn.map(|a| {
        a.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}
