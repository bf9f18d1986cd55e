use serde_json::Value;
use tracing::warn;

use crate::{
    Error,
    config::descriptor::{OutboundDescriptor, ProxyKind},
};

/// Decodes a sing-box outbound list, either a bare array or an object with an
/// `outbounds` array. Entries that are not proxies are skipped.
pub fn decode(content: &[u8]) -> crate::Result<Vec<OutboundDescriptor>> {
    let value: Value =
        serde_json::from_slice(content).map_err(|e| Error::Decode(e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("outbounds") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(Error::Decode(
                    "json object without an outbounds list".to_owned(),
                ));
            }
        },
        _ => return Err(Error::Decode("json is not an outbound list".to_owned())),
    };

    let mut rv = Vec::with_capacity(items.len());
    for item in items {
        let kind = item.get("type").and_then(Value::as_str).unwrap_or_default().to_owned();
        if ProxyKind::from_name(&kind).is_none() {
            warn!("skipping outbound of unsupported type {kind:?}");
            continue;
        }
        match serde_json::from_value::<OutboundDescriptor>(item) {
            Ok(d) => match d.validate() {
                Ok(_) => rv.push(d),
                Err(e) => warn!("skipping invalid outbound: {e}"),
            },
            Err(e) => warn!("skipping malformed {kind} outbound: {e}"),
        }
    }
    Ok(rv)
}
