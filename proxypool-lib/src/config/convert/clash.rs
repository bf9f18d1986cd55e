use std::collections::HashMap;

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use tracing::warn;

use crate::{
    Error,
    config::{
        convert::{tls_options, transport_options},
        descriptor::{OutboundDescriptor, Params, ProxyKind},
    },
};

#[derive(Deserialize)]
struct ClashDocument {
    #[serde(default)]
    proxies: Option<Vec<YamlValue>>,
}

/// Decodes the `proxies:` list of a Clash profile. Entries of an unknown
/// type, or that fail to deserialize into their typed shape, are skipped.
pub fn decode(content: &[u8]) -> crate::Result<Vec<OutboundDescriptor>> {
    let text = String::from_utf8_lossy(content);
    let doc: ClashDocument =
        serde_yaml::from_str(&text).map_err(|e| Error::Decode(e.to_string()))?;
    let proxies = doc
        .proxies
        .ok_or_else(|| Error::Decode("missing proxies".to_owned()))?;

    let mut rv = Vec::with_capacity(proxies.len());
    for entry in proxies {
        let kind = entry
            .get("type")
            .and_then(YamlValue::as_str)
            .unwrap_or_default()
            .to_owned();
        let name = entry
            .get("name")
            .and_then(YamlValue::as_str)
            .unwrap_or_default()
            .to_owned();
        let converted = match kind.as_str() {
            "ss" => typed::<ClashShadowsocks>(entry).map(OutboundDescriptor::from),
            "vmess" => typed::<ClashVmess>(entry).map(OutboundDescriptor::from),
            "vless" => typed::<ClashVless>(entry).map(OutboundDescriptor::from),
            "trojan" => typed::<ClashTrojan>(entry).map(OutboundDescriptor::from),
            "socks5" => typed::<ClashSocks5>(entry).map(OutboundDescriptor::from),
            "http" => typed::<ClashHttp>(entry).map(OutboundDescriptor::from),
            "hysteria2" => typed::<ClashHysteria2>(entry).map(OutboundDescriptor::from),
            "tuic" => typed::<ClashTuic>(entry).map(OutboundDescriptor::from),
            _ => {
                warn!("skipping clash proxy {name:?} of unsupported type {kind:?}");
                continue;
            }
        };
        match converted.and_then(|d: OutboundDescriptor| d.validate().map(|_| d)) {
            Ok(d) => rv.push(d),
            Err(e) => warn!("skipping clash {kind} proxy {name:?}: {e}"),
        }
    }
    Ok(rv)
}

fn typed<T: DeserializeOwned>(entry: YamlValue) -> Result<T, String> {
    serde_yaml::from_value(entry).map_err(|e| e.to_string())
}

/// Clash files carry ports both as numbers and as strings.
fn port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Num(u16),
        Str(String),
    }
    match Port::deserialize(deserializer)? {
        Port::Num(p) => Ok(p),
        Port::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
struct WsOpts {
    path: Option<String>,
    headers: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
struct GrpcOpts {
    grpc_service_name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
struct H2Opts {
    host: Vec<String>,
    path: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
struct RealityOpts {
    public_key: Option<String>,
    short_id: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
struct Transport {
    network: Option<String>,
    ws_opts: Option<WsOpts>,
    grpc_opts: Option<GrpcOpts>,
    h2_opts: Option<H2Opts>,
}

impl Transport {
    fn options(self) -> Option<Value> {
        let network = self.network.unwrap_or_default();
        match network.as_str() {
            "ws" => {
                let ws = self.ws_opts.unwrap_or_default();
                let host = ws
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("host"))
                    .map(|(_, v)| v.clone());
                transport_options("ws", host, ws.path, None)
            }
            "grpc" => transport_options(
                "grpc",
                None,
                None,
                self.grpc_opts.and_then(|g| g.grpc_service_name),
            ),
            "h2" => {
                let h2 = self.h2_opts.unwrap_or_default();
                transport_options("h2", h2.host.into_iter().next(), h2.path, None)
            }
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashShadowsocks {
    name: String,
    server: String,
    #[serde(deserialize_with = "port")]
    port: u16,
    cipher: String,
    password: String,
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    plugin_opts: HashMap<String, YamlValue>,
}

impl From<ClashShadowsocks> for OutboundDescriptor {
    fn from(s: ClashShadowsocks) -> Self {
        let opt = |k: &str| {
            s.plugin_opts.get(k).and_then(|v| match v {
                YamlValue::String(s) => Some(s.clone()),
                YamlValue::Bool(b) => Some(b.to_string()),
                YamlValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        let (plugin, plugin_opts) = match s.plugin.as_deref() {
            Some("obfs") => (
                Some("obfs-local".to_owned()),
                Some(format!(
                    "obfs={};obfs-host={}",
                    opt("mode").unwrap_or_else(|| "http".to_owned()),
                    opt("host").unwrap_or_default()
                )),
            ),
            Some("v2ray-plugin") => {
                let mut opts = vec![format!(
                    "mode={}",
                    opt("mode").unwrap_or_else(|| "websocket".to_owned())
                )];
                if let Some(host) = opt("host") {
                    opts.push(format!("host={host}"));
                }
                if let Some(path) = opt("path") {
                    opts.push(format!("path={path}"));
                }
                if opt("tls").as_deref() == Some("true") {
                    opts.push("tls".to_owned());
                }
                (Some("v2ray-plugin".to_owned()), Some(opts.join(";")))
            }
            Some(other) => (Some(other.to_owned()), None),
            None => (None, None),
        };

        let mut d = OutboundDescriptor::new(
            ProxyKind::Shadowsocks,
            s.name.clone(),
            s.server.clone(),
            s.port,
        );
        d.params = Params::new()
            .str("method", Some(s.cipher.clone()))
            .str("password", Some(s.password.clone()))
            .str("plugin", plugin)
            .str("plugin_opts", plugin_opts)
            .build();
        d
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashVmess {
    name: String,
    server: String,
    #[serde(deserialize_with = "port")]
    port: u16,
    uuid: String,
    #[serde(default, alias = "alterId")]
    alter_id: u64,
    #[serde(default)]
    cipher: Option<String>,
    #[serde(default)]
    tls: bool,
    #[serde(default)]
    servername: Option<String>,
    #[serde(default)]
    skip_cert_verify: bool,
    #[serde(flatten)]
    transport: Transport,
}

impl From<ClashVmess> for OutboundDescriptor {
    fn from(s: ClashVmess) -> Self {
        let mut d = OutboundDescriptor::new(ProxyKind::Vmess, s.name, s.server, s.port);
        d.params = Params::new()
            .str("uuid", Some(s.uuid))
            .num("alter_id", Some(s.alter_id))
            .str("security", Some(s.cipher.unwrap_or_else(|| "auto".to_owned())))
            .obj(
                "tls",
                tls_options(s.tls, s.servername, s.skip_cert_verify, vec![]),
            )
            .obj("transport", s.transport.options())
            .build();
        d
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashVless {
    name: String,
    server: String,
    #[serde(deserialize_with = "port")]
    port: u16,
    uuid: String,
    #[serde(default)]
    flow: Option<String>,
    #[serde(default)]
    tls: bool,
    #[serde(default)]
    servername: Option<String>,
    #[serde(default)]
    skip_cert_verify: bool,
    #[serde(default)]
    reality_opts: Option<RealityOpts>,
    #[serde(flatten)]
    transport: Transport,
}

impl From<ClashVless> for OutboundDescriptor {
    fn from(s: ClashVless) -> Self {
        let mut tls = tls_options(
            s.tls || s.reality_opts.is_some(),
            s.servername,
            s.skip_cert_verify,
            vec![],
        );
        if let (Some(Value::Object(t)), Some(r)) = (tls.as_mut(), s.reality_opts) {
            if let Some(reality) = Params::new()
                .flag("enabled", Some(true))
                .str("public_key", r.public_key)
                .str("short_id", r.short_id)
                .into_value()
            {
                t.insert("reality".to_owned(), reality);
            }
        }

        let mut d = OutboundDescriptor::new(ProxyKind::Vless, s.name, s.server, s.port);
        d.params = Params::new()
            .str("uuid", Some(s.uuid))
            .str("flow", s.flow)
            .obj("tls", tls)
            .obj("transport", s.transport.options())
            .build();
        d
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashTrojan {
    name: String,
    server: String,
    #[serde(deserialize_with = "port")]
    port: u16,
    password: String,
    #[serde(default)]
    sni: Option<String>,
    #[serde(default)]
    alpn: Vec<String>,
    #[serde(default)]
    skip_cert_verify: bool,
    #[serde(flatten)]
    transport: Transport,
}

impl From<ClashTrojan> for OutboundDescriptor {
    fn from(s: ClashTrojan) -> Self {
        let mut d =
            OutboundDescriptor::new(ProxyKind::Trojan, s.name, s.server, s.port);
        d.params = Params::new()
            .str("password", Some(s.password))
            .obj("tls", tls_options(true, s.sni, s.skip_cert_verify, s.alpn))
            .obj("transport", s.transport.options())
            .build();
        d
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashSocks5 {
    name: String,
    server: String,
    #[serde(deserialize_with = "port")]
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl From<ClashSocks5> for OutboundDescriptor {
    fn from(s: ClashSocks5) -> Self {
        let mut d = OutboundDescriptor::new(ProxyKind::Socks, s.name, s.server, s.port);
        d.params = Params::new()
            .str("version", Some("5"))
            .str("username", s.username)
            .str("password", s.password)
            .build();
        d
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashHttp {
    name: String,
    server: String,
    #[serde(deserialize_with = "port")]
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    tls: bool,
    #[serde(default)]
    sni: Option<String>,
    #[serde(default)]
    skip_cert_verify: bool,
}

impl From<ClashHttp> for OutboundDescriptor {
    fn from(s: ClashHttp) -> Self {
        let mut d = OutboundDescriptor::new(ProxyKind::Http, s.name, s.server, s.port);
        d.params = Params::new()
            .str("username", s.username)
            .str("password", s.password)
            .obj("tls", tls_options(s.tls, s.sni, s.skip_cert_verify, vec![]))
            .build();
        d
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashHysteria2 {
    name: String,
    server: String,
    #[serde(deserialize_with = "port")]
    port: u16,
    password: String,
    #[serde(default)]
    sni: Option<String>,
    #[serde(default)]
    skip_cert_verify: bool,
    #[serde(default)]
    obfs: Option<String>,
    #[serde(default)]
    obfs_password: Option<String>,
    #[serde(default)]
    alpn: Vec<String>,
}

impl From<ClashHysteria2> for OutboundDescriptor {
    fn from(s: ClashHysteria2) -> Self {
        let obfs = s.obfs.and_then(|kind| {
            Params::new()
                .str("type", Some(kind))
                .str("password", s.obfs_password)
                .into_value()
        });
        let mut d =
            OutboundDescriptor::new(ProxyKind::Hysteria2, s.name, s.server, s.port);
        d.params = Params::new()
            .str("password", Some(s.password))
            .obj("obfs", obfs)
            .obj("tls", tls_options(true, s.sni, s.skip_cert_verify, s.alpn))
            .build();
        d
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashTuic {
    name: String,
    server: String,
    #[serde(deserialize_with = "port")]
    port: u16,
    uuid: String,
    password: String,
    #[serde(default)]
    congestion_controller: Option<String>,
    #[serde(default)]
    udp_relay_mode: Option<String>,
    #[serde(default)]
    sni: Option<String>,
    #[serde(default)]
    alpn: Vec<String>,
    #[serde(default)]
    skip_cert_verify: bool,
}

impl From<ClashTuic> for OutboundDescriptor {
    fn from(s: ClashTuic) -> Self {
        let mut d = OutboundDescriptor::new(ProxyKind::Tuic, s.name, s.server, s.port);
        d.params = Params::new()
            .str("uuid", Some(s.uuid))
            .str("password", Some(s.password))
            .str("congestion_control", s.congestion_controller)
            .str("udp_relay_mode", s.udp_relay_mode)
            .obj("tls", tls_options(true, s.sni, s.skip_cert_verify, s.alpn))
            .build();
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mixed_profile() {
        let profile = r#"
port: 7890
proxies:
  - {name: US-A, type: ss, server: 1.1.1.1, port: "8388", cipher: aes-128-gcm, password: p, udp: true}
  - name: US-B
    type: vmess
    server: v.example
    port: 443
    uuid: b831381d-6324-4d53-ad4f-8cda48b30811
    alterId: 0
    cipher: auto
    tls: true
    servername: v.example
    network: ws
    ws-opts:
      path: /ray
      headers:
        Host: cdn.example
  - {name: JP-A, type: trojan, server: t.example, port: 443, password: p, network: grpc, grpc-opts: {grpc-service-name: svc}}
  - {name: W, type: wireguard, server: w.example, port: 51820}
  - {name: broken, type: ss, server: 1.1.1.1}
  - {name: obfs, type: ss, server: 2.2.2.2, port: 80, cipher: aes-128-gcm, password: p, plugin: obfs, plugin-opts: {mode: tls, host: bing.com}}
rules:
  - MATCH,DIRECT
"#;
        let list = decode(profile.as_bytes()).unwrap();
        let tags: Vec<_> = list.iter().map(|d| d.tag.as_str()).collect();
        assert_eq!(tags, vec!["US-A", "US-B", "JP-A", "obfs"]);

        assert_eq!(list[0].server_port, 8388);
        assert_eq!(list[1].params["transport"]["headers"]["Host"], "cdn.example");
        assert_eq!(list[1].params["tls"]["server_name"], "v.example");
        assert_eq!(list[2].params["transport"]["service_name"], "svc");
        assert_eq!(list[3].str_param("plugin"), Some("obfs-local"));
        assert_eq!(
            list[3].str_param("plugin_opts"),
            Some("obfs=tls;obfs-host=bing.com")
        );
    }

    #[test]
    fn test_not_a_profile() {
        assert!(decode(b"just a string").is_err());
        assert!(decode(b"rules: []").is_err());
        assert!(decode(b"proxies: []").unwrap().is_empty());
    }
}
