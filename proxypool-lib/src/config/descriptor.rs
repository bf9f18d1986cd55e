use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire protocols an endpoint descriptor can name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Shadowsocks,
    Vmess,
    Vless,
    Trojan,
    Socks,
    Http,
    Hysteria2,
    Tuic,
}

impl ProxyKind {
    /// Resolves the sing-box outbound type name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "shadowsocks" => Some(Self::Shadowsocks),
            "vmess" => Some(Self::Vmess),
            "vless" => Some(Self::Vless),
            "trojan" => Some(Self::Trojan),
            "socks" => Some(Self::Socks),
            "http" => Some(Self::Http),
            "hysteria2" => Some(Self::Hysteria2),
            "tuic" => Some(Self::Tuic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shadowsocks => "shadowsocks",
            Self::Vmess => "vmess",
            Self::Vless => "vless",
            Self::Trojan => "trojan",
            Self::Socks => "socks",
            Self::Http => "http",
            Self::Hysteria2 => "hysteria2",
            Self::Tuic => "tuic",
        }
    }
}

impl Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical shape every subscription format decodes into. Serialized it
/// is one entry of a sing-box outbound list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundDescriptor {
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl OutboundDescriptor {
    pub fn new(
        kind: ProxyKind,
        tag: impl Into<String>,
        server: impl Into<String>,
        server_port: u16,
    ) -> Self {
        Self {
            kind,
            tag: tag.into(),
            server: server.into(),
            server_port,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tag.trim().is_empty() {
            return Err(format!("{} outbound without tag", self.kind));
        }
        if self.server.trim().is_empty() {
            return Err(format!("outbound {} without server", self.tag));
        }
        if self.server_port == 0 {
            return Err(format!("outbound {} with port 0", self.tag));
        }
        Ok(())
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn bool_param(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    /// `tls.enabled`, following the sing-box layout.
    pub fn tls_enabled(&self) -> bool {
        self.params
            .get("tls")
            .and_then(|t| t.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The `network` restriction, if any: `tcp` or `udp`.
    pub fn network(&self) -> Option<&str> {
        self.str_param("network")
    }
}

/// Accumulates protocol parameters, dropping empty values so that the same
/// endpoint written in different formats normalizes to the same map.
#[derive(Default)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn str(mut self, key: &str, value: Option<impl Into<String>>) -> Self {
        if let Some(v) = value {
            let v: String = v.into();
            if !v.is_empty() {
                self.0.insert(key.to_owned(), Value::String(v));
            }
        }
        self
    }

    pub fn num(mut self, key: &str, value: Option<u64>) -> Self {
        if let Some(v) = value.filter(|v| *v != 0) {
            self.0.insert(key.to_owned(), Value::from(v));
        }
        self
    }

    pub fn flag(mut self, key: &str, value: Option<bool>) -> Self {
        if let Some(true) = value {
            self.0.insert(key.to_owned(), Value::Bool(true));
        }
        self
    }

    pub fn obj(mut self, key: &str, value: Option<Value>) -> Self {
        if let Some(v) = value {
            self.0.insert(key.to_owned(), v);
        }
        self
    }

    pub fn list(mut self, key: &str, value: Vec<String>) -> Self {
        if !value.is_empty() {
            self.0.insert(key.to_owned(), Value::from(value));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Option<Value> {
        if self.0.is_empty() {
            None
        } else {
            Some(Value::Object(self.0.into_iter().collect()))
        }
    }

    pub fn build(self) -> BTreeMap<String, Value> {
        self.0
    }
}
