use std::collections::HashMap;

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use percent_encoding::percent_decode_str;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::{
    Error,
    config::{
        convert::{split_alpn, tls_options, transport_options},
        descriptor::{OutboundDescriptor, Params, ProxyKind},
    },
};

/// Decodes a base64 wrapped, newline separated list of share links. A plain
/// list of links is accepted as well.
pub fn decode(content: &[u8]) -> crate::Result<Vec<OutboundDescriptor>> {
    let text = String::from_utf8_lossy(content);
    let links = match decode_base64(&text) {
        Some(decoded) => decoded,
        None if text.contains("://") => text.into_owned(),
        None => return Err(Error::Decode("not a base64 envelope".to_owned())),
    };

    let mut rv = Vec::new();
    for line in links.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !looks_like_link(line) {
            debug!("ignoring non link line");
            continue;
        }
        match parse_link(line) {
            Ok(Some(d)) => match d.validate() {
                Ok(_) => rv.push(d),
                Err(e) => warn!("skipping invalid share link: {e}"),
            },
            Ok(None) => warn!("skipping share link with unsupported scheme: {}", scheme(line)),
            Err(e) => warn!("skipping malformed {} share link: {e}", scheme(line)),
        }
    }
    Ok(rv)
}

/// Standard alphabet with padding first, then the unpadded and url safe
/// variants.
pub fn decode_base64(input: &str) -> Option<String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let unpadded = compact.trim_end_matches('=');

    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(unpadded))
        .or_else(|_| URL_SAFE.decode(&compact))
        .or_else(|_| URL_SAFE_NO_PAD.decode(unpadded))
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn looks_like_link(line: &str) -> bool {
    match line.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn scheme(line: &str) -> &str {
    line.split_once("://").map(|(s, _)| s).unwrap_or("<none>")
}

fn parse_link(line: &str) -> Result<Option<OutboundDescriptor>, String> {
    let Some((scheme, _)) = line.split_once("://") else {
        return Ok(None);
    };
    let d = match scheme.to_ascii_lowercase().as_str() {
        "ss" => parse_ss(line)?,
        "vmess" => parse_vmess(line)?,
        "vless" => parse_vless(line)?,
        "trojan" => parse_trojan(line)?,
        "hysteria2" | "hy2" => parse_hysteria2(line)?,
        "tuic" => parse_tuic(line)?,
        "socks" | "socks5" => parse_socks(line)?,
        _ => return Ok(None),
    };
    Ok(Some(d))
}

fn unescape(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Host, port, tag and query of a `scheme://userinfo@host:port?query#tag`
/// link.
struct Link {
    url: Url,
    host: String,
    port: u16,
    tag: String,
    query: HashMap<String, String>,
}

impl Link {
    fn parse(line: &str) -> Result<Self, String> {
        let url = Url::parse(line).map_err(|e| e.to_string())?;
        let host = url
            .host_str()
            .ok_or("missing host")?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = url.port().ok_or("missing port")?;
        let tag = url
            .fragment()
            .map(unescape)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("{host}:{port}"));
        let query = url.query_pairs().into_owned().collect();
        Ok(Self {
            url,
            host,
            port,
            tag,
            query,
        })
    }

    fn username(&self) -> String {
        unescape(self.url.username())
    }

    fn password(&self) -> Option<String> {
        self.url.password().map(unescape)
    }

    fn get(&self, key: &str) -> Option<String> {
        self.query.get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn truthy(&self, key: &str) -> bool {
        matches!(self.query.get(key).map(String::as_str), Some("1" | "true"))
    }

    fn transport(&self) -> Option<Value> {
        transport_options(
            self.get("type").as_deref().unwrap_or("tcp"),
            self.get("host"),
            self.get("path"),
            self.get("serviceName"),
        )
    }

    fn tls(&self, enabled: bool) -> Option<Value> {
        tls_options(
            enabled,
            self.get("sni").or_else(|| self.get("peer")),
            self.truthy("allowInsecure") || self.truthy("insecure"),
            split_alpn(self.get("alpn").as_deref()),
        )
    }
}

fn parse_ss(line: &str) -> Result<OutboundDescriptor, String> {
    let body = &line[line.find("://").map(|i| i + 3).unwrap_or(0)..];
    let (main, fragment) = body.split_once('#').unwrap_or((body, ""));

    // legacy form: ss://base64(method:password@host:port)#tag
    if !main.contains('@') {
        let decoded = decode_base64(main.trim_end_matches('/'))
            .ok_or("invalid base64 in legacy link")?;
        let (userinfo, addr) = decoded.rsplit_once('@').ok_or("missing server")?;
        let (method, password) = userinfo.split_once(':').ok_or("missing method")?;
        let (host, port) = addr.rsplit_once(':').ok_or("missing port")?;
        let port: u16 = port.trim().parse().map_err(|_| "invalid port")?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let tag = Some(unescape(fragment))
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("{host}:{port}"));
        let mut d = OutboundDescriptor::new(ProxyKind::Shadowsocks, tag, host, port);
        d.params = Params::new()
            .str("method", Some(method))
            .str("password", Some(password))
            .build();
        return Ok(d);
    }

    // SIP002: the userinfo may be standard base64 containing '/', so it is
    // split off before the rest goes through the url parser
    let (userinfo, addr) = main.rsplit_once('@').ok_or("missing server")?;
    let link = Link::parse(&format!("ss://ss@{addr}#{fragment}"))?;
    let userinfo = unescape(userinfo);
    let plain = if userinfo.contains(':') {
        userinfo
    } else {
        decode_base64(&userinfo).ok_or("invalid base64 userinfo")?
    };
    let (method, password) = plain
        .split_once(':')
        .map(|(m, p)| (m.to_owned(), p.to_owned()))
        .ok_or("missing method")?;
    let (plugin, plugin_opts) = match link.get("plugin") {
        Some(p) => match p.split_once(';') {
            Some((name, opts)) => (Some(name.to_owned()), Some(opts.to_owned())),
            None => (Some(p), None),
        },
        None => (None, None),
    };

    let mut d = OutboundDescriptor::new(
        ProxyKind::Shadowsocks,
        link.tag.clone(),
        link.host.clone(),
        link.port,
    );
    d.params = Params::new()
        .str("method", Some(method))
        .str("password", Some(password))
        .str("plugin", plugin)
        .str("plugin_opts", plugin_opts)
        .build();
    Ok(d)
}

fn json_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_vmess(line: &str) -> Result<OutboundDescriptor, String> {
    let body = &line["vmess://".len().min(line.len())..];
    let body = body.split_once('#').map(|(b, _)| b).unwrap_or(body);
    let json = decode_base64(body).ok_or("invalid base64 payload")?;
    let v: Value = serde_json::from_str(&json).map_err(|e| e.to_string())?;

    let server = json_str(&v, "add").ok_or("missing add")?;
    let port: u16 = json_str(&v, "port")
        .ok_or("missing port")?
        .parse()
        .map_err(|_| "invalid port")?;
    let tag = json_str(&v, "ps").unwrap_or_else(|| format!("{server}:{port}"));
    let alter_id = json_str(&v, "aid").and_then(|a| a.parse::<u64>().ok());
    let network = json_str(&v, "net").unwrap_or_else(|| "tcp".to_owned());
    let tls_enabled = json_str(&v, "tls").is_some_and(|t| t == "tls");

    let mut d = OutboundDescriptor::new(ProxyKind::Vmess, tag, server, port);
    d.params = Params::new()
        .str("uuid", Some(json_str(&v, "id").ok_or("missing id")?))
        .num("alter_id", alter_id)
        .str(
            "security",
            Some(json_str(&v, "scy").unwrap_or_else(|| "auto".to_owned())),
        )
        .obj(
            "tls",
            tls_options(
                tls_enabled,
                json_str(&v, "sni"),
                false,
                split_alpn(json_str(&v, "alpn").as_deref()),
            ),
        )
        .obj(
            "transport",
            transport_options(
                &network,
                json_str(&v, "host"),
                json_str(&v, "path"),
                json_str(&v, "path"),
            ),
        )
        .build();
    Ok(d)
}

fn parse_vless(line: &str) -> Result<OutboundDescriptor, String> {
    let link = Link::parse(line)?;
    let security = link.get("security").unwrap_or_default();
    let mut tls = link.tls(security == "tls" || security == "reality");
    if security == "reality" {
        if let Some(Value::Object(t)) = tls.as_mut() {
            let reality = Params::new()
                .flag("enabled", Some(true))
                .str("public_key", link.get("pbk"))
                .str("short_id", link.get("sid"))
                .into_value();
            if let Some(r) = reality {
                t.insert("reality".to_owned(), r);
            }
        }
    }

    let mut d = OutboundDescriptor::new(
        ProxyKind::Vless,
        link.tag.clone(),
        link.host.clone(),
        link.port,
    );
    d.params = Params::new()
        .str("uuid", Some(link.username()))
        .str("flow", link.get("flow"))
        .obj("tls", tls)
        .obj("transport", link.transport())
        .build();
    Ok(d)
}

fn parse_trojan(line: &str) -> Result<OutboundDescriptor, String> {
    let link = Link::parse(line)?;
    let mut d = OutboundDescriptor::new(
        ProxyKind::Trojan,
        link.tag.clone(),
        link.host.clone(),
        link.port,
    );
    d.params = Params::new()
        .str("password", Some(link.username()))
        .obj("tls", link.tls(link.get("security").as_deref() != Some("none")))
        .obj("transport", link.transport())
        .build();
    Ok(d)
}

fn parse_hysteria2(line: &str) -> Result<OutboundDescriptor, String> {
    let link = Link::parse(line)?;
    let password = match link.password() {
        Some(p) => format!("{}:{p}", link.username()),
        None => link.username(),
    };
    let obfs = link.get("obfs").and_then(|kind| {
        Params::new()
            .str("type", Some(kind))
            .str("password", link.get("obfs-password"))
            .into_value()
    });

    let mut d = OutboundDescriptor::new(
        ProxyKind::Hysteria2,
        link.tag.clone(),
        link.host.clone(),
        link.port,
    );
    d.params = Params::new()
        .str("password", Some(password))
        .obj("obfs", obfs)
        .obj("tls", link.tls(true))
        .build();
    Ok(d)
}

fn parse_tuic(line: &str) -> Result<OutboundDescriptor, String> {
    let link = Link::parse(line)?;
    let mut d = OutboundDescriptor::new(
        ProxyKind::Tuic,
        link.tag.clone(),
        link.host.clone(),
        link.port,
    );
    d.params = Params::new()
        .str("uuid", Some(link.username()))
        .str("password", link.password())
        .str("congestion_control", link.get("congestion_control"))
        .str("udp_relay_mode", link.get("udp_relay_mode"))
        .obj(
            "tls",
            tls_options(
                true,
                link.get("sni"),
                link.truthy("allow_insecure") || link.truthy("insecure"),
                split_alpn(link.get("alpn").as_deref()),
            ),
        )
        .build();
    Ok(d)
}

fn parse_socks(line: &str) -> Result<OutboundDescriptor, String> {
    let link = Link::parse(line)?;
    let (username, password) = match link.password() {
        Some(p) => (link.username(), Some(p)),
        None => {
            let user = link.username();
            match decode_base64(&user).and_then(|s| {
                s.split_once(':').map(|(u, p)| (u.to_owned(), p.to_owned()))
            }) {
                Some((u, p)) => (u, Some(p)),
                None => (user, None),
            }
        }
    };

    let mut d = OutboundDescriptor::new(
        ProxyKind::Socks,
        link.tag.clone(),
        link.host.clone(),
        link.port,
    );
    d.params = Params::new()
        .str("version", Some("5"))
        .str("username", Some(username))
        .str("password", password)
        .build();
    Ok(d)
}
