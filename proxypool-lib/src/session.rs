use std::{
    fmt::{Debug, Display, Formatter},
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use bytes::BufMut;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub enum SocksAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl Display for SocksAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SocksAddr::Ip(ip) => write!(f, "{ip}"),
            SocksAddr::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

pub struct SocksAddrType;

impl SocksAddrType {
    pub const DOMAIN: u8 = 0x3;
    pub const V4: u8 = 0x1;
    pub const V6: u8 = 0x4;
}

impl SocksAddr {
    pub fn any_ipv4() -> Self {
        Self::Ip(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }

    /// Builds an address from a host that may be an ip literal.
    pub fn from_host_port(host: &str, port: u16) -> Self {
        let trimmed = host.trim_start_matches('[').trim_end_matches(']');
        match trimmed.parse::<std::net::IpAddr>() {
            Ok(ip) => Self::Ip(SocketAddr::new(ip, port)),
            Err(_) => Self::Domain(host.to_owned(), port),
        }
    }

    /// Writes the SOCKS5 wire form. Domains longer than 255 bytes cannot be
    /// encoded.
    pub fn write_buf<T: BufMut>(&self, buf: &mut T) -> io::Result<()> {
        match self {
            Self::Ip(SocketAddr::V4(addr)) => {
                buf.put_u8(SocksAddrType::V4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Self::Ip(SocketAddr::V6(addr)) => {
                buf.put_u8(SocksAddrType::V6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Self::Domain(domain, port) => {
                let len = u8::try_from(domain.len()).map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("domain too long for socks5: {} bytes", domain.len()),
                    )
                })?;
                buf.put_u8(SocksAddrType::DOMAIN);
                buf.put_u8(len);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }

    pub fn host(&self) -> String {
        match self {
            SocksAddr::Ip(ip) => ip.ip().to_string(),
            SocksAddr::Domain(domain, _) => domain.to_string(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            SocksAddr::Ip(ip) => ip.port(),
            SocksAddr::Domain(_, port) => *port,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            SocksAddr::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            SocksAddr::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            SocksAddr::Domain(domain, _) => 1 + 1 + domain.len() + 2,
        }
    }

    /// Parses a SOCKS5 address from the head of a datagram.
    pub fn peek_read(buf: &[u8]) -> io::Result<Self> {
        let (&atyp, rest) = buf.split_first().ok_or_else(invalid_atyp)?;
        match atyp {
            SocksAddrType::V4 => {
                if rest.len() < 6 {
                    return Err(short_buf());
                }
                let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
                let port = u16::from_be_bytes([rest[4], rest[5]]);
                Ok(Self::Ip((ip, port).into()))
            }
            SocksAddrType::V6 => {
                if rest.len() < 18 {
                    return Err(short_buf());
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&rest[..16]);
                let port = u16::from_be_bytes([rest[16], rest[17]]);
                Ok(Self::Ip((Ipv6Addr::from(octets), port).into()))
            }
            SocksAddrType::DOMAIN => {
                let (&len, rest) = rest.split_first().ok_or_else(short_buf)?;
                let len = len as usize;
                if rest.len() < len + 2 {
                    return Err(short_buf());
                }
                let domain = String::from_utf8(rest[..len].to_vec())
                    .map_err(|_| invalid_domain())?;
                let port = u16::from_be_bytes([rest[len], rest[len + 1]]);
                Ok(Self::Domain(domain, port))
            }
            _ => Err(invalid_atyp()),
        }
    }

    pub async fn read_from<T: AsyncRead + Unpin>(r: &mut T) -> io::Result<Self> {
        match r.read_u8().await? {
            SocksAddrType::V4 => {
                let ip = Ipv4Addr::from(r.read_u32().await?);
                let port = r.read_u16().await?;
                Ok(Self::Ip((ip, port).into()))
            }
            SocksAddrType::V6 => {
                let ip = Ipv6Addr::from(r.read_u128().await?);
                let port = r.read_u16().await?;
                Ok(Self::Ip((ip, port).into()))
            }
            SocksAddrType::DOMAIN => {
                let domain_len = r.read_u8().await? as usize;
                let mut buf = vec![0u8; domain_len];
                r.read_exact(&mut buf).await?;
                let domain = String::from_utf8(buf).map_err(|_| invalid_domain())?;
                let port = r.read_u16().await?;
                Ok(Self::Domain(domain, port))
            }
            _ => Err(invalid_atyp()),
        }
    }
}

impl From<SocketAddr> for SocksAddr {
    fn from(value: SocketAddr) -> Self {
        Self::Ip(value)
    }
}

impl From<(&str, u16)> for SocksAddr {
    fn from((host, port): (&str, u16)) -> Self {
        Self::from_host_port(host, port)
    }
}

fn invalid_domain() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "invalid domain")
}

fn invalid_atyp() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "invalid address type")
}

fn short_buf() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "address truncated")
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        })
    }
}

/// One dispatch request as seen by an outbound.
#[derive(Clone)]
pub struct Session {
    pub network: Network,
    pub destination: SocksAddr,
}

impl Session {
    pub fn tcp(destination: SocksAddr) -> Self {
        Self {
            network: Network::Tcp,
            destination,
        }
    }

    pub fn udp(destination: SocksAddr) -> Self {
        Self {
            network: Network::Udp,
            destination,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            destination: SocksAddr::any_ipv4(),
        }
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("network", &self.network)
            .field("destination", &self.destination)
            .finish()
    }
}

impl Display for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] -> {}", self.network, self.destination)
    }
}
