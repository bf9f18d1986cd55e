use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{common::errors::new_io_error, session::SocksAddr};

pub const SOCKS5_VERSION: u8 = 0x05;

const MAX_ADDR_LEN: usize = 1 + 1 + 255 + 2;
const MAX_AUTH_LEN: usize = 1 + 1 + 255 + 1 + 255;

pub(crate) mod auth_methods {
    pub const NO_AUTH: u8 = 0x00;
    pub const USER_PASS: u8 = 0x02;
}

pub(crate) mod socks_command {
    pub const CONNECT: u8 = 0x01;
    pub const UDP_ASSOCIATE: u8 = 0x3;
}

pub(crate) mod response_code {
    pub const SUCCEEDED: u8 = 0x00;
}

const ERROR_CODE_LOOKUP: &[&str] = &[
    "succeeded",
    "general SOCKS server failure",
    "connection not allowed by ruleset",
    "network unreachable",
    "host unreachable",
    "connection refused",
    "TTL expired",
    "command not supported",
    "address type not supported",
];

/// Runs the client side of a SOCKS5 negotiation and returns the address the
/// server bound for the request.
pub(crate) async fn client_handshake<S>(
    s: &mut S,
    addr: &SocksAddr,
    command: u8,
    username: Option<&str>,
    password: Option<&str>,
) -> std::io::Result<SocksAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let credentials = username.zip(password);

    let mut buf = BytesMut::with_capacity(MAX_AUTH_LEN);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(1);
    buf.put_u8(if credentials.is_some() {
        auth_methods::USER_PASS
    } else {
        auth_methods::NO_AUTH
    });
    s.write_all(&buf).await?;

    let mut reply = [0u8; 2];
    s.read_exact(&mut reply).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(new_io_error("unsupported SOCKS version"));
    }

    match reply[1] {
        auth_methods::NO_AUTH => {}
        auth_methods::USER_PASS => {
            let (username, password) =
                credentials.ok_or_else(|| new_io_error("missing credentials"))?;
            if username.len() > 255 || password.len() > 255 {
                return Err(new_io_error("SOCKS5 credentials too long"));
            }

            buf.clear();
            buf.put_u8(1);
            buf.put_u8(username.len() as u8);
            buf.put_slice(username.as_bytes());
            buf.put_u8(password.len() as u8);
            buf.put_slice(password.as_bytes());
            s.write_all(&buf).await?;

            s.read_exact(&mut reply).await?;
            if reply[1] != response_code::SUCCEEDED {
                return Err(new_io_error("SOCKS5 authentication failed"));
            }
        }
        _ => return Err(new_io_error("unsupported SOCKS5 authentication method")),
    }

    let mut buf = BytesMut::with_capacity(MAX_ADDR_LEN + 3);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(command);
    buf.put_u8(0x00);
    if command == socks_command::UDP_ASSOCIATE {
        SocksAddr::any_ipv4().write_buf(&mut buf)?;
    } else {
        addr.write_buf(&mut buf)?;
    }
    s.write_all(&buf).await?;

    let mut head = [0u8; 3];
    s.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(new_io_error("unsupported SOCKS version"));
    }

    if head[1] != response_code::SUCCEEDED {
        return Err(new_io_error(format!(
            "SOCKS5 request failed with {}",
            ERROR_CODE_LOOKUP
                .get(head[1] as usize)
                .unwrap_or(&"unknown error")
        )));
    }

    SocksAddr::read_from(s).await
}
