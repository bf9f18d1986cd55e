use std::{fmt::Debug, io};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;

use crate::{
    common::errors::new_io_error,
    proxy::{AnyStream, OutboundDatagram},
    session::SocksAddr,
};

/// A UDP ASSOCIATE relay. The control connection is kept open for as long as
/// the association lives.
pub struct Socks5Datagram {
    _control: AnyStream,
    socket: UdpSocket,
    remote: SocksAddr,
}

impl Debug for Socks5Datagram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Datagram")
            .field("remote", &self.remote)
            .finish()
    }
}

impl Socks5Datagram {
    pub fn new(control: AnyStream, socket: UdpSocket, remote: SocksAddr) -> Self {
        Self {
            _control: control,
            socket,
            remote,
        }
    }
}

#[async_trait]
impl OutboundDatagram for Socks5Datagram {
    async fn send(&self, data: &[u8]) -> io::Result<usize> {
        let mut buf = BytesMut::with_capacity(3 + self.remote.size() + data.len());
        buf.put_slice(&[0x0, 0x0, 0x0]);
        self.remote.write_buf(&mut buf)?;
        buf.put_slice(data);
        self.socket.send(&buf).await?;
        Ok(data.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut packet = vec![0u8; 65535];
        let n = self.socket.recv(&mut packet).await?;
        if n < 3 {
            return Err(new_io_error("short socks5 udp packet"));
        }
        if packet[2] != 0 {
            return Err(new_io_error("fragmented socks5 udp packet"));
        }
        let addr = SocksAddr::peek_read(&packet[3..n])?;
        let offset = 3 + addr.size();
        let payload = &packet[offset..n];
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok(len)
    }

    fn remote(&self) -> &SocksAddr {
        &self.remote
    }
}
