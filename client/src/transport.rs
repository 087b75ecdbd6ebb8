use crate::error::Result;

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

// Conn is the packet transport the relay client runs over. Implementors
// carry datagrams between the client and the TURN server. The relayed
// connection implements it as well, so it can stand in wherever a plain
// socket is expected.
#[async_trait]
pub trait Conn {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;
    async fn local_addr(&self) -> Result<SocketAddr>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl Conn for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.recv_from(buf).await?)
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(self.send_to(buf, target).await?)
    }

    async fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr()?)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
