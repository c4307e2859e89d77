/**
 * The datagram seam between the measurement driver and the network
 */
use std::io;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/**
 * Something that can carry one datagram to the server and wait for one back. The driver
 * owns exactly one of these for the whole run.
 */
#[async_trait]
pub(crate) trait Transport {
    async fn send(&self, datagram: &[u8]) -> io::Result<usize>;

    /**
     * Wait for the next datagram. A datagram larger than `buffer` may be truncated, so callers
     * pass a buffer one byte larger than anything they accept.
     */
    async fn recv(&self, buffer: &mut [u8]) -> io::Result<usize>;
}

/**
 * A UDP socket connected to the server, so only its datagrams are delivered
 */
#[async_trait]
impl Transport for UdpSocket {
    async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, datagram).await
    }

    async fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buffer).await
    }
}
