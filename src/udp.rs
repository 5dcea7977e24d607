use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use crate::endpoint::Endpoint;
use crate::engine::EngineHandle;
use crate::transport::Transport;

pub async fn bind(addr: SocketAddr) -> anyhow::Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(addr).await?;
    info!("bound UDP socket to {:?}", socket.local_addr()?);
    Ok(Arc::new(socket))
}

/// Sends packets on a tokio [UdpSocket]. Transmission must not block the transaction layer, so
///  packets are queued and sent by a separate task; the task terminates when the transport is
///  dropped.
pub struct UdpTransport {
    outgoing: mpsc::UnboundedSender<(SocketAddr, Bytes)>,
    is_v6_socket: bool,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> anyhow::Result<(UdpTransport, JoinHandle<()>)> {
        let is_v6_socket = socket.local_addr()?.is_ipv6();
        let (send, recv) = mpsc::unbounded_channel();
        let join_handle = tokio::spawn(send_loop(socket, recv));
        Ok((UdpTransport { outgoing: send, is_v6_socket }, join_handle))
    }
}

async fn send_loop(socket: Arc<UdpSocket>, mut outgoing: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>) {
    while let Some((to, packet)) = outgoing.recv().await {
        trace!("UDP socket: sending {} bytes to {:?}", packet.len(), to);
        if let Err(e) = socket.send_to(&packet, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }
    debug!("UDP transport dropped, terminating send loop");
}

impl Transport for UdpTransport {
    fn transmit(&self, to: &Endpoint, packet: &[u8]) {
        // V4 peers are addressed through mapped addresses on a V6 socket
        let target = match to.address {
            IpAddr::V4(v4) if self.is_v6_socket => SocketAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), to.port),
            _ => to.socket_addr(),
        };

        if self.outgoing.send((target, Bytes::copy_from_slice(packet))).is_err() {
            error!("UDP send loop terminated, dropping packet to {}", to);
        }
    }
}

/// Reads datagrams from the socket and hands them to the engine until the engine stops
pub async fn recv_loop(socket: Arc<UdpSocket>, engine: EngineHandle, max_packet_size: usize) -> anyhow::Result<()> {
    // one extra byte to detect oversized datagrams
    let mut buf = vec![0u8; max_packet_size + 1];

    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        if len > max_packet_size {
            debug!("discarding datagram from {:?} exceeding the maximum packet size of {} bytes", from, max_packet_size);
            continue;
        }

        trace!("received {} bytes from {:?}", len, from);
        if engine.on_datagram(Endpoint::from(from), Bytes::copy_from_slice(&buf[..len])).await.is_err() {
            debug!("transaction engine stopped, terminating receive loop");
            return Ok(());
        }
    }
}
