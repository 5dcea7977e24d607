use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, SocketAddr};

/// The network identity of a peer. A transaction captures the endpoint it was sent to, and a
///  reply is only accepted from that same endpoint.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Endpoint {
    pub address: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: IpAddr, port: u16) -> Endpoint {
        Endpoint { address, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    #[cfg(test)]
    pub fn localhost(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::from([127, 0, 0, 1]), port)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]:{}", self.address, self.port)
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        // IPV4 peers reaching a dual-stack socket show up as mapped V6 addresses
        let address = match addr.ip() {
            IpAddr::V6(v6) => v6.to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Endpoint { address, port: addr.port() }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.socket_addr()
    }
}
