use std::{
    fmt,
    net::{Ipv4Addr, UdpSocket},
    str::FromStr,
    time::{Duration, Instant},
};

use crate::error::{Error, Result};

/// The address of a heat pump controller's TCP service.
///
/// Produced by [`DeviceDiscovery`] or entered manually.
///
/// # Examples
///
/// ```rust
/// use luxtronik::DeviceAddress;
///
/// let address: DeviceAddress = "192.168.2.10:8889".parse().unwrap();
/// assert_eq!("192.168.2.10", address.host());
/// assert_eq!(8889, address.port());
/// assert_eq!("192.168.2.10:8889", address.to_string());
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DeviceAddress {
    host: String,
    port: u16,
}

impl DeviceAddress {
    /// Construct a new `DeviceAddress`.
    pub fn new<H: Into<String>>(host: H, port: u16) -> DeviceAddress {
        DeviceAddress {
            host: host.into(),
            port,
        }
    }

    /// Return the host name or IP address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Return the port number.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<DeviceAddress> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Format(format!("invalid device address {:?}", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::Format(format!("invalid port in device address {:?}", s)))?;
        if host.is_empty() || port == 0 {
            return Err(Error::Format(format!("invalid device address {:?}", s)));
        }

        Ok(DeviceAddress::new(host, port))
    }
}

/// The ports probed by default during discovery.
pub const DISCOVERY_PORTS: [u16; 2] = [4444, 47808];

const DISCOVERY_PAYLOAD: &[u8] = b"2000;111;1;\0";
const DISCOVERY_REPLY_PREFIX: &[u8] = b"2500;111;";

/// Locates heat pump controllers on the local network via UDP broadcast.
///
/// For each configured port a broadcast-enabled socket is bound to that
/// port, the fixed discovery payload is broadcast, and replies are collected
/// until the per-port timeout elapses. A controller answers with a
/// `2500;111;<port>;...` datagram naming the port its TCP service listens
/// on. The per-port cycles run sequentially, so a full discovery never takes
/// longer than `ports × timeout`.
///
/// # Examples
///
/// ```rust,no_run
/// use luxtronik::DeviceDiscovery;
///
/// let discovery = DeviceDiscovery::new();
/// for address in discovery.discover().unwrap() {
///     println!("found controller at {}", address);
/// }
/// ```
#[derive(Debug)]
pub struct DeviceDiscovery {
    ports: Vec<u16>,
    broadcast_addr: Ipv4Addr,
    timeout: Duration,
}

impl DeviceDiscovery {
    /// Create a new `DeviceDiscovery` instance using default values.
    pub fn new() -> DeviceDiscovery {
        DeviceDiscovery {
            ports: DISCOVERY_PORTS.to_vec(),
            broadcast_addr: Ipv4Addr::BROADCAST,
            timeout: Duration::from_millis(1000),
        }
    }

    /// Set the ports to probe.
    pub fn set_ports(&mut self, ports: Vec<u16>) {
        self.ports = ports;
    }

    /// Set the broadcast address.
    pub fn set_broadcast_addr(&mut self, addr: Ipv4Addr) {
        self.broadcast_addr = addr;
    }

    /// Set the timeout used to wait for replies on each port.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Discover all controllers reachable by broadcast.
    ///
    /// Returns the union of the valid replies received on all configured
    /// ports. A port that cannot be bound or probed is logged and skipped;
    /// it does not abort discovery on the remaining ports.
    pub fn discover(&self) -> Result<Vec<DeviceAddress>> {
        let mut addresses = Vec::new();

        for &port in &self.ports {
            match self.discover_on_port(port) {
                Ok(found) => {
                    for address in found {
                        if !addresses.contains(&address) {
                            addresses.push(address);
                        }
                    }
                }
                Err(err) => log::warn!("Discovery on port {} failed: {}", port, err),
            }
        }

        Ok(addresses)
    }

    fn discover_on_port(&self, port: u16) -> Result<Vec<DeviceAddress>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_broadcast(true)?;

        socket.send_to(DISCOVERY_PAYLOAD, (self.broadcast_addr, port))?;

        let deadline = Instant::now() + self.timeout;
        let mut addresses = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            socket.set_read_timeout(Some(deadline - now))?;

            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    if let Some(service_port) = parse_discovery_reply(&buf[0..len]) {
                        addresses.push(DeviceAddress::new(peer.ip().to_string(), service_port));
                    }
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(addresses)
    }
}

impl Default for DeviceDiscovery {
    fn default() -> DeviceDiscovery {
        DeviceDiscovery::new()
    }
}

/// Extract the announced service port from a discovery reply.
///
/// Returns `None` for the loopback echo of the outgoing payload, for
/// datagrams without the reply prefix and for replies whose port field is
/// unparsable or out of range (controllers running an old firmware variant
/// send those; they are not addressable).
fn parse_discovery_reply(datagram: &[u8]) -> Option<u16> {
    if datagram.starts_with(DISCOVERY_PAYLOAD) {
        return None;
    }
    if !datagram.starts_with(DISCOVERY_REPLY_PREFIX) {
        log::debug!("Ignoring unrecognized discovery datagram: {:?}", datagram);
        return None;
    }

    let text = String::from_utf8_lossy(datagram);
    let field = text.split(';').nth(2)?;

    match field.trim_matches(char::from(0)).trim().parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Some(port as u16),
        _ => {
            log::debug!(
                "Discovery reply with unusable port field {:?}, old firmware variant?",
                field
            );
            None
        }
    }
}
