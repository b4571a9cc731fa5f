//! Dialer facade (C6): the single entry point an HTTP proxy frontend needs
//! to turn `serial:port` into a live socket.

use crate::error::{MuxError, Result};
use crate::registry::DeviceRegistry;
use crate::tunnel;
use crate::usbmuxd::UsbmuxdAddr;
use crate::Socket;

const DEFAULT_PORT: u16 = 80;

/// Bridges an HTTP proxy's notion of "destination host" to a usbmuxd tunnel:
/// the registry resolves a device serial to its current device id, and the
/// tunnel factory opens the actual connection.
#[derive(Debug, Clone)]
pub struct Dialer {
    registry: DeviceRegistry,
    addr: UsbmuxdAddr,
}

impl Dialer {
    /// Starts a device registry against `addr` and wraps it in a dialer.
    pub async fn start(addr: UsbmuxdAddr) -> Result<Self> {
        let registry = DeviceRegistry::start(addr.clone()).await?;
        Ok(Self { registry, addr })
    }

    /// Builds a dialer around an already-running registry, e.g. one shared
    /// across several dialers.
    pub fn with_registry(registry: DeviceRegistry, addr: UsbmuxdAddr) -> Self {
        Self { registry, addr }
    }

    /// Resolves `address` (`<serial>` or `<serial>:<port>`, port defaulting
    /// to 80) against the registry and opens a tunnel to it.
    ///
    /// `network` is accepted for symmetry with the generic dialer interfaces
    /// HTTP proxy frontends expect; only TCP-shaped destinations make sense
    /// here, so its value is not inspected.
    pub async fn dial(&self, _network: &str, address: &str) -> Result<Socket> {
        let (serial, port) = parse_target(address);
        let device_id = self.registry.resolve(serial).await?;
        tunnel::open_tunnel(&self.addr, device_id, port).await
    }

    /// Whether the registry's background listener is still running.
    pub fn is_alive(&self) -> bool {
        self.registry.is_alive()
    }
}

/// Splits `<serial>[:<port>]`, defaulting the port to 80 when absent or
/// unparseable, matching the source proxy's `host:port` handling.
fn parse_target(address: &str) -> (&str, u16) {
    match address.rsplit_once(':') {
        Some((serial, port_str)) => match port_str.parse::<u16>() {
            Ok(port) => (serial, port),
            Err(_) => (address, DEFAULT_PORT),
        },
        None => (address, DEFAULT_PORT),
    }
}
