//! The usbmuxd protocol client: transport selection, device listing, and the
//! building blocks ([`frame`], [`packet`], [`channel`]) that the device
//! registry and tunnel factory are built from.

pub mod channel;
pub mod frame;
pub mod packet;

use std::net::SocketAddr;
use std::str::FromStr;

use tracing::debug;

use crate::error::{MuxError, Result};
use crate::ReadWrite;
use channel::ControlChannel;
use frame::{ConnectionType, ListDevicesFrame};

/// Overrides the daemon endpoint usbmuxd normally listens on for this host
/// OS. Mainly useful for local development and integration tests, where
/// spinning up the real system daemon isn't an option.
pub const ADDR_ENV_VAR: &str = "USBMUXD_SOCKET_ADDRESS";

/// How a [`ControlChannel`] reaches the local usbmuxd daemon.
#[derive(Debug, Clone)]
pub enum UsbmuxdAddr {
    #[cfg(unix)]
    UnixSocket(String),
    TcpSocket(SocketAddr),
}

impl UsbmuxdAddr {
    pub const DEFAULT_TCP_PORT: u16 = 27015;
    #[cfg(unix)]
    pub const SOCKET_FILE: &'static str = "/var/run/usbmuxd";

    /// The OS-default endpoint: a Unix socket on POSIX, loopback TCP on
    /// Windows.
    pub fn default_for_os() -> Self {
        #[cfg(unix)]
        {
            Self::UnixSocket(Self::SOCKET_FILE.to_string())
        }
        #[cfg(not(unix))]
        {
            Self::TcpSocket(SocketAddr::from(([127, 0, 0, 1], Self::DEFAULT_TCP_PORT)))
        }
    }

    /// Reads [`ADDR_ENV_VAR`], falling back to [`default_for_os`] if it is
    /// unset. A value containing a colon is parsed as a `host:port` pair; on
    /// Unix, anything else is treated as a socket path.
    ///
    /// [`default_for_os`]: UsbmuxdAddr::default_for_os
    pub fn from_env() -> Result<Self> {
        match std::env::var(ADDR_ENV_VAR) {
            Ok(val) => {
                #[cfg(unix)]
                {
                    if val.contains(':') {
                        Ok(Self::TcpSocket(SocketAddr::from_str(&val).map_err(|e| {
                            MuxError::Decode(format!("invalid {ADDR_ENV_VAR} value: {e}"))
                        })?))
                    } else {
                        Ok(Self::UnixSocket(val))
                    }
                }
                #[cfg(not(unix))]
                {
                    Ok(Self::TcpSocket(SocketAddr::from_str(&val).map_err(|e| {
                        MuxError::Decode(format!("invalid {ADDR_ENV_VAR} value: {e}"))
                    })?))
                }
            }
            Err(_) => Ok(Self::default_for_os()),
        }
    }

    /// Opens a fresh socket to the daemon. Every logical request gets its
    /// own socket; channels are never reused across requests.
    pub async fn connect(&self) -> Result<Box<dyn ReadWrite>> {
        let socket: Box<dyn ReadWrite> = match self {
            #[cfg(unix)]
            Self::UnixSocket(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
            Self::TcpSocket(addr) => Box::new(tokio::net::TcpStream::connect(addr).await?),
        };
        Ok(socket)
    }
}

impl Default for UsbmuxdAddr {
    fn default() -> Self {
        Self::default_for_os()
    }
}

/// `USB` or `Network`, mirroring [`frame::ConnectionType`] without exposing
/// the wire-level serde plumbing to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Usb,
    Network,
}

impl From<ConnectionType> for Connection {
    fn from(c: ConnectionType) -> Self {
        match c {
            ConnectionType::Usb => Connection::Usb,
            ConnectionType::Network => Connection::Network,
        }
    }
}

/// One entry of a `ListDevices` reply, filtered to USB attachments.
#[derive(Debug, Clone)]
pub struct UsbDevice {
    pub device_id: u32,
    pub location_id: Option<u64>,
    pub product_id: Option<u64>,
    pub serial_number: String,
    pub connection_speed: Option<u64>,
    pub connection_type: Connection,
}

/// Performs the one-shot `ListDevices` request and returns the USB-attached
/// subset. Fails with [`MuxError::NoDevices`] if that subset is empty, so a
/// caller can tell "daemon reachable, nothing attached" from a genuine
/// transport failure.
pub async fn list_devices(addr: &UsbmuxdAddr) -> Result<Vec<UsbDevice>> {
    let req = frame::list_devices_request();
    let mut channel = ControlChannel::open(
        addr,
        &req,
        packet::PLIST_PROTO_VERSION,
        packet::PLIST_PROTO_TYPE,
    )
    .await?;
    channel.send().await?;
    let resp = channel.recv().await?;

    let parsed: ListDevicesFrame = plist::from_bytes(&resp.payload)?;
    let devices: Vec<UsbDevice> = parsed
        .device_list
        .into_iter()
        .filter_map(|entry| entry.properties)
        .filter(|props| props.connection_type == ConnectionType::Usb)
        .map(|props| UsbDevice {
            device_id: props.device_id,
            location_id: props.location_id,
            product_id: props.product_id,
            serial_number: props.serial_number,
            connection_speed: props.connection_speed,
            connection_type: props.connection_type.into(),
        })
        .collect();

    if devices.is_empty() {
        debug!("ListDevices returned no USB-attached devices");
        return Err(MuxError::NoDevices);
    }

    Ok(devices)
}
