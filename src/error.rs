//! Error taxonomy for the usbmuxd client and everything built on top of it.

use thiserror::Error;

/// Errors surfaced by the usbmuxd protocol client, the device registry, the
/// tunnel factory, and the dialer facade.
///
/// Every variant maps to a taxonomy entry of its own (transport, broken,
/// encoding, decode, protocol, not-connected, no-devices); nothing here is
/// retried internally, callers decide what to do with it.
#[derive(Error, Debug)]
pub enum MuxError {
    /// Could not dial the local usbmuxd daemon.
    #[error("could not connect to usbmuxd: {0}")]
    Transport(#[source] std::io::Error),

    /// The socket closed mid-transfer, or returned zero bytes with no error.
    #[error("socket connection broken")]
    Broken,

    /// A request frame could not be serialized to a property list.
    #[error("could not encode request frame: {0}")]
    Encoding(#[source] plist::Error),

    /// A packet header or payload could not be parsed.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// The frame decoded fine but carried an unexpected message type or a
    /// non-OK reply code.
    #[error("{0}")]
    Protocol(String),

    /// The requested serial number is not currently present in the registry.
    #[error("Device {0} not connected")]
    NotConnected(String),

    /// `ListDevices` returned no USB-attached devices.
    #[error("no USB devices attached")]
    NoDevices,
}

impl From<std::io::Error> for MuxError {
    fn from(e: std::io::Error) -> Self {
        MuxError::Transport(e)
    }
}

impl From<plist::Error> for MuxError {
    fn from(e: plist::Error) -> Self {
        // plist::Error does not distinguish "bad input" from "bad output" at
        // the type level, but every use site in this crate that can hit this
        // conversion is decoding a response, so route it there rather than
        // to `Encoding`. Call sites encoding a request convert explicitly.
        MuxError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
