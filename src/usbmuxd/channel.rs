//! A single-shot or long-lived session against the local usbmuxd socket (C3).

use tracing::debug;

use crate::error::{MuxError, Result};
use crate::usbmuxd::frame::MessageTypeProbe;
use crate::usbmuxd::packet::{self, Header};
use crate::usbmuxd::UsbmuxdAddr;
use crate::ReadWrite;

/// A decoded packet before its body has been interpreted: the raw payload
/// plus the `MessageType` cheaply probed out of it, so callers can dispatch
/// without a second full parse on the hot path.
#[derive(Debug)]
pub struct ResponseEnvelope {
    pub header: Header,
    pub message_type: String,
    pub payload: Vec<u8>,
}

/// Owns one socket to usbmuxd, a per-session tag counter, and the
/// (proto_version, proto_type) pair every packet on this channel carries.
///
/// A channel is used for exactly one logical request: either a single
/// request/response round trip, or an indefinite `recv` loop after a
/// `Listen` subscription. It is never reused across independent requests.
#[derive(Debug)]
pub struct ControlChannel {
    socket: Box<dyn ReadWrite>,
    tag: u32,
    proto_version: u32,
    proto_type: u32,
    payload: Vec<u8>,
}

impl ControlChannel {
    /// Dials usbmuxd at `addr` and buffers `request` for the next [`send`].
    ///
    /// [`send`]: ControlChannel::send
    pub async fn open(
        addr: &UsbmuxdAddr,
        request: &plist::Dictionary,
        proto_version: u32,
        proto_type: u32,
    ) -> Result<Self> {
        let socket = addr.connect().await?;

        let mut payload = Vec::new();
        plist::to_writer_xml(&mut payload, request).map_err(MuxError::Encoding)?;

        Ok(Self {
            socket,
            tag: 1,
            proto_version,
            proto_type,
            payload,
        })
    }

    /// Builds a channel directly from an already-connected socket, mainly
    /// useful for tests that substitute an in-memory duplex stream for the
    /// real daemon socket.
    pub fn from_socket(
        socket: Box<dyn ReadWrite>,
        request: &plist::Dictionary,
        proto_version: u32,
        proto_type: u32,
    ) -> Result<Self> {
        let mut payload = Vec::new();
        plist::to_writer_xml(&mut payload, request).map_err(MuxError::Encoding)?;
        Ok(Self {
            socket,
            tag: 1,
            proto_version,
            proto_type,
            payload,
        })
    }

    /// Transmits the buffered request with the current tag and increments
    /// the counter for the next call.
    pub async fn send(&mut self) -> Result<()> {
        let tag = self.tag;
        packet::write_packet(
            &mut self.socket,
            &self.payload,
            self.proto_version,
            self.proto_type,
            tag,
        )
        .await?;
        self.tag += 1;
        Ok(())
    }

    /// Reads one packet and probes its `MessageType` without decoding the
    /// full typed body yet.
    pub async fn recv(&mut self) -> Result<ResponseEnvelope> {
        let (header, payload) = packet::read_packet(&mut self.socket).await?;
        let probe: MessageTypeProbe = plist::from_bytes(&payload)
            .map_err(|e| MuxError::Decode(format!("malformed MessageType: {e}")))?;
        debug!(message_type = %probe.message_type, tag = header.tag, "received usbmuxd packet");
        Ok(ResponseEnvelope {
            header,
            message_type: probe.message_type,
            payload,
        })
    }

    /// Surrenders the underlying socket. The channel must not be used again.
    pub fn detach_socket(self) -> Box<dyn ReadWrite> {
        self.socket
    }
}
