//! Tunnel factory (C5): turns a `(device_id, port)` pair into a live socket
//! to the service listening on the device.

use crate::error::{MuxError, Result};
use crate::usbmuxd::channel::ControlChannel;
use crate::usbmuxd::frame::{self, MessageType};
use crate::usbmuxd::{packet, UsbmuxdAddr};
use crate::Socket;

/// Opens a fresh control channel, issues a `Connect` request for
/// `device_id`/`port`, and on success hands back the raw socket with the
/// usbmuxd framing stripped away: everything after the handshake is the
/// device service's own protocol.
pub async fn open_tunnel(addr: &UsbmuxdAddr, device_id: u32, port: u16) -> Result<Socket> {
    let req = frame::connect_request(device_id, port);
    let mut channel = ControlChannel::open(
        addr,
        &req,
        packet::PLIST_PROTO_VERSION,
        packet::PLIST_PROTO_TYPE,
    )
    .await?;
    channel.send().await?;
    let resp = channel.recv().await?;

    if resp.message_type != MessageType::Result.as_str() {
        return Err(MuxError::Protocol(format!(
            "message type mismatch: expected 'Result', got '{}'",
            resp.message_type
        )));
    }

    let result: frame::ResultFrame = plist::from_bytes(&resp.payload)?;
    let code = result.code();
    if !code.is_ok() {
        return Err(MuxError::Protocol(format!("connect: {code}")));
    }

    Ok(channel.detach_socket())
}
