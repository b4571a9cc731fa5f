//! The 16-byte packet header and the streaming read/write loop around it (C2).

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{MuxError, Result};
use crate::ReadWrite;

pub const HEADER_LEN: usize = 16;

pub const PLIST_PROTO_VERSION: u32 = 1;
pub const PLIST_PROTO_TYPE: u32 = 8;

/// The header fields of one wire packet, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub proto_version: u32,
    pub proto_type: u32,
    pub tag: u32,
}

/// Serializes `payload` behind a 16-byte header addressed to `tag`.
pub fn pack(payload: &[u8], proto_version: u32, proto_type: u32, tag: u32) -> Vec<u8> {
    let total_length = HEADER_LEN as u32 + payload.len() as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&total_length.to_le_bytes());
    out.extend_from_slice(&proto_version.to_le_bytes());
    out.extend_from_slice(&proto_type.to_le_bytes());
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Splits the 12 header bytes that follow `total_length` from the payload,
/// validating that exactly as many bytes were supplied as the header
/// promised before touching any of them.
///
/// `body` must be everything after the first 4 (`total_length`) bytes of the
/// wire packet, i.e. exactly `total_length - 4` bytes.
pub fn unpack(body: &[u8]) -> Result<(Header, &[u8])> {
    if body.len() < HEADER_LEN - 4 {
        return Err(MuxError::Decode(format!(
            "short packet: expected at least {} header bytes, got {}",
            HEADER_LEN - 4,
            body.len()
        )));
    }
    let proto_version = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let proto_type = u32::from_le_bytes(body[4..8].try_into().unwrap());
    let tag = u32::from_le_bytes(body[8..12].try_into().unwrap());
    let payload = &body[12..];
    Ok((
        Header {
            proto_version,
            proto_type,
            tag,
        },
        payload,
    ))
}

/// Writes `buf` in full, looping over partial writes and treating any I/O
/// failure on the already-open socket — a zero-byte write with no error, or
/// any OS error (e.g. ECONNRESET/EPIPE from a device unplugged mid-write) —
/// as a broken connection. `transport` is reserved for the initial dial in
/// [`UsbmuxdAddr::connect`]; once a channel is open, every failure here is
/// `broken`.
///
/// [`UsbmuxdAddr::connect`]: crate::usbmuxd::UsbmuxdAddr::connect
pub async fn send_exact(socket: &mut Box<dyn ReadWrite>, buf: &[u8]) -> Result<()> {
    match socket.write_all(buf).await {
        Ok(()) => Ok(()),
        Err(_) => Err(MuxError::Broken),
    }
}

/// Reads exactly `len` bytes, looping over partial reads and treating any
/// I/O failure on the already-open socket — a zero-byte read with no error
/// (premature EOF), or any OS error (e.g. ECONNRESET from a device unplugged
/// mid-read) — as a broken connection. See [`send_exact`] for why this never
/// surfaces `transport`.
pub async fn recv_exact(socket: &mut Box<dyn ReadWrite>, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = match socket.read(&mut buf[filled..]).await {
            Ok(n) => n,
            Err(_) => return Err(MuxError::Broken),
        };
        if n == 0 {
            return Err(MuxError::Broken);
        }
        filled += n;
    }
    Ok(buf)
}

/// Reads one full wire packet: the 4-byte length prefix, then the rest.
/// Returns the decoded header plus the raw payload bytes.
pub async fn read_packet(socket: &mut Box<dyn ReadWrite>) -> Result<(Header, Vec<u8>)> {
    let len_bytes = recv_exact(socket, 4).await?;
    let total_length = u32::from_le_bytes(len_bytes.try_into().unwrap());
    if (total_length as usize) < HEADER_LEN {
        return Err(MuxError::Decode(format!(
            "declared packet length {total_length} is shorter than the header itself"
        )));
    }
    let rest = recv_exact(socket, total_length as usize - 4).await?;
    let (header, payload) = unpack(&rest)?;
    Ok((header, payload.to_vec()))
}

/// Writes one full wire packet for `payload` addressed to `tag`.
pub async fn write_packet(
    socket: &mut Box<dyn ReadWrite>,
    payload: &[u8],
    proto_version: u32,
    proto_type: u32,
    tag: u32,
) -> Result<()> {
    let wire = pack(payload, proto_version, proto_type, tag);
    send_exact(socket, &wire).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_length_prefix_matches_invariant_2() {
        let payload = b"hello world";
        let wire = pack(payload, 1, 8, 1);
        let len = u32::from_le_bytes(wire[0..4].try_into().unwrap());
        assert_eq!(len as usize, payload.len() + HEADER_LEN);
    }

    #[test]
    fn pack_matches_scenario_s2_prefix_shape() {
        let payload = vec![0u8; 37];
        let wire = pack(&payload, PLIST_PROTO_VERSION, PLIST_PROTO_TYPE, 1);
        assert_eq!(&wire[0..4], &(37u32 + 16).to_le_bytes());
        assert_eq!(&wire[4..8], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&wire[8..12], &[0x08, 0x00, 0x00, 0x00]);
        assert_eq!(&wire[12..16], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&wire[16..], payload.as_slice());
    }

    #[test]
    fn unpack_inverts_pack_for_invariant_7() {
        let payload = b"some plist bytes";
        let wire = pack(payload, 1, 8, 42);
        let (header, decoded_payload) = unpack(&wire[4..]).unwrap();
        assert_eq!(header.proto_version, 1);
        assert_eq!(header.proto_type, 8);
        assert_eq!(header.tag, 42);
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn unpack_rejects_short_body_before_reading_fields() {
        let err = unpack(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, MuxError::Decode(_)));
    }

    #[tokio::test]
    async fn read_packet_round_trips_over_a_duplex_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let payload = b"{example plist bytes}".to_vec();
        let wire = pack(&payload, PLIST_PROTO_VERSION, PLIST_PROTO_TYPE, 3);

        let write_task = tokio::spawn(async move {
            client.write_all(&wire).await.unwrap();
        });

        let mut boxed: Box<dyn ReadWrite> = Box::new(server);
        let (header, got_payload) = read_packet(&mut boxed).await.unwrap();
        write_task.await.unwrap();

        assert_eq!(header.tag, 3);
        assert_eq!(got_payload, payload);
    }

    #[tokio::test]
    async fn read_packet_on_clean_close_yields_broken() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut boxed: Box<dyn ReadWrite> = Box::new(server);
        let err = read_packet(&mut boxed).await.unwrap_err();
        assert!(matches!(err, MuxError::Broken));
    }
}
