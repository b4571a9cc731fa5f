//! Request/response frame shapes and the property-list codec (C1).
//!
//! Requests are built as plain [`plist::Dictionary`] values and serialized to
//! XML; responses may come back as XML or binary plist, both of which
//! `plist::from_bytes` accepts transparently.

use serde::Deserialize;

/// The program identity embedded in every request for log correlation on
/// the daemon side. The exact strings are opaque to usbmuxd.
const PROG_NAME: &str = "muxhttp";
const CLIENT_VERSION: &str = concat!("muxhttp_", env!("CARGO_PKG_VERSION"));

/// Message types as transmitted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Result,
    Connect,
    Listen,
    Attached,
    Detached,
    ReadBuid,
    ListDevices,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Result => "Result",
            MessageType::Connect => "Connect",
            MessageType::Listen => "Listen",
            MessageType::Attached => "Attached",
            MessageType::Detached => "Detached",
            MessageType::ReadBuid => "ReadBUID",
            MessageType::ListDevices => "ListDevices",
        }
    }
}

/// `USB` or `Network`, as reported in a device's `Properties` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "USB")]
    Usb,
    #[serde(rename = "Network")]
    Network,
}

/// A reply code from a `Result` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyCode(pub u64);

impl ReplyCode {
    pub const OK: ReplyCode = ReplyCode(0);
    pub const BAD_COMMAND: ReplyCode = ReplyCode(1);
    pub const BAD_DEVICE: ReplyCode = ReplyCode(2);
    pub const CONNECTION_REFUSED: ReplyCode = ReplyCode(3);
    pub const BAD_VERSION: ReplyCode = ReplyCode(6);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    pub fn describe(self) -> String {
        match self.0 {
            0 => "ok".to_string(),
            1 => "bad command".to_string(),
            2 => "bad device".to_string(),
            3 => "connection refused".to_string(),
            6 => "bad version".to_string(),
            n => format!("unknown reply code: {n}"),
        }
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Builds the common fields shared by every request frame.
fn base_request(message_type: MessageType) -> plist::Dictionary {
    let mut req = plist::Dictionary::new();
    req.insert("MessageType".into(), message_type.as_str().into());
    req.insert("ClientVersionString".into(), CLIENT_VERSION.into());
    req.insert("ProgName".into(), PROG_NAME.into());
    req
}

/// Builds a `ListDevices` request frame.
pub fn list_devices_request() -> plist::Dictionary {
    base_request(MessageType::ListDevices)
}

/// Builds a `Listen` request frame.
pub fn listen_request() -> plist::Dictionary {
    base_request(MessageType::Listen)
}

/// Builds a `ReadBUID` request frame.
pub fn read_buid_request() -> plist::Dictionary {
    base_request(MessageType::ReadBuid)
}

/// Builds a `Connect` request frame, byte-swapping `port` into the field
/// layout usbmuxd expects (see module docs on [`swap_port`]).
pub fn connect_request(device_id: u32, port: u16) -> plist::Dictionary {
    let mut req = base_request(MessageType::Connect);
    req.insert("DeviceID".into(), (device_id as i64).into());
    req.insert("PortNumber".into(), (swap_port(port) as i64).into());
    req
}

/// Writes a 16-bit port big-endian into a field the daemon reads as
/// little-endian, producing the network-order effect usbmuxd expects.
///
/// This transform is its own near-inverse on byte order but is only ever
/// applied in the encode direction: usbmuxd never echoes `PortNumber` back
/// to us, so there is no decode side to this function.
pub fn swap_port(port: u16) -> u16 {
    ((port << 8) & 0xFF00) | (port >> 8)
}

/// A decoded `Result` response frame.
#[derive(Debug, Deserialize)]
pub struct ResultFrame {
    #[serde(rename = "Number")]
    pub reply_code: u64,
}

impl ResultFrame {
    pub fn code(&self) -> ReplyCode {
        ReplyCode(self.reply_code)
    }
}

/// The `Properties` dictionary carried by `Attached`/`Detached` events and by
/// each entry of a `ListDevices` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProperties {
    #[serde(rename = "ConnectionSpeed")]
    pub connection_speed: Option<u64>,
    #[serde(rename = "ConnectionType")]
    pub connection_type: ConnectionType,
    #[serde(rename = "DeviceID")]
    pub device_id: u32,
    #[serde(rename = "LocationID")]
    pub location_id: Option<u64>,
    #[serde(rename = "ProductID")]
    pub product_id: Option<u64>,
    #[serde(rename = "SerialNumber")]
    pub serial_number: String,
}

/// A decoded `Attached`/`Detached` device event.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEventFrame {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "DeviceID")]
    pub device_id: u32,
    #[serde(rename = "Properties")]
    pub properties: Option<DeviceProperties>,
}

/// A decoded `ListDevices` reply.
#[derive(Debug, Deserialize)]
pub struct ListDevicesFrame {
    #[serde(rename = "DeviceList")]
    pub device_list: Vec<DeviceEventFrame>,
}

/// Just enough of a response to dispatch on `MessageType` without decoding
/// the full typed body.
#[derive(Debug, Deserialize)]
pub struct MessageTypeProbe {
    #[serde(rename = "MessageType")]
    pub message_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_swap_matches_scenario_s1() {
        // 8100 = 0x1FA4, swapped -> 0xA41F = 41999
        assert_eq!(swap_port(8100), 0xA41F);
        assert_eq!(swap_port(8100), 41999);
    }

    #[test]
    fn port_swap_is_its_own_formula_for_every_port() {
        for port in 0..=u16::MAX {
            let got = swap_port(port);
            let want = ((port & 0xFF) << 8) | ((port >> 8) & 0xFF);
            assert_eq!(got, want, "port {port}");
        }
    }

    #[test]
    fn reply_code_strings_match_scenario_s3() {
        assert_eq!(ReplyCode(0).describe(), "ok");
        assert_eq!(ReplyCode(1).describe(), "bad command");
        assert_eq!(ReplyCode(2).describe(), "bad device");
        assert_eq!(ReplyCode(3).describe(), "connection refused");
        assert_eq!(ReplyCode(6).describe(), "bad version");
        assert_eq!(ReplyCode(42).describe(), "unknown reply code: 42");
    }

    #[test]
    fn connect_request_embeds_swapped_port_and_device_id() {
        let req = connect_request(7, 8100);
        assert_eq!(req.get("DeviceID").and_then(|v| v.as_signed_integer()), Some(7));
        assert_eq!(
            req.get("PortNumber").and_then(|v| v.as_signed_integer()),
            Some(0xA41F)
        );
        assert_eq!(
            req.get("MessageType").and_then(|v| v.as_string()),
            Some("Connect")
        );
    }

    #[test]
    fn default_request_fields_are_present_on_every_shape() {
        for req in [list_devices_request(), listen_request(), read_buid_request()] {
            assert!(req.get("MessageType").and_then(|v| v.as_string()).is_some());
            assert!(req
                .get("ClientVersionString")
                .and_then(|v| v.as_string())
                .is_some());
            assert!(req.get("ProgName").and_then(|v| v.as_string()).is_some());
        }
    }

    #[test]
    fn round_trips_through_xml_plist() {
        for req in [
            list_devices_request(),
            listen_request(),
            read_buid_request(),
            connect_request(7, 8100),
        ] {
            let mut buf = Vec::new();
            plist::to_writer_xml(&mut buf, &req).unwrap();
            let decoded: plist::Dictionary = plist::from_bytes(&buf).unwrap();
            assert_eq!(decoded, req);
        }
    }
}
