//! End-to-end coverage for `open_tunnel` against a fake usbmuxd daemon
//! speaking real TCP, exercising the full connect -> send -> recv -> decode
//! path for both the success and error replies described in §4.5.

use muxhttp::usbmuxd::UsbmuxdAddr;
use muxhttp::{tunnel, MuxError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn read_exact_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

async fn read_request_port(stream: &mut TcpStream) -> u16 {
    let len_bytes = read_exact_n(stream, 4).await;
    let total_length = u32::from_le_bytes(len_bytes.try_into().unwrap());
    let rest = read_exact_n(stream, total_length as usize - 4).await;
    let payload = &rest[12..];
    let req: plist::Dictionary = plist::from_bytes(payload).unwrap();
    req.get("PortNumber").unwrap().as_signed_integer().unwrap() as u16
}

async fn reply(stream: &mut TcpStream, body: &plist::Dictionary) {
    let mut payload = Vec::new();
    plist::to_writer_xml(&mut payload, body).unwrap();
    let wire = muxhttp::usbmuxd::packet::pack(
        &payload,
        muxhttp::usbmuxd::packet::PLIST_PROTO_VERSION,
        muxhttp::usbmuxd::packet::PLIST_PROTO_TYPE,
        1,
    );
    stream.write_all(&wire).await.unwrap();
}

fn result_reply(code: u64) -> plist::Dictionary {
    let mut resp = plist::Dictionary::new();
    resp.insert("MessageType".into(), "Result".into());
    resp.insert("Number".into(), (code as i64).into());
    resp
}

#[tokio::test]
async fn successful_connect_yields_a_live_socket_matching_scenario_s1() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = UsbmuxdAddr::TcpSocket(listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let port = read_request_port(&mut stream).await;
        reply(&mut stream, &result_reply(0)).await;
        port
    });

    let socket = tunnel::open_tunnel(&addr, 7, 8100).await.unwrap();
    drop(socket);

    let port = server.await.unwrap();
    assert_eq!(port, 0xA41F);
}

#[tokio::test]
async fn connection_refused_reply_code_matches_invariant_10() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = UsbmuxdAddr::TcpSocket(listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request_port(&mut stream).await;
        reply(&mut stream, &result_reply(3)).await;
    });

    let err = tunnel::open_tunnel(&addr, 7, 8100).await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, MuxError::Protocol(_)));
    assert_eq!(err.to_string(), "connect: connection refused");
}

#[tokio::test]
async fn unexpected_message_type_matches_invariant_9() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = UsbmuxdAddr::TcpSocket(listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request_port(&mut stream).await;
        let mut attached = plist::Dictionary::new();
        attached.insert("MessageType".into(), "Attached".into());
        attached.insert("DeviceID".into(), 7i64.into());
        reply(&mut stream, &attached).await;
    });

    let err = tunnel::open_tunnel(&addr, 7, 8100).await.unwrap_err();
    server.await.unwrap();

    let msg = err.to_string();
    assert!(msg.contains("Result"), "message was: {msg}");
    assert!(msg.contains("Attached"), "message was: {msg}");
}
