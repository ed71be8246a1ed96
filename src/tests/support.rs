//! Helpers shared by the async tests: polling for a condition and a tiny
//! scripted MQTT 3.1.1 broker that speaks just enough of the protocol for the
//! ingress adapter (CONNECT/CONNACK, SUBSCRIBE/SUBACK, PUBLISH at QoS 0).

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const TOPIC: &str = "gps/data";

/// Polls `condition` every few milliseconds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Reads one packet: fixed header byte and body.
pub async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let header = stream.read_u8().await.unwrap();
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.unwrap();
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    (header, body)
}

/// Accepts one client, checks it sends CONNECT and accepts it.
pub async fn accept_connect(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let (header, _) = read_packet(&mut stream).await;
    assert_eq!(header, 0x10, "expected CONNECT");
    stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
    stream
}

/// Skips packets until a SUBSCRIBE for [`TOPIC`] arrives; returns its packet id.
pub async fn expect_subscribe(stream: &mut TcpStream) -> [u8; 2] {
    loop {
        let (header, body) = read_packet(stream).await;
        if header == 0x82 {
            let filter_len = u16::from_be_bytes([body[2], body[3]]) as usize;
            assert_eq!(&body[4..4 + filter_len], TOPIC.as_bytes());
            return [body[0], body[1]];
        }
    }
}

/// `code` 0x00 grants QoS 0, 0x80 rejects.
pub async fn send_suback(stream: &mut TcpStream, pkid: [u8; 2], code: u8) {
    stream
        .write_all(&[0x90, 0x03, pkid[0], pkid[1], code])
        .await
        .unwrap();
}

pub async fn send_publish(stream: &mut TcpStream, payload: &[u8]) {
    let remaining = 2 + TOPIC.len() + payload.len();
    assert!(remaining < 128, "keep test payloads short");
    let mut packet = vec![0x30, remaining as u8, 0x00, TOPIC.len() as u8];
    packet.extend_from_slice(TOPIC.as_bytes());
    packet.extend_from_slice(payload);
    stream.write_all(&packet).await.unwrap();
}

/// Accepts a connection and completes the subscription handshake.
pub async fn accept_subscriber(listener: &TcpListener) -> TcpStream {
    let mut stream = accept_connect(listener).await;
    let pkid = expect_subscribe(&mut stream).await;
    send_suback(&mut stream, pkid, 0x00).await;
    stream
}
