#![allow(dead_code)]

use samil_bridge::prelude::*;
use samil_bridge::samil::message::{self, checksum, CHECKSUM_SIZE, HEADER_SIZE};

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// "55 aa 01" -> [0x55, 0xaa, 0x01]
pub fn hex(s: &str) -> Vec<u8> {
    s.split_whitespace()
        .map(|b| u8::from_str_radix(b, 16).unwrap())
        .collect()
}

pub struct Factory;
impl Factory {
    pub fn status_format() -> Vec<u8> {
        hex("00 01 02 04 05 09 0a 0c 11 17 18 1b 1c 1d 1e 1f 20 21 22 27 28 31 32 33 34 35 36")
    }

    pub fn status_payload() -> Vec<u8> {
        let mut r = hex("01 77 0b ac 0b e1 00 15 00 14 00 00 28 40 00 01 01 da");
        r.extend_from_slice(&[0; 20]);
        r.extend(hex("02 8c 02 76 00 38 09 1b 13 86 04 fb 00 01 b1 cc"));
        r
    }

    pub fn model_info_payload() -> Vec<u8> {
        fn field(value: &str, len: usize) -> Vec<u8> {
            let mut r = value.as_bytes().to_vec();
            r.resize(len, 0);
            r
        }

        let mut r = Vec::new();
        r.extend(field("1", 1));
        r.extend(field("4500", 6));
        r.extend(field("V1.30", 5));
        r.extend(field("SolarRiver4500TL", 16));
        r.extend(field("SamilPower", 16));
        r.extend(field("S22T4500123", 16));
        r.extend(field("V1.0", 5));
        r.extend(field("V2.1", 5));
        r.extend(field("1", 1));
        r
    }

    pub fn inverter_config() -> config::Inverter {
        config::Inverter {
            read_timeout: Some(2),
            ..Default::default()
        }
    }

    /// Finder settings for loopback tests. Each test passes its own ports so
    /// tests running in parallel don't collide.
    pub fn finder_config(listen_port: u16, discovery_port: u16) -> config::Finder {
        config::Finder {
            interface: Some("127.0.0.1".parse().unwrap()),
            listen_port: Some(listen_port),
            discovery_port: Some(discovery_port),
            broadcast_address: Some("127.0.0.1".parse().unwrap()),
            advertisements: Some(3),
            interval: Some(0.2),
            bind_retries: Some(3),
            bind_retry_delay: Some(0.1),
            pairing_delay: Some(0.0),
            tcp_keepalive: None,
        }
    }
}

/// A connected loopback pair: (our end, the inverter's end, the inverter's
/// address as we see it).
pub async fn tcp_pair() -> (TcpStream, TcpStream, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (server, peer) = listener.accept().await.unwrap();
    (server, client, peer)
}

pub async fn connected_inverter(config: &config::Inverter) -> (Inverter, FakeInverter) {
    let (ours, theirs, addr) = tcp_pair().await;
    (Inverter::new(ours, addr, config), FakeInverter::new(theirs))
}

/// The inverter side of a connection, driven by hand from a test.
pub struct FakeInverter {
    stream: TcpStream,
}

impl FakeInverter {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn read_message(&mut self) -> (Identifier, Vec<u8>) {
        self.next_message()
            .await
            .expect("connection closed while waiting for a message")
    }

    /// Next message from our side, `None` once the connection is closed.
    pub async fn next_message(&mut self) -> Option<(Identifier, Vec<u8>)> {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).await.ok()?;
        assert_eq!(&header[..2], &[0x55, 0xaa]);

        let len = u16::from_be_bytes([header[5], header[6]]) as usize;
        let mut rest = vec![0u8; len + CHECKSUM_SIZE];
        self.stream.read_exact(&mut rest).await.ok()?;

        let mut frame = header.to_vec();
        frame.extend_from_slice(&rest[..len]);
        assert_eq!(checksum(&frame), [rest[len], rest[len + 1]]);

        Some(([header[2], header[3], header[4]], rest[..len].to_vec()))
    }

    /// True when nothing arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        let mut buf = [0u8; 1];
        tokio::time::timeout(wait, self.stream.peek(&mut buf))
            .await
            .is_err()
    }

    pub async fn expect_request(&mut self, identifier: Identifier) {
        let (received, payload) = self.read_message().await;
        assert_eq!(received, identifier);
        assert!(payload.is_empty());
    }

    pub async fn send(&mut self, identifier: Identifier, payload: &[u8]) {
        self.send_raw(&message::build(identifier, payload)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// True once our side has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.stream.read(&mut buf).await, Ok(0) | Err(_))
    }

    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
