use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while talking to an inverter.
///
/// Framing and transport errors are fatal for the session that produced them;
/// the caller decides whether to rediscover and reconnect. `PortInUse` is the
/// only condition the finder retries by itself.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("checksum mismatch: expected {expected:02x?}, got {actual:02x?}")]
    ChecksumMismatch { expected: [u8; 2], actual: [u8; 2] },

    #[error("connection closed by inverter")]
    EndOfStream,

    #[error("no inverter found after {advertisements} advertisements")]
    InverterNotFound { advertisements: u32 },

    #[error("listening port {port} already in use")]
    PortInUse {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("status payload is {payload_len} bytes but format has {format_len} type IDs")]
    DecodeInconsistency { format_len: usize, payload_len: usize },

    #[error("unknown {kind} value {value:?}")]
    UnknownEnumValue { kind: &'static str, value: String },

    #[error("inverter connection already disconnected")]
    Disconnected,

    #[error("no message received within {0:?}")]
    Timeout(Duration),

    #[error("finder {0}")]
    FinderState(&'static str),

    #[error("keep-alive task failed: {0}")]
    KeepAliveTask(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True when discovery ran out of advertisements, as opposed to a
    /// connection that was established and then lost.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::InverterNotFound { .. })
    }

    pub fn is_port_in_use(&self) -> bool {
        matches!(self, Error::PortInUse { .. })
    }
}
