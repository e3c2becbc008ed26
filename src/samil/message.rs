use bytes::Bytes;

/// Every message starts with these two bytes.
pub const MAGIC: [u8; 2] = [0x55, 0xAA];

/// magic(2) + identifier(3) + length(2)
pub const HEADER_SIZE: usize = 7;
pub const CHECKSUM_SIZE: usize = 2;

/// Payloads claiming to be larger than this are treated as garbage.
pub const MAX_PAYLOAD_SIZE: usize = 4096;

pub type Identifier = [u8; 3];

// Identifiers {{{
pub const DISCOVERY: Identifier = [0x00, 0x40, 0x02];
pub const DISCOVERY_PAYLOAD: &[u8] = b"I AM SERVER";

pub const MODEL_INFO: Identifier = [0x01, 0x03, 0x02];
pub const MODEL_INFO_RESPONSE: &[u8] = &[0x01, 0x83];

pub const STATUS_FORMAT: Identifier = [0x01, 0x00, 0x02];
pub const STATUS_FORMAT_RESPONSE: &[u8] = &[0x01, 0x80];

pub const STATUS: Identifier = [0x01, 0x02, 0x02];
pub const STATUS_RESPONSE: &[u8] = &[0x01, 0x82];
// }}}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub identifier: Identifier,
    pub payload: Bytes,
}

impl Message {
    pub fn new(identifier: Identifier, payload: impl Into<Bytes>) -> Self {
        Self {
            identifier,
            payload: payload.into(),
        }
    }

    /// Wire form of this message, checksum included.
    pub fn to_bytes(&self) -> Vec<u8> {
        build(self.identifier, &self.payload)
    }

    pub fn is_response_to(&self, prefix: &[u8]) -> bool {
        self.identifier.starts_with(prefix)
    }
}

/// Sum of all bytes modulo 65536, big-endian.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    data.iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
        .to_be_bytes()
}

/// Builds the wire form `55 aa | identifier | length | payload | checksum`.
///
/// Panics if the payload does not fit the 16-bit length field; the encoder
/// rejects such messages before they get here.
pub fn build(identifier: Identifier, payload: &[u8]) -> Vec<u8> {
    assert!(
        payload.len() <= u16::MAX as usize,
        "payload of {} bytes does not fit a message",
        payload.len()
    );

    let mut r = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    r.extend_from_slice(&MAGIC);
    r.extend_from_slice(&identifier);
    r.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    r.extend_from_slice(payload);

    let sum = checksum(&r);
    r.extend_from_slice(&sum);

    r
}
