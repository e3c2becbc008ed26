use crate::prelude::*;
use crate::samil::message::{
    checksum, Identifier, Message, CHECKSUM_SIZE, HEADER_SIZE, MAGIC, MAX_PAYLOAD_SIZE,
};

use bytes::{Buf, BufMut, BytesMut};
use nom::{
    bytes::streaming::{tag, take},
    number::streaming::be_u16,
    sequence::{preceded, tuple},
    IResult,
};
use tokio_util::codec::{Decoder, Encoder};

/// Frames inverter messages on a byte stream.
///
/// TCP hands us data in arbitrary chunks, sometimes half a message and
/// sometimes two at once. The decoder only ever consumes one complete frame
/// from the buffer; anything after it stays put for the next call.
///
/// Any decode error ends the stream. There is no resynchronisation, the
/// session owning the connection drops it.
#[derive(Debug, Default)]
pub struct MessageDecoder;

impl MessageDecoder {
    pub fn new() -> Self {
        Self
    }
}

fn header(input: &[u8]) -> IResult<&[u8], (&[u8], u16)> {
    preceded(tag(&MAGIC[..]), tuple((take(3usize), be_u16)))(input)
}

impl Decoder for MessageDecoder {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        let (identifier, payload_len) = match header(src) {
            Ok((_, (raw_identifier, len))) => {
                let mut identifier: Identifier = [0; 3];
                identifier.copy_from_slice(raw_identifier);
                (identifier, len as usize)
            }
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(_) => {
                let e = Error::MalformedMessage(format!(
                    "invalid start of message {:02x?}",
                    &src[..src.len().min(MAGIC.len())]
                ));
                // nothing left in the buffer can be trusted
                src.clear();
                return Err(e);
            }
        };

        if payload_len > MAX_PAYLOAD_SIZE {
            src.clear();
            return Err(Error::MalformedMessage(format!(
                "unexpected payload size {} for identifier {:02x?}",
                payload_len, identifier
            )));
        }

        let frame_len = HEADER_SIZE + payload_len + CHECKSUM_SIZE;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len).freeze();
        let mut trailer = frame.split_off(frame_len - CHECKSUM_SIZE);
        let actual = [trailer.get_u8(), trailer.get_u8()];
        let expected = checksum(&frame);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        Ok(Some(Message {
            identifier,
            payload: frame.slice(HEADER_SIZE..),
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            // peer went away halfway through a message
            None => Err(Error::EndOfStream),
        }
    }
}

impl Encoder<Message> for MessageDecoder {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > u16::MAX as usize {
            return Err(Error::MalformedMessage(format!(
                "payload of {} bytes does not fit a message",
                item.payload.len()
            )));
        }
        dst.put_slice(&item.to_bytes());
        Ok(())
    }
}
