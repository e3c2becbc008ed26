use crate::prelude::*;
use crate::samil::message::{
    MODEL_INFO, MODEL_INFO_RESPONSE, STATUS, STATUS_FORMAT, STATUS_FORMAT_RESPONSE,
    STATUS_RESPONSE,
};
use crate::samil::message_decoder::MessageDecoder;
use crate::samil::model::ModelInfo;
use crate::samil::status::decode_status;

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::{SinkExt, StreamExt},
    std::io,
    std::net::{Shutdown, SocketAddr},
    tokio::net::TcpStream,
    tokio_util::codec::Framed,
};

const WRITE_TIMEOUT_SECS: u64 = 5; // Timeout for write operations

// InverterSession {{{
/// Request/response operations shared by a plain [`Inverter`] and a
/// [`KeepAliveInverter`].
///
/// Implementors provide raw `send`/`receive`; everything else is built on
/// top. None of this is safe to call from two tasks at once, the transport is
/// a single ordered byte stream.
#[async_trait]
pub trait InverterSession: Send {
    /// Frames and writes one message.
    async fn send(&mut self, identifier: Identifier, payload: &[u8]) -> Result<()>;

    /// Reads the next complete message. `Error::EndOfStream` once the inverter
    /// has closed the connection.
    async fn receive(&mut self) -> Result<Message>;

    /// Shuts the connection down. Calling it again is a no-op.
    async fn disconnect(&mut self) -> Result<()>;

    fn addr(&self) -> SocketAddr;

    fn status_format_cache(&mut self) -> &mut Option<StatusFormat>;

    /// Sends a message and returns the first response whose identifier starts
    /// with `expected_response`. Anything else the inverter sends in between
    /// is logged and dropped.
    async fn request(
        &mut self,
        identifier: Identifier,
        payload: &[u8],
        expected_response: &[u8],
    ) -> Result<Message> {
        self.send(identifier, payload).await?;

        loop {
            let response = self.receive().await?;
            if response.is_response_to(expected_response) {
                return Ok(response);
            }
            warn!(
                "inverter {}: got unexpected response {:02x?} for request {:02x?}",
                self.addr(),
                response.identifier,
                identifier
            );
        }
    }

    async fn model(&mut self) -> Result<ModelInfo> {
        let response = self.request(MODEL_INFO, &[], MODEL_INFO_RESPONSE).await?;
        ModelInfo::decode(&response.payload)
    }

    async fn status_format(&mut self) -> Result<StatusFormat> {
        let response = self
            .request(STATUS_FORMAT, &[], STATUS_FORMAT_RESPONSE)
            .await?;
        Ok(StatusFormat::new(response.payload))
    }

    /// Current telemetry. The status format is fetched on first use and kept
    /// for the lifetime of the connection.
    async fn status(&mut self) -> Result<Status> {
        let format = match self.status_format_cache().clone() {
            Some(format) => format,
            None => {
                let format = self.status_format().await?;
                debug!("inverter {}: status format {:02x?}", self.addr(), format.as_bytes());
                *self.status_format_cache() = Some(format.clone());
                format
            }
        };

        let response = self.request(STATUS, &[], STATUS_RESPONSE).await?;
        decode_status(&format, &response.payload)
    }
} // }}}

/// One TCP connection to a paired inverter.
pub struct Inverter {
    framed: Option<Framed<TcpStream, MessageDecoder>>,
    addr: SocketAddr,
    read_timeout: Duration,
    status_format: Option<StatusFormat>,
}

impl Inverter {
    pub fn new(stream: TcpStream, addr: SocketAddr, config: &config::Inverter) -> Self {
        Self {
            framed: Some(Framed::new(stream, MessageDecoder::new())),
            addr,
            read_timeout: config.read_timeout(),
            status_format: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    /// One status request whose response is thrown away, to stop the
    /// inverter from dropping an idle connection.
    pub async fn keep_alive(&mut self) -> Result<()> {
        debug!("inverter {}: sending keep-alive", self.addr);
        self.request(STATUS, &[], STATUS_RESPONSE).await?;
        Ok(())
    }

    fn framed(&mut self) -> Result<&mut Framed<TcpStream, MessageDecoder>> {
        self.framed.as_mut().ok_or(Error::Disconnected)
    }
}

#[async_trait]
impl InverterSession for Inverter {
    async fn send(&mut self, identifier: Identifier, payload: &[u8]) -> Result<()> {
        let addr = self.addr;
        debug!("inverter {}: TX {:02x?} {:02x?}", addr, identifier, payload);
        let message = Message::new(identifier, Bytes::copy_from_slice(payload));

        let framed = self.framed()?;
        match tokio::time::timeout(
            Duration::from_secs(WRITE_TIMEOUT_SECS),
            framed.send(message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(Duration::from_secs(WRITE_TIMEOUT_SECS))),
        }
    }

    async fn receive(&mut self) -> Result<Message> {
        let addr = self.addr;
        let read_timeout = self.read_timeout;
        let framed = self.framed()?;

        let message = match tokio::time::timeout(read_timeout, framed.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                // the stream can't be resynchronised, so the session is over
                warn!("inverter {}: dropping connection after receive error: {}", addr, e);
                self.framed = None;
                return Err(e);
            }
            Ok(None) => return Err(Error::EndOfStream),
            Err(_) => return Err(Error::Timeout(read_timeout)),
        };

        debug!(
            "inverter {}: RX {:02x?} {:02x?}",
            addr,
            message.identifier,
            &message.payload[..]
        );
        Ok(message)
    }

    async fn disconnect(&mut self) -> Result<()> {
        let framed = match self.framed.take() {
            Some(framed) => framed,
            None => return Ok(()),
        };

        info!("inverter {}: disconnecting", self.addr);

        // both directions, so the inverter sees the close and can dial in again
        let stream = framed.into_inner().into_std()?;
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            match e.kind() {
                io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset => {
                    debug!("inverter {}: shutdown on closed socket: {}", self.addr, e)
                }
                _ => return Err(e.into()),
            }
        }

        Ok(())
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn status_format_cache(&mut self) -> &mut Option<StatusFormat> {
        &mut self.status_format
    }
}
