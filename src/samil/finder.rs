use crate::prelude::*;
use crate::samil::message::{self, DISCOVERY, DISCOVERY_PAYLOAD};

use {
    net2::TcpStreamExt,
    std::io,
    std::net::SocketAddr,
    tokio::net::{TcpListener, TcpStream, UdpSocket},
};

const LISTEN_BACKLOG: i32 = 128;

/// Pairs with inverters on the local network.
///
/// Inverters never listen themselves. They dial out to port 1200 of whoever
/// broadcasts an "I AM SERVER" advertisement, so finding one means
/// advertising and then waiting for the connection to come in.
pub struct InverterFinder {
    config: config::Finder,
    listener: Option<TcpListener>,
}

impl InverterFinder {
    pub fn new(config: config::Finder) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    /// Binds the listening socket. Fails with `Error::PortInUse` when a
    /// previous listener still holds the port.
    pub fn open(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Err(Error::FinderState("is already open"));
        }

        let port = self.config.listen_port();
        let addr = SocketAddr::new(self.config.interface(), port);
        let listener = bind_listener(addr).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => Error::PortInUse { port, source: e },
            _ => Error::Io(e),
        })?;

        info!("listening for inverters on {}", addr);
        self.listener = Some(listener);
        Ok(())
    }

    /// [`open`](Self::open), retrying up to `retries` times while the port is
    /// in use. Any other failure is returned straight away.
    pub async fn open_with_retries(&mut self, retries: u32, period: Duration) -> Result<()> {
        let mut tries = 0;

        loop {
            match self.open() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_port_in_use() => {
                    tries += 1;
                    if tries >= retries {
                        return Err(e);
                    }
                    info!(
                        "listening port {} already in use, retrying in {:?}",
                        self.config.listen_port(),
                        period
                    );
                    tokio::time::sleep(period).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(Error::FinderState("is not open")),
        }
    }

    pub fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            if let Ok(addr) = listener.local_addr() {
                info!("closing inverter listener on {}", addr);
            }
        }
    }

    /// Advertises with the configured number of rounds and interval.
    pub async fn find_inverter(&mut self) -> Result<(TcpStream, SocketAddr)> {
        self.find_inverter_with(self.config.advertisements(), self.config.interval())
            .await
    }

    /// Sends up to `advertisements` broadcasts, waiting `interval` after each
    /// for an inverter to connect. Returns the first connection accepted.
    pub async fn find_inverter_with(
        &mut self,
        advertisements: u32,
        interval: Duration,
    ) -> Result<(TcpStream, SocketAddr)> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(Error::FinderState("is not open"))?;

        let advertisement = message::build(DISCOVERY, DISCOVERY_PAYLOAD);
        let target = SocketAddr::new(self.config.broadcast_address(), self.config.discovery_port());

        let broadcast = UdpSocket::bind(SocketAddr::new(self.config.interface(), 0)).await?;
        broadcast.set_broadcast(true)?;

        for round in 1..=advertisements {
            debug!(
                "sending server broadcast {}/{} to {}",
                round, advertisements, target
            );
            if let Err(e) = broadcast.send_to(&advertisement, target).await {
                error!("failed to send advertisement to {}: {}", target, e);
                return Err(e.into());
            }

            match tokio::time::timeout(interval, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    info!("connected with inverter on address {}", addr);
                    let stream = self.configure_stream(stream)?;

                    let delay = self.config.pairing_delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    return Ok((stream, addr));
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => continue,
            }
        }

        Err(Error::InverterNotFound { advertisements })
    }

    fn configure_stream(&self, stream: TcpStream) -> Result<TcpStream> {
        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(self.config.tcp_keepalive())) {
            warn!("Failed to set TCP keepalive: {}", e);
        }

        let stream = TcpStream::from_std(std_stream)?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(stream)
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let builder = match addr {
        SocketAddr::V4(_) => net2::TcpBuilder::new_v4()?,
        SocketAddr::V6(_) => net2::TcpBuilder::new_v6()?,
    };

    // lets us rebind while a previous connection lingers in TIME_WAIT;
    // on Windows this would allow stealing a port that is actively bound
    #[cfg(not(windows))]
    builder.reuse_address(true)?;

    let listener = builder.bind(addr)?.listen(LISTEN_BACKLOG)?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}
