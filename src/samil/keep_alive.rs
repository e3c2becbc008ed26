use crate::prelude::*;

use {
    async_trait::async_trait,
    std::net::SocketAddr,
    tokio::sync::oneshot,
    tokio::task::JoinHandle,
};

struct Runner {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Inverter>,
}

/// An [`Inverter`] that sends a status request whenever the connection has
/// been idle for `keep_alive` (inverters drop idle connections).
///
/// While idle, the inverter is moved into a background task which owns it
/// outright. Every foreground operation first stops that task and takes the
/// inverter back, so keep-alive and foreground exchanges can never interleave
/// on the wire. The task only looks at the stop signal between exchanges; a
/// keep-alive exchange already in flight is allowed to finish.
pub struct KeepAliveInverter {
    inverter: Option<Inverter>,
    runner: Option<Runner>,
    period: Duration,
    addr: SocketAddr,
    status_format: Option<StatusFormat>,
}

impl KeepAliveInverter {
    /// Must be called from within a tokio runtime.
    pub fn new(inverter: Inverter, period: Duration) -> Self {
        let mut r = Self {
            addr: inverter.addr(),
            inverter: Some(inverter),
            runner: None,
            period,
            status_format: None,
        };
        r.start_keep_alive();
        r
    }

    pub fn from_config(inverter: Inverter, config: &config::Inverter) -> Self {
        Self::new(inverter, config.keep_alive())
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_keep_alive_running(&self) -> bool {
        self.runner.is_some()
    }

    fn start_keep_alive(&mut self) {
        if self.runner.is_some() {
            return;
        }
        let inverter = match self.inverter.take() {
            Some(inverter) => inverter,
            None => return,
        };

        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(keep_alive_runner(inverter, self.period, stop_rx));
        self.runner = Some(Runner { stop, handle });
    }

    /// Stops the background task and hands back the inverter. Waits for a
    /// keep-alive exchange that is currently in progress.
    async fn stop_keep_alive(&mut self) -> Result<&mut Inverter> {
        if let Some(runner) = self.runner.take() {
            let _ = runner.stop.send(());
            self.inverter = Some(runner.handle.await?);
        }

        self.inverter.as_mut().ok_or(Error::Disconnected)
    }
}

async fn keep_alive_runner(
    mut inverter: Inverter,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) -> Inverter {
    loop {
        tokio::select! {
            biased;
            // a dropped sender means the wrapper itself went away
            _ = &mut stop => break,
            _ = tokio::time::sleep(period) => {}
        }

        if let Err(e) = inverter.keep_alive().await {
            warn!("inverter {}: keep-alive failed: {}", inverter.addr(), e);
            break;
        }
    }

    inverter
}

#[async_trait]
impl InverterSession for KeepAliveInverter {
    async fn send(&mut self, identifier: Identifier, payload: &[u8]) -> Result<()> {
        self.stop_keep_alive().await?.send(identifier, payload).await?;
        self.start_keep_alive();
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message> {
        let message = self.stop_keep_alive().await?.receive().await?;
        self.start_keep_alive();
        Ok(message)
    }

    /// Holds the keep-alive off for the whole exchange rather than per
    /// send/receive, so a slow response can't race a keep-alive request.
    async fn request(
        &mut self,
        identifier: Identifier,
        payload: &[u8],
        expected_response: &[u8],
    ) -> Result<Message> {
        let response = self
            .stop_keep_alive()
            .await?
            .request(identifier, payload, expected_response)
            .await?;
        self.start_keep_alive();
        Ok(response)
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self.stop_keep_alive().await {
            Ok(inverter) => inverter.disconnect().await,
            Err(Error::Disconnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn status_format_cache(&mut self) -> &mut Option<StatusFormat> {
        &mut self.status_format
    }
}
