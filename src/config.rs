use crate::prelude::*;

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub finder: Finder,

    #[serde(default)]
    pub inverter: Inverter,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to append status readings to, one JSON object per line
    pub datalog_file: Option<String>,
}

// Finder {{{
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Finder {
    pub interface: Option<IpAddr>,
    pub listen_port: Option<u16>,
    pub discovery_port: Option<u16>,
    pub broadcast_address: Option<IpAddr>,
    pub advertisements: Option<u32>,
    pub interval: Option<f64>,
    pub bind_retries: Option<u32>,
    pub bind_retry_delay: Option<f64>,
    pub pairing_delay: Option<f64>,
    pub tcp_keepalive: Option<u64>,
}
impl Finder {
    pub fn interface(&self) -> IpAddr {
        self.interface.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port.unwrap_or(1200)
    }

    pub fn discovery_port(&self) -> u16 {
        self.discovery_port.unwrap_or(1300)
    }

    pub fn broadcast_address(&self) -> IpAddr {
        self.broadcast_address
            .unwrap_or(IpAddr::V4(Ipv4Addr::BROADCAST))
    }

    pub fn advertisements(&self) -> u32 {
        self.advertisements.unwrap_or(10)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval.unwrap_or(5.0))
    }

    pub fn bind_retries(&self) -> u32 {
        self.bind_retries.unwrap_or(10)
    }

    pub fn bind_retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.bind_retry_delay.unwrap_or(1.0))
    }

    // inverters need a moment after connecting before they answer requests
    pub fn pairing_delay(&self) -> Duration {
        Duration::from_secs_f64(self.pairing_delay.unwrap_or(1.0))
    }

    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive.unwrap_or(60))
    }
} // }}}

// Inverter {{{
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Inverter {
    pub keep_alive: Option<f64>,
    pub read_timeout: Option<u64>,
    pub count: Option<usize>,
    pub status_interval: Option<f64>,
}
impl Inverter {
    /// Chosen to be just above the usual 10s polling cadence so a busy
    /// connection never sees keep-alive traffic.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs_f64(self.keep_alive.unwrap_or(11.0))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout.unwrap_or(30))
    }

    pub fn count(&self) -> usize {
        self.count.unwrap_or(1)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs_f64(self.status_interval.unwrap_or(10.0))
    }
} // }}}

impl Config {
    pub fn new(file: String) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Finder:");
        info!("    Interface: {}", self.finder.interface());
        info!("    Listen port: {}", self.finder.listen_port());
        info!(
            "    Discovery: {}:{}",
            self.finder.broadcast_address(),
            self.finder.discovery_port()
        );
        info!(
            "    Advertisements: {} every {:?}",
            self.finder.advertisements(),
            self.finder.interval()
        );
        info!("  Inverters: {}", self.inverter.count());
        info!("    Keep-alive: {:?}", self.inverter.keep_alive());
        info!("    Read timeout: {:?}", self.inverter.read_timeout());
        info!("    Status interval: {:?}", self.inverter.status_interval());
        if let Some(file) = &self.datalog_file {
            info!("  Datalog file: {}", file);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.finder.listen_port() == 0 {
            bail!("finder.listen_port must be between 1 and 65535");
        }
        if self.finder.discovery_port() == 0 {
            bail!("finder.discovery_port must be between 1 and 65535");
        }
        if self.finder.advertisements() == 0 {
            bail!("finder.advertisements must be at least 1");
        }
        for (name, value) in [
            ("finder.interval", self.finder.interval),
            ("finder.bind_retry_delay", self.finder.bind_retry_delay),
            ("inverter.keep_alive", self.inverter.keep_alive),
            ("inverter.status_interval", self.inverter.status_interval),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    bail!("{} must be a positive number of seconds, got {}", name, v);
                }
            }
        }
        if let Some(v) = self.finder.pairing_delay {
            if !v.is_finite() || v < 0.0 {
                bail!("finder.pairing_delay cannot be negative, got {}", v);
            }
        }
        if self.inverter.count() == 0 {
            bail!("inverter.count must be at least 1");
        }
        if self.inverter.read_timeout() == Duration::ZERO {
            return Err(anyhow!("config.rs:Invalid read timeout: 0"));
        }

        Ok(())
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
