pub use anyhow::{anyhow, bail};
pub use log::{debug, error, info, trace, warn};
pub use std::time::Duration;

pub use crate::config;
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::samil;
pub use crate::samil::inverter::{Inverter, InverterSession};
pub use crate::samil::keep_alive::KeepAliveInverter;
pub use crate::samil::message::{Identifier, Message};
pub use crate::samil::status::{Status, StatusFormat, StatusValue};
