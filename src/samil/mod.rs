pub mod finder;
pub mod inverter;
pub mod keep_alive;
pub mod message;
pub mod message_decoder;
pub mod model;
pub mod status;
pub mod util;
