//! Types shared between the player core and whatever drives it: config,
//! platform paths, the flat settings store and the console wire protocol.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod settings;
