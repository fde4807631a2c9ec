//! Firmware core of a wireless-mesh LED node.
//!
//! Everything in this crate except `esp` is platform independent and unit
//! tested on the host. The device binary (`src/main.rs`) plugs the ESP-IDF
//! implementations of the board seams into [`node::Node`].

#[macro_use]
pub mod logging;

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod led;
pub mod mesh;
pub mod node;
pub mod platform;
pub mod plugin;
pub mod plugins;
pub mod protocol;
pub mod role;
pub mod rollback;
pub mod router;
pub mod sequence;
pub mod status_led;
pub mod tasks;
pub mod timer;
pub mod version;

#[cfg(target_os = "espidf")]
pub mod esp;

#[cfg(test)]
pub mod testing;

pub use error::{NodeError, Result};
