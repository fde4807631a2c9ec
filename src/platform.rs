//! Board services the core logic depends on, implemented in `crate::esp`
//! on the device and by fakes in the tests.

use crate::error::Result;
use std::time::Duration;

/// Logic level of an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

pub trait Platform: Send + Sync {
    fn restart(&self);
    fn delay(&self, duration: Duration);
}

/// Samples the force-root and force-leaf pins, in that order.
pub trait PinReader {
    fn sample(&mut self) -> Result<(Level, Level)>;
}

/// Tiny persistent key/value store.
pub trait SettingsStore: Send {
    fn get_u8(&mut self, key: &str) -> Result<Option<u8>>;
    fn set_u8(&mut self, key: &str, value: u8) -> Result<()>;
    fn get_str(&mut self, key: &str) -> Result<Option<String>>;
    fn set_str(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// The running firmware image.
pub trait FirmwareSlot: Send {
    fn mark_valid(&mut self) -> Result<()>;
    /// Switch back to the previous image and reboot. Only returns on failure.
    fn rollback(&mut self) -> Result<()>;
}

/// Single-colour output for the root status LED.
pub trait StatusPin: Send {
    fn set(&mut self, on: bool) -> Result<()>;
}
