//! Timer seam.
//!
//! On the device this is backed by `EspTaskTimerService`; the host tests use a
//! manually advanced clock. Dropping a `Timer` deletes it. Callbacks that want
//! to stop themselves call `cancel()` on their own handle instead of dropping it.

use crate::error::Result;
use std::time::Duration;

pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

pub trait Timer: Send {
    /// Arm periodically, replacing any previous schedule.
    fn every(&self, period: Duration) -> Result<()>;
    /// Arm once, replacing any previous schedule.
    fn after(&self, delay: Duration) -> Result<()>;
    /// Returns whether the timer was armed.
    fn cancel(&self) -> Result<bool>;
    fn is_scheduled(&self) -> bool;
}

pub trait TimerService: Send + Sync {
    /// `name` only labels the timer in logs and tests.
    fn timer(&self, name: &'static str, callback: TimerCallback) -> Result<Box<dyn Timer>>;
}

/// Create a timer and arm it once.
pub fn one_shot(
    service: &dyn TimerService,
    name: &'static str,
    delay: Duration,
    callback: TimerCallback,
) -> Result<Box<dyn Timer>> {
    let timer = service.timer(name, callback)?;
    timer.after(delay)?;
    Ok(timer)
}

/// Create a timer and arm it periodically.
pub fn periodic(
    service: &dyn TimerService,
    name: &'static str,
    period: Duration,
    callback: TimerCallback,
) -> Result<Box<dyn Timer>> {
    let timer = service.timer(name, callback)?;
    timer.every(period)?;
    Ok(timer)
}
