//! Restart, delays and timers on top of FreeRTOS and the esp_timer service.

use crate::error::Result;
use crate::platform::Platform;
use crate::timer::{Timer, TimerCallback, TimerService};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};
use esp_idf_sys as sys;
use std::time::Duration;

pub struct EspPlatform;

impl Platform for EspPlatform {
    fn restart(&self) {
        warn!("esp::system: Restarting");
        unsafe { sys::esp_restart() };
    }

    fn delay(&self, duration: Duration) {
        FreeRtos::delay_ms(duration.as_millis() as u32);
    }
}

/// Timers run their callbacks on the esp_timer task.
pub struct EspTimers {
    service: EspTaskTimerService,
}

impl EspTimers {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            service: EspTaskTimerService::new()?,
        })
    }
}

struct EspTimerHandle {
    name: &'static str,
    timer: EspTimer<'static>,
}

impl Timer for EspTimerHandle {
    fn every(&self, period: Duration) -> Result<()> {
        self.timer.cancel()?;
        Ok(self.timer.every(period)?)
    }

    fn after(&self, delay: Duration) -> Result<()> {
        self.timer.cancel()?;
        Ok(self.timer.after(delay)?)
    }

    fn cancel(&self) -> Result<bool> {
        Ok(self.timer.cancel()?)
    }

    fn is_scheduled(&self) -> bool {
        self.timer.is_scheduled().unwrap_or_else(|e| {
            debug!("esp::system: Timer '{}' state unknown: {}", self.name, e);
            false
        })
    }
}

impl TimerService for EspTimers {
    fn timer(&self, name: &'static str, mut callback: TimerCallback) -> Result<Box<dyn Timer>> {
        let timer = self.service.timer(move || callback())?;
        Ok(Box::new(EspTimerHandle { name, timer }))
    }
}
