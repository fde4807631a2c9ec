//! Post-update rollback guard.
//!
//! After an OTA update the updater sets the `rollback` flag. The new image
//! must then keep its mesh link for the whole window; if it does, the image is
//! marked valid and the flag cleared, otherwise the previous image is booted.

use crate::config::timing;
use crate::error::Result;
use crate::platform::{FirmwareSlot, SettingsStore};
use crate::timer::{self, Timer, TimerService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const ROLLBACK_KEY: &str = "rollback";

struct Shared {
    store: Mutex<Box<dyn SettingsStore>>,
    slot: Mutex<Box<dyn FirmwareSlot>>,
    disconnected: AtomicBool,
}

pub struct RollbackMonitor {
    shared: Arc<Shared>,
    timers: Arc<dyn TimerService>,
    window: Duration,
    timer: Mutex<Option<Box<dyn Timer>>>,
}

impl RollbackMonitor {
    pub fn new(
        store: Box<dyn SettingsStore>,
        slot: Box<dyn FirmwareSlot>,
        timers: Arc<dyn TimerService>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(store),
                slot: Mutex::new(slot),
                disconnected: AtomicBool::new(false),
            }),
            timers,
            window: timing::ROLLBACK_WINDOW,
            timer: Mutex::new(None),
        }
    }

    pub fn flag_pending(&self) -> bool {
        let mut store = self.shared.store.lock().unwrap_or_else(PoisonError::into_inner);
        match store.get_u8(ROLLBACK_KEY) {
            Ok(flag) => flag.unwrap_or(0) != 0,
            Err(e) => {
                warn!("rollback: Could not read flag: {}", e);
                false
            }
        }
    }

    /// Start the window if the flag is set. Later calls are no-ops.
    pub fn arm(&self) -> Result<()> {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() || !self.flag_pending() {
            return Ok(());
        }
        self.shared.disconnected.store(false, Ordering::Release);

        let shared = self.shared.clone();
        *timer = Some(timer::one_shot(
            self.timers.as_ref(),
            "rollback",
            self.window,
            Box::new(move || shared.expire()),
        )?);
        info!("rollback: Monitoring for {} s", self.window.as_secs());
        Ok(())
    }

    pub fn note_disconnect(&self) {
        if self.is_armed() && !self.shared.disconnected.swap(true, Ordering::AcqRel) {
            warn!("rollback: Lost parent during the validation window");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |t| t.is_scheduled())
    }
}

impl Shared {
    fn expire(&self) {
        if self.disconnected.load(Ordering::Acquire) {
            error!("rollback: Image did not stay connected, rolling back");
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = slot.rollback() {
                error!("rollback: Rollback failed: {}", e);
            }
            return;
        }

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = slot.mark_valid() {
            error!("rollback: Could not mark image valid: {}", e);
            return;
        }
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = store.remove(ROLLBACK_KEY) {
            warn!("rollback: Could not clear flag: {}", e);
        }
        info!("rollback: Image marked valid");
    }
}
