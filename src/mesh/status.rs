//! Status colour shown while no plugin owns the LED.
//!
//! - root without IP: orange
//! - root with IP: green, pulsing white on odd heartbeats once children joined
//! - node with parent: blue
//! - node without parent: red, blinking while scanning

use super::types::Connectivity;
use crate::config::timing;
use crate::error::Result;
use crate::led::{Led, NamedColor};
use crate::plugin::ActiveSlot;
use crate::timer::{self, Timer, TimerService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub fn status_color(conn: &Connectivity, pulse: bool) -> NamedColor {
    if conn.is_root {
        if !conn.has_ip {
            NamedColor::Orange
        } else if pulse && conn.child_count() > 0 {
            NamedColor::White
        } else {
            NamedColor::Green
        }
    } else if conn.upstream_connected {
        NamedColor::Blue
    } else {
        NamedColor::Red
    }
}

#[derive(Default)]
struct BlinkTimers {
    scan: Option<Box<dyn Timer>>,
    restore: Option<Box<dyn Timer>>,
}

/// Drives the status colour and the scan blink. Every write is skipped while
/// a plugin is active.
pub struct StatusIndicator {
    led: Led,
    active: ActiveSlot,
    conn: Arc<Mutex<Connectivity>>,
    timers: Arc<dyn TimerService>,
    blink: Mutex<BlinkTimers>,
}

impl StatusIndicator {
    pub fn new(
        led: Led,
        active: ActiveSlot,
        conn: Arc<Mutex<Connectivity>>,
        timers: Arc<dyn TimerService>,
    ) -> Self {
        Self {
            led,
            active,
            conn,
            timers,
            blink: Mutex::new(BlinkTimers::default()),
        }
    }

    /// Show the colour for the current connectivity.
    pub fn refresh(&self) {
        let conn = self.snapshot();
        self.show(status_color(&conn, false));
    }

    /// Heartbeat pulse on a root with IP and children: white on odd ticks, green on even.
    pub fn pulse(&self, counter: u8) {
        let conn = self.snapshot();
        if conn.is_root && conn.has_ip && conn.child_count() > 0 {
            self.show(status_color(&conn, counter % 2 == 1));
        }
    }

    /// Toggle red/off every 300 ms until cancelled. Replaces any running blink.
    pub fn start_scan_blink(&self) -> Result<()> {
        let mut blink = self.lock_blink();
        blink.scan = None;

        let led = self.led.clone();
        let active = self.active.clone();
        // The first toggle blanks the red already showing.
        let lit = Arc::new(AtomicBool::new(true));
        let timer = timer::periodic(
            self.timers.as_ref(),
            "scan_blink",
            timing::SCAN_BLINK,
            Box::new(move || {
                if active.is_any() {
                    return;
                }
                let on = !lit.fetch_xor(true, Ordering::AcqRel);
                let color = if on { NamedColor::Red } else { NamedColor::Off };
                if let Err(e) = led.set_named(color) {
                    warn!("mesh::status: Scan blink write failed: {}", e);
                }
            }),
        )?;
        blink.scan = Some(timer);
        debug!("mesh::status: Scan blink started");
        Ok(())
    }

    /// Blank the LED briefly, then restore red if still without a parent.
    pub fn blank_after_no_parent(&self) -> Result<()> {
        self.show(NamedColor::Off);

        let led = self.led.clone();
        let active = self.active.clone();
        let conn = self.conn.clone();
        let timer = timer::one_shot(
            self.timers.as_ref(),
            "no_parent_restore",
            timing::NO_PARENT_BLANK,
            Box::new(move || {
                let connected = conn
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .upstream_connected;
                if !connected && !active.is_any() {
                    if let Err(e) = led.set_named(NamedColor::Red) {
                        warn!("mesh::status: Could not restore red: {}", e);
                    }
                }
            }),
        )?;
        self.lock_blink().restore = Some(timer);
        Ok(())
    }

    /// Stop the scan blink and any pending restore. Safe to call repeatedly.
    pub fn cancel_blink(&self) {
        let mut blink = self.lock_blink();
        if blink.scan.take().is_some() {
            debug!("mesh::status: Scan blink cancelled");
        }
        blink.restore = None;
    }

    pub fn is_blinking(&self) -> bool {
        self.lock_blink()
            .scan
            .as_ref()
            .map_or(false, |t| t.is_scheduled())
    }

    fn show(&self, color: NamedColor) {
        if self.active.is_any() {
            trace!("mesh::status: Plugin owns the LED, skipping {:?}", color);
            return;
        }
        if let Err(e) = self.led.set_named(color) {
            warn!("mesh::status: Failed to show {:?}: {}", color, e);
        }
    }

    fn snapshot(&self) -> Connectivity {
        *self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_blink(&self) -> std::sync::MutexGuard<'_, BlinkTimers> {
        self.blink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
