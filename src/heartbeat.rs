//! Mesh-wide tempo.
//!
//! Every node advances a local 8-bit counter once per interval. The root also
//! publishes it as a HEARTBEAT frame; a node that receives one adopts the
//! root's value, so a lost frame only costs phase until the next one arrives.

use crate::error::Result;
use crate::mesh::driver::Broadcaster;
use crate::mesh::status::StatusIndicator;
use crate::protocol::Command;
use crate::sequence::SequencePlayer;
use crate::timer::{self, Timer, TimerService};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Local heartbeat counter, shared with the plugins.
#[derive(Clone, Default)]
pub struct HeartbeatCounter(Arc<AtomicU8>);

impl HeartbeatCounter {
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: u8) {
        self.0.store(value, Ordering::Release);
    }

    /// Advance by one, wrapping at 256. Returns the new value.
    pub fn increment(&self) -> u8 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

struct HeartbeatInner {
    counter: HeartbeatCounter,
    broadcaster: Arc<Broadcaster>,
    player: Arc<SequencePlayer>,
    status: Arc<StatusIndicator>,
}

pub struct Heartbeat {
    inner: Arc<HeartbeatInner>,
    timer: Mutex<Option<Box<dyn Timer>>>,
}

impl Heartbeat {
    pub fn new(
        counter: HeartbeatCounter,
        broadcaster: Arc<Broadcaster>,
        player: Arc<SequencePlayer>,
        status: Arc<StatusIndicator>,
    ) -> Self {
        Self {
            inner: Arc::new(HeartbeatInner {
                counter,
                broadcaster,
                player,
                status,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn start(&self, timers: &dyn TimerService, interval: Duration) -> Result<()> {
        let inner = Arc::downgrade(&self.inner);
        let timer = timer::periodic(
            timers,
            "heartbeat",
            interval,
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.tick();
                }
            }),
        )?;
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer);
        info!("heartbeat: Ticking every {} ms", interval.as_millis());
        Ok(())
    }

    pub fn stop(&self) {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn tick(&self) {
        self.inner.tick();
    }
}

impl HeartbeatInner {
    fn tick(&self) {
        let counter = self.counter.increment();
        self.status.pulse(counter);

        if !self.broadcaster.mesh().is_root() {
            return;
        }
        if self.broadcaster.is_busy() {
            debug!("heartbeat: Broadcast in progress, skipping {}", counter);
            return;
        }
        if self.broadcaster.child_count() == 0 {
            return;
        }

        let command = Command::Heartbeat {
            counter,
            pointer: self.player.beat_pointer(),
        };
        match command.encode() {
            Ok(frame) => {
                self.broadcaster.broadcast(&frame);
            }
            Err(e) => warn!("heartbeat: Encode failed: {}", e),
        }
    }
}
