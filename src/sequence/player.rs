//! Sequence playback on every node.
//!
//! The player renders one square per `rhythm * 10 ms` tick and wraps at the end
//! of the table. The root additionally broadcasts a BEAT with its pointer at
//! every row boundary so the other nodes stay in phase.

use super::table::{SequenceTable, SQUARES_PER_ROW};
use super::SEQUENCE_PLUGIN;
use crate::error::{NodeError, Result};
use crate::mesh::driver::Broadcaster;
use crate::plugin::{ActiveSlot, PluginLed};
use crate::protocol::Command;
use crate::timer::{self, Timer, TimerService};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Default)]
struct PlayerState {
    table: Option<SequenceTable>,
    pointer: usize,
    playing: bool,
    timer: Option<Box<dyn Timer>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub playing: bool,
    pub pointer: usize,
    pub rhythm: u8,
    pub rows: u8,
}

struct PlayerInner {
    state: Mutex<PlayerState>,
    led: PluginLed,
    active: ActiveSlot,
    timers: Arc<dyn TimerService>,
    broadcaster: Arc<Broadcaster>,
}

pub struct SequencePlayer {
    inner: Arc<PlayerInner>,
}

impl SequencePlayer {
    pub fn new(
        led: PluginLed,
        active: ActiveSlot,
        timers: Arc<dyn TimerService>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                state: Mutex::new(PlayerState::default()),
                led,
                active,
                timers,
                broadcaster,
            }),
        }
    }

    /// Replace the table and play it from square 0.
    pub fn load(&self, table: SequenceTable) -> Result<()> {
        let mut state = self.inner.lock();
        // Delete the old timer before its replacement exists.
        state.timer = None;
        state.playing = false;
        state.pointer = 0;

        let period = table.period();
        info!(
            "sequence::player: Loaded {} rows at {} ms per square",
            table.rows(),
            period.as_millis()
        );
        state.table = Some(table);
        state.timer = Some(self.new_timer()?);
        self.arm(&state)?;
        state.playing = true;
        self.inner.render(&state);
        Ok(())
    }

    /// Play the stored table from square 0.
    pub fn start(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if state.table.is_none() {
            debug!("sequence::player: START without a table");
            return Err(NodeError::InvalidState);
        }
        state.pointer = 0;
        if state.timer.is_none() {
            state.timer = Some(self.new_timer()?);
        }
        self.arm(&state)?;
        state.playing = true;
        Ok(())
    }

    /// Stop and delete the timer. The table is kept for a later START.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        state.timer = None;
        if state.playing {
            info!("sequence::player: Stopped at square {}", state.pointer);
        }
        state.playing = false;
    }

    pub fn reset(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.playing {
            return Ok(());
        }
        state.pointer = 0;
        self.arm(&state)
    }

    /// Jump to `pointer` and restart the tick so the next square renders a full
    /// period from now. Ignored while not playing.
    pub fn handle_beat(&self, pointer: u8) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.playing {
            trace!("sequence::player: BEAT {} while idle", pointer);
            return Ok(());
        }
        let len = state.table.as_ref().map_or(0, |t| t.len());
        if pointer as usize >= len {
            warn!("sequence::player: BEAT {} out of range (len {})", pointer, len);
            return Err(NodeError::InvalidArg);
        }
        state.pointer = pointer as usize;
        self.arm(&state)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let state = self.inner.lock();
        PlayerSnapshot {
            playing: state.playing,
            pointer: state.pointer,
            rhythm: state.table.as_ref().map_or(0, |t| t.rhythm()),
            rows: state.table.as_ref().map_or(0, |t| t.rows()),
        }
    }

    /// Pointer to put into heartbeats, present only while playing.
    pub fn beat_pointer(&self) -> Option<u8> {
        let state = self.inner.lock();
        state.playing.then_some(state.pointer as u8)
    }

    fn new_timer(&self) -> Result<Box<dyn Timer>> {
        let weak: Weak<PlayerInner> = Arc::downgrade(&self.inner);
        self.inner.timers.timer(
            "sequence",
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.tick();
                }
            }),
        )
    }

    fn arm(&self, state: &PlayerState) -> Result<()> {
        match (&state.timer, &state.table) {
            (Some(timer), Some(table)) => timer.every(table.period()),
            _ => Err(NodeError::InvalidState),
        }
    }
}

impl PlayerInner {
    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(&self, state: &PlayerState) {
        let Some(square) = state.table.as_ref().and_then(|t| t.square(state.pointer)) else {
            return;
        };
        if let Err(e) = self.led.set_rgb(square.to_rgb8()) {
            trace!("sequence::player: Render skipped: {}", e);
        }
    }

    fn tick(&self) {
        let beat = {
            let mut state = self.lock();
            if !state.playing {
                return;
            }
            if !self.active.is(SEQUENCE_PLUGIN) {
                if let Some(timer) = &state.timer {
                    if let Err(e) = timer.cancel() {
                        warn!("sequence::player: Timer cancel failed: {}", e);
                    }
                }
                state.playing = false;
                debug!("sequence::player: Plugin no longer active, timer cancelled");
                return;
            }
            let Some(len) = state.table.as_ref().map(|t| t.len()) else {
                return;
            };
            self.render(&state);
            state.pointer = (state.pointer + 1) % len;
            (state.pointer % SQUARES_PER_ROW == 0).then_some(state.pointer as u8)
        };

        if let Some(pointer) = beat {
            if self.broadcaster.mesh().is_root() {
                match (Command::Beat { pointer }).encode() {
                    Ok(frame) => {
                        self.broadcaster.broadcast(&frame);
                    }
                    Err(e) => warn!("sequence::player: BEAT encode failed: {}", e),
                }
            }
        }
    }
}
