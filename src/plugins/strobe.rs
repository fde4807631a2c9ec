//! On/off strobe with separate on and off durations, driven by a chained one-shot.

use crate::config::EffectDefaults;
use crate::error::{NodeError, Result};
use crate::plugin::{Plugin, PluginContext};
use crate::timer::Timer;
use rgb::RGB8;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

pub const NAME: &str = "strobe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrobeParams {
    pub color: RGB8,
    pub on_ms: u16,
    pub off_ms: u16,
}

impl StrobeParams {
    /// `r g b on_ms:u16 off_ms:u16`, big-endian.
    fn parse(data: &[u8]) -> Result<Self> {
        let &[r, g, b, on_hi, on_lo, off_hi, off_lo] = data else {
            return Err(NodeError::InvalidArg);
        };
        let on_ms = u16::from_be_bytes([on_hi, on_lo]);
        let off_ms = u16::from_be_bytes([off_hi, off_lo]);
        if on_ms == 0 || off_ms == 0 {
            return Err(NodeError::InvalidArg);
        }
        Ok(Self {
            color: RGB8::new(r, g, b),
            on_ms,
            off_ms,
        })
    }
}

struct StrobeState {
    params: StrobeParams,
    lit: bool,
    running: bool,
    paused: bool,
    timer: Option<Box<dyn Timer>>,
}

struct StrobeInner {
    ctx: PluginContext,
    state: Mutex<StrobeState>,
}

pub struct StrobePlugin {
    inner: Arc<StrobeInner>,
}

impl StrobePlugin {
    pub fn new(ctx: PluginContext, defaults: &EffectDefaults) -> Self {
        Self {
            inner: Arc::new(StrobeInner {
                ctx,
                state: Mutex::new(StrobeState {
                    params: StrobeParams {
                        color: defaults.strobe_color,
                        on_ms: defaults.strobe_on_ms.max(1),
                        off_ms: defaults.strobe_off_ms.max(1),
                    },
                    lit: false,
                    running: false,
                    paused: false,
                    timer: None,
                }),
            }),
        }
    }

    pub fn params(&self) -> StrobeParams {
        self.inner.lock().params
    }

    fn start(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if state.running && !state.paused {
            return Ok(());
        }
        if state.timer.is_none() {
            let weak: Weak<StrobeInner> = Arc::downgrade(&self.inner);
            state.timer = Some(self.inner.ctx.timers.timer(
                "strobe",
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.tick();
                    }
                }),
            )?);
        }
        state.running = true;
        state.paused = false;
        state.lit = false;
        info!(
            "plugins::strobe: Started, {:?} on {} ms off {} ms",
            state.params.color, state.params.on_ms, state.params.off_ms
        );
        self.inner.toggle(&mut state);
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(timer) = &state.timer {
            timer.cancel()?;
        }
        state.running = false;
        state.paused = false;
        state.lit = false;
        drop(state);
        self.inner.ctx.led.off()
    }
}

impl StrobeInner {
    fn lock(&self) -> MutexGuard<'_, StrobeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip the output and arm the timer for the phase just entered.
    fn toggle(&self, state: &mut StrobeState) {
        state.lit = !state.lit;
        let (color, hold) = if state.lit {
            (state.params.color, state.params.on_ms)
        } else {
            (RGB8::default(), state.params.off_ms)
        };
        if let Err(e) = self.ctx.led.set_rgb(color) {
            trace!("plugins::strobe: Render skipped: {}", e);
        }
        if let Some(timer) = &state.timer {
            if let Err(e) = timer.after(Duration::from_millis(hold as u64)) {
                warn!("plugins::strobe: Could not re-arm: {}", e);
            }
        }
    }

    fn tick(&self) {
        let mut state = self.lock();
        if !self.ctx.active.is(NAME) {
            if let Some(timer) = &state.timer {
                if let Err(e) = timer.cancel() {
                    warn!("plugins::strobe: Timer cancel failed: {}", e);
                }
            }
            state.running = false;
            debug!("plugins::strobe: No longer active, timer cancelled");
            return;
        }
        if state.running && !state.paused {
            self.toggle(&mut state);
        }
    }
}

impl Plugin for StrobePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn command_handler(&self, data: &[u8]) -> Result<()> {
        let params = StrobeParams::parse(data)?;
        self.inner.lock().params = params;
        info!(
            "plugins::strobe: {:?} on {} ms off {} ms",
            params.color, params.on_ms, params.off_ms
        );
        Ok(())
    }

    fn deinit(&self) -> Result<()> {
        self.inner.lock().timer = None;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.inner.lock().running
    }

    fn on_activate(&self) -> Result<()> {
        self.start()
    }

    fn on_deactivate(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.running = false;
        state.lit = false;
        drop(state);
        self.inner.ctx.led.off()
    }

    fn on_start(&self) -> Result<()> {
        self.start()
    }

    fn on_pause(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.running {
            return Ok(());
        }
        if let Some(timer) = &state.timer {
            timer.cancel()?;
        }
        state.paused = true;
        info!("plugins::strobe: Paused (lit: {})", state.lit);
        Ok(())
    }

    fn on_reset(&self) -> Result<()> {
        self.halt()
    }

    fn on_stop(&self) -> Result<()> {
        self.halt()
    }
}
