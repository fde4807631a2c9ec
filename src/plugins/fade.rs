//! Four-phase fade between two colours, re-phased on every heartbeat.

use crate::config::{timing, EffectDefaults};
use crate::error::{NodeError, Result};
use crate::plugin::{Plugin, PluginContext};
use crate::timer::Timer;
use rgb::RGB8;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub const NAME: &str = "fade";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeParams {
    pub from: RGB8,
    pub to: RGB8,
    /// Fade-in, hold-high, fade-out, hold-low.
    pub phases_ms: [u16; 4],
}

impl FadeParams {
    pub fn cycle_ms(&self) -> u32 {
        self.phases_ms.iter().map(|&p| p as u32).sum()
    }

    /// Colour `elapsed_ms` into the cycle.
    pub fn color_at(&self, elapsed_ms: u32) -> RGB8 {
        let cycle = self.cycle_ms().max(1);
        let mut t = elapsed_ms % cycle;
        let [fade_in, hold_high, fade_out, _] = self.phases_ms.map(|p| p as u32);

        if t < fade_in {
            return interp(self.from, self.to, t, fade_in);
        }
        t -= fade_in;
        if t < hold_high {
            return self.to;
        }
        t -= hold_high;
        if t < fade_out {
            return interp(self.to, self.from, t, fade_out);
        }
        self.from
    }

    /// `r1 g1 b1 r2 g2 b2 [in:u16 hold:u16 out:u16 hold:u16]`, big-endian.
    fn parse(data: &[u8], current: &FadeParams) -> Result<Self> {
        let (colors, phases) = match data.len() {
            6 => (data, None),
            14 => (&data[..6], Some(&data[6..])),
            _ => return Err(NodeError::InvalidArg),
        };
        let mut phases_ms = current.phases_ms;
        if let Some(raw) = phases {
            for (slot, pair) in phases_ms.iter_mut().zip(raw.chunks_exact(2)) {
                *slot = u16::from_be_bytes([pair[0], pair[1]]);
            }
            if phases_ms.iter().any(|&p| p == 0) {
                return Err(NodeError::InvalidArg);
            }
        }
        Ok(Self {
            from: RGB8::new(colors[0], colors[1], colors[2]),
            to: RGB8::new(colors[3], colors[4], colors[5]),
            phases_ms,
        })
    }
}

fn interp(start: RGB8, end: RGB8, elapsed: u32, total: u32) -> RGB8 {
    if total == 0 || elapsed >= total {
        return end;
    }
    let mix = |s: u8, e: u8| ((s as u32 * (total - elapsed) + e as u32 * elapsed) / total) as u8;
    RGB8::new(mix(start.r, end.r), mix(start.g, end.g), mix(start.b, end.b))
}

struct FadeState {
    params: FadeParams,
    elapsed_ms: u32,
    last_counter: u8,
    running: bool,
    paused: bool,
    timer: Option<Box<dyn Timer>>,
}

struct FadeInner {
    ctx: PluginContext,
    state: Mutex<FadeState>,
}

pub struct FadePlugin {
    inner: Arc<FadeInner>,
}

impl FadePlugin {
    pub fn new(ctx: PluginContext, defaults: &EffectDefaults) -> Self {
        let params = FadeParams {
            from: defaults.fade_from,
            to: defaults.fade_to,
            phases_ms: defaults.fade_phases_ms,
        };
        Self {
            inner: Arc::new(FadeInner {
                ctx,
                state: Mutex::new(FadeState {
                    params,
                    elapsed_ms: 0,
                    last_counter: 0,
                    running: false,
                    paused: false,
                    timer: None,
                }),
            }),
        }
    }

    pub fn params(&self) -> FadeParams {
        self.inner.lock().params
    }

    fn start(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if state.running && !state.paused {
            return Ok(());
        }
        if state.timer.is_none() {
            let weak: Weak<FadeInner> = Arc::downgrade(&self.inner);
            state.timer = Some(self.inner.ctx.timers.timer(
                "fade",
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.tick();
                    }
                }),
            )?);
        }
        if let Some(timer) = &state.timer {
            timer.every(timing::FADE_TICK)?;
        }
        state.running = true;
        state.paused = false;
        state.elapsed_ms = 0;
        state.last_counter = self.inner.ctx.heartbeat.get();
        let color = state.params.color_at(0);
        drop(state);

        info!("plugins::fade: Started");
        self.inner.ctx.led.set_rgb(color)
    }

    fn halt(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(timer) = &state.timer {
            timer.cancel()?;
        }
        state.running = false;
        state.paused = false;
        state.elapsed_ms = 0;
        drop(state);
        self.inner.ctx.led.off()
    }
}

impl FadeInner {
    fn lock(&self) -> MutexGuard<'_, FadeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) {
        let mut state = self.lock();
        if !self.ctx.active.is(NAME) {
            if let Some(timer) = &state.timer {
                if let Err(e) = timer.cancel() {
                    warn!("plugins::fade: Timer cancel failed: {}", e);
                }
            }
            state.running = false;
            debug!("plugins::fade: No longer active, timer cancelled");
            return;
        }
        if !state.running || state.paused {
            return;
        }

        let counter = self.ctx.heartbeat.get();
        if counter != state.last_counter {
            state.last_counter = counter;
            state.elapsed_ms = 0;
        } else {
            let step = timing::FADE_TICK.as_millis() as u32;
            state.elapsed_ms = (state.elapsed_ms + step) % state.params.cycle_ms().max(1);
        }
        let color = state.params.color_at(state.elapsed_ms);
        if let Err(e) = self.ctx.led.set_rgb(color) {
            trace!("plugins::fade: Render skipped: {}", e);
        }
    }
}

impl Plugin for FadePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn command_handler(&self, data: &[u8]) -> Result<()> {
        let mut state = self.inner.lock();
        state.params = FadeParams::parse(data, &state.params)?;
        state.elapsed_ms = 0;
        info!(
            "plugins::fade: {:?} -> {:?}, phases {:?}",
            state.params.from, state.params.to, state.params.phases_ms
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

    /// Blanks the LED. The timer stays armed and cancels itself on its next tick.
    fn on_deactivate(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.running = false;
        state.paused = false;
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
        info!("plugins::fade: Paused");
        Ok(())
    }

    fn on_reset(&self) -> Result<()> {
        self.halt()
    }

    fn on_stop(&self) -> Result<()> {
        self.halt()
    }
}
