//! Six-colour wheel stepped by the heartbeat counter.

use crate::error::Result;
use crate::plugin::{Plugin, PluginContext};
use crate::timer::Timer;
use rgb::RGB8;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub const NAME: &str = "rgb_cycle";

pub const WHEEL: [RGB8; 6] = [
    RGB8 { r: 255, g: 0, b: 0 },
    RGB8 { r: 255, g: 255, b: 0 },
    RGB8 { r: 0, g: 255, b: 0 },
    RGB8 { r: 0, g: 255, b: 255 },
    RGB8 { r: 0, g: 0, b: 255 },
    RGB8 { r: 255, g: 0, b: 255 },
];

pub fn wheel_color(counter: u8) -> RGB8 {
    WHEEL[counter as usize % WHEEL.len()]
}

#[derive(Default)]
struct CycleState {
    running: bool,
    timer: Option<Box<dyn Timer>>,
}

struct CycleInner {
    ctx: PluginContext,
    state: Mutex<CycleState>,
}

/// Renders on its own timer at the heartbeat interval so the wheel keeps
/// turning between heartbeat frames, and re-phases that timer whenever a
/// heartbeat arrives.
pub struct RgbCyclePlugin {
    inner: Arc<CycleInner>,
}

impl RgbCyclePlugin {
    pub fn new(ctx: PluginContext) -> Self {
        Self {
            inner: Arc::new(CycleInner {
                ctx,
                state: Mutex::new(CycleState::default()),
            }),
        }
    }
}

impl CycleInner {
    fn lock(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(&self) {
        let counter = self.ctx.heartbeat.get();
        if let Err(e) = self.ctx.led.set_rgb(wheel_color(counter)) {
            trace!("plugins::rgb_cycle: Render skipped: {}", e);
        }
    }

    fn tick(&self) {
        let mut state = self.lock();
        if !self.ctx.active.is(NAME) {
            if let Some(timer) = &state.timer {
                if let Err(e) = timer.cancel() {
                    warn!("plugins::rgb_cycle: Timer cancel failed: {}", e);
                }
            }
            state.running = false;
            debug!("plugins::rgb_cycle: No longer active, timer cancelled");
            return;
        }
        if state.running {
            self.render();
        }
    }
}

impl Plugin for RgbCyclePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn command_handler(&self, _data: &[u8]) -> Result<()> {
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
        let mut state = self.inner.lock();
        if state.timer.is_none() {
            let weak: Weak<CycleInner> = Arc::downgrade(&self.inner);
            state.timer = Some(self.inner.ctx.timers.timer(
                "rgb_cycle",
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.tick();
                    }
                }),
            )?);
        }
        if let Some(timer) = &state.timer {
            timer.every(self.inner.ctx.heartbeat_interval)?;
        }
        state.running = true;
        self.inner.render();
        info!("plugins::rgb_cycle: Activated at counter {}", self.inner.ctx.heartbeat.get());
        Ok(())
    }

    fn on_deactivate(&self) -> Result<()> {
        self.inner.lock().running = false;
        Ok(())
    }

    fn on_start(&self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        self.on_activate()
    }

    fn on_stop(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(timer) = &state.timer {
            timer.cancel()?;
        }
        state.running = false;
        Ok(())
    }

    fn heartbeat_handler(&self, _pointer: Option<u8>, counter: u8) {
        let state = self.inner.lock();
        if !state.running {
            return;
        }
        if let Some(timer) = &state.timer {
            if let Err(e) = timer.every(self.inner.ctx.heartbeat_interval) {
                warn!("plugins::rgb_cycle: Re-phase failed: {}", e);
            }
        }
        debug!("plugins::rgb_cycle: Heartbeat {} -> colour {}", counter, counter % 6);
        self.inner.render();
    }
}
