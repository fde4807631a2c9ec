//! Optional single-colour LED showing the root's links at a glance.
//!
//! Each pattern is one second long and loops:
//!
//! - startup (no router, no nodes): one long blink
//! - router only: two short blinks
//! - nodes only: two evenly spaced blinks
//! - router and nodes: four short blinks
//!
//! The LED is dark on every node that is not root.

use crate::error::Result;
use crate::platform::StatusPin;
use crate::timer::{Timer, TimerService};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPattern {
    Off,
    Startup,
    RouterOnly,
    NodesOnly,
    RouterAndNodes,
}

impl StatusPattern {
    pub fn select(is_root: bool, router_connected: bool, child_count: usize) -> Self {
        match (is_root, router_connected, child_count > 0) {
            (false, _, _) => StatusPattern::Off,
            (true, false, false) => StatusPattern::Startup,
            (true, true, false) => StatusPattern::RouterOnly,
            (true, false, true) => StatusPattern::NodesOnly,
            (true, true, true) => StatusPattern::RouterAndNodes,
        }
    }

    /// `(lit, milliseconds)` steps of one loop.
    pub fn steps(self) -> &'static [(bool, u16)] {
        match self {
            StatusPattern::Off => &[(false, 1000)],
            StatusPattern::Startup => &[(true, 250), (false, 750)],
            StatusPattern::RouterOnly => &[(true, 125), (false, 125), (true, 125), (false, 625)],
            StatusPattern::NodesOnly => &[(true, 125), (false, 375), (true, 125), (false, 375)],
            StatusPattern::RouterAndNodes => &[
                (true, 125),
                (false, 125),
                (true, 125),
                (false, 125),
                (true, 125),
                (false, 125),
                (true, 125),
                (false, 125),
            ],
        }
    }
}

struct LedState {
    pattern: StatusPattern,
    step: usize,
    pin: Box<dyn StatusPin>,
}

struct Inner {
    state: Mutex<LedState>,
    timer: Mutex<Option<Box<dyn Timer>>>,
}

pub struct RootStatusLed {
    inner: Arc<Inner>,
    timers: Arc<dyn TimerService>,
}

impl RootStatusLed {
    pub fn new(mut pin: Box<dyn StatusPin>, timers: Arc<dyn TimerService>) -> Self {
        if let Err(e) = pin.set(false) {
            warn!("status_led: Initial write failed: {}", e);
        }
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LedState {
                    pattern: StatusPattern::Off,
                    step: 0,
                    pin,
                }),
                timer: Mutex::new(None),
            }),
            timers,
        }
    }

    pub fn pattern(&self) -> StatusPattern {
        self.inner.lock_state().pattern
    }

    pub fn update(&self, is_root: bool, router_connected: bool, child_count: usize) -> Result<()> {
        let pattern = StatusPattern::select(is_root, router_connected, child_count);
        let mut state = self.inner.lock_state();
        if state.pattern == pattern {
            return Ok(());
        }
        debug!("status_led: {:?} -> {:?}", state.pattern, pattern);
        state.pattern = pattern;
        state.step = 0;

        let mut timer = self.inner.lock_timer();
        if pattern == StatusPattern::Off {
            if let Some(t) = timer.as_ref() {
                t.cancel()?;
            }
            return state.pin.set(false);
        }
        if timer.is_none() {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            *timer = Some(self.timers.timer(
                "status_led",
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.advance();
                    }
                }),
            )?);
        }
        Inner::apply(&mut state, timer.as_deref())
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, LedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<Box<dyn Timer>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive the pin for the current step and arm the timer for its length.
    fn apply(state: &mut LedState, timer: Option<&dyn Timer>) -> Result<()> {
        let steps = state.pattern.steps();
        let (lit, ms) = steps[state.step % steps.len()];
        state.pin.set(lit)?;
        if let Some(timer) = timer {
            timer.after(Duration::from_millis(ms as u64))?;
        }
        Ok(())
    }

    fn advance(&self) {
        let mut state = self.lock_state();
        if state.pattern == StatusPattern::Off {
            return;
        }
        state.step = (state.step + 1) % state.pattern.steps().len();
        let timer = self.lock_timer();
        if let Err(e) = Self::apply(&mut state, timer.as_deref()) {
            warn!("status_led: Step failed: {}", e);
        }
    }
}
