//! Plugin ABI, the active-plugin slot and the guarded LED wrapper.
//!
//! A plugin is a boxed trait object registered at boot. Exactly one plugin may
//! own the LED at a time; which one is recorded in [`ActiveSlot`], a small
//! shared cell read by the LED guard, the mesh status indicator and by the
//! plugins' own timer callbacks.

pub mod registry;

use crate::error::{NodeError, Result};
use crate::heartbeat::HeartbeatCounter;
use crate::led::Led;
use crate::timer::TimerService;
use rgb::RGB8;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub use registry::{PluginInfo, PluginRegistry};

/// First and last command ID handed out to plugins.
pub const PLUGIN_ID_FIRST: u8 = 0x10;
pub const PLUGIN_ID_LAST: u8 = 0xEF;
pub const MAX_PLUGINS: usize = (PLUGIN_ID_LAST - PLUGIN_ID_FIRST) as usize + 1;

/// Second byte of a plugin frame.
pub mod sub_command {
    pub const START: u8 = 0x01;
    pub const PAUSE: u8 = 0x02;
    pub const RESET: u8 = 0x03;
    pub const DATA: u8 = 0x04;
    pub const STOP: u8 = 0x05;
}

/// Callbacks of an LED behaviour. Only `name` and `command_handler` are required.
///
/// Hooks run on whichever task drove them (rx task for commands, reducer for
/// activation at boot, the timer task for the plugin's own timers). Timer
/// callbacks must check [`ActiveSlot::is`] before touching the LED.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Handles `DATA` payloads (sub-command stripped) and unknown sub-commands.
    fn command_handler(&self, data: &[u8]) -> Result<()>;

    /// Called once at registration; an error aborts the registration.
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn deinit(&self) -> Result<()> {
        Ok(())
    }

    /// Whether the plugin's own animation is running.
    fn is_active(&self) -> bool {
        false
    }

    fn on_activate(&self) -> Result<()> {
        Ok(())
    }

    fn on_deactivate(&self) -> Result<()> {
        Ok(())
    }

    fn on_start(&self) -> Result<()> {
        Ok(())
    }

    fn on_stop(&self) -> Result<()> {
        Ok(())
    }

    fn on_pause(&self) -> Result<()> {
        Ok(())
    }

    fn on_reset(&self) -> Result<()> {
        Ok(())
    }

    fn heartbeat_handler(&self, _pointer: Option<u8>, _counter: u8) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePlugin {
    pub id: u8,
    pub name: String,
}

/// Which plugin currently owns the LED.
#[derive(Clone, Default)]
pub struct ActiveSlot(Arc<RwLock<Option<ActivePlugin>>>);

impl ActiveSlot {
    pub fn get(&self) -> Option<ActivePlugin> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is(&self, name: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |active| active.name == name)
    }

    pub fn is_any(&self) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn id(&self) -> Option<u8> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| active.id)
    }

    pub(crate) fn set(&self, active: Option<ActivePlugin>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = active;
    }
}

/// LED access for plugins. Refuses to write while no plugin is active; it
/// does not check which plugin is calling.
#[derive(Clone)]
pub struct PluginLed {
    led: Led,
    active: ActiveSlot,
}

impl PluginLed {
    pub fn new(led: Led, active: ActiveSlot) -> Self {
        Self { led, active }
    }

    pub fn set_rgb(&self, color: RGB8) -> Result<()> {
        if !self.active.is_any() {
            return Err(NodeError::InvalidState);
        }
        self.led.set_rgb(color)
    }

    pub fn off(&self) -> Result<()> {
        self.set_rgb(RGB8::default())
    }
}

/// Shared services handed to every built-in plugin.
#[derive(Clone)]
pub struct PluginContext {
    pub led: PluginLed,
    pub active: ActiveSlot,
    pub timers: Arc<dyn TimerService>,
    pub heartbeat: HeartbeatCounter,
    pub heartbeat_interval: Duration,
}

/// Web UI fragment of a plugin, either compiled in or built at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiContent {
    Static(&'static str),
    Owned(String),
}

impl UiContent {
    /// Copy runtime content, reporting allocation failure instead of aborting.
    pub fn owned(content: &str) -> Result<Self> {
        let mut owned = String::new();
        owned.try_reserve_exact(content.len()).map_err(|_| NodeError::NoMem)?;
        owned.push_str(content);
        Ok(UiContent::Owned(owned))
    }

    pub fn as_str(&self) -> &str {
        match self {
            UiContent::Static(s) => s,
            UiContent::Owned(s) => s.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebUi {
    pub html: UiContent,
    pub js: Option<UiContent>,
    pub css: Option<UiContent>,
}
