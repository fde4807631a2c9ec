//! Plugin registration, activation and command dispatch.
//!
//! Plugins are registered once at boot and get sequential command IDs from
//! `0x10`. Activation and dispatch are serialised by one mutex so a command can
//! never reach a plugin halfway through a switch.

use super::{sub_command, ActivePlugin, ActiveSlot, Plugin, WebUi, MAX_PLUGINS, PLUGIN_ID_FIRST};
use crate::error::{NodeError, Result};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

struct Entry {
    id: u8,
    plugin: Arc<dyn Plugin>,
    is_default: bool,
    web_ui: Option<WebUi>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub id: u8,
    pub name: String,
}

pub struct PluginRegistry {
    entries: RwLock<Vec<Entry>>,
    active: ActiveSlot,
    dispatch: Mutex<()>,
}

impl PluginRegistry {
    pub fn new(active: ActiveSlot) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            active,
            dispatch: Mutex::new(()),
        }
    }

    pub fn active_slot(&self) -> &ActiveSlot {
        &self.active
    }

    /// Register a plugin and return its command ID.
    pub fn register(&self, plugin: Arc<dyn Plugin>, is_default: bool) -> Result<u8> {
        let name = plugin.name().to_string();
        if name.is_empty() {
            warn!("plugin::registry: Rejected plugin with empty name");
            return Err(NodeError::InvalidArg);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| e.plugin.name() == name) {
            warn!("plugin::registry: Plugin '{}' is already registered", name);
            return Err(NodeError::InvalidArg);
        }
        if entries.len() >= MAX_PLUGINS {
            warn!("plugin::registry: No command ID left for '{}'", name);
            return Err(NodeError::NoMem);
        }
        if is_default && entries.iter().any(|e| e.is_default) {
            warn!("plugin::registry: '{}' cannot be default, one is already set", name);
            return Err(NodeError::InvalidArg);
        }

        if let Err(e) = plugin.init() {
            error!("plugin::registry: init of '{}' failed: {}", name, e);
            return Err(e);
        }

        let id = PLUGIN_ID_FIRST + entries.len() as u8;
        entries.push(Entry {
            id,
            plugin,
            is_default,
            web_ui: None,
        });
        info!(
            "plugin::registry: Registered '{}' as 0x{:02X}{}",
            name,
            id,
            if is_default { " (default)" } else { "" }
        );
        Ok(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<PluginInfo> {
        self.lookup(|e| e.plugin.name() == name)
            .map(|(id, plugin)| PluginInfo {
                id,
                name: plugin.name().to_string(),
            })
    }

    pub fn get_by_id(&self, id: u8) -> Option<PluginInfo> {
        self.lookup(|e| e.id == id).map(|(id, plugin)| PluginInfo {
            id,
            name: plugin.name().to_string(),
        })
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read()
            .iter()
            .map(|e| e.plugin.name().to_string())
            .collect()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.is(name)
    }

    pub fn get_active(&self) -> Option<String> {
        self.active.get().map(|active| active.name)
    }

    pub fn set_active(&self, name: &str) -> Result<()> {
        let _guard = self.lock_dispatch();
        let (id, plugin) = self
            .lookup(|e| e.plugin.name() == name)
            .ok_or(NodeError::NotFound)?;
        self.activate_locked(id, plugin)
    }

    /// Activate the plugin registered as default.
    pub fn activate_default(&self) -> Result<()> {
        let default = self
            .read()
            .iter()
            .find(|e| e.is_default)
            .map(|e| e.plugin.name().to_string());
        match default {
            Some(name) => self.set_active(&name),
            None => {
                warn!("plugin::registry: No default plugin registered");
                Err(NodeError::NotFound)
            }
        }
    }

    /// Mark a registered plugin as default, used when the default is configured by name.
    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.iter().any(|e| e.plugin.name() == name) {
            return Err(NodeError::NotFound);
        }
        for entry in entries.iter_mut() {
            entry.is_default = entry.plugin.name() == name;
        }
        Ok(())
    }

    pub fn deactivate(&self, name: &str) -> Result<()> {
        let _guard = self.lock_dispatch();
        if !self.active.is(name) {
            return Err(NodeError::InvalidState);
        }
        self.deactivate_locked();
        Ok(())
    }

    pub fn deactivate_all(&self) {
        let _guard = self.lock_dispatch();
        self.deactivate_locked();
    }

    /// Deactivate everything and run each plugin's `deinit`.
    pub fn shutdown(&self) {
        self.deactivate_all();
        let plugins: Vec<Arc<dyn Plugin>> = self.read().iter().map(|e| e.plugin.clone()).collect();
        for plugin in plugins {
            if let Err(e) = plugin.deinit() {
                warn!("plugin::registry: deinit of '{}' failed: {}", plugin.name(), e);
            }
        }
    }

    /// Route a plugin frame body (`sub_command | data`) to the plugin with this ID.
    pub fn dispatch(&self, id: u8, payload: &[u8]) -> Result<()> {
        let _guard = self.lock_dispatch();
        let (id, plugin) = self.lookup(|e| e.id == id).ok_or(NodeError::NotFound)?;
        let Some((&sub, data)) = payload.split_first() else {
            return Err(NodeError::InvalidArg);
        };
        let active = self.active.id() == Some(id);

        match sub {
            sub_command::START => {
                if !active {
                    self.activate_locked(id, plugin.clone())?;
                }
                plugin.on_start()
            }
            sub_command::PAUSE | sub_command::RESET | sub_command::STOP if !active => {
                debug!(
                    "plugin::registry: Sub-command 0x{:02X} for inactive '{}'",
                    sub,
                    plugin.name()
                );
                Err(NodeError::InvalidState)
            }
            sub_command::PAUSE => plugin.on_pause(),
            sub_command::RESET => plugin.on_reset(),
            sub_command::STOP => plugin.on_stop(),
            sub_command::DATA => plugin.command_handler(data),
            _ => plugin.command_handler(payload),
        }
    }

    /// Forward a heartbeat to the active plugin.
    pub fn heartbeat(&self, pointer: Option<u8>, counter: u8) {
        let _guard = self.lock_dispatch();
        let Some(id) = self.active.id() else { return };
        if let Some((_, plugin)) = self.lookup(|e| e.id == id) {
            plugin.heartbeat_handler(pointer, counter);
        }
    }

    pub fn set_web_ui(&self, name: &str, ui: WebUi) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .iter_mut()
            .find(|e| e.plugin.name() == name)
            .ok_or(NodeError::NotFound)?;
        entry.web_ui = Some(ui);
        Ok(())
    }

    pub fn web_ui(&self, name: &str) -> Option<WebUi> {
        self.read()
            .iter()
            .find(|e| e.plugin.name() == name)
            .and_then(|e| e.web_ui.clone())
    }

    fn activate_locked(&self, id: u8, plugin: Arc<dyn Plugin>) -> Result<()> {
        if self.active.id() == Some(id) {
            return Ok(());
        }

        let previous = self.active.get();
        let previous_plugin = previous
            .as_ref()
            .and_then(|p| self.lookup(|e| e.id == p.id))
            .map(|(_, plugin)| plugin);

        if let Some(prev) = &previous_plugin {
            if let Err(e) = prev.on_deactivate() {
                warn!("plugin::registry: on_deactivate of '{}' failed: {}", prev.name(), e);
            }
        }

        self.active.set(Some(ActivePlugin {
            id,
            name: plugin.name().to_string(),
        }));

        if let Err(e) = plugin.on_activate() {
            error!("plugin::registry: on_activate of '{}' failed: {}", plugin.name(), e);
            self.active.set(previous);
            if let Some(prev) = &previous_plugin {
                if let Err(e) = prev.on_activate() {
                    warn!("plugin::registry: Could not restore '{}': {}", prev.name(), e);
                }
            }
            return Err(e);
        }

        info!("plugin::registry: Active plugin is now '{}'", plugin.name());
        Ok(())
    }

    fn deactivate_locked(&self) {
        let Some(active) = self.active.get() else { return };
        if let Some((_, plugin)) = self.lookup(|e| e.id == active.id) {
            if let Err(e) = plugin.on_deactivate() {
                warn!("plugin::registry: on_deactivate of '{}' failed: {}", active.name, e);
            }
        }
        self.active.set(None);
        info!("plugin::registry: '{}' deactivated", active.name);
    }

    fn lookup(&self, pred: impl Fn(&Entry) -> bool) -> Option<(u8, Arc<dyn Plugin>)> {
        self.read()
            .iter()
            .find(|e| pred(e))
            .map(|e| (e.id, e.plugin.clone()))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dispatch(&self) -> std::sync::MutexGuard<'_, ()> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
