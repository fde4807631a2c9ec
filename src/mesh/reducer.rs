//! Folds mesh and IP events into the connectivity snapshot and reacts to them.
//!
//! Events are handled one at a time on the reducer task, in the order the mesh
//! stack delivered them. Nothing else writes the snapshot.

use super::driver::MeshDriver;
use super::status::StatusIndicator;
use super::types::{disconnect_reason_name, Connectivity, MacAddr, MeshEvent};
use crate::config::timing;
use crate::plugin::{sub_command, ActiveSlot};
use crate::role::RolePolicy;
use crate::rollback::RollbackMonitor;
use crate::status_led::RootStatusLed;
use crate::timer::{self, Timer, TimerService};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Optional collaborators notified by the reducer.
#[derive(Default)]
pub struct ReducerHooks {
    /// Abort an in-progress OTA download when the parent link drops.
    pub ota_abort: Option<Box<dyn Fn() + Send + Sync>>,
    pub rollback: Option<Arc<RollbackMonitor>>,
    pub status_led: Option<Arc<RootStatusLed>>,
}

pub struct MeshReducer {
    conn: Arc<Mutex<Connectivity>>,
    mesh: Arc<dyn MeshDriver>,
    role: Arc<RolePolicy>,
    status: Arc<StatusIndicator>,
    active: ActiveSlot,
    timers: Arc<dyn TimerService>,
    child_starts: Mutex<Vec<Box<dyn Timer>>>,
    hooks: ReducerHooks,
}

impl MeshReducer {
    pub fn new(
        conn: Arc<Mutex<Connectivity>>,
        mesh: Arc<dyn MeshDriver>,
        role: Arc<RolePolicy>,
        status: Arc<StatusIndicator>,
        active: ActiveSlot,
        timers: Arc<dyn TimerService>,
        hooks: ReducerHooks,
    ) -> Self {
        Self {
            conn,
            mesh,
            role,
            status,
            active,
            timers,
            child_starts: Mutex::new(Vec::new()),
            hooks,
        }
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.lock_conn()
    }

    pub fn handle(&self, event: MeshEvent) {
        let is_root = self.mesh.is_root();
        self.update(event, is_root);

        if Self::enforces_role(&event) && self.role.enforce(is_root).is_err() {
            // Restart is scheduled; keep serving events until it fires.
            debug!("mesh::reducer: Role violation on {:?}", event);
        }

        match event {
            MeshEvent::Started => {
                info!("mesh::reducer: Mesh started");
                if is_root {
                    self.arm_rollback();
                }
                self.update_status_led();
            }
            MeshEvent::Stopped => {
                info!("mesh::reducer: Mesh stopped");
                self.status.cancel_blink();
                self.update_status_led();
            }
            MeshEvent::LayerChange { layer } => {
                info!("mesh::reducer: Layer changed to {}{}", layer, if is_root { " (root)" } else { "" });
                self.update_status_led();
            }
            MeshEvent::ParentConnected { layer, parent } => {
                info!("mesh::reducer: Parent {} connected, layer {}", parent, layer);
                self.status.cancel_blink();
                self.arm_rollback();
            }
            MeshEvent::ParentDisconnected { reason } => {
                warn!(
                    "mesh::reducer: Parent disconnected, reason {} ({})",
                    reason,
                    disconnect_reason_name(reason)
                );
                self.status.cancel_blink();
                if let Some(abort) = &self.hooks.ota_abort {
                    abort();
                }
                if let Some(rollback) = &self.hooks.rollback {
                    rollback.note_disconnect();
                }
            }
            MeshEvent::ChildConnected { mac } => {
                info!("mesh::reducer: Child {} connected", mac);
                if is_root {
                    self.schedule_child_start(mac);
                }
            }
            MeshEvent::ChildDisconnected { mac } => {
                info!("mesh::reducer: Child {} disconnected", mac);
            }
            MeshEvent::RoutingTableAdd { size } | MeshEvent::RoutingTableRemove { size } => {
                debug!("mesh::reducer: Routing table now {} entries", size);
                self.update_status_led();
            }
            MeshEvent::RootSwitchAck => {
                info!("mesh::reducer: Root switch acknowledged");
                self.update_status_led();
            }
            MeshEvent::NoParentFound { scans } => {
                warn!("mesh::reducer: No parent found after {} scans", scans);
                if !is_root {
                    if let Err(e) = self.status.blank_after_no_parent() {
                        warn!("mesh::reducer: Could not blank LED: {}", e);
                    }
                }
                return;
            }
            MeshEvent::FindNetwork { channel } => {
                debug!("mesh::reducer: Searching for network on channel {}", channel);
                let connected = self.lock_conn().upstream_connected;
                if !connected && !is_root {
                    if let Err(e) = self.status.start_scan_blink() {
                        warn!("mesh::reducer: Could not start scan blink: {}", e);
                    }
                }
                return;
            }
            MeshEvent::GotIp => {
                info!("mesh::reducer: Got IP");
                if let Err(e) = self.role.on_got_ip() {
                    error!("mesh::reducer: Root bring-up failed: {}", e);
                }
                self.update_status_led();
            }
            MeshEvent::LostIp => {
                warn!("mesh::reducer: Lost IP");
                if let Err(e) = self.role.on_lost_ip() {
                    error!("mesh::reducer: Could not disable self-organisation: {}", e);
                }
                self.update_status_led();
            }
        }

        self.status.refresh();
    }

    fn enforces_role(event: &MeshEvent) -> bool {
        matches!(
            event,
            MeshEvent::ParentConnected { .. }
                | MeshEvent::LayerChange { .. }
                | MeshEvent::RootSwitchAck
                | MeshEvent::GotIp
        )
    }

    fn update(&self, event: MeshEvent, is_root: bool) {
        let mut conn = self.lock_conn();
        conn.is_root = is_root;
        match event {
            MeshEvent::Started => conn.started = true,
            MeshEvent::Stopped => {
                *conn = Connectivity {
                    is_root,
                    ..Connectivity::default()
                };
            }
            MeshEvent::LayerChange { layer } => conn.layer = layer,
            MeshEvent::ParentConnected { layer, parent } => {
                conn.upstream_connected = true;
                conn.layer = layer;
                conn.parent = Some(parent);
            }
            MeshEvent::ParentDisconnected { .. } => {
                conn.upstream_connected = false;
                conn.parent = None;
            }
            MeshEvent::RoutingTableAdd { size } | MeshEvent::RoutingTableRemove { size } => {
                conn.routing_table_size = size;
            }
            MeshEvent::GotIp => conn.has_ip = true,
            MeshEvent::LostIp => conn.has_ip = false,
            MeshEvent::ChildConnected { .. }
            | MeshEvent::ChildDisconnected { .. }
            | MeshEvent::RootSwitchAck
            | MeshEvent::NoParentFound { .. }
            | MeshEvent::FindNetwork { .. } => {}
        }
    }

    fn arm_rollback(&self) {
        if let Some(rollback) = &self.hooks.rollback {
            if let Err(e) = rollback.arm() {
                warn!("mesh::reducer: Could not arm rollback monitor: {}", e);
            }
        }
    }

    fn update_status_led(&self) {
        let Some(led) = &self.hooks.status_led else { return };
        let conn = self.connectivity();
        if let Err(e) = led.update(conn.is_root, conn.has_ip, conn.child_count()) {
            warn!("mesh::reducer: Status LED update failed: {}", e);
        }
    }

    /// Tell a new child which plugin is running, after it has settled.
    fn schedule_child_start(&self, mac: MacAddr) {
        if !self.active.is_any() {
            return;
        }
        let active = self.active.clone();
        let mesh = self.mesh.clone();
        let result = timer::one_shot(
            self.timers.as_ref(),
            "child_start",
            timing::CHILD_START_DELAY,
            Box::new(move || {
                let Some(id) = active.id() else { return };
                match mesh.send(&mac, &[id, sub_command::START]) {
                    Ok(()) => info!("mesh::reducer: Sent START 0x{:02X} to {}", id, mac),
                    Err(e) => warn!("mesh::reducer: START to {} failed: {}", mac, e),
                }
            }),
        );
        match result {
            Ok(timer) => {
                let mut starts = self.child_starts.lock().unwrap_or_else(PoisonError::into_inner);
                starts.retain(|t| t.is_scheduled());
                starts.push(timer);
            }
            Err(e) => warn!("mesh::reducer: Could not schedule START for {}: {}", mac, e),
        }
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connectivity> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led::{Led, NamedColor};
    use crate::mesh::driver::MeshDriver;
    use crate::plugin::ActivePlugin;
    use crate::role::NodeRole;
    use crate::testing::{
        FakeSlot, LedLog, ManualTimerService, MemStore, RecordingLed, RecordingPin,
        RecordingPlatform, ScriptedMesh,
    };
    use crate::platform::SettingsStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Rig {
        reducer: MeshReducer,
        mesh: Arc<ScriptedMesh>,
        platform: Arc<RecordingPlatform>,
        timers: Arc<ManualTimerService>,
        log: LedLog,
        active: ActiveSlot,
    }

    fn rig(role: NodeRole, root: bool, hooks: ReducerHooks) -> Rig {
        let mesh = if root { ScriptedMesh::root() } else { ScriptedMesh::leaf() };
        let platform = RecordingPlatform::new();
        let timers = ManualTimerService::new();
        let (driver, log) = RecordingLed::new();
        let active = ActiveSlot::default();
        let conn = Arc::new(Mutex::new(Connectivity::default()));
        let status = Arc::new(StatusIndicator::new(
            Led::new(Box::new(driver)),
            active.clone(),
            conn.clone(),
            timers.clone(),
        ));
        let role = Arc::new(RolePolicy::new(role, mesh.clone(), platform.clone(), timers.clone()));
        let reducer = MeshReducer::new(conn, mesh.clone(), role, status, active.clone(), timers.clone(), hooks);
        Rig { reducer, mesh, platform, timers, log, active }
    }

    const PARENT: MacAddr = MacAddr([0x10, 0, 0, 0, 0, 1]);

    #[test]
    fn test_connectivity_follows_events() {
        let rig = rig(NodeRole::Electing, false, ReducerHooks::default());
        rig.reducer.handle(MeshEvent::Started);
        rig.reducer.handle(MeshEvent::ParentConnected { layer: 2, parent: PARENT });
        let conn = rig.reducer.connectivity();
        assert!(conn.started && conn.upstream_connected);
        assert_eq!((conn.layer, conn.parent), (2, Some(PARENT)));
        assert_eq!(rig.log.last(), Some(NamedColor::Blue.rgb()));

        rig.reducer.handle(MeshEvent::RoutingTableAdd { size: 3 });
        assert_eq!(rig.reducer.connectivity().routing_table_size, 3);

        rig.reducer.handle(MeshEvent::ParentDisconnected { reason: 200 });
        let conn = rig.reducer.connectivity();
        assert!(!conn.upstream_connected);
        assert_eq!(conn.parent, None);
        assert_eq!(rig.log.last(), Some(NamedColor::Red.rgb()));

        rig.reducer.handle(MeshEvent::Stopped);
        assert_eq!(rig.reducer.connectivity(), Connectivity::default());
    }

    #[test]
    fn test_root_ip_colours() {
        let rig = rig(NodeRole::Electing, true, ReducerHooks::default());
        rig.reducer.handle(MeshEvent::ParentConnected { layer: 1, parent: PARENT });
        assert_eq!(rig.log.last(), Some(NamedColor::Orange.rgb()));
        rig.reducer.handle(MeshEvent::GotIp);
        assert_eq!(rig.log.last(), Some(NamedColor::Green.rgb()));
        rig.reducer.handle(MeshEvent::LostIp);
        assert_eq!(rig.log.last(), Some(NamedColor::Orange.rgb()));
    }

    #[test]
    fn test_scan_blink_lifecycle() {
        let rig = rig(NodeRole::Electing, false, ReducerHooks::default());
        rig.reducer.handle(MeshEvent::FindNetwork { channel: 6 });
        assert!(rig.timers.is_scheduled("scan_blink"));
        rig.reducer.handle(MeshEvent::FindNetwork { channel: 11 });
        assert_eq!(rig.timers.live("scan_blink"), 1);

        rig.reducer.handle(MeshEvent::ParentConnected { layer: 2, parent: PARENT });
        assert_eq!(rig.timers.live("scan_blink"), 0);

        rig.reducer.handle(MeshEvent::FindNetwork { channel: 1 });
        assert_eq!(rig.timers.live("scan_blink"), 0);
    }

    #[test]
    fn test_no_parent_blanks_then_restores_red() {
        let rig = rig(NodeRole::Electing, false, ReducerHooks::default());
        rig.reducer.handle(MeshEvent::NoParentFound { scans: 60 });
        assert_eq!(rig.log.last(), Some(NamedColor::Off.rgb()));
        rig.timers.advance(Duration::from_millis(250));
        assert_eq!(rig.log.last(), Some(NamedColor::Red.rgb()));
    }

    #[test]
    fn test_forced_root_ip_dance() {
        let rig = rig(NodeRole::ForcedRoot, true, ReducerHooks::default());
        rig.mesh.set_fix_root(true).unwrap();

        rig.reducer.handle(MeshEvent::ParentConnected { layer: 1, parent: PARENT });
        rig.reducer.handle(MeshEvent::GotIp);
        assert_eq!(rig.mesh.self_organized_calls(), vec![(true, false)]);
        assert_eq!(rig.platform.delays(), vec![Duration::from_millis(100)]);
        assert!(rig.mesh.is_root_fixed());
        assert_eq!(rig.mesh.fix_root_calls(), vec![true]);

        rig.reducer.handle(MeshEvent::LostIp);
        assert_eq!(rig.mesh.self_organized_calls().last(), Some(&(false, false)));
        assert_eq!(rig.platform.restarts(), 0);
    }

    #[test]
    fn test_forced_leaf_promoted_to_root_restarts() {
        let rig = rig(NodeRole::ForcedLeaf, false, ReducerHooks::default());
        rig.reducer.handle(MeshEvent::ParentConnected { layer: 2, parent: PARENT });
        assert_eq!(rig.platform.restarts(), 0);

        rig.mesh.set_root(true);
        rig.reducer.handle(MeshEvent::RootSwitchAck);
        rig.reducer.handle(MeshEvent::LayerChange { layer: 1 });
        rig.timers.advance(Duration::from_secs(2));
        assert_eq!(rig.platform.restarts(), 1);
    }

    #[test]
    fn test_new_child_gets_active_plugin_start() {
        let rig = rig(NodeRole::Electing, true, ReducerHooks::default());
        let child = MacAddr([5; 6]);
        rig.reducer.handle(MeshEvent::ChildConnected { mac: child });
        assert_eq!(rig.timers.live("child_start"), 0);

        rig.active.set(Some(ActivePlugin { id: 0x11, name: "fade".into() }));
        rig.reducer.handle(MeshEvent::ChildConnected { mac: child });
        rig.timers.advance(Duration::from_millis(199));
        assert!(rig.mesh.sent().is_empty());
        rig.timers.advance(Duration::from_millis(1));
        assert_eq!(rig.mesh.sent(), vec![(child, vec![0x11, 0x01])]);
    }

    #[test]
    fn test_hooks_notified() {
        let aborts = Arc::new(AtomicUsize::new(0));
        let counted = aborts.clone();
        let mut store = MemStore::default();
        store.set_u8(crate::rollback::ROLLBACK_KEY, 1).unwrap();
        let slot = FakeSlot::default();
        let timers = ManualTimerService::new();
        let rollback = Arc::new(RollbackMonitor::new(
            Box::new(store),
            Box::new(slot.clone()),
            timers.clone(),
        ));
        let pin = RecordingPin::default();
        let status_led = Arc::new(RootStatusLed::new(Box::new(pin.clone()), timers.clone()));
        let hooks = ReducerHooks {
            ota_abort: Some(Box::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            })),
            rollback: Some(rollback.clone()),
            status_led: Some(status_led.clone()),
        };
        let rig = rig(NodeRole::Electing, true, hooks);

        rig.reducer.handle(MeshEvent::Started);
        assert!(rollback.is_armed());
        rig.reducer.handle(MeshEvent::ParentDisconnected { reason: 8 });
        assert_eq!(aborts.load(Ordering::SeqCst), 1);

        rig.reducer.handle(MeshEvent::GotIp);
        assert_eq!(status_led.pattern(), crate::status_led::StatusPattern::RouterOnly);
        rig.reducer.handle(MeshEvent::RoutingTableAdd { size: 2 });
        assert_eq!(status_led.pattern(), crate::status_led::StatusPattern::RouterAndNodes);

        timers.advance(Duration::from_secs(300));
        assert_eq!(slot.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_led_follows_role_change() {
        use crate::status_led::StatusPattern;

        let timers = ManualTimerService::new();
        let status_led = Arc::new(RootStatusLed::new(Box::new(RecordingPin::default()), timers));
        let hooks = ReducerHooks {
            status_led: Some(status_led.clone()),
            ..ReducerHooks::default()
        };
        let rig = rig(NodeRole::Electing, true, hooks);

        rig.reducer.handle(MeshEvent::Started);
        assert_eq!(status_led.pattern(), StatusPattern::Startup);
        rig.reducer.handle(MeshEvent::GotIp);
        assert_eq!(status_led.pattern(), StatusPattern::RouterOnly);

        rig.mesh.set_root(false);
        rig.reducer.handle(MeshEvent::LayerChange { layer: 2 });
        assert_eq!(status_led.pattern(), StatusPattern::Off);

        rig.mesh.set_root(true);
        rig.reducer.handle(MeshEvent::RootSwitchAck);
        assert_eq!(status_led.pattern(), StatusPattern::RouterOnly);

        rig.reducer.handle(MeshEvent::Stopped);
        assert_eq!(status_led.pattern(), StatusPattern::Startup);
    }
}
