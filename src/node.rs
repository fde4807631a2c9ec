//! Boot-time wiring of one mesh node.
//!
//! `Node::boot` builds every subsystem from the board services, registers the
//! built-in plugins, applies the pinned role to the mesh stack and starts the
//! heartbeat. The caller then starts the mesh and feeds events into
//! [`Node::reducer`] and received frames into [`Node::router`].

use crate::config::NodeConfig;
use crate::heartbeat::{Heartbeat, HeartbeatCounter};
use crate::led::Led;
use crate::mesh::driver::{Broadcaster, MeshDriver};
use crate::mesh::reducer::{MeshReducer, ReducerHooks};
use crate::mesh::status::StatusIndicator;
use crate::mesh::types::Connectivity;
use crate::platform::{FirmwareSlot, PinReader, Platform, SettingsStore, StatusPin};
use crate::plugin::{ActiveSlot, PluginContext, PluginLed, PluginRegistry};
use crate::plugins;
use crate::role::{NodeRole, RolePolicy};
use crate::rollback::RollbackMonitor;
use crate::router::CommandRouter;
use crate::sequence::{SequencePlayer, SequenceRoot};
use crate::status_led::RootStatusLed;
use crate::timer::TimerService;
use crate::version;
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

/// Board services handed to the node at boot.
pub struct Board {
    pub led: Led,
    pub mesh: Arc<dyn MeshDriver>,
    pub timers: Arc<dyn TimerService>,
    pub platform: Arc<dyn Platform>,
    pub pins: Box<dyn PinReader>,
    pub settings: Box<dyn SettingsStore>,
    /// Running image; enables the rollback monitor when present.
    pub slot: Option<Box<dyn FirmwareSlot>>,
    pub status_pin: Option<Box<dyn StatusPin>>,
    pub ota_abort: Option<Box<dyn Fn() + Send + Sync>>,
}

pub struct Node {
    role: NodeRole,
    registry: Arc<PluginRegistry>,
    player: Arc<SequencePlayer>,
    sequence: SequenceRoot,
    heartbeat: Heartbeat,
    reducer: Arc<MeshReducer>,
    router: Arc<CommandRouter>,
}

impl Node {
    pub fn boot(config: &NodeConfig, board: Board) -> Result<Self> {
        let Board {
            led,
            mesh,
            timers,
            platform,
            mut pins,
            mut settings,
            slot,
            status_pin,
            ota_abort,
        } = board;

        match version::track(settings.as_mut()) {
            Ok(change) => debug!("node: Version check: {:?}", change),
            Err(e) => warn!("node: Version tracking failed: {:#}", e),
        }

        let role = NodeRole::detect(pins.as_mut(), platform.as_ref()).context("Failed to read role pins")?;

        let active = ActiveSlot::default();
        let conn = Arc::new(Mutex::new(Connectivity::default()));
        let broadcaster = Arc::new(Broadcaster::new(mesh.clone()));
        let counter = HeartbeatCounter::default();
        let status = Arc::new(StatusIndicator::new(
            led.clone(),
            active.clone(),
            conn.clone(),
            timers.clone(),
        ));

        let plugin_led = PluginLed::new(led.clone(), active.clone());
        let player = Arc::new(SequencePlayer::new(
            plugin_led.clone(),
            active.clone(),
            timers.clone(),
            broadcaster.clone(),
        ));
        let registry = Arc::new(PluginRegistry::new(active.clone()));
        let ctx = PluginContext {
            led: plugin_led,
            active: active.clone(),
            timers: timers.clone(),
            heartbeat: counter.clone(),
            heartbeat_interval: config.heartbeat_interval(),
        };
        plugins::register_builtin(&registry, &ctx, player.clone(), config)
            .context("Failed to register built-in plugins")?;

        let policy = Arc::new(RolePolicy::new(role, mesh.clone(), platform, timers.clone()));
        policy.apply_plan().context("Failed to apply role to mesh")?;

        let rollback = slot.map(|slot| Arc::new(RollbackMonitor::new(settings, slot, timers.clone())));
        if rollback.as_ref().map_or(false, |r| r.flag_pending()) {
            info!("node: Running a freshly updated image, rollback armed on first link");
        }
        let status_led = status_pin.map(|pin| Arc::new(RootStatusLed::new(pin, timers.clone())));

        let reducer = Arc::new(MeshReducer::new(
            conn,
            mesh,
            policy,
            status.clone(),
            active,
            timers.clone(),
            ReducerHooks {
                ota_abort,
                rollback,
                status_led,
            },
        ));

        let heartbeat = Heartbeat::new(counter.clone(), broadcaster.clone(), player.clone(), status.clone());
        heartbeat
            .start(timers.as_ref(), config.heartbeat_interval())
            .context("Failed to start heartbeat")?;

        let router = Arc::new(CommandRouter::new(registry.clone(), player.clone(), led, counter));
        let sequence = SequenceRoot::new(player.clone(), registry.clone(), broadcaster);

        if let Err(e) = registry.activate_default() {
            warn!("node: No default plugin active ({}), showing mesh status", e);
        }
        status.refresh();

        info!(
            "node: Booted as {} with plugins {:?}",
            role,
            registry.names()
        );
        Ok(Self {
            role,
            registry,
            player,
            sequence,
            heartbeat,
            reducer,
            router,
        })
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn player(&self) -> &Arc<SequencePlayer> {
        &self.player
    }

    /// Root-side sequence control for the UI collaborator.
    pub fn sequence(&self) -> &SequenceRoot {
        &self.sequence
    }

    pub fn reducer(&self) -> &Arc<MeshReducer> {
        &self.reducer
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn connectivity(&self) -> Connectivity {
        self.reducer.connectivity()
    }

    /// Stop the heartbeat and release every plugin.
    pub fn shutdown(&self) {
        self.heartbeat.stop();
        self.registry.shutdown();
    }
}
