//! Node role pinned at boot by the force-root and force-leaf pins.
//!
//! | force-root | force-leaf | role |
//! |---|---|---|
//! | low | high | forced root |
//! | high | low | forced leaf |
//! | high | high | electing |
//! | low | low | electing (conflict) |
//!
//! A forced root keeps self-organisation off until it has an upstream IP and
//! then enables it without parent selection, so it accepts children but never
//! goes looking for a parent of its own.

use crate::config::timing;
use crate::error::{NodeError, Result};
use crate::mesh::driver::MeshDriver;
use crate::mesh::types::DeviceType;
use crate::platform::{Level, PinReader, Platform};
use crate::timer::{self, Timer, TimerService};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    ForcedRoot,
    ForcedLeaf,
    Electing,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeRole::ForcedRoot => "forced root",
            NodeRole::ForcedLeaf => "forced leaf",
            NodeRole::Electing => "electing",
        })
    }
}

/// Mesh settings a role implies, applied before the mesh starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshPlan {
    pub device_type: Option<DeviceType>,
    pub fix_root: bool,
    pub self_organized: bool,
    pub select_parent: bool,
    /// Let the mesh follow the router's channel.
    pub auto_channel: bool,
}

impl NodeRole {
    pub fn from_levels(force_root: Level, force_leaf: Level) -> Self {
        match (force_root, force_leaf) {
            (Level::Low, Level::High) => NodeRole::ForcedRoot,
            (Level::High, Level::Low) => NodeRole::ForcedLeaf,
            (Level::High, Level::High) => NodeRole::Electing,
            (Level::Low, Level::Low) => {
                warn!("role: Both role pins are low, falling back to election");
                NodeRole::Electing
            }
        }
    }

    /// Wait for the pull-ups to settle, then sample the pins once.
    pub fn detect(pins: &mut dyn PinReader, platform: &dyn Platform) -> Result<Self> {
        platform.delay(timing::PIN_SETTLE);
        let (force_root, force_leaf) = pins.sample()?;
        let role = Self::from_levels(force_root, force_leaf);
        info!(
            "role: force-root {:?}, force-leaf {:?} -> {}",
            force_root, force_leaf, role
        );
        Ok(role)
    }

    pub fn plan(self) -> MeshPlan {
        match self {
            NodeRole::ForcedRoot => MeshPlan {
                device_type: Some(DeviceType::Root),
                fix_root: true,
                self_organized: false,
                select_parent: false,
                auto_channel: true,
            },
            NodeRole::ForcedLeaf => MeshPlan {
                device_type: Some(DeviceType::Leaf),
                fix_root: false,
                self_organized: true,
                select_parent: true,
                auto_channel: false,
            },
            NodeRole::Electing => MeshPlan {
                device_type: None,
                fix_root: false,
                self_organized: true,
                select_parent: true,
                auto_channel: false,
            },
        }
    }

    /// Whether observed root-ness contradicts the pinned role.
    pub fn violated_by(self, is_root: bool) -> bool {
        match self {
            NodeRole::ForcedRoot => !is_root,
            NodeRole::ForcedLeaf => is_root,
            NodeRole::Electing => false,
        }
    }
}

pub struct RolePolicy {
    role: NodeRole,
    mesh: Arc<dyn MeshDriver>,
    platform: Arc<dyn Platform>,
    timers: Arc<dyn TimerService>,
    restart: Mutex<Option<Box<dyn Timer>>>,
}

impl RolePolicy {
    pub fn new(
        role: NodeRole,
        mesh: Arc<dyn MeshDriver>,
        platform: Arc<dyn Platform>,
        timers: Arc<dyn TimerService>,
    ) -> Self {
        Self {
            role,
            mesh,
            platform,
            timers,
            restart: Mutex::new(None),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Push the role's device type, fix-root and self-organise settings to the mesh.
    pub fn apply_plan(&self) -> Result<()> {
        let plan = self.role.plan();
        if let Some(kind) = plan.device_type {
            self.mesh.set_device_type(kind)?;
        }
        self.mesh.set_fix_root(plan.fix_root)?;
        self.mesh.set_channel_switch(plan.auto_channel)?;
        self.mesh.set_self_organized(plan.self_organized, plan.select_parent)?;
        info!("role: Applied {} plan {:?}", self.role, plan);
        Ok(())
    }

    /// Check observed root-ness. A violation is fatal: the restart is armed
    /// once and fires after the log flush delay.
    pub fn enforce(&self, is_root: bool) -> Result<()> {
        if !self.role.violated_by(is_root) {
            return Ok(());
        }
        error!(
            "role: Node is {} but pinned as {}, restarting",
            if is_root { "root" } else { "not root" },
            self.role
        );

        let mut restart = self.restart.lock().unwrap_or_else(PoisonError::into_inner);
        if restart.is_none() {
            let platform = self.platform.clone();
            *restart = Some(timer::one_shot(
                self.timers.as_ref(),
                "role_restart",
                timing::RESTART_FLUSH,
                Box::new(move || platform.restart()),
            )?);
        }
        Err(NodeError::Fatal)
    }

    pub fn restart_pending(&self) -> bool {
        self.restart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Forced root only: accept children now that the router link is up.
    pub fn on_got_ip(&self) -> Result<()> {
        if self.role != NodeRole::ForcedRoot {
            return Ok(());
        }
        self.ensure_fix_root()?;
        self.platform.delay(timing::POST_IP_BRING_UP);
        self.mesh.set_self_organized(true, false)?;
        self.ensure_fix_root()?;
        info!("role: Self-organisation enabled without parent selection");
        Ok(())
    }

    /// Forced root only: stop self-organising until the IP comes back.
    pub fn on_lost_ip(&self) -> Result<()> {
        if self.role != NodeRole::ForcedRoot {
            return Ok(());
        }
        self.mesh.set_self_organized(false, false)?;
        info!("role: Self-organisation disabled until IP returns");
        Ok(())
    }

    fn ensure_fix_root(&self) -> Result<()> {
        if !self.mesh.is_root_fixed() {
            warn!("role: Fix-root was cleared, setting it again");
            self.mesh.set_fix_root(true)?;
        }
        Ok(())
    }
}
