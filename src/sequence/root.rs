//! Root-only sequence control: store a table, play it locally and publish it
//! to the rest of the mesh.

use super::player::SequencePlayer;
use super::table::{SequenceTable, TABLE_BYTES};
use super::SEQUENCE_PLUGIN;
use crate::error::{NodeError, Result};
use crate::mesh::driver::{BroadcastReport, Broadcaster};
use crate::plugin::PluginRegistry;
use crate::protocol::Command;
use std::sync::Arc;

pub struct SequenceRoot {
    player: Arc<SequencePlayer>,
    registry: Arc<PluginRegistry>,
    broadcaster: Arc<Broadcaster>,
}

impl SequenceRoot {
    pub fn new(
        player: Arc<SequencePlayer>,
        registry: Arc<PluginRegistry>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            player,
            registry,
            broadcaster,
        }
    }

    /// Validate, play locally, then send the SEQUENCE frame to every other node.
    pub fn store_and_broadcast(&self, rhythm: u8, rows: u8, colors: &[u8]) -> Result<BroadcastReport> {
        self.require_root()?;
        let table = SequenceTable::new(rhythm, rows, colors)?;

        self.registry.set_active(SEQUENCE_PLUGIN)?;
        self.player.load(table.clone())?;

        if self.broadcaster.child_count() == 0 {
            debug!("sequence::root: No children, sequence kept local");
            return Ok(BroadcastReport::default());
        }
        let frame = Command::Sequence {
            rhythm,
            rows,
            colors: table.packed(),
        }
        .encode()?;
        Ok(self.broadcaster.broadcast(&frame))
    }

    /// Accept the 386-byte UI payload: `rhythm rows colors[..384]`.
    pub fn from_ui_payload(&self, payload: &[u8]) -> Result<BroadcastReport> {
        let [rhythm, rows, colors @ ..] = payload else {
            return Err(NodeError::InvalidArg);
        };
        if colors.len() > TABLE_BYTES {
            return Err(NodeError::InvalidArg);
        }
        self.store_and_broadcast(*rhythm, *rows, colors)
    }

    pub fn start(&self) -> Result<BroadcastReport> {
        self.require_root()?;
        self.registry.set_active(SEQUENCE_PLUGIN)?;
        self.player.start()?;
        self.publish(Command::SequenceStart)
    }

    pub fn stop(&self) -> Result<BroadcastReport> {
        self.require_root()?;
        self.player.stop();
        self.publish(Command::SequenceStop)
    }

    pub fn reset(&self) -> Result<BroadcastReport> {
        self.require_root()?;
        self.player.reset()?;
        self.publish(Command::SequenceReset)
    }

    fn publish(&self, command: Command<'_>) -> Result<BroadcastReport> {
        let frame = command.encode()?;
        Ok(self.broadcaster.broadcast(&frame))
    }

    fn require_root(&self) -> Result<()> {
        if self.broadcaster.mesh().is_root() {
            Ok(())
        } else {
            warn!("sequence::root: Not the root node, refusing");
            Err(NodeError::InvalidState)
        }
    }
}
