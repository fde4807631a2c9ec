//! Puts the sequence player under the one-active-plugin rule.

use crate::error::{NodeError, Result};
use crate::plugin::Plugin;
use crate::sequence::{SequencePlayer, SequenceTable, SEQUENCE_PLUGIN};
use std::sync::Arc;

pub struct SequencePlugin {
    player: Arc<SequencePlayer>,
}

impl SequencePlugin {
    pub fn new(player: Arc<SequencePlayer>) -> Self {
        Self { player }
    }
}

impl Plugin for SequencePlugin {
    fn name(&self) -> &str {
        SEQUENCE_PLUGIN
    }

    /// DATA carries `rhythm rows colors`, the same body as a SEQUENCE frame.
    fn command_handler(&self, data: &[u8]) -> Result<()> {
        let [rhythm, rows, colors @ ..] = data else {
            return Err(NodeError::InvalidArg);
        };
        self.player.load(SequenceTable::new(*rhythm, *rows, colors)?)
    }

    fn is_active(&self) -> bool {
        self.player.snapshot().playing
    }

    fn on_deactivate(&self) -> Result<()> {
        self.player.stop();
        Ok(())
    }

    fn on_start(&self) -> Result<()> {
        self.player.start()
    }

    /// The player has no paused state; pausing stops it and START resumes from square 0.
    fn on_pause(&self) -> Result<()> {
        self.player.stop();
        Ok(())
    }

    fn on_reset(&self) -> Result<()> {
        self.player.reset()
    }

    fn on_stop(&self) -> Result<()> {
        self.player.stop();
        Ok(())
    }

    fn heartbeat_handler(&self, pointer: Option<u8>, _counter: u8) {
        let Some(pointer) = pointer else { return };
        if let Err(e) = self.player.handle_beat(pointer) {
            debug!("plugins::sequence: Heartbeat pointer {} ignored: {}", pointer, e);
        }
    }
}
