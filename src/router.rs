//! Routes received mesh frames to the sequence player, the heartbeat counter,
//! the plugin registry or the LED.

use crate::error::{NodeError, Result};
use crate::heartbeat::HeartbeatCounter;
use crate::led::Led;
use crate::logging::Hex;
use crate::mesh::types::MacAddr;
use crate::plugin::PluginRegistry;
use crate::protocol::Command;
use crate::sequence::{SequencePlayer, SequenceTable, SEQUENCE_PLUGIN};
use std::sync::Arc;

pub struct CommandRouter {
    registry: Arc<PluginRegistry>,
    player: Arc<SequencePlayer>,
    led: Led,
    counter: HeartbeatCounter,
}

impl CommandRouter {
    pub fn new(
        registry: Arc<PluginRegistry>,
        player: Arc<SequencePlayer>,
        led: Led,
        counter: HeartbeatCounter,
    ) -> Self {
        Self {
            registry,
            player,
            led,
            counter,
        }
    }

    /// Handle one frame and log a failure. Frames are never retried.
    pub fn route(&self, from: MacAddr, frame: &[u8]) {
        if let Err(e) = self.handle_frame(from, frame) {
            warn!("router: Dropped frame [{}] from {}: {}", Hex(frame), from, e);
        }
    }

    pub fn handle_frame(&self, from: MacAddr, frame: &[u8]) -> Result<()> {
        let command = Command::decode(frame)?;
        trace!("router: {:?} from {}", command, from);

        match command {
            Command::Sequence { rhythm, rows, colors } => {
                let table = SequenceTable::new(rhythm, rows, colors)?;
                self.ensure_sequence_active()?;
                self.player.load(table)
            }
            Command::SequenceStart => {
                self.ensure_sequence_active()?;
                self.player.start()
            }
            Command::SequenceStop => {
                self.player.stop();
                Ok(())
            }
            Command::SequenceReset => self.player.reset(),
            Command::Beat { pointer } => self.player.handle_beat(pointer),
            Command::Heartbeat { counter, pointer } => {
                self.counter.set(counter);
                self.registry.heartbeat(pointer, counter);
                Ok(())
            }
            Command::Plugin { id, payload } => self.registry.dispatch(id, payload),
            Command::SolidColor(color) => {
                if let Some(active) = self.registry.get_active() {
                    debug!("router: '{}' owns the LED, ignoring {:?}", active, color);
                    return Err(NodeError::InvalidState);
                }
                self.led.set_named(color)
            }
        }
    }

    fn ensure_sequence_active(&self) -> Result<()> {
        if self.registry.is_active(SEQUENCE_PLUGIN) {
            return Ok(());
        }
        self.registry.set_active(SEQUENCE_PLUGIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::led::NamedColor;
    use crate::mesh::driver::Broadcaster;
    use crate::plugins::harness::Harness;
    use crate::plugins::{register_builtin, rgb_cycle};
    use crate::sequence::table::{pack, Rgb4, BYTES_PER_ROW};
    use crate::testing::{RecordingLed, ScriptedMesh};
    use rgb::RGB8;
    use std::time::Duration;

    const ROOT: MacAddr = MacAddr([0xAA, 0, 0, 0, 0, 0x01]);

    struct Rig {
        router: CommandRouter,
        registry: Arc<PluginRegistry>,
        player: Arc<SequencePlayer>,
        h: Harness,
        led_log: crate::testing::LedLog,
    }

    fn rig() -> Rig {
        let h = Harness::new();
        let registry = Arc::new(PluginRegistry::new(h.ctx.active.clone()));
        let player = Arc::new(SequencePlayer::new(
            h.ctx.led.clone(),
            h.ctx.active.clone(),
            h.timers.clone(),
            Arc::new(Broadcaster::new(ScriptedMesh::leaf())),
        ));
        register_builtin(&registry, &h.ctx, player.clone(), &NodeConfig::default()).unwrap();

        let (driver, led_log) = RecordingLed::new();
        let router = CommandRouter::new(
            registry.clone(),
            player.clone(),
            Led::new(Box::new(driver)),
            h.ctx.heartbeat.clone(),
        );
        Rig { router, registry, player, h, led_log }
    }

    fn red_blue_frame() -> Vec<u8> {
        let mut packed = pack(&[Rgb4::new(0xF, 0, 0), Rgb4::new(0, 0, 0xF)]);
        packed.resize(BYTES_PER_ROW, 0);
        let mut frame = vec![0x01, 25, 1];
        frame.extend_from_slice(&packed);
        frame
    }

    #[test]
    fn test_sequence_frame_activates_and_plays() {
        let rig = rig();
        rig.router.handle_frame(ROOT, &red_blue_frame()).unwrap();
        assert_eq!(rig.registry.get_active().as_deref(), Some(SEQUENCE_PLUGIN));
        assert!(rig.player.snapshot().playing);

        rig.router.handle_frame(ROOT, &[0x02]).unwrap();
        rig.h.timers.advance(Duration::from_millis(250));
        assert_eq!(rig.h.log.last(), Some(RGB8::new(0xF0, 0, 0)));
        rig.h.timers.advance(Duration::from_millis(250));
        assert_eq!(rig.h.log.last(), Some(RGB8::new(0, 0, 0xF0)));

        rig.router.handle_frame(ROOT, &[0x05, 15]).unwrap();
        assert_eq!(rig.player.snapshot().pointer, 15);
        assert_eq!(rig.router.handle_frame(ROOT, &[0x05, 16]), Err(NodeError::InvalidArg));

        rig.router.handle_frame(ROOT, &[0x03]).unwrap();
        assert!(!rig.player.snapshot().playing);
        assert_eq!(rig.h.timers.live("sequence"), 0);
    }

    #[test]
    fn test_malformed_frames_leave_state_alone() {
        let rig = rig();
        rig.registry.set_active(rgb_cycle::NAME).unwrap();

        for frame in [&[][..], &[0x01, 0, 1], &[0x07], &[0xF3], &[0x06], &[0x02, 0x00]] {
            assert!(rig.router.handle_frame(ROOT, frame).is_err(), "{:02X?}", frame);
            rig.router.route(ROOT, frame);
        }
        assert_eq!(rig.registry.get_active().as_deref(), Some(rgb_cycle::NAME));
        assert!(!rig.player.snapshot().playing);
        assert_eq!(rig.h.ctx.heartbeat.get(), 0);
    }

    #[test]
    fn test_rejected_sequence_keeps_running_plugin() {
        let rig = rig();
        rig.registry.set_active(rgb_cycle::NAME).unwrap();

        let mut short = red_blue_frame();
        short.truncate(10);
        let mut zero_rhythm = red_blue_frame();
        zero_rhythm[1] = 0;
        let mut too_many_rows = vec![0x01, 25, 17];
        too_many_rows.resize(3 + 17 * BYTES_PER_ROW, 0);

        for frame in [short, zero_rhythm, too_many_rows] {
            assert_eq!(rig.router.handle_frame(ROOT, &frame), Err(NodeError::InvalidArg));
            assert_eq!(rig.registry.get_active().as_deref(), Some(rgb_cycle::NAME));
        }
        assert!(!rig.player.snapshot().playing);

        rig.router.handle_frame(ROOT, &red_blue_frame()).unwrap();
        assert_eq!(rig.registry.get_active().as_deref(), Some(SEQUENCE_PLUGIN));
    }

    #[test]
    fn test_heartbeat_sets_counter_and_reaches_plugin() {
        let rig = rig();
        rig.registry.set_active(rgb_cycle::NAME).unwrap();
        rig.router.handle_frame(ROOT, &[0x06, 8]).unwrap();
        assert_eq!(rig.h.ctx.heartbeat.get(), 8);
        assert_eq!(rig.h.log.last(), Some(rgb_cycle::wheel_color(8)));
    }

    #[test]
    fn test_heartbeat_pointer_resyncs_sequence() {
        let rig = rig();
        rig.router.handle_frame(ROOT, &red_blue_frame()).unwrap();
        rig.router.handle_frame(ROOT, &[0x06, 3, 9]).unwrap();
        assert_eq!(rig.player.snapshot().pointer, 9);
        assert_eq!(rig.h.ctx.heartbeat.get(), 3);
    }

    #[test]
    fn test_plugin_frames_reach_registry() {
        let rig = rig();
        let strobe = rig.registry.get_by_name("strobe").unwrap().id;
        rig.router.handle_frame(ROOT, &[strobe, 0x01]).unwrap();
        assert_eq!(rig.registry.get_active().as_deref(), Some("strobe"));

        assert_eq!(rig.router.handle_frame(ROOT, &[0x20, 0x01]), Err(NodeError::NotFound));
        assert_eq!(rig.router.handle_frame(ROOT, &[strobe]), Err(NodeError::InvalidArg));
    }

    #[test]
    fn test_solid_color_only_without_active_plugin() {
        let rig = rig();
        rig.router.handle_frame(ROOT, &[0xFE]).unwrap();
        assert_eq!(rig.led_log.last(), Some(NamedColor::Green.rgb()));

        rig.registry.set_active("strobe").unwrap();
        assert_eq!(rig.router.handle_frame(ROOT, &[0xFF]), Err(NodeError::InvalidState));
        assert_eq!(rig.led_log.len(), 1);
    }
}
