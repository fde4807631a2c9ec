//! Built-in LED behaviours.

pub mod fade;
pub mod rgb_cycle;
pub mod sequence;
pub mod strobe;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::plugin::{PluginContext, PluginRegistry};
use crate::sequence::SequencePlayer;
use std::sync::Arc;

pub use fade::FadePlugin;
pub use rgb_cycle::RgbCyclePlugin;
pub use sequence::SequencePlugin;
pub use strobe::StrobePlugin;

/// Register the built-in plugins and mark the configured default.
///
/// Registration order fixes the command IDs, so every node must run the same
/// firmware for plugin frames to line up: strobe `0x10`, fade `0x11`,
/// sequence `0x12`, rgb_cycle `0x13`.
pub fn register_builtin(
    registry: &PluginRegistry,
    ctx: &PluginContext,
    player: Arc<SequencePlayer>,
    config: &NodeConfig,
) -> Result<()> {
    registry.register(Arc::new(StrobePlugin::new(ctx.clone(), &config.effects)), false)?;
    registry.register(Arc::new(FadePlugin::new(ctx.clone(), &config.effects)), false)?;
    registry.register(Arc::new(SequencePlugin::new(player)), false)?;
    registry.register(Arc::new(RgbCyclePlugin::new(ctx.clone())), false)?;

    if let Err(e) = registry.set_default(&config.default_plugin) {
        warn!(
            "plugins: Configured default '{}' is not registered ({})",
            config.default_plugin, e
        );
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::harness::Harness;
    use super::*;
    use crate::mesh::driver::Broadcaster;
    use crate::testing::ScriptedMesh;
    use std::time::Duration;

    fn setup(default_plugin: &str) -> (Harness, PluginRegistry) {
        let h = Harness::new();
        let registry = PluginRegistry::new(h.ctx.active.clone());
        let player = Arc::new(SequencePlayer::new(
            h.ctx.led.clone(),
            h.ctx.active.clone(),
            h.timers.clone(),
            Arc::new(Broadcaster::new(ScriptedMesh::leaf())),
        ));
        let config = NodeConfig {
            default_plugin: default_plugin.to_string(),
            ..NodeConfig::default()
        };
        register_builtin(&registry, &h.ctx, player, &config).unwrap();
        (h, registry)
    }

    #[test]
    fn test_builtin_ids_and_default() {
        let (_h, registry) = setup("rgb_cycle");
        assert_eq!(registry.names(), vec!["strobe", "fade", "sequence", "rgb_cycle"]);
        assert_eq!(registry.get_by_name("sequence").unwrap().id, 0x12);
        registry.activate_default().unwrap();
        assert_eq!(registry.get_active().as_deref(), Some("rgb_cycle"));
    }

    #[test]
    fn test_unknown_default_leaves_none() {
        let (_h, registry) = setup("disco");
        assert!(registry.activate_default().is_err());
        assert_eq!(registry.get_active(), None);
    }

    #[test]
    fn test_fade_yields_to_strobe() {
        let (h, registry) = setup(fade::NAME);
        registry.activate_default().unwrap();
        assert_eq!(registry.get_active().as_deref(), Some(fade::NAME));
        assert!(h.timers.is_scheduled("fade"));

        registry.set_active(strobe::NAME).unwrap();
        assert_eq!(registry.get_active().as_deref(), Some(strobe::NAME));
        assert!(h.timers.is_scheduled("strobe"));

        // The fade timer is still armed until its own callback notices.
        assert_eq!(h.timers.fire("fade"), 1);
        assert!(!h.timers.is_scheduled("fade"));

        h.log.clear();
        h.timers.advance(Duration::from_millis(100));
        assert_eq!(h.log.all(), vec![rgb::RGB8::default()]);
    }
}
