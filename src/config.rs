//! Node configuration.
//!
//! Defaults are compiled in and `config/node.json` is embedded at build time.
//! Router credentials can be overridden with the `ROUTER_SSID` and
//! `ROUTER_PASSWORD` environment variables when building.

use rgb::RGB8;
use serde::{Deserialize, Serialize};

/// Embedded node configuration, parsed at boot.
const NODE_JSON: &str = include_str!("../config/node.json");

/// Timing constants used across the firmware.
pub mod timing {
    use std::time::Duration;

    /// Settle time after enabling pull-ups on the role pins.
    pub const PIN_SETTLE: Duration = Duration::from_millis(50);
    /// Wait between fix-root verification and enabling self-organisation on a root with IP.
    pub const POST_IP_BRING_UP: Duration = Duration::from_millis(100);
    /// Log flush delay before a restart.
    pub const RESTART_FLUSH: Duration = Duration::from_secs(1);
    /// Red/off toggle period while scanning for a parent.
    pub const SCAN_BLINK: Duration = Duration::from_millis(300);
    /// LED blank time after a "no parent found" event.
    pub const NO_PARENT_BLANK: Duration = Duration::from_millis(250);
    /// Delay before a freshly connected child receives the active plugin's START.
    pub const CHILD_START_DELAY: Duration = Duration::from_millis(200);
    /// Connectivity window an updated image must survive before it is marked valid.
    pub const ROLLBACK_WINDOW: Duration = Duration::from_secs(5 * 60);
    /// Fade plugin interpolation step.
    pub const FADE_TICK: Duration = Duration::from_millis(20);
    /// Receive timeout of the mesh rx loop.
    pub const RX_TIMEOUT: Duration = Duration::from_millis(5000);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonCathodePins {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLedConfig {
    pub gpio: u8,
    /// Drive low for "on" (LED wired to VCC).
    #[serde(default)]
    pub inverted: bool,
}

/// Start-up parameters of the built-in effect plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectDefaults {
    pub fade_from: RGB8,
    pub fade_to: RGB8,
    /// Fade-in, hold-high, fade-out, hold-low in milliseconds.
    pub fade_phases_ms: [u16; 4],
    pub strobe_color: RGB8,
    pub strobe_on_ms: u16,
    pub strobe_off_ms: u16,
}

impl Default for EffectDefaults {
    fn default() -> Self {
        Self {
            fade_from: RGB8::new(0, 0, 0),
            fade_to: RGB8::new(255, 255, 255),
            fade_phases_ms: [400, 100, 400, 100],
            strobe_color: RGB8::new(255, 255, 255),
            strobe_on_ms: 100,
            strobe_off_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub mesh_id: [u8; 6],
    pub router_ssid: String,
    pub router_password: String,
    pub mesh_ap_password: String,
    pub max_layer: u8,
    pub ap_connections: u8,
    pub led_gpio: u8,
    pub common_cathode: Option<CommonCathodePins>,
    pub force_root_gpio: u8,
    pub force_leaf_gpio: u8,
    pub root_status_led: Option<StatusLedConfig>,
    pub heartbeat_interval_ms: u64,
    pub route_table_size: usize,
    /// Plugin activated at boot.
    pub default_plugin: String,
    pub effects: EffectDefaults,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mesh_id: [0x77, 0x77, 0x77, 0x77, 0x77, 0x76],
            router_ssid: String::new(),
            router_password: String::new(),
            mesh_ap_password: String::from("lyktparad_mesh"),
            max_layer: 6,
            ap_connections: 6,
            led_gpio: 18,
            common_cathode: None,
            force_root_gpio: 4,
            force_leaf_gpio: 5,
            root_status_led: None,
            heartbeat_interval_ms: 1000,
            route_table_size: 50,
            default_plugin: String::from("rgb_cycle"),
            effects: EffectDefaults::default(),
        }
    }
}

impl NodeConfig {
    /// Parse the embedded configuration, falling back to defaults when it is
    /// malformed, then apply build-time credential overrides.
    pub fn load() -> Self {
        let mut config = Self::from_json(NODE_JSON).unwrap_or_else(|e| {
            warn!("config: Embedded node.json is invalid ({}), using defaults", e);
            Self::default()
        });
        config.apply_overrides(option_env!("ROUTER_SSID"), option_env!("ROUTER_PASSWORD"));
        config
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn apply_overrides(&mut self, ssid: Option<&str>, password: Option<&str>) {
        if let Some(ssid) = ssid.filter(|s| !s.is_empty()) {
            self.router_ssid = ssid.to_string();
        }
        if let Some(password) = password {
            self.router_password = password.to_string();
        }
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_parses() {
        let config = NodeConfig::from_json(NODE_JSON).unwrap();
        assert_eq!(config.heartbeat_interval_ms, 1000);
        assert_eq!(config.effects.fade_phases_ms, [400, 100, 400, 100]);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = NodeConfig::from_json(r#"{ "led_gpio": 8, "common_cathode": { "red": 1, "green": 2, "blue": 3 } }"#)
            .unwrap();
        assert_eq!(config.led_gpio, 8);
        assert_eq!(
            config.common_cathode,
            Some(CommonCathodePins { red: 1, green: 2, blue: 3 })
        );
        assert_eq!(config.force_root_gpio, NodeConfig::default().force_root_gpio);
        assert_eq!(config.effects, EffectDefaults::default());
    }

    #[test]
    fn test_effect_colors_deserialize_as_rgb() {
        let config =
            NodeConfig::from_json(r#"{ "effects": { "strobe_color": { "r": 1, "g": 2, "b": 3 } } }"#).unwrap();
        assert_eq!(config.effects.strobe_color, RGB8::new(1, 2, 3));
        assert_eq!(config.effects.strobe_on_ms, 100);
    }

    #[test]
    fn test_overrides_ignore_empty_ssid() {
        let mut config = NodeConfig::default();
        config.router_ssid = "home".into();
        config.apply_overrides(Some(""), Some("secret"));
        assert_eq!(config.router_ssid, "home");
        assert_eq!(config.router_password, "secret");
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(NodeConfig::from_json("{ not json").is_err());
    }
}
