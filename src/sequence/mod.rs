//! Colour sequences: the packed table, per-node playback and the root's
//! store-and-broadcast path.

pub mod player;
pub mod root;
pub mod table;

pub use player::{PlayerSnapshot, SequencePlayer};
pub use root::SequenceRoot;
pub use table::{Rgb4, SequenceTable};

/// Registry name of the plugin that owns the LED while a sequence plays.
pub const SEQUENCE_PLUGIN: &str = "sequence";
