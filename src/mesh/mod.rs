//! Mesh connectivity: transport seam, event reducer and status colour.

pub mod driver;
pub mod reducer;
pub mod status;
pub mod types;

pub use driver::{BroadcastReport, Broadcaster, MeshDriver, Received};
pub use reducer::{MeshReducer, ReducerHooks};
pub use status::StatusIndicator;
pub use types::{Connectivity, DeviceType, MacAddr, MeshEvent};
