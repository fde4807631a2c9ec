//! Mesh addresses, device types and the connectivity events fed to the reducer.

use std::fmt;

/// Station MAC address of a mesh node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(addr: [u8; 6]) -> Self {
        MacAddr(addr)
    }
}

/// Device type handed to the mesh stack before start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Idle,
    Root,
    Node,
    Leaf,
}

/// Connectivity events, in the order the mesh stack delivers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshEvent {
    Started,
    Stopped,
    LayerChange { layer: i32 },
    ParentConnected { layer: i32, parent: MacAddr },
    ParentDisconnected { reason: u8 },
    ChildConnected { mac: MacAddr },
    ChildDisconnected { mac: MacAddr },
    RoutingTableAdd { size: usize },
    RoutingTableRemove { size: usize },
    RootSwitchAck,
    NoParentFound { scans: i32 },
    FindNetwork { channel: u8 },
    GotIp,
    LostIp,
}

/// Connectivity snapshot maintained by the reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub started: bool,
    pub upstream_connected: bool,
    /// Only meaningful while this node is root.
    pub has_ip: bool,
    pub is_root: bool,
    pub layer: i32,
    pub parent: Option<MacAddr>,
    pub routing_table_size: usize,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            started: false,
            upstream_connected: false,
            has_ip: false,
            is_root: false,
            layer: -1,
            parent: None,
            routing_table_size: 0,
        }
    }
}

impl Connectivity {
    /// Nodes below this one, derived from the routing table (which includes self).
    pub fn child_count(&self) -> usize {
        self.routing_table_size.saturating_sub(1)
    }
}

/// Name of a Wi-Fi disconnect reason as reported in `ParentDisconnected`.
pub fn disconnect_reason_name(reason: u8) -> &'static str {
    match reason {
        2 => "auth expired",
        3 => "auth leave",
        4 => "assoc expired",
        5 => "too many associations",
        6 => "not authed",
        7 => "not associated",
        8 => "assoc leave",
        14 => "MIC failure",
        15 => "4-way handshake timeout",
        23 => "802.1X auth failed",
        200 => "beacon timeout",
        201 => "no AP found",
        202 => "auth fail",
        203 => "assoc fail",
        204 => "handshake timeout",
        205 => "connection fail",
        206 => "AP TSF reset",
        207 => "roaming",
        _ => "unknown",
    }
}
