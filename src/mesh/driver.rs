//! Mesh transport seam and best-effort broadcast.

use super::types::{DeviceType, MacAddr};
use crate::error::Result;
use crate::logging::Hex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A frame received from another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub from: MacAddr,
    pub data: Vec<u8>,
}

/// Operations the firmware needs from the mesh stack.
pub trait MeshDriver: Send + Sync {
    fn is_root(&self) -> bool;
    fn self_addr(&self) -> MacAddr;
    /// Every node reachable through this one, including itself.
    fn routing_table(&self) -> Result<Vec<MacAddr>>;
    /// Point-to-point send.
    fn send(&self, dest: &MacAddr, frame: &[u8]) -> Result<()>;
    /// Blocking receive.
    fn recv(&self, timeout: Duration) -> Result<Received>;
    fn set_self_organized(&self, enable: bool, select_parent: bool) -> Result<()>;
    fn set_fix_root(&self, enable: bool) -> Result<()>;
    fn is_root_fixed(&self) -> bool;
    fn set_device_type(&self, kind: DeviceType) -> Result<()>;
    /// Let the mesh follow the router when it changes channel.
    fn set_channel_switch(&self, allow: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends one frame to every node in the routing table except this one.
///
/// Delivery is best-effort: failures are counted per peer and the frame is not
/// retried. `is_busy` holds while any broadcast is in flight so the heartbeat
/// can stay out of the way of a large sequence transfer.
pub struct Broadcaster {
    mesh: Arc<dyn MeshDriver>,
    in_flight: AtomicUsize,
}

/// Counts one broadcast as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Broadcaster {
    pub fn new(mesh: Arc<dyn MeshDriver>) -> Self {
        Self {
            mesh,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn mesh(&self) -> &Arc<dyn MeshDriver> {
        &self.mesh
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    /// Routing table without this node.
    pub fn peers(&self) -> Vec<MacAddr> {
        let me = self.mesh.self_addr();
        match self.mesh.routing_table() {
            Ok(table) => table.into_iter().filter(|addr| *addr != me).collect(),
            Err(e) => {
                warn!("mesh::driver: Routing table unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub fn child_count(&self) -> usize {
        self.peers().len()
    }

    pub fn broadcast(&self, frame: &[u8]) -> BroadcastReport {
        let guard = InFlight::enter(&self.in_flight);
        let mut report = BroadcastReport::default();
        for peer in self.peers() {
            match self.mesh.send(&peer, frame) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    debug!("mesh::driver: Send to {} failed: {}", peer, e);
                    report.failed += 1;
                }
            }
        }
        drop(guard);

        if report.sent + report.failed > 0 {
            info!(
                "mesh::driver: Broadcast [{}] to {} peers ({} ok, {} failed)",
                Hex(frame),
                report.sent + report.failed,
                report.sent,
                report.failed
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::testing::ScriptedMesh;
    use std::sync::{Mutex, OnceLock, Weak};

    #[test]
    fn test_broadcast_excludes_self_and_counts_failures() {
        let mesh = ScriptedMesh::root();
        let a = MacAddr([1; 6]);
        let b = MacAddr([2; 6]);
        mesh.set_children(&[a, b]);
        mesh.fail_sends_to(b, NodeError::TransportFailure(0x4008));

        let broadcaster = Broadcaster::new(mesh.clone());
        let report = broadcaster.broadcast(&[0x02]);

        assert_eq!(report, BroadcastReport { sent: 1, failed: 1 });
        let sent = mesh.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (a, vec![0x02]));
        assert!(!broadcaster.is_busy());
    }

    #[test]
    fn test_broadcast_without_peers_sends_nothing() {
        let mesh = ScriptedMesh::root();
        let broadcaster = Broadcaster::new(mesh.clone());
        assert_eq!(broadcaster.child_count(), 0);
        assert_eq!(broadcaster.broadcast(&[0x03]), BroadcastReport::default());
        assert!(mesh.sent().is_empty());
    }

    #[test]
    fn test_overlapping_broadcast_keeps_outer_busy() {
        let mesh = ScriptedMesh::root();
        mesh.set_children(&[MacAddr([1; 6]), MacAddr([2; 6])]);
        let broadcaster = Arc::new(Broadcaster::new(mesh.clone()));

        let handle: Arc<OnceLock<Weak<Broadcaster>>> = Arc::new(OnceLock::new());
        let busy_after_nested = Arc::new(Mutex::new(Vec::new()));
        let (hook_handle, seen) = (handle.clone(), busy_after_nested.clone());
        mesh.on_send(move |_, frame| {
            if frame[0] != 0x03 {
                return;
            }
            if let Some(b) = hook_handle.get().and_then(Weak::upgrade) {
                b.broadcast(&[0x05, 0x00]);
                seen.lock().unwrap().push(b.is_busy());
            }
        });
        handle.set(Arc::downgrade(&broadcaster)).unwrap();

        broadcaster.broadcast(&[0x03, 0x01]);

        assert_eq!(*busy_after_nested.lock().unwrap(), vec![true, true]);
        assert!(!broadcaster.is_busy());
        assert_eq!(mesh.sent().len(), 6);
    }
}
