//! Long-running tasks: the reducer thread and the mesh receive loop.

use crate::config::timing;
use crate::error::NodeError;
use crate::mesh::driver::MeshDriver;
use crate::mesh::reducer::MeshReducer;
use crate::mesh::types::MeshEvent;
use crate::router::CommandRouter;
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// `ESP_ERR_TIMEOUT`, returned by a receive that saw no frame.
const RECV_TIMEOUT_CODE: i32 = 0x107;

/// Drain mesh events in delivery order until every sender is gone.
pub fn spawn_reducer(reducer: Arc<MeshReducer>, events: Receiver<MeshEvent>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("mesh_reducer".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            for event in events {
                reducer.handle(event);
            }
            warn!("tasks: Mesh event channel closed");
        })
}

/// Receive one frame and route it. Returns whether a frame was handled.
pub fn receive_once(mesh: &dyn MeshDriver, router: &CommandRouter, timeout: Duration) -> bool {
    match mesh.recv(timeout) {
        Ok(received) => {
            router.route(received.from, &received.data);
            true
        }
        Err(NodeError::TransportFailure(RECV_TIMEOUT_CODE)) => false,
        Err(e) => {
            debug!("tasks: Receive failed: {}", e);
            false
        }
    }
}

/// Receive loop of the rx task.
pub fn mesh_rx_task(mesh: Arc<dyn MeshDriver>, router: Arc<CommandRouter>) {
    info!("tasks: Mesh receive task started");
    loop {
        if !receive_once(mesh.as_ref(), &router, timing::RX_TIMEOUT) {
            thread::sleep(Duration::from_millis(10));
        }
    }
}
