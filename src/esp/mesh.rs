//! ESP-WIFI-MESH bring-up, event translation and the `MeshDriver` backend.

use super::esp_err_to_node;
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::mesh::driver::{MeshDriver, Received};
use crate::mesh::types::{DeviceType, MacAddr, MeshEvent};
use crate::protocol::MAX_FRAME;
use esp_idf_sys::{
    self as sys, esp, esp_event_base_t, esp_event_handler_register, esp_event_loop_create_default,
    esp_mesh_fix_root, esp_mesh_get_config, esp_mesh_get_layer, esp_mesh_get_routing_table, esp_mesh_init,
    esp_mesh_is_root, esp_mesh_is_root_fixed, esp_mesh_recv, esp_mesh_send, esp_mesh_set_ap_authmode, esp_mesh_set_config,
    esp_mesh_set_max_layer, esp_mesh_set_self_organized, esp_mesh_set_type, esp_mesh_set_vote_percentage,
    esp_mesh_start, esp_netif_init, esp_wifi_get_mac, esp_wifi_init, esp_wifi_set_storage, esp_wifi_start,
    g_wifi_default_wpa_crypto_funcs, g_wifi_osi_funcs, mesh_addr_t, mesh_cfg_t, mesh_data_t, mesh_router_t,
    wifi_init_config_t, ESP_EVENT_ANY_ID, ESP_OK, IP_EVENT, MESH_EVENT, WIFI_INIT_CONFIG_MAGIC,
};
use once_cell::sync::Lazy;
use std::os::raw::c_void;
use std::ptr;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Where the event handler forwards translated events.
static EVENTS: Lazy<Mutex<Option<Sender<MeshEvent>>>> = Lazy::new(|| Mutex::new(None));

fn forward(event: MeshEvent) {
    let events = EVENTS.lock().unwrap_or_else(PoisonError::into_inner);
    match events.as_ref() {
        Some(tx) => {
            if tx.send(event).is_err() {
                warn!("esp::mesh: Reducer gone, dropped {:?}", event);
            }
        }
        None => debug!("esp::mesh: No reducer attached, dropped {:?}", event),
    }
}

/// Translate one ESP-IDF event into a `MeshEvent`.
unsafe fn translate(event_base: esp_event_base_t, event_id: i32, event_data: *mut c_void) -> Option<MeshEvent> {
    if event_base == IP_EVENT {
        return match event_id as u32 {
            sys::ip_event_t_IP_EVENT_STA_GOT_IP => Some(MeshEvent::GotIp),
            sys::ip_event_t_IP_EVENT_STA_LOST_IP => Some(MeshEvent::LostIp),
            _ => None,
        };
    }
    if event_base != MESH_EVENT {
        return None;
    }

    let event = match event_id as u32 {
        sys::mesh_event_id_t_MESH_EVENT_STARTED => MeshEvent::Started,
        sys::mesh_event_id_t_MESH_EVENT_STOPPED => MeshEvent::Stopped,
        sys::mesh_event_id_t_MESH_EVENT_ROOT_SWITCH_ACK => MeshEvent::RootSwitchAck,
        sys::mesh_event_id_t_MESH_EVENT_PARENT_CONNECTED => {
            let parent = if event_data.is_null() {
                MacAddr::default()
            } else {
                MacAddr((*(event_data as *const sys::mesh_event_connected_t)).connected.bssid)
            };
            MeshEvent::ParentConnected {
                layer: esp_mesh_get_layer(),
                parent,
            }
        }
        sys::mesh_event_id_t_MESH_EVENT_PARENT_DISCONNECTED => {
            if event_data.is_null() {
                return None;
            }
            let event = event_data as *const sys::mesh_event_disconnected_t;
            MeshEvent::ParentDisconnected {
                reason: (*event).reason as u8,
            }
        }
        sys::mesh_event_id_t_MESH_EVENT_LAYER_CHANGE => {
            if event_data.is_null() {
                return None;
            }
            let event = event_data as *const sys::mesh_event_layer_change_t;
            MeshEvent::LayerChange {
                layer: (*event).new_layer as i32,
            }
        }
        sys::mesh_event_id_t_MESH_EVENT_CHILD_CONNECTED => {
            if event_data.is_null() {
                return None;
            }
            let event = event_data as *const sys::mesh_event_child_connected_t;
            MeshEvent::ChildConnected {
                mac: MacAddr((*event).mac),
            }
        }
        sys::mesh_event_id_t_MESH_EVENT_CHILD_DISCONNECTED => {
            if event_data.is_null() {
                return None;
            }
            let event = event_data as *const sys::mesh_event_child_disconnected_t;
            MeshEvent::ChildDisconnected {
                mac: MacAddr((*event).mac),
            }
        }
        sys::mesh_event_id_t_MESH_EVENT_ROUTING_TABLE_ADD => {
            if event_data.is_null() {
                return None;
            }
            let event = event_data as *const sys::mesh_event_routing_table_change_t;
            MeshEvent::RoutingTableAdd {
                size: (*event).rt_size_new as usize,
            }
        }
        sys::mesh_event_id_t_MESH_EVENT_ROUTING_TABLE_REMOVE => {
            if event_data.is_null() {
                return None;
            }
            let event = event_data as *const sys::mesh_event_routing_table_change_t;
            MeshEvent::RoutingTableRemove {
                size: (*event).rt_size_new as usize,
            }
        }
        sys::mesh_event_id_t_MESH_EVENT_NO_PARENT_FOUND => {
            let scans = if event_data.is_null() {
                0
            } else {
                (*(event_data as *const sys::mesh_event_no_parent_found_t)).scan_times as i32
            };
            MeshEvent::NoParentFound { scans }
        }
        sys::mesh_event_id_t_MESH_EVENT_FIND_NETWORK => {
            let channel = if event_data.is_null() {
                0
            } else {
                (*(event_data as *const sys::mesh_event_find_network_t)).channel
            };
            MeshEvent::FindNetwork { channel }
        }
        _ => return None,
    };
    Some(event)
}

unsafe extern "C" fn mesh_event_handler(
    _arg: *mut c_void,
    event_base: esp_event_base_t,
    event_id: i32,
    event_data: *mut c_void,
) {
    if let Some(event) = translate(event_base, event_id, event_data) {
        forward(event);
    }
}

/// Bring up netif, the default event loop and Wi-Fi, and route mesh and IP
/// events to `events`. NVS must already be initialised.
pub fn init_wifi(events: Sender<MeshEvent>) -> anyhow::Result<()> {
    *EVENTS.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);

    unsafe {
        esp!(esp_netif_init())?;
        esp!(esp_event_loop_create_default())?;
    }

    let cfg = wifi_init_config_t {
        osi_funcs: &raw mut g_wifi_osi_funcs,
        wpa_crypto_funcs: unsafe { g_wifi_default_wpa_crypto_funcs },
        static_rx_buf_num: 10,
        dynamic_rx_buf_num: 32,
        tx_buf_type: 1,
        static_tx_buf_num: 0,
        dynamic_tx_buf_num: 32,
        cache_tx_buf_num: 0,
        csi_enable: 0,
        ampdu_rx_enable: 1,
        ampdu_tx_enable: 1,
        amsdu_tx_enable: 0,
        nvs_enable: 1,
        nano_enable: 0,
        rx_ba_win: 6,
        wifi_task_core_id: 0,
        beacon_max_len: 752,
        mgmt_sbuf_num: 32,
        feature_caps: sys::WIFI_FEATURE_CAPS as u64,
        sta_disconnected_pm: false,
        espnow_max_encrypt_num: 7,
        magic: WIFI_INIT_CONFIG_MAGIC as i32,
        dump_hesigb_enable: false,
        rx_mgmt_buf_num: 32,
        rx_mgmt_buf_type: 0,
        tx_hetb_queue_num: 0,
    };

    unsafe {
        esp!(esp_wifi_init(&cfg))?;
        esp!(esp_wifi_set_storage(sys::wifi_storage_t_WIFI_STORAGE_FLASH))?;
        esp!(esp_wifi_start())?;
        info!("esp::mesh: Wi-Fi started");

        esp!(esp_event_handler_register(
            MESH_EVENT,
            ESP_EVENT_ANY_ID,
            Some(mesh_event_handler),
            ptr::null_mut()
        ))?;
        esp!(esp_event_handler_register(
            IP_EVENT,
            ESP_EVENT_ANY_ID,
            Some(mesh_event_handler),
            ptr::null_mut()
        ))?;
    }

    Ok(())
}

/// Copy `text` into a NUL-padded fixed field, truncating to leave a terminator.
fn fixed_field<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [0u8; N];
    let len = text.len().min(N - 1);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
    field
}

/// Initialise the mesh stack from the node configuration. The role plan is
/// applied on top of this before [`start_mesh`].
pub fn init_mesh(config: &NodeConfig) -> anyhow::Result<()> {
    info!(
        "esp::mesh: Router '{}', password length {}",
        config.router_ssid,
        config.router_password.len()
    );
    if config.router_ssid.is_empty() {
        warn!("esp::mesh: No router SSID configured, the root will not get an IP");
    }

    let router = mesh_router_t {
        ssid: fixed_field::<32>(&config.router_ssid),
        ssid_len: config.router_ssid.len().min(32) as u8,
        bssid: [0; 6],
        password: fixed_field::<64>(&config.router_password),
        allow_router_switch: true,
    };
    let mesh_ap = sys::mesh_ap_cfg_t {
        password: fixed_field::<64>(&config.mesh_ap_password),
        max_connection: config.ap_connections,
        nonmesh_max_connection: 0,
    };
    // Channel 0 scans every channel for the router or an existing mesh.
    let cfg = mesh_cfg_t {
        channel: 0,
        allow_channel_switch: false,
        mesh_id: mesh_addr_t { addr: config.mesh_id },
        router,
        mesh_ap,
        crypto_funcs: ptr::null(),
    };

    unsafe {
        esp!(esp_mesh_init())?;
        esp!(esp_mesh_set_config(&cfg))?;
        esp!(esp_mesh_set_max_layer(config.max_layer as i32))?;
        esp!(esp_mesh_set_vote_percentage(1.0))?;
        esp!(esp_mesh_set_ap_authmode(sys::wifi_auth_mode_t_WIFI_AUTH_WPA2_PSK))?;
    }
    info!(
        "esp::mesh: Configured mesh {}, max layer {}",
        MacAddr(config.mesh_id),
        config.max_layer
    );
    Ok(())
}

pub fn start_mesh() -> anyhow::Result<()> {
    unsafe { esp!(esp_mesh_start())? };
    info!("esp::mesh: Mesh started");
    Ok(())
}

fn check(err: i32) -> Result<()> {
    if err == ESP_OK {
        Ok(())
    } else {
        Err(esp_err_to_node(err))
    }
}

/// `MeshDriver` over the ESP-WIFI-MESH C API.
pub struct EspMesh {
    route_table_size: usize,
}

impl EspMesh {
    pub fn new(route_table_size: usize) -> Self {
        Self {
            route_table_size: route_table_size.max(1),
        }
    }
}

impl MeshDriver for EspMesh {
    fn is_root(&self) -> bool {
        unsafe { esp_mesh_is_root() }
    }

    fn self_addr(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        let err = unsafe { esp_wifi_get_mac(sys::wifi_interface_t_WIFI_IF_STA, mac.as_mut_ptr()) };
        if err != ESP_OK {
            warn!("esp::mesh: Failed to read station MAC: {}", err);
        }
        MacAddr(mac)
    }

    fn routing_table(&self) -> Result<Vec<MacAddr>> {
        let mut table = vec![mesh_addr_t { addr: [0; 6] }; self.route_table_size];
        let mut size = 0i32;
        check(unsafe {
            esp_mesh_get_routing_table(
                table.as_mut_ptr(),
                (table.len() * std::mem::size_of::<mesh_addr_t>()) as i32,
                &mut size,
            )
        })?;
        table.truncate(size.max(0) as usize);
        Ok(table.iter().map(|entry| MacAddr(unsafe { entry.addr })).collect())
    }

    fn send(&self, dest: &MacAddr, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_FRAME {
            return Err(NodeError::InvalidArg);
        }
        let to = mesh_addr_t { addr: dest.0 };
        let data = mesh_data_t {
            data: frame.as_ptr() as *mut u8,
            size: frame.len() as u16,
            proto: sys::mesh_proto_t_MESH_PROTO_BIN,
            tos: sys::mesh_tos_t_MESH_TOS_P2P,
        };
        check(unsafe { esp_mesh_send(&to, &data, sys::MESH_DATA_P2P as i32, ptr::null(), 0) })
    }

    fn recv(&self, timeout: Duration) -> Result<Received> {
        let mut buf = vec![0u8; MAX_FRAME];
        let mut from = mesh_addr_t { addr: [0; 6] };
        let mut data = mesh_data_t {
            data: buf.as_mut_ptr(),
            size: buf.len() as u16,
            proto: 0,
            tos: 0,
        };
        let mut flag = 0i32;
        check(unsafe {
            esp_mesh_recv(
                &mut from,
                &mut data,
                timeout.as_millis() as i32,
                &mut flag,
                ptr::null_mut(),
                0,
            )
        })?;
        buf.truncate(data.size as usize);
        Ok(Received {
            from: MacAddr(unsafe { from.addr }),
            data: buf,
        })
    }

    fn set_self_organized(&self, enable: bool, select_parent: bool) -> Result<()> {
        check(unsafe { esp_mesh_set_self_organized(enable, select_parent) })
    }

    fn set_fix_root(&self, enable: bool) -> Result<()> {
        check(unsafe { esp_mesh_fix_root(enable) })
    }

    fn is_root_fixed(&self) -> bool {
        unsafe { esp_mesh_is_root_fixed() }
    }

    fn set_device_type(&self, kind: DeviceType) -> Result<()> {
        let kind = match kind {
            DeviceType::Idle => sys::mesh_type_t_MESH_IDLE,
            DeviceType::Root => sys::mesh_type_t_MESH_ROOT,
            DeviceType::Node => sys::mesh_type_t_MESH_NODE,
            DeviceType::Leaf => sys::mesh_type_t_MESH_LEAF,
        };
        check(unsafe { esp_mesh_set_type(kind) })
    }

    fn set_channel_switch(&self, allow: bool) -> Result<()> {
        let mut cfg: mesh_cfg_t = unsafe { std::mem::zeroed() };
        check(unsafe { esp_mesh_get_config(&mut cfg) })?;
        cfg.allow_channel_switch = allow;
        check(unsafe { esp_mesh_set_config(&cfg) })
    }
}
