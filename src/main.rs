#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use anyhow::Context;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use lyktparad_firmware::config::NodeConfig;
    use lyktparad_firmware::esp::hardware::{CommonCathodeLed, RolePins, StatusLedPin, Ws2812Led};
    use lyktparad_firmware::esp::mesh::{self, EspMesh};
    use lyktparad_firmware::esp::storage::{NvsSettings, OtaSlot};
    use lyktparad_firmware::esp::system::{EspPlatform, EspTimers};
    use lyktparad_firmware::led::Led;
    use lyktparad_firmware::node::{Board, Node};
    use lyktparad_firmware::platform::StatusPin;
    use lyktparad_firmware::tasks;
    use lyktparad_firmware::version::{BUILD_TIMESTAMP, FIRMWARE_VERSION};
    use lyktparad_firmware::{info, warn};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("main: lyktparad firmware v{} ({})", FIRMWARE_VERSION, BUILD_TIMESTAMP);

    let config = NodeConfig::load();
    if config.force_root_gpio == config.force_leaf_gpio {
        anyhow::bail!("Force-root and force-leaf share GPIO {}", config.force_root_gpio);
    }
    let peripherals = Peripherals::take().context("Failed to take peripherals")?;
    let nvs = EspDefaultNvsPartition::take().context("Failed to init NVS")?;

    let led = Led::new(Box::new(Ws2812Led::new(peripherals.rmt.channel0, config.led_gpio)?));
    if let Some(pins) = &config.common_cathode {
        led.add_output(Box::new(CommonCathodeLed::new(
            peripherals.ledc.timer0,
            peripherals.ledc.channel0,
            peripherals.ledc.channel1,
            peripherals.ledc.channel2,
            pins,
        )?));
    }
    let status_pin = match &config.root_status_led {
        Some(cfg) => Some(Box::new(StatusLedPin::new(cfg)?) as Box<dyn StatusPin>),
        None => None,
    };

    let (events_tx, events_rx) = mpsc::channel();
    mesh::init_wifi(events_tx).context("Failed to init Wi-Fi")?;
    mesh::init_mesh(&config).context("Failed to init mesh")?;

    let esp_mesh = Arc::new(EspMesh::new(config.route_table_size));
    let board = Board {
        led,
        mesh: esp_mesh.clone(),
        timers: Arc::new(EspTimers::new()?),
        platform: Arc::new(EspPlatform),
        pins: Box::new(RolePins::new(config.force_root_gpio, config.force_leaf_gpio)?),
        settings: Box::new(NvsSettings::new(nvs)?),
        slot: Some(Box::new(OtaSlot)),
        status_pin,
        ota_abort: None,
    };
    let node = Node::boot(&config, board)?;

    tasks::spawn_reducer(node.reducer().clone(), events_rx).context("Failed to spawn reducer")?;
    mesh::start_mesh()?;

    let router = node.router().clone();
    thread::Builder::new()
        .name("mesh_rx".into())
        .stack_size(8 * 1024)
        .spawn(move || tasks::mesh_rx_task(esp_mesh, router))
        .context("Failed to spawn mesh rx task")?;

    info!("main: Node running as {}", node.role());
    loop {
        thread::sleep(Duration::from_secs(10));
        let conn = node.connectivity();
        if !conn.upstream_connected && !conn.is_root {
            warn!("main: Still looking for a parent");
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("lyktparad-firmware only runs on ESP-IDF targets; run `cargo test` for the host build");
}
