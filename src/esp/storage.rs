//! NVS-backed settings and the running firmware slot.

use crate::error::{NodeError, Result};
use crate::platform::{FirmwareSlot, SettingsStore};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

const NAMESPACE: &str = "lyktparad";

pub struct NvsSettings {
    nvs: EspNvs<NvsDefault>,
}

impl NvsSettings {
    pub fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, NAMESPACE, true)?,
        })
    }
}

impl SettingsStore for NvsSettings {
    fn get_u8(&mut self, key: &str) -> Result<Option<u8>> {
        Ok(self.nvs.get_u8(key)?)
    }

    fn set_u8(&mut self, key: &str, value: u8) -> Result<()> {
        Ok(self.nvs.set_u8(key, value)?)
    }

    fn get_str(&mut self, key: &str) -> Result<Option<String>> {
        let mut buf = [0u8; 64];
        Ok(self.nvs.get_str(key, &mut buf)?.map(str::to_string))
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<()> {
        Ok(self.nvs.set_str(key, value)?)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.nvs.remove(key)?;
        Ok(())
    }
}

/// The running OTA slot.
pub struct OtaSlot;

impl FirmwareSlot for OtaSlot {
    fn mark_valid(&mut self) -> Result<()> {
        esp_ota::mark_app_valid();
        info!("esp::storage: Firmware marked as valid, rollback cancelled");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        warn!("esp::storage: Rolling back to the previous firmware");
        if let Err(e) = esp_ota::rollback_and_reboot() {
            error!("esp::storage: Rollback failed: {:?}", e);
        }
        Err(NodeError::Fatal)
    }
}
