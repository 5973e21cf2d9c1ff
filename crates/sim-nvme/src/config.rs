use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// One simulated namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimNamespaceConfig {
    /// Namespace id (1-based, never the broadcast id)
    pub nsid: u32,
    /// Capacity in logical blocks
    pub blocks: u64,
    /// Logical block size as a power of two (9 = 512 B, 12 = 4 KiB)
    pub lbads: u8,
    /// Metadata bytes per block, reported only
    pub metadata_size: u16,
}

impl Default for SimNamespaceConfig {
    fn default() -> Self {
        Self {
            nsid: 1,
            blocks: 2048,
            lbads: 9,
            metadata_size: 0,
        }
    }
}

/// Configuration for the simulated controller.
///
/// Every field has a default, so YAML files only need the values they change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimControllerConfig {
    pub vendor_id: u16,
    pub subsystem_vendor_id: u16,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    /// IEEE OUI, reported least significant byte first
    pub ieee_oui: u32,
    /// Maximum data transfer size exponent
    pub mdts: u8,
    pub namespaces: Vec<SimNamespaceConfig>,
    /// Revisions for slots 1.., at most seven
    pub firmware_slots: Vec<String>,
    /// Running slot; 0 reports "invalid"
    pub active_slot: u8,
    pub temperature_kelvin: u16,
    pub critical_warning: u8,
    pub power_cycles: u64,
    pub power_on_hours: u64,
}

impl Default for SimControllerConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x1b36,
            subsystem_vendor_id: 0x1af4,
            model: "SIM NVMe Ctrl".to_string(),
            serial: "SIMNVME0001".to_string(),
            firmware: "1.0".to_string(),
            ieee_oui: 0x525400,
            mdts: 5,
            namespaces: vec![SimNamespaceConfig::default()],
            firmware_slots: vec!["1.0".to_string()],
            active_slot: 1,
            temperature_kelvin: 308,
            critical_warning: 0,
            power_cycles: 1,
            power_on_hours: 0,
        }
    }
}

impl SimControllerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.namespaces.is_empty(), "at least one namespace is required");
        for ns in &self.namespaces {
            ensure!(
                ns.nsid != 0 && ns.nsid != u32::MAX,
                "namespace id {:#x} is reserved",
                ns.nsid
            );
            ensure!(
                (9..=16).contains(&ns.lbads),
                "namespace {} block size exponent {} outside 9..=16",
                ns.nsid,
                ns.lbads
            );
            ensure!(ns.blocks > 0, "namespace {} has no blocks", ns.nsid);
            ns.blocks
                .checked_mul(1u64 << ns.lbads)
                .and_then(|bytes| usize::try_from(bytes).ok())
                .ok_or_else(|| anyhow::anyhow!("namespace {} is too large to simulate", ns.nsid))?;
        }
        let mut ids: Vec<u32> = self.namespaces.iter().map(|ns| ns.nsid).collect();
        ids.sort_unstable();
        ids.dedup();
        ensure!(ids.len() == self.namespaces.len(), "duplicate namespace id");

        ensure!(self.firmware_slots.len() <= 7, "at most 7 firmware slots");
        ensure!(
            usize::from(self.active_slot) <= self.firmware_slots.len(),
            "active slot {} not populated",
            self.active_slot
        );
        ensure!(self.ieee_oui <= 0xff_ffff, "IEEE OUI is 24 bits");
        Ok(())
    }
}
