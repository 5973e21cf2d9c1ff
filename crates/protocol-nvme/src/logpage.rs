//! Get Log Page parameters and the SMART / firmware slot pages.

use crate::bitfield::{control_word, ControlWord};
use crate::error::{NvmeError, Result};
use crate::layout::{fixed_layout, trimmed_ascii, Ne16, Ne32};
use crate::wide::{data_units_to_bytes, decode_le128, format_human_bytes};
use serde::Serialize;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Namespace id addressing every namespace (controller-wide logs).
pub const NSID_ALL: u32 = 0xFFFF_FFFF;
/// Namespace id for logs that are not namespace scoped.
pub const NSID_NONE: u32 = 0;

/// Bounds accepted by `read_log_page`.
pub const LOG_PAGE_MIN_LEN: usize = 4;
pub const LOG_PAGE_MAX_LEN: usize = 0x4000;
pub const LOG_PAGE_ALIGN: usize = 4;

/// Size of the SMART / Health Information and Firmware Slot Information logs.
pub const LOG_PAGE_512: usize = 512;

/// Log page identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogPageId {
    SupportedLogPages = 0x00,
    ErrorInformation = 0x01,
    SmartHealth = 0x02,
    FirmwareSlot = 0x03,
    ChangedNamespaceList = 0x04,
    CommandsSupportedEffects = 0x05,
    DeviceSelfTest = 0x06,
    TelemetryHost = 0x07,
    TelemetryController = 0x08,
    EnduranceGroup = 0x09,
    PredictableLatencyPerNvmSet = 0x0a,
    PredictableLatencyEventAggregate = 0x0b,
    AsymmetricNamespaceAccess = 0x0c,
    PersistentEventLog = 0x0d,
    EnduranceGroupEventAggregate = 0x0f,
    MediaUnitStatus = 0x10,
    SupportedCapacityConfigList = 0x11,
    FeatureIdentifiers = 0x12,
    MiCommandsSupportedEffects = 0x13,
    CommandFeatureLockdown = 0x14,
    BootPartition = 0x15,
    RotationalMedia = 0x16,
    Discovery = 0x70,
    ReservationNotification = 0x80,
    SanitizeStatus = 0x81,
}

impl LogPageId {
    pub fn from_raw(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::SupportedLogPages,
            0x01 => Self::ErrorInformation,
            0x02 => Self::SmartHealth,
            0x03 => Self::FirmwareSlot,
            0x04 => Self::ChangedNamespaceList,
            0x05 => Self::CommandsSupportedEffects,
            0x06 => Self::DeviceSelfTest,
            0x07 => Self::TelemetryHost,
            0x08 => Self::TelemetryController,
            0x09 => Self::EnduranceGroup,
            0x0a => Self::PredictableLatencyPerNvmSet,
            0x0b => Self::PredictableLatencyEventAggregate,
            0x0c => Self::AsymmetricNamespaceAccess,
            0x0d => Self::PersistentEventLog,
            0x0f => Self::EnduranceGroupEventAggregate,
            0x10 => Self::MediaUnitStatus,
            0x11 => Self::SupportedCapacityConfigList,
            0x12 => Self::FeatureIdentifiers,
            0x13 => Self::MiCommandsSupportedEffects,
            0x14 => Self::CommandFeatureLockdown,
            0x15 => Self::BootPartition,
            0x16 => Self::RotationalMedia,
            0x70 => Self::Discovery,
            0x80 => Self::ReservationNotification,
            0x81 => Self::SanitizeStatus,
            _ => return None,
        })
    }
}

control_word! {
    /// Get Log Page CDW10.
    LogPageCdw10, LogPageCdw10Field {
        lid => Lid @ 0,
        lsp => Lsp @ 8,
        rae => Rae @ 15,
        numdl => Numdl @ 16,
    }
}

control_word! {
    /// Get Log Page CDW11.
    LogPageCdw11, LogPageCdw11Field {
        numdu => Numdu @ 0,
        lsid => Lsid @ 16,
    }
}

control_word! {
    /// Get Log Page CDW12: log page offset, lower dword.
    LogPageCdw12, LogPageCdw12Field {
        lpol => Lpol @ 0,
    }
}

control_word! {
    /// Get Log Page CDW13: log page offset, upper dword.
    LogPageCdw13, LogPageCdw13Field {
        lpou => Lpou @ 0,
    }
}

control_word! {
    /// Get Log Page CDW14.
    LogPageCdw14, LogPageCdw14Field {
        uuid_index => Uuid @ 0,
        ot => Ot @ 23,
        csi => Csi @ 24,
    }
}

/// Command dwords 10 through 14 of a Get Log Page command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogPageRequest {
    pub cdw10: LogPageCdw10,
    pub cdw11: LogPageCdw11,
    pub cdw12: LogPageCdw12,
    pub cdw13: LogPageCdw13,
    pub cdw14: LogPageCdw14,
}

impl LogPageRequest {
    /// Request `len` bytes of log `lid` from offset zero.
    ///
    /// The dword count is split across NUMDL and NUMDU. Lengths below one
    /// dword are not rejected here; they encode a count of zero.
    pub fn new(lid: u8, len: usize) -> Self {
        let numd = u32::try_from(len / 4).unwrap_or(u32::MAX).saturating_sub(1);
        Self {
            cdw10: LogPageCdw10 {
                lid: lid.into(),
                numdl: numd & 0xffff,
                ..Default::default()
            },
            cdw11: LogPageCdw11 {
                numdu: numd >> 16,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Byte offset into the log, split across LPOL and LPOU.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.cdw12.lpol = offset as u32;
        self.cdw13.lpou = (offset >> 32) as u32;
        self
    }

    pub fn with_lsp(mut self, lsp: u8) -> Self {
        self.cdw10.lsp = lsp.into();
        self
    }

    /// Retain asynchronous events.
    pub fn with_rae(mut self, rae: bool) -> Self {
        self.cdw10.rae = rae.into();
        self
    }

    pub fn with_lsid(mut self, lsid: u16) -> Self {
        self.cdw11.lsid = lsid.into();
        self
    }

    pub fn with_csi(mut self, csi: u8) -> Self {
        self.cdw14.csi = csi.into();
        self
    }

    pub fn lid(&self) -> u8 {
        self.cdw10.lid as u8
    }

    /// Packed CDW10 through CDW14.
    pub fn cdws(&self) -> [u32; 5] {
        [
            self.cdw10.pack(),
            self.cdw11.pack(),
            self.cdw12.pack(),
            self.cdw13.pack(),
            self.cdw14.pack(),
        ]
    }
}

/// Check a `read_log_page` buffer and return its zero-based dword count.
pub fn validate_log_buffer(len: usize) -> Result<u32> {
    if !(LOG_PAGE_MIN_LEN..=LOG_PAGE_MAX_LEN).contains(&len) || len % LOG_PAGE_ALIGN != 0 {
        return Err(NvmeError::InvalidBufferLength {
            len,
            min: LOG_PAGE_MIN_LEN,
            max: LOG_PAGE_MAX_LEN,
            align: LOG_PAGE_ALIGN,
        });
    }
    // bounded by LOG_PAGE_MAX_LEN
    Ok((len / 4 - 1) as u32)
}

/// SMART / Health Information log (LID 02h).
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SmartLog {
    pub critical_warning: u8,
    /// Composite temperature in Kelvin, always little endian.
    pub temperature: [u8; 2],
    pub avail_spare: u8,
    pub spare_thresh: u8,
    pub percent_used: u8,
    pub rsvd6: [u8; 26],
    pub data_units_read: [u8; 16],
    pub data_units_written: [u8; 16],
    pub host_reads: [u8; 16],
    pub host_writes: [u8; 16],
    pub ctrl_busy_time: [u8; 16],
    pub power_cycles: [u8; 16],
    pub power_on_hours: [u8; 16],
    pub unsafe_shutdowns: [u8; 16],
    pub media_errors: [u8; 16],
    pub num_err_log_entries: [u8; 16],
    pub warning_temp_time: Ne32,
    pub crit_comp_time: Ne32,
    pub temp_sensor: [Ne16; 8],
    pub rsvd216: [u8; 296],
}

fixed_layout!(SmartLog, LOG_PAGE_512);

impl SmartLog {
    pub fn temperature_kelvin(&self) -> u16 {
        u16::from_le_bytes(self.temperature)
    }

    pub fn temperature_celsius(&self) -> i32 {
        i32::from(self.temperature_kelvin()) - 273
    }

    /// Implemented temperature sensors as `(index, kelvin)`, 1 based.
    pub fn temperature_sensors(&self) -> Vec<(usize, u16)> {
        self.temp_sensor
            .iter()
            .enumerate()
            .filter(|(_, t)| t.get() != 0)
            .map(|(i, t)| (i + 1, t.get()))
            .collect()
    }

    pub fn data_units_read(&self) -> u128 {
        decode_le128(&self.data_units_read)
    }

    pub fn data_units_written(&self) -> u128 {
        decode_le128(&self.data_units_written)
    }

    pub fn host_read_commands(&self) -> u128 {
        decode_le128(&self.host_reads)
    }

    pub fn host_write_commands(&self) -> u128 {
        decode_le128(&self.host_writes)
    }

    pub fn controller_busy_time(&self) -> u128 {
        decode_le128(&self.ctrl_busy_time)
    }

    pub fn power_cycles(&self) -> u128 {
        decode_le128(&self.power_cycles)
    }

    pub fn power_on_hours(&self) -> u128 {
        decode_le128(&self.power_on_hours)
    }

    pub fn unsafe_shutdowns(&self) -> u128 {
        decode_le128(&self.unsafe_shutdowns)
    }

    pub fn media_errors(&self) -> u128 {
        decode_le128(&self.media_errors)
    }

    pub fn error_log_entries(&self) -> u128 {
        decode_le128(&self.num_err_log_entries)
    }

    pub fn summary(&self) -> SmartSummary {
        let human = |units: u128| data_units_to_bytes(units).map(format_human_bytes);
        SmartSummary {
            critical_warning: self.critical_warning,
            temperature_celsius: self.temperature_celsius(),
            available_spare: self.avail_spare,
            available_spare_threshold: self.spare_thresh,
            percentage_used: self.percent_used,
            data_units_read: self.data_units_read(),
            data_read: human(self.data_units_read()),
            data_units_written: self.data_units_written(),
            data_written: human(self.data_units_written()),
            host_read_commands: self.host_read_commands(),
            host_write_commands: self.host_write_commands(),
            controller_busy_time: self.controller_busy_time(),
            power_cycles: self.power_cycles(),
            power_on_hours: self.power_on_hours(),
            unsafe_shutdowns: self.unsafe_shutdowns(),
            media_errors: self.media_errors(),
            error_log_entries: self.error_log_entries(),
            warning_temp_time: self.warning_temp_time.get(),
            critical_comp_time: self.crit_comp_time.get(),
        }
    }
}

/// Decoded SMART counters, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmartSummary {
    pub critical_warning: u8,
    pub temperature_celsius: i32,
    pub available_spare: u8,
    pub available_spare_threshold: u8,
    pub percentage_used: u8,
    pub data_units_read: u128,
    /// `None` when the byte total overflows 128 bits.
    pub data_read: Option<String>,
    pub data_units_written: u128,
    pub data_written: Option<String>,
    pub host_read_commands: u128,
    pub host_write_commands: u128,
    pub controller_busy_time: u128,
    pub power_cycles: u128,
    pub power_on_hours: u128,
    pub unsafe_shutdowns: u128,
    pub media_errors: u128,
    pub error_log_entries: u128,
    pub warning_temp_time: u32,
    pub critical_comp_time: u32,
}

/// Firmware Slot Information log (LID 03h).
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FirmwareSlotInfo {
    /// Active Firmware Info: bits 0..=2 running slot, bits 4..=6 next reset slot.
    pub afi: u8,
    pub rsvd1: [u8; 7],
    pub frs: [[u8; 8]; 7],
    pub rsvd64: [u8; 448],
}

fixed_layout!(FirmwareSlotInfo, LOG_PAGE_512);

fn slot_number(bits: u8) -> Option<u8> {
    match bits & 0x7 {
        0 => None,
        slot => Some(slot),
    }
}

impl FirmwareSlotInfo {
    /// Slot of the running firmware; slot 0 is invalid.
    pub fn active_slot(&self) -> Option<u8> {
        slot_number(self.afi)
    }

    /// Slot that will be activated at the next reset, if any.
    pub fn next_reset_slot(&self) -> Option<u8> {
        slot_number(self.afi >> 4)
    }

    /// Revision string stored in `slot` (1 through 7).
    pub fn revision(&self, slot: u8) -> Option<String> {
        let index = usize::from(slot).checked_sub(1)?;
        self.frs.get(index).map(|rev| trimmed_ascii(rev))
    }

    pub fn active_revision(&self) -> Option<String> {
        self.active_slot().and_then(|slot| self.revision(slot))
    }

    pub fn summary(&self) -> FirmwareSummary {
        FirmwareSummary {
            active_slot: self.active_slot(),
            next_reset_slot: self.next_reset_slot(),
            active_revision: self.active_revision(),
            slots: (1..=7u8)
                .map(|slot| FirmwareSlot {
                    slot,
                    revision: self.revision(slot).unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareSlot {
    pub slot: u8,
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareSummary {
    pub active_slot: Option<u8>,
    pub next_reset_slot: Option<u8>,
    pub active_revision: Option<String>,
    pub slots: Vec<FirmwareSlot>,
}
