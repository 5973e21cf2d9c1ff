//! Identify command parameters and the pages it returns.

use crate::bitfield::{control_word, ControlWord};
use crate::error::{NvmeError, Result};
use crate::layout::{fixed_layout, trimmed_ascii, Ne16, Ne32, Ne64};
use crate::wide::decode_le128;
use serde::Serialize;
use std::fmt;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of every Identify data structure.
pub const IDENTIFY_DATA_SIZE: usize = 4096;

/// Controller or Namespace Structure selector (CDW10 bits 0..=7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cns {
    Namespace = 0x00,
    Controller = 0x01,
    ActiveNamespaceList = 0x02,
    NamespaceIdDescriptors = 0x03,
    NvmSetList = 0x04,
    IoCommandSetNamespace = 0x05,
    IoCommandSetController = 0x06,
    IoCommandSetActiveNamespaceList = 0x07,
    IoCommandSetIndependentNamespace = 0x08,
    AllocatedNamespaceList = 0x10,
    AllocatedNamespace = 0x11,
    NamespaceControllerList = 0x12,
    ControllerList = 0x13,
    PrimaryControllerCapabilities = 0x14,
    SecondaryControllerList = 0x15,
    NamespaceGranularityList = 0x16,
    UuidList = 0x17,
    DomainList = 0x18,
    EnduranceGroupList = 0x19,
    IoCommandSetAllocatedNamespaceList = 0x1a,
    IoCommandSetAllocatedNamespace = 0x1b,
    IoCommandSet = 0x1c,
}

impl Cns {
    pub fn from_raw(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::Namespace,
            0x01 => Self::Controller,
            0x02 => Self::ActiveNamespaceList,
            0x03 => Self::NamespaceIdDescriptors,
            0x04 => Self::NvmSetList,
            0x05 => Self::IoCommandSetNamespace,
            0x06 => Self::IoCommandSetController,
            0x07 => Self::IoCommandSetActiveNamespaceList,
            0x08 => Self::IoCommandSetIndependentNamespace,
            0x10 => Self::AllocatedNamespaceList,
            0x11 => Self::AllocatedNamespace,
            0x12 => Self::NamespaceControllerList,
            0x13 => Self::ControllerList,
            0x14 => Self::PrimaryControllerCapabilities,
            0x15 => Self::SecondaryControllerList,
            0x16 => Self::NamespaceGranularityList,
            0x17 => Self::UuidList,
            0x18 => Self::DomainList,
            0x19 => Self::EnduranceGroupList,
            0x1a => Self::IoCommandSetAllocatedNamespaceList,
            0x1b => Self::IoCommandSetAllocatedNamespace,
            0x1c => Self::IoCommandSet,
            _ => return None,
        })
    }
}

control_word! {
    /// Identify CDW10.
    IdentifyCdw10, IdentifyCdw10Field {
        cns => Cns @ 0,
        cntid => Cntid @ 16,
    }
}

control_word! {
    /// Identify CDW11.
    IdentifyCdw11, IdentifyCdw11Field {
        cnssid => Cnssid @ 0,
        csi => Csi @ 24,
    }
}

control_word! {
    /// Identify CDW14.
    IdentifyCdw14, IdentifyCdw14Field {
        uuid_index => UuidIndex @ 0,
    }
}

/// Everything an Identify command can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyParams {
    pub nsid: u32,
    pub cns: u8,
    pub cntid: u16,
    pub cnssid: u16,
    pub csi: u8,
    pub uuid_index: u8,
}

impl IdentifyParams {
    pub fn new(cns: Cns, nsid: u32) -> Self {
        Self {
            nsid,
            cns: cns as u8,
            cntid: 0,
            cnssid: 0,
            csi: 0,
            uuid_index: 0,
        }
    }

    pub fn controller() -> Self {
        Self::new(Cns::Controller, 0)
    }

    pub fn namespace(nsid: u32) -> Self {
        Self::new(Cns::Namespace, nsid)
    }

    pub fn cdw10(&self) -> u32 {
        IdentifyCdw10 {
            cns: self.cns.into(),
            cntid: self.cntid.into(),
        }
        .pack()
    }

    pub fn cdw11(&self) -> u32 {
        IdentifyCdw11 {
            cnssid: self.cnssid.into(),
            csi: self.csi.into(),
        }
        .pack()
    }

    pub fn cdw14(&self) -> u32 {
        IdentifyCdw14 {
            uuid_index: self.uuid_index.into(),
        }
        .pack()
    }
}

/// Power State Descriptor (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PowerStateDescriptor {
    /// Maximum power, centiwatts unless `flags` selects 0.0001 W.
    pub mp: Ne16,
    pub rsvd2: u8,
    pub flags: u8,
    /// Entry latency, microseconds.
    pub enlat: Ne32,
    /// Exit latency, microseconds.
    pub exlat: Ne32,
    pub rrt: u8,
    pub rrl: u8,
    pub rwt: u8,
    pub rwl: u8,
    pub idlp: Ne16,
    pub ips: u8,
    pub rsvd19: u8,
    pub actp: Ne16,
    pub apw_aps: u8,
    pub rsvd23: [u8; 9],
}

fixed_layout!(PowerStateDescriptor, 32);

impl PowerStateDescriptor {
    /// Non-operational state flag.
    pub fn non_operational(&self) -> bool {
        self.flags & 0x02 != 0
    }
}

/// Identify Controller data structure (CNS 01h).
#[repr(C)]
#[derive(Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IdentifyController {
    pub vid: Ne16,
    pub ssvid: Ne16,
    pub sn: [u8; 20],
    pub mn: [u8; 40],
    pub fr: [u8; 8],
    pub rab: u8,
    pub ieee: [u8; 3],
    pub cmic: u8,
    pub mdts: u8,
    pub cntlid: Ne16,
    pub ver: Ne32,
    pub rtd3r: Ne32,
    pub rtd3e: Ne32,
    pub oaes: Ne32,
    pub ctratt: Ne32,
    pub rrls: Ne16,
    pub rsvd102: [u8; 9],
    pub cntrltype: u8,
    pub fguid: [u8; 16],
    pub crdt1: Ne16,
    pub crdt2: Ne16,
    pub crdt3: Ne16,
    pub rsvd134: [u8; 122],
    pub oacs: Ne16,
    pub acl: u8,
    pub aerl: u8,
    pub frmw: u8,
    pub lpa: u8,
    pub elpe: u8,
    pub npss: u8,
    pub avscc: u8,
    pub apsta: u8,
    pub wctemp: Ne16,
    pub cctemp: Ne16,
    pub mtfa: Ne16,
    pub hmpre: Ne32,
    pub hmmin: Ne32,
    pub tnvmcap: [u8; 16],
    pub unvmcap: [u8; 16],
    pub rpmbs: Ne32,
    pub rsvd316: [u8; 196],
    pub sqes: u8,
    pub cqes: u8,
    pub maxcmd: Ne16,
    pub nn: Ne32,
    pub oncs: Ne16,
    pub fuses: Ne16,
    pub fna: u8,
    pub vwc: u8,
    pub awun: Ne16,
    pub awupf: Ne16,
    pub nvscc: u8,
    pub nwpc: u8,
    pub acwu: Ne16,
    pub rsvd534: [u8; 2],
    pub sgls: Ne32,
    pub rsvd540: [u8; 1508],
    pub psd: [PowerStateDescriptor; 32],
    pub vs: [u8; 1024],
}

fixed_layout!(IdentifyController, IDENTIFY_DATA_SIZE);

impl IdentifyController {
    pub fn serial(&self) -> String {
        trimmed_ascii(&self.sn)
    }

    pub fn model(&self) -> String {
        trimmed_ascii(&self.mn)
    }

    pub fn firmware(&self) -> String {
        trimmed_ascii(&self.fr)
    }

    /// IEEE OUI; the identifier is stored least significant byte first.
    pub fn oui(&self) -> u32 {
        u32::from(self.ieee[0]) | u32::from(self.ieee[1]) << 8 | u32::from(self.ieee[2]) << 16
    }

    /// Maximum data transfer size in units of the minimum memory page size.
    /// Zero when the exponent does not fit, which also covers "no limit".
    pub fn max_data_transfer_size(&self) -> u64 {
        1u64.checked_shl(u32::from(self.mdts)).unwrap_or(0)
    }

    pub fn total_capacity(&self) -> u128 {
        decode_le128(&self.tnvmcap)
    }

    pub fn unallocated_capacity(&self) -> u128 {
        decode_le128(&self.unvmcap)
    }

    /// Power states the controller reports (NPSS is zero based).
    pub fn power_states(&self) -> &[PowerStateDescriptor] {
        let count = usize::from(self.npss) + 1;
        &self.psd[..count.min(self.psd.len())]
    }

    pub fn summary(&self) -> ControllerSummary {
        ControllerSummary {
            vendor_id: self.vid.get(),
            model: self.model(),
            serial: self.serial(),
            firmware: self.firmware(),
            oui: self.oui(),
            max_data_transfer_size: self.max_data_transfer_size(),
        }
    }
}

impl fmt::Debug for IdentifyController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifyController")
            .field("vid", &format_args!("{:#06x}", self.vid.get()))
            .field("sn", &self.serial())
            .field("mn", &self.model())
            .field("fr", &self.firmware())
            .field("mdts", &self.mdts)
            .field("cntlid", &self.cntlid.get())
            .field("ver", &format_args!("{:#010x}", self.ver.get()))
            .field("nn", &self.nn.get())
            .field("npss", &self.npss)
            .finish_non_exhaustive()
    }
}

/// Identity fields kept by a session after `identify_controller`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerSummary {
    pub vendor_id: u16,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub oui: u32,
    pub max_data_transfer_size: u64,
}

/// LBA Format Data Structure.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct LbaFormat {
    /// Metadata size in bytes.
    pub ms: Ne16,
    /// LBA data size as a power of two.
    pub lbads: u8,
    /// Relative performance.
    pub rp: u8,
}

fixed_layout!(LbaFormat, 4);

/// Identify Namespace data structure (CNS 00h).
#[repr(C)]
#[derive(Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IdentifyNamespace {
    pub nsze: Ne64,
    pub ncap: Ne64,
    pub nuse: Ne64,
    pub nsfeat: u8,
    /// Number of LBA formats, zero based.
    pub nlbaf: u8,
    pub flbas: u8,
    pub mc: u8,
    pub dpc: u8,
    pub dps: u8,
    pub nmic: u8,
    pub rescap: u8,
    pub fpi: u8,
    pub dlfeat: u8,
    pub nawun: Ne16,
    pub nawupf: Ne16,
    pub nacwu: Ne16,
    pub nabsn: Ne16,
    pub nabo: Ne16,
    pub nabspf: Ne16,
    pub noiob: Ne16,
    pub nvmcap: [u8; 16],
    pub npwg: Ne16,
    pub npwa: Ne16,
    pub npdg: Ne16,
    pub npda: Ne16,
    pub nows: Ne16,
    pub rsvd74: [u8; 30],
    pub nguid: [u8; 16],
    pub eui64: [u8; 8],
    pub lbaf: [LbaFormat; 16],
    pub rsvd192: [u8; 192],
    pub vs: [u8; 3712],
}

fixed_layout!(IdentifyNamespace, IDENTIFY_DATA_SIZE);

impl IdentifyNamespace {
    /// Index of the LBA format in use (FLBAS bits 0..=3).
    pub fn active_lba_format_index(&self) -> u8 {
        self.flbas & 0x0f
    }

    pub fn active_lba_format(&self) -> LbaFormat {
        self.lbaf[usize::from(self.active_lba_format_index())]
    }

    /// Logical block size in bytes of the active LBA format.
    pub fn logical_block_size(&self) -> Result<u64> {
        let index = self.active_lba_format_index();
        let lbads = self.active_lba_format().lbads;
        1u64.checked_shl(u32::from(lbads))
            .ok_or(NvmeError::InvalidLbaFormat { index, lbads })
    }

    pub fn capacity(&self) -> u128 {
        decode_le128(&self.nvmcap)
    }
}

impl fmt::Debug for IdentifyNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifyNamespace")
            .field("nsze", &self.nsze.get())
            .field("ncap", &self.ncap.get())
            .field("nuse", &self.nuse.get())
            .field("nlbaf", &self.nlbaf)
            .field("flbas", &format_args!("{:#04x}", self.flbas))
            .field("lbaf", &self.active_lba_format())
            .finish_non_exhaustive()
    }
}

/// Serializable view of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceSummary {
    pub nsid: u32,
    pub size_blocks: u64,
    pub capacity_blocks: u64,
    pub utilization_blocks: u64,
    pub lba_format: u8,
    pub block_size: u64,
    pub metadata_size: u16,
    pub eui64: String,
}

impl NamespaceSummary {
    pub fn new(nsid: u32, ns: &IdentifyNamespace) -> Result<Self> {
        let lbaf = ns.active_lba_format();
        Ok(Self {
            nsid,
            size_blocks: ns.nsze.get(),
            capacity_blocks: ns.ncap.get(),
            utilization_blocks: ns.nuse.get(),
            lba_format: ns.active_lba_format_index(),
            block_size: ns.logical_block_size()?,
            metadata_size: lbaf.ms.get(),
            eui64: ns.eui64.iter().map(|b| format!("{b:02x}")).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FixedLayout;
    use zerocopy::FromZeros;

    fn padded<const N: usize>(text: &str) -> [u8; N] {
        let mut field = [b' '; N];
        field[..text.len()].copy_from_slice(text.as_bytes());
        field
    }

    #[test]
    fn test_identify_controller_offsets() {
        let mut ctrl = IdentifyController::new_zeroed();
        ctrl.vid = 0x144du16.into();
        ctrl.sn = padded("S4EWNX0R123456");
        ctrl.mdts = 5;
        ctrl.sqes = 0x66;
        ctrl.nn = 1u32.into();
        ctrl.psd[0].mp = 800u16.into();
        ctrl.vs[1023] = 0xaa;

        let bytes = ctrl.encode();
        assert_eq!(bytes.len(), 4096);
        assert_eq!(&bytes[0..2], &0x144du16.to_ne_bytes());
        assert_eq!(&bytes[4..18], b"S4EWNX0R123456");
        assert_eq!(bytes[77], 5);
        assert_eq!(bytes[512], 0x66);
        assert_eq!(&bytes[516..520], &1u32.to_ne_bytes());
        assert_eq!(&bytes[2048..2050], &800u16.to_ne_bytes());
        assert_eq!(bytes[4095], 0xaa);
    }

    #[test]
    fn test_controller_summary() {
        let mut ctrl = IdentifyController::new_zeroed();
        ctrl.vid = 0x8086u16.into();
        ctrl.mn = padded("INTEL SSDPE2KX010T8");
        ctrl.sn = padded("PHLJ000000001P0FGN");
        ctrl.fr = padded("VDV10131");
        ctrl.ieee = [0xe4, 0xd2, 0x5c];
        ctrl.mdts = 5;

        let summary = ctrl.summary();
        assert_eq!(summary.vendor_id, 0x8086);
        assert_eq!(summary.model, "INTEL SSDPE2KX010T8");
        assert_eq!(summary.serial, "PHLJ000000001P0FGN");
        assert_eq!(summary.firmware, "VDV10131");
        assert_eq!(summary.oui, 0x5cd2e4);
        assert_eq!(summary.max_data_transfer_size, 32);
    }

    #[test]
    fn test_mdts_overflow_is_zero() {
        let mut ctrl = IdentifyController::new_zeroed();
        ctrl.mdts = 64;
        assert_eq!(ctrl.max_data_transfer_size(), 0);
        ctrl.mdts = 0;
        assert_eq!(ctrl.max_data_transfer_size(), 1);
    }

    #[test]
    fn test_power_states_follow_npss() {
        let mut ctrl = IdentifyController::new_zeroed();
        ctrl.npss = 2;
        ctrl.psd[2].flags = 0x02;
        let states = ctrl.power_states();
        assert_eq!(states.len(), 3);
        assert!(states[2].non_operational());
        assert!(!states[0].non_operational());
    }

    #[test]
    fn test_identify_namespace_offsets() {
        let mut ns = IdentifyNamespace::new_zeroed();
        ns.nsze = 0x1000u64.into();
        ns.flbas = 0x12;
        ns.dlfeat = 0x09;
        ns.noiob = 0x20u16.into();
        ns.eui64 = [1, 2, 3, 4, 5, 6, 7, 8];
        ns.lbaf[2] = LbaFormat {
            ms: 8u16.into(),
            lbads: 12,
            rp: 0,
        };

        let bytes = ns.encode();
        assert_eq!(&bytes[0..8], &0x1000u64.to_ne_bytes());
        assert_eq!(bytes[26], 0x12);
        assert_eq!(bytes[33], 0x09);
        assert_eq!(&bytes[46..48], &0x20u16.to_ne_bytes());
        assert_eq!(&bytes[120..128], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[136..138], &8u16.to_ne_bytes());
        assert_eq!(bytes[138], 12);
        assert_eq!(IdentifyNamespace::decode(&bytes).unwrap(), ns);
    }

    #[test]
    fn test_logical_block_size_uses_flbas_low_nibble() {
        let mut ns = IdentifyNamespace::new_zeroed();
        ns.flbas = 0x02;
        ns.lbaf[2].lbads = 9;
        assert_eq!(ns.logical_block_size().unwrap(), 512);

        // upper nibble is metadata placement, not the index
        ns.flbas = 0x12;
        assert_eq!(ns.active_lba_format_index(), 2);
        assert_eq!(ns.logical_block_size().unwrap(), 512);
    }

    #[test]
    fn test_logical_block_size_rejects_huge_exponent() {
        let mut ns = IdentifyNamespace::new_zeroed();
        ns.lbaf[0].lbads = 64;
        let err = ns.logical_block_size().unwrap_err();
        assert!(matches!(
            err,
            NvmeError::InvalidLbaFormat { index: 0, lbads: 64 }
        ));
    }

    #[test]
    fn test_params_pack_control_words() {
        let params = IdentifyParams {
            nsid: 0,
            cns: Cns::IoCommandSetController as u8,
            cntid: 0x0042,
            cnssid: 0x0007,
            csi: 2,
            uuid_index: 5,
        };
        assert_eq!(params.cdw10(), 0x0042_0006);
        assert_eq!(params.cdw11(), 0x0200_0007);
        assert_eq!(params.cdw14(), 5);

        assert_eq!(IdentifyParams::controller().cdw10(), 1);
        assert_eq!(IdentifyParams::namespace(3).cdw10(), 0);
    }

    #[test]
    fn test_namespace_summary() {
        let mut ns = IdentifyNamespace::new_zeroed();
        ns.nsze = 2048u64.into();
        ns.lbaf[0].lbads = 12;
        ns.eui64 = [0, 0x25, 0x38, 0xb5, 0x71, 0xb0, 0x3a, 0x01];
        let summary = NamespaceSummary::new(1, &ns).unwrap();
        assert_eq!(summary.block_size, 4096);
        assert_eq!(summary.size_blocks, 2048);
        assert_eq!(summary.eui64, "002538b571b03a01");
    }

    #[test]
    fn test_cns_from_raw() {
        assert_eq!(Cns::from_raw(1), Some(Cns::Controller));
        assert_eq!(Cns::from_raw(0x1c), Some(Cns::IoCommandSet));
        assert_eq!(Cns::from_raw(0x09), None);
    }
}
