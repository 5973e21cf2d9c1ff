//! NVMe command blocks and the builder that fills them.
//!
//! Two kernel ABI blocks are modelled: the 72-byte passthrough command used
//! for admin and generic I/O passthrough, and the 48-byte simple I/O block
//! used for plain reads and writes.

use crate::error::{NvmeError, Result};
use crate::identify::IdentifyParams;
use crate::layout::{fixed_layout, Ne16, Ne32, Ne64};
use crate::logpage::LogPageRequest;
use std::fmt;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// NVMe Admin command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdminOpcode {
    GetLogPage = 0x02,
    Identify = 0x06,
    Abort = 0x08,
    SetFeatures = 0x09,
    GetFeatures = 0x0A,
    AsyncEventRequest = 0x0C,
    NamespaceManagement = 0x0D,
    FirmwareCommit = 0x10,
    FirmwareImageDownload = 0x11,
    DeviceSelfTest = 0x14,
    NamespaceAttachment = 0x15,
    KeepAlive = 0x18,
    DirectiveSend = 0x19,
    DirectiveReceive = 0x1A,
    FormatNvm = 0x80,
    SecuritySend = 0x81,
    SecurityReceive = 0x82,
    Sanitize = 0x84,
    GetLbaStatus = 0x86,
}

impl AdminOpcode {
    /// Create from raw opcode
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::GetLogPage),
            0x06 => Some(Self::Identify),
            0x08 => Some(Self::Abort),
            0x09 => Some(Self::SetFeatures),
            0x0A => Some(Self::GetFeatures),
            0x0C => Some(Self::AsyncEventRequest),
            0x0D => Some(Self::NamespaceManagement),
            0x10 => Some(Self::FirmwareCommit),
            0x11 => Some(Self::FirmwareImageDownload),
            0x14 => Some(Self::DeviceSelfTest),
            0x15 => Some(Self::NamespaceAttachment),
            0x18 => Some(Self::KeepAlive),
            0x19 => Some(Self::DirectiveSend),
            0x1A => Some(Self::DirectiveReceive),
            0x80 => Some(Self::FormatNvm),
            0x81 => Some(Self::SecuritySend),
            0x82 => Some(Self::SecurityReceive),
            0x84 => Some(Self::Sanitize),
            0x86 => Some(Self::GetLbaStatus),
            _ => None,
        }
    }
}

/// NVM command set opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoOpcode {
    Flush = 0x00,
    Write = 0x01,
    Read = 0x02,
    WriteUncorrectable = 0x04,
    Compare = 0x05,
    WriteZeroes = 0x08,
    DatasetManagement = 0x09,
    Verify = 0x0C,
    ReservationRegister = 0x0D,
    ReservationReport = 0x0E,
    ReservationAcquire = 0x11,
    ReservationRelease = 0x15,
    Copy = 0x19,
}

impl IoOpcode {
    /// Create from raw opcode
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Flush),
            0x01 => Some(Self::Write),
            0x02 => Some(Self::Read),
            0x04 => Some(Self::WriteUncorrectable),
            0x05 => Some(Self::Compare),
            0x08 => Some(Self::WriteZeroes),
            0x09 => Some(Self::DatasetManagement),
            0x0C => Some(Self::Verify),
            0x0D => Some(Self::ReservationRegister),
            0x0E => Some(Self::ReservationReport),
            0x11 => Some(Self::ReservationAcquire),
            0x15 => Some(Self::ReservationRelease),
            0x19 => Some(Self::Copy),
            _ => None,
        }
    }
}

/// `struct nvme_passthru_cmd`: admin and I/O passthrough block (72 bytes).
#[repr(C)]
#[derive(Clone, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PassthruCommand {
    pub opcode: u8,
    pub flags: u8,
    pub rsvd1: Ne16,
    pub nsid: Ne32,
    pub cdw2: Ne32,
    pub cdw3: Ne32,
    pub metadata: Ne64,
    pub addr: Ne64,
    pub metadata_len: Ne32,
    pub data_len: Ne32,
    pub cdw10: Ne32,
    pub cdw11: Ne32,
    pub cdw12: Ne32,
    pub cdw13: Ne32,
    pub cdw14: Ne32,
    pub cdw15: Ne32,
    pub timeout_ms: Ne32,
    /// Completion dword 0, written back by the driver.
    pub result: Ne32,
}

fixed_layout!(PassthruCommand, 72);

impl PassthruCommand {
    /// Command dwords 10 through 15 in order.
    pub fn cdws(&self) -> [u32; 6] {
        [
            self.cdw10.get(),
            self.cdw11.get(),
            self.cdw12.get(),
            self.cdw13.get(),
            self.cdw14.get(),
            self.cdw15.get(),
        ]
    }
}

impl fmt::Debug for PassthruCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthruCommand")
            .field("opcode", &format_args!("{:#04x}", self.opcode))
            .field("nsid", &format_args!("{:#x}", self.nsid.get()))
            .field("data_len", &self.data_len.get())
            .field("cdw10", &format_args!("{:#010x}", self.cdw10.get()))
            .field("cdw11", &format_args!("{:#010x}", self.cdw11.get()))
            .field("cdw12", &format_args!("{:#010x}", self.cdw12.get()))
            .field("timeout_ms", &self.timeout_ms.get())
            .finish()
    }
}

/// `struct nvme_user_io`: simple I/O submission block.
///
/// The kernel structure is 44 bytes of fields rounded up to 8-byte alignment;
/// the tail is spelled out as `rsvd2`.
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserIo {
    pub opcode: u8,
    pub flags: u8,
    /// Upper half of CDW12 (FUA, LR, DTYPE, PRINFO).
    pub control: Ne16,
    /// Zero-based block count.
    pub nblocks: Ne16,
    pub rsvd: Ne16,
    pub metadata: Ne64,
    pub addr: Ne64,
    pub slba: Ne64,
    /// CDW13: dataset management in the low byte, DSPEC in the upper half.
    pub dsmgmt: Ne32,
    pub reftag: Ne32,
    pub apptag: Ne16,
    pub appmask: Ne16,
    pub rsvd2: [u8; 4],
}

fixed_layout!(UserIo, 48);

/// Directive type "Streams", as placed in the `control` half-word.
const DTYPE_STREAMS: u16 = 0x01;
/// DTYPE occupies CDW12 bits 20..=23, i.e. bits 4..=7 of `control`.
const DTYPE_SHIFT: u16 = 4;
/// DSPEC occupies the upper half of CDW13.
const DSPEC_SHIFT: u32 = 16;

/// Assembles a [`PassthruCommand`].
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    opcode: u8,
    flags: u8,
    nsid: u32,
    cdw: [u32; 6],
    timeout_ms: u32,
}

impl CommandBuilder {
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            ..Default::default()
        }
    }

    pub fn admin(opcode: AdminOpcode) -> Self {
        Self::new(opcode as u8)
    }

    pub fn io(opcode: IoOpcode) -> Self {
        Self::new(opcode as u8)
    }

    /// Admin Identify with CNS, CNTID, CNSSID, CSI and UUID index packed.
    pub fn identify(params: &IdentifyParams) -> Self {
        Self::admin(AdminOpcode::Identify)
            .nsid(params.nsid)
            .cdw10(params.cdw10())
            .cdw11(params.cdw11())
            .cdw14(params.cdw14())
    }

    pub fn get_log_page(nsid: u32, request: &LogPageRequest) -> Self {
        let [cdw10, cdw11, cdw12, cdw13, cdw14] = request.cdws();
        Self::admin(AdminOpcode::GetLogPage)
            .nsid(nsid)
            .cdw10(cdw10)
            .cdw11(cdw11)
            .cdw12(cdw12)
            .cdw13(cdw13)
            .cdw14(cdw14)
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn nsid(mut self, nsid: u32) -> Self {
        self.nsid = nsid;
        self
    }

    pub fn cdw10(mut self, value: u32) -> Self {
        self.cdw[0] = value;
        self
    }

    pub fn cdw11(mut self, value: u32) -> Self {
        self.cdw[1] = value;
        self
    }

    pub fn cdw12(mut self, value: u32) -> Self {
        self.cdw[2] = value;
        self
    }

    pub fn cdw13(mut self, value: u32) -> Self {
        self.cdw[3] = value;
        self
    }

    pub fn cdw14(mut self, value: u32) -> Self {
        self.cdw[4] = value;
        self
    }

    pub fn cdw15(mut self, value: u32) -> Self {
        self.cdw[5] = value;
        self
    }

    /// Zero means the driver default.
    pub fn timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// The data pointer and length stay zero until the block is bound to a
    /// buffer by a [`Submission`](crate::transport::Submission).
    pub fn build(self) -> PassthruCommand {
        let [cdw10, cdw11, cdw12, cdw13, cdw14, cdw15] = self.cdw;
        PassthruCommand {
            opcode: self.opcode,
            flags: self.flags,
            nsid: self.nsid.into(),
            cdw10: cdw10.into(),
            cdw11: cdw11.into(),
            cdw12: cdw12.into(),
            cdw13: cdw13.into(),
            cdw14: cdw14.into(),
            cdw15: cdw15.into(),
            timeout_ms: self.timeout_ms.into(),
            ..Default::default()
        }
    }
}

/// Build a simple I/O block for `blocks` logical blocks starting at `lba`.
///
/// The wire count is zero based, so `blocks == 0` is rejected rather than
/// wrapped. A non-zero `write_hint` is sent as a Streams directive.
pub fn block_io(opcode: IoOpcode, lba: u64, blocks: u16, write_hint: u16) -> Result<UserIo> {
    let nblocks = blocks.checked_sub(1).ok_or(NvmeError::ZeroBlockCount)?;

    let mut io = UserIo {
        opcode: opcode as u8,
        nblocks: nblocks.into(),
        slba: lba.into(),
        ..Default::default()
    };

    if write_hint != 0 {
        io.control = (DTYPE_STREAMS << DTYPE_SHIFT).into();
        io.dsmgmt = (u32::from(write_hint) << DSPEC_SHIFT).into();
    }

    Ok(io)
}
