//! In-memory NVMe controller for exercising `protocol-nvme` without hardware.
//!
//! [`SimController`] implements [`Transport`], so a
//! [`DeviceSession`](protocol_nvme::DeviceSession) drives it exactly as it
//! would drive `/dev/nvme*`. It answers Identify (controller and namespace),
//! the SMART and firmware slot log pages, and reads/writes through both the
//! simple I/O and the I/O passthrough paths.
//!
//! # Design Philosophy
//!
//! - **RAM-backed**: every namespace is a `Vec<u8>`; nothing touches disk
//! - **Observable**: every submission is recorded for test assertions
//! - **Fault Injection**: the next command can be failed with a chosen status
//!
//! # Example
//!
//! ```
//! use protocol_nvme::DeviceSession;
//! use sim_nvme::SimController;
//!
//! let sim = SimController::new(Default::default()).unwrap();
//! let mut session = DeviceSession::new(sim);
//! session.identify_controller().unwrap();
//! assert_eq!(session.bind_namespace(1).unwrap(), 512);
//!
//! let mut block = vec![0u8; 512];
//! session.read(0, 1, &mut block).unwrap();
//! ```

mod config;
mod namespace;

pub use config::{SimControllerConfig, SimNamespaceConfig};
pub use namespace::SimNamespace;

use anyhow::Result;
use protocol_nvme::bitfield::extract_bits;
use protocol_nvme::identify::Cns;
use protocol_nvme::layout::Ne16;
use protocol_nvme::logpage::LogPageId;
use protocol_nvme::{
    AdminOpcode, CommandBlock, DataBuffer, FirmwareSlotInfo, IdentifyController, IoOpcode,
    PassthruCommand, SmartLog, SubmitMode, Submission, Transport, TransportError, UserIo,
};
use std::collections::BTreeMap;
use tracing::{debug, info, trace, warn};
use zerocopy::{FromZeros, IntoBytes};

/// NVMe generic command status codes returned by the simulator.
pub mod status {
    pub const INVALID_OPCODE: u16 = 0x01;
    pub const INVALID_FIELD: u16 = 0x02;
    pub const INVALID_NAMESPACE: u16 = 0x0b;
    pub const LBA_OUT_OF_RANGE: u16 = 0x80;
}

const TRANSPORT_NAME: &str = "sim-nvme";

/// One recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub mode: SubmitMode,
    pub opcode: u8,
    /// Zero for simple I/O, which carries no namespace id.
    pub nsid: u32,
    /// CDW10 through CDW15; for simple I/O only the fields it maps onto.
    pub cdws: [u32; 6],
    pub data_len: usize,
}

impl SubmissionRecord {
    fn capture(submission: &Submission<'_>) -> Self {
        let data_len = submission.data().len();
        match submission.block() {
            CommandBlock::Passthru(cmd) => Self {
                mode: submission.mode(),
                opcode: cmd.opcode,
                nsid: cmd.nsid.get(),
                cdws: cmd.cdws(),
                data_len,
            },
            CommandBlock::UserIo(io) => {
                let slba = io.slba.get();
                Self {
                    mode: submission.mode(),
                    opcode: io.opcode,
                    nsid: 0,
                    cdws: [
                        slba as u32,
                        (slba >> 32) as u32,
                        u32::from(io.nblocks.get()) | u32::from(io.control.get()) << 16,
                        io.dsmgmt.get(),
                        io.reftag.get(),
                        u32::from(io.apptag.get()) | u32::from(io.appmask.get()) << 16,
                    ],
                    data_len,
                }
            }
        }
    }
}

/// Host-visible SMART counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmartCounters {
    /// 512-byte units transferred to the host
    pub sectors_read: u128,
    /// 512-byte units transferred from the host
    pub sectors_written: u128,
    pub host_read_commands: u128,
    pub host_write_commands: u128,
}

impl SmartCounters {
    /// Thousands of 512-byte units, rounded up.
    pub fn data_units_read(&self) -> u128 {
        self.sectors_read.div_ceil(1000)
    }

    pub fn data_units_written(&self) -> u128 {
        self.sectors_written.div_ceil(1000)
    }
}

/// Simulated NVMe controller.
#[derive(Debug)]
pub struct SimController {
    config: SimControllerConfig,
    namespaces: BTreeMap<u32, SimNamespace>,
    /// Namespace behind simple I/O submissions (the "device node").
    io_nsid: u32,
    counters: SmartCounters,
    submissions: Vec<SubmissionRecord>,
    pending_fault: Option<u32>,
}

fn status(code: u16) -> TransportError {
    TransportError::Status {
        status: code.into(),
    }
}

fn unsupported(opcode: u8) -> TransportError {
    TransportError::Unsupported {
        transport: TRANSPORT_NAME,
        opcode,
    }
}

/// Space padded, truncated ASCII field.
fn ascii_field<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let len = text.len().min(N);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
    field
}

fn device_buffer<'b>(data: &'b mut DataBuffer<'_>) -> Result<&'b mut [u8], TransportError> {
    match data {
        DataBuffer::FromDevice(buf) => Ok(&mut **buf),
        _ => Err(status(status::INVALID_FIELD)),
    }
}

fn host_buffer<'b>(data: &'b DataBuffer<'_>) -> Result<&'b [u8], TransportError> {
    match data {
        DataBuffer::ToDevice(buf) => Ok(buf),
        _ => Err(status(status::INVALID_FIELD)),
    }
}

/// Copy `page[offset..]` into `buf`, zero-filling past the end of the page.
fn copy_page(page: &[u8], offset: usize, buf: &mut [u8]) -> Result<(), TransportError> {
    let tail = page.get(offset..).ok_or_else(|| status(status::INVALID_FIELD))?;
    let n = tail.len().min(buf.len());
    buf[..n].copy_from_slice(&tail[..n]);
    buf[n..].fill(0);
    Ok(())
}

impl SimController {
    pub fn new(config: SimControllerConfig) -> Result<Self> {
        config.validate()?;
        let namespaces: BTreeMap<u32, SimNamespace> = config
            .namespaces
            .iter()
            .map(|ns| (ns.nsid, SimNamespace::new(ns)))
            .collect();
        let io_nsid = config.namespaces[0].nsid;
        info!(
            model = %config.model,
            namespaces = namespaces.len(),
            io_nsid,
            "Starting NVMe controller simulation"
        );
        Ok(Self {
            config,
            namespaces,
            io_nsid,
            counters: SmartCounters::default(),
            submissions: Vec::new(),
            pending_fault: None,
        })
    }

    pub fn config(&self) -> &SimControllerConfig {
        &self.config
    }

    pub fn namespace(&self, nsid: u32) -> Option<&SimNamespace> {
        self.namespaces.get(&nsid)
    }

    /// Namespace that simple I/O submissions address.
    pub fn bind_io_namespace(&mut self, nsid: u32) -> Result<()> {
        anyhow::ensure!(self.namespaces.contains_key(&nsid), "no namespace {nsid}");
        self.io_nsid = nsid;
        Ok(())
    }

    pub fn counters(&self) -> SmartCounters {
        self.counters
    }

    pub fn submissions(&self) -> &[SubmissionRecord] {
        &self.submissions
    }

    pub fn clear_submissions(&mut self) {
        self.submissions.clear();
    }

    /// Fail the next submission with `status` after recording it.
    pub fn fail_next_with_status(&mut self, status: u32) {
        debug!(status, "Fault armed");
        self.pending_fault = Some(status);
    }

    pub fn identify_controller_page(&self) -> IdentifyController {
        let cfg = &self.config;
        let mut ctrl = IdentifyController::new_zeroed();
        ctrl.vid = cfg.vendor_id.into();
        ctrl.ssvid = cfg.subsystem_vendor_id.into();
        ctrl.sn = ascii_field(&cfg.serial);
        ctrl.mn = ascii_field(&cfg.model);
        ctrl.fr = ascii_field(&cfg.firmware);
        let oui = cfg.ieee_oui.to_le_bytes();
        ctrl.ieee = [oui[0], oui[1], oui[2]];
        ctrl.mdts = cfg.mdts;
        ctrl.cntlid = 1u16.into();
        ctrl.ver = 0x0001_0400u32.into();
        // slot 1 read/write, slot count in bits 1..=3
        ctrl.frmw = (cfg.firmware_slots.len().max(1) as u8) << 1;
        ctrl.lpa = 0x02;
        ctrl.elpe = 63;
        ctrl.npss = 0;
        ctrl.wctemp = 343u16.into();
        ctrl.cctemp = 353u16.into();
        let total: u128 = self.namespaces.values().map(SimNamespace::capacity_bytes).sum();
        ctrl.tnvmcap = total.to_le_bytes();
        ctrl.sqes = 0x66;
        ctrl.cqes = 0x44;
        ctrl.nn = self.namespaces.keys().copied().max().unwrap_or(0).into();
        ctrl.psd[0].mp = 2500u16.into();
        ctrl
    }

    pub fn smart_log_page(&self) -> SmartLog {
        let cfg = &self.config;
        let mut log = SmartLog::new_zeroed();
        log.critical_warning = cfg.critical_warning;
        log.temperature = cfg.temperature_kelvin.to_le_bytes();
        log.avail_spare = 100;
        log.spare_thresh = 10;
        log.data_units_read = self.counters.data_units_read().to_le_bytes();
        log.data_units_written = self.counters.data_units_written().to_le_bytes();
        log.host_reads = self.counters.host_read_commands.to_le_bytes();
        log.host_writes = self.counters.host_write_commands.to_le_bytes();
        log.power_cycles = u128::from(cfg.power_cycles).to_le_bytes();
        log.power_on_hours = u128::from(cfg.power_on_hours).to_le_bytes();
        log.temp_sensor[0] = Ne16::new(cfg.temperature_kelvin);
        log
    }

    pub fn firmware_slot_page(&self) -> FirmwareSlotInfo {
        let mut info = FirmwareSlotInfo::new_zeroed();
        info.afi = self.config.active_slot & 0x7;
        for (slot, revision) in info.frs.iter_mut().zip(&self.config.firmware_slots) {
            *slot = ascii_field(revision);
        }
        info
    }

    fn admin(
        &mut self,
        cmd: &PassthruCommand,
        data: &mut DataBuffer<'_>,
    ) -> Result<u32, TransportError> {
        match AdminOpcode::from_raw(cmd.opcode) {
            Some(AdminOpcode::Identify) => self.identify(cmd, data),
            Some(AdminOpcode::GetLogPage) => self.get_log_page(cmd, data),
            _ => Err(unsupported(cmd.opcode)),
        }
    }

    fn identify(
        &mut self,
        cmd: &PassthruCommand,
        data: &mut DataBuffer<'_>,
    ) -> Result<u32, TransportError> {
        let cns = extract_bits(cmd.cdw10.get().into(), 0, 7) as u8;
        let buf = device_buffer(data)?;
        match Cns::from_raw(cns) {
            Some(Cns::Controller) => copy_page(self.identify_controller_page().as_bytes(), 0, buf)?,
            Some(Cns::Namespace) => {
                let nsid = cmd.nsid.get();
                let ns = self
                    .namespaces
                    .get(&nsid)
                    .ok_or_else(|| status(status::INVALID_NAMESPACE))?;
                copy_page(ns.identify().as_bytes(), 0, buf)?;
            }
            _ => return Err(unsupported(cmd.opcode)),
        }
        trace!(cns, "Identify served");
        Ok(0)
    }

    fn get_log_page(
        &mut self,
        cmd: &PassthruCommand,
        data: &mut DataBuffer<'_>,
    ) -> Result<u32, TransportError> {
        let cdw10 = u64::from(cmd.cdw10.get());
        let lid = extract_bits(cdw10, 0, 7) as u8;
        let numdl = extract_bits(cdw10, 16, 31);
        let numdu = extract_bits(cmd.cdw11.get().into(), 0, 15);
        let dwords = ((numdu << 16) | numdl) + 1;
        let offset = u64::from(cmd.cdw12.get()) | u64::from(cmd.cdw13.get()) << 32;

        let page = match LogPageId::from_raw(lid) {
            Some(LogPageId::SmartHealth) => self.smart_log_page().as_bytes().to_vec(),
            Some(LogPageId::FirmwareSlot) => self.firmware_slot_page().as_bytes().to_vec(),
            _ => return Err(unsupported(cmd.opcode)),
        };

        let buf = device_buffer(data)?;
        let len = usize::try_from(dwords * 4).unwrap_or(usize::MAX).min(buf.len());
        let offset = usize::try_from(offset).map_err(|_| status(status::INVALID_FIELD))?;
        copy_page(&page, offset, &mut buf[..len])?;
        trace!(lid, dwords, offset, "Log page served");
        Ok(0)
    }

    /// Read or write `count` blocks against namespace `nsid`.
    fn transfer(
        &mut self,
        opcode: IoOpcode,
        nsid: u32,
        slba: u64,
        count: u64,
        data: &mut DataBuffer<'_>,
    ) -> Result<(), TransportError> {
        let ns = self
            .namespaces
            .get_mut(&nsid)
            .ok_or_else(|| status(status::INVALID_NAMESPACE))?;
        let moved = match opcode {
            IoOpcode::Read => {
                let moved = ns.read(slba, count, device_buffer(data)?).map_err(status)?;
                self.counters.sectors_read += (moved / 512) as u128;
                self.counters.host_read_commands += 1;
                moved
            }
            IoOpcode::Write => {
                let moved = ns.write(slba, count, host_buffer(data)?).map_err(status)?;
                self.counters.sectors_written += (moved / 512) as u128;
                self.counters.host_write_commands += 1;
                moved
            }
            other => return Err(unsupported(other as u8)),
        };
        trace!(?opcode, nsid, slba, count, moved, "Transfer complete");
        Ok(())
    }

    fn submit_io(&mut self, io: &UserIo, data: &mut DataBuffer<'_>) -> Result<(), TransportError> {
        let opcode = IoOpcode::from_raw(io.opcode).ok_or_else(|| unsupported(io.opcode))?;
        let count = u64::from(io.nblocks.get()) + 1;
        self.transfer(opcode, self.io_nsid, io.slba.get(), count, data)
    }

    fn io_passthru(
        &mut self,
        cmd: &PassthruCommand,
        data: &mut DataBuffer<'_>,
    ) -> Result<u32, TransportError> {
        let opcode = IoOpcode::from_raw(cmd.opcode).ok_or_else(|| unsupported(cmd.opcode))?;
        let nsid = cmd.nsid.get();
        match opcode {
            IoOpcode::Flush => {
                if !self.namespaces.contains_key(&nsid) && nsid != u32::MAX {
                    return Err(status(status::INVALID_NAMESPACE));
                }
            }
            IoOpcode::Read | IoOpcode::Write => {
                let slba = u64::from(cmd.cdw10.get()) | u64::from(cmd.cdw11.get()) << 32;
                let count = extract_bits(cmd.cdw12.get().into(), 0, 15) + 1;
                self.transfer(opcode, nsid, slba, count, data)?;
            }
            _ => return Err(unsupported(cmd.opcode)),
        }
        Ok(0)
    }
}

impl Transport for SimController {
    fn submit(&mut self, submission: &mut Submission<'_>) -> Result<(), TransportError> {
        let record = SubmissionRecord::capture(submission);
        debug!(
            mode = record.mode.as_str(),
            opcode = record.opcode,
            nsid = record.nsid,
            data_len = record.data_len,
            "Simulated submission"
        );
        self.submissions.push(record);

        if let Some(status) = self.pending_fault.take() {
            warn!(status, "Injected fault");
            return Err(TransportError::Status { status });
        }

        let (mode, block, data) = submission.parts_mut();
        match (mode, block) {
            (SubmitMode::AdminPassthru, CommandBlock::Passthru(cmd)) => {
                let result = self.admin(cmd, data)?;
                cmd.result = result.into();
            }
            (SubmitMode::IoPassthru, CommandBlock::Passthru(cmd)) => {
                let result = self.io_passthru(cmd, data)?;
                cmd.result = result.into();
            }
            (SubmitMode::SubmitIo, CommandBlock::UserIo(io)) => self.submit_io(io, data)?,
            (_, block) => return Err(unsupported(block.opcode())),
        }
        Ok(())
    }
}
