//! Device session: one blocking command at a time over a [`Transport`].

use crate::command::{block_io, AdminOpcode, CommandBuilder, IoOpcode, PassthruCommand};
use crate::config::SessionConfig;
use crate::error::{NvmeError, Result};
use crate::identify::{
    ControllerSummary, IdentifyController, IdentifyNamespace, IdentifyParams, IDENTIFY_DATA_SIZE,
};
use crate::layout::FixedLayout;
use crate::logpage::{
    validate_log_buffer, FirmwareSlotInfo, LogPageId, LogPageRequest, SmartLog, LOG_PAGE_512,
    NSID_ALL, NSID_NONE,
};
use crate::transport::{DataBuffer, Submission, Transport};
use tracing::{debug, info, instrument, warn};

/// An exclusive command channel to one controller.
///
/// Every operation takes `&mut self`, so at most one command is in flight.
/// Besides the transport the session keeps the controller summary cached by
/// [`identify_controller`](Self::identify_controller) and the logical block
/// size that simple block I/O is sized against.
#[derive(Debug)]
pub struct DeviceSession<T> {
    transport: T,
    config: SessionConfig,
    controller: Option<ControllerSummary>,
    io_block_size: Option<u64>,
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            controller: None,
            io_block_size: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Summary from the last successful `identify_controller`.
    pub fn controller(&self) -> Option<&ControllerSummary> {
        self.controller.as_ref()
    }

    /// Block size that [`read`](Self::read) and [`write`](Self::write) check
    /// buffers against, once bound.
    pub fn io_block_size(&self) -> Option<u64> {
        self.io_block_size
    }

    /// Size block I/O against an already known block size.
    pub fn set_io_block_size(&mut self, size: u64) {
        self.io_block_size = Some(size);
    }

    /// Look up the namespace's block size and use it for block I/O.
    ///
    /// Simple I/O targets the namespace behind the device node; bind the
    /// same namespace the node exposes.
    #[instrument(skip(self))]
    pub fn bind_namespace(&mut self, nsid: u32) -> Result<u64> {
        let size = self.logical_block_size(nsid)?;
        self.io_block_size = Some(size);
        info!(nsid, size, "bound namespace for block I/O");
        Ok(size)
    }

    fn bound_block_size(&self) -> Result<u64> {
        self.io_block_size.ok_or(NvmeError::BlockSizeUnknown)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn submit(&mut self, submission: &mut Submission<'_>) -> Result<u32> {
        debug!(
            mode = submission.mode().as_str(),
            opcode = submission.block().opcode(),
            data_len = submission.data().len(),
            "submitting command"
        );
        match self.transport.submit(submission) {
            Ok(()) => Ok(submission.result()),
            Err(e) => {
                warn!(
                    mode = submission.mode().as_str(),
                    opcode = submission.block().opcode(),
                    error = %e,
                    "command failed"
                );
                Err(e.into())
            }
        }
    }

    /// Admin Identify into a caller buffer.
    #[instrument(skip(self, buf), fields(cns = params.cns, nsid = params.nsid, len = buf.len()))]
    pub fn identify_raw(&mut self, params: &IdentifyParams, buf: &mut [u8]) -> Result<()> {
        let cmd = CommandBuilder::identify(params)
            .timeout_ms(self.config.admin_timeout_ms)
            .build();
        let mut submission = Submission::admin(cmd, DataBuffer::FromDevice(buf))?;
        self.submit(&mut submission)?;
        Ok(())
    }

    /// Identify the controller and refresh the cached summary.
    #[instrument(skip(self))]
    pub fn identify_controller(&mut self) -> Result<IdentifyController> {
        let mut buf = vec![0u8; IDENTIFY_DATA_SIZE];
        self.identify_raw(&IdentifyParams::controller(), &mut buf)?;
        let ctrl = IdentifyController::decode(&buf)?;

        let summary = ctrl.summary();
        info!(
            vendor_id = summary.vendor_id,
            model = %summary.model,
            serial = %summary.serial,
            firmware = %summary.firmware,
            mdts = summary.max_data_transfer_size,
            "identified controller"
        );
        self.controller = Some(summary);
        Ok(ctrl)
    }

    #[instrument(skip(self))]
    pub fn identify_namespace(&mut self, nsid: u32) -> Result<IdentifyNamespace> {
        let mut buf = vec![0u8; IDENTIFY_DATA_SIZE];
        self.identify_raw(&IdentifyParams::namespace(nsid), &mut buf)?;
        let ns = IdentifyNamespace::decode(&buf)?;
        debug!(nsze = ns.nsze.get(), flbas = ns.flbas, "identified namespace");
        Ok(ns)
    }

    /// Block size of the namespace's active LBA format, in bytes.
    #[instrument(skip(self))]
    pub fn logical_block_size(&mut self, nsid: u32) -> Result<u64> {
        let ns = self.identify_namespace(nsid)?;
        let size = ns.logical_block_size()?;
        debug!(lba_format = ns.active_lba_format_index(), size, "logical block size");
        Ok(size)
    }

    /// Get Log Page with caller-packed dwords. The buffer size is not checked.
    #[instrument(skip(self, request, buf), fields(lid = request.lid(), len = buf.len()))]
    pub fn get_log_page_raw(
        &mut self,
        nsid: u32,
        request: &LogPageRequest,
        buf: &mut [u8],
    ) -> Result<()> {
        let cmd = CommandBuilder::get_log_page(nsid, request)
            .timeout_ms(self.config.admin_timeout_ms)
            .build();
        let mut submission = Submission::admin(cmd, DataBuffer::FromDevice(buf))?;
        self.submit(&mut submission)?;
        Ok(())
    }

    /// Read a whole log page into `buf`.
    ///
    /// `buf` must hold 4 to 0x4000 bytes in whole dwords; anything else fails
    /// before a command is built.
    #[instrument(skip(self, buf), fields(len = buf.len()))]
    pub fn read_log_page(&mut self, nsid: u32, log_id: u8, buf: &mut [u8]) -> Result<()> {
        let numd = validate_log_buffer(buf.len())?;
        let cdw10 = u32::from(log_id) | (numd << 16);
        let cmd = CommandBuilder::admin(AdminOpcode::GetLogPage)
            .nsid(nsid)
            .cdw10(cdw10)
            .timeout_ms(self.config.admin_timeout_ms)
            .build();
        let mut submission = Submission::admin(cmd, DataBuffer::FromDevice(buf))?;
        self.submit(&mut submission)?;
        Ok(())
    }

    fn fixed_log<L: FixedLayout>(&mut self, nsid: u32, lid: LogPageId) -> Result<L> {
        let mut buf = vec![0u8; LOG_PAGE_512];
        let request = LogPageRequest::new(lid as u8, buf.len());
        self.get_log_page_raw(nsid, &request, &mut buf)?;
        L::decode(&buf)
    }

    /// SMART / Health Information for the whole controller.
    #[instrument(skip(self))]
    pub fn smart_log(&mut self) -> Result<SmartLog> {
        let log: SmartLog = self.fixed_log(NSID_ALL, LogPageId::SmartHealth)?;
        if log.critical_warning != 0 {
            warn!(critical_warning = log.critical_warning, "controller reports critical warning");
        }
        Ok(log)
    }

    #[instrument(skip(self))]
    pub fn firmware_slot_info(&mut self) -> Result<FirmwareSlotInfo> {
        self.fixed_log(NSID_NONE, LogPageId::FirmwareSlot)
    }

    /// Read `blocks` logical blocks starting at `lba`.
    ///
    /// `buf` must hold `blocks` times the bound block size; a shorter buffer
    /// fails before anything is submitted.
    #[instrument(skip(self, buf), fields(len = buf.len()))]
    pub fn read(&mut self, lba: u64, blocks: u16, buf: &mut [u8]) -> Result<()> {
        let io = block_io(IoOpcode::Read, lba, blocks, 0)?;
        let block_size = self.bound_block_size()?;
        let mut submission = Submission::submit_io(io, DataBuffer::FromDevice(buf), block_size)?;
        self.submit(&mut submission)?;
        Ok(())
    }

    /// Write `blocks` logical blocks starting at `lba`, optionally tagged
    /// with a stream identifier.
    #[instrument(skip(self, buf), fields(len = buf.len()))]
    pub fn write(&mut self, lba: u64, blocks: u16, write_hint: u16, buf: &[u8]) -> Result<()> {
        let io = block_io(IoOpcode::Write, lba, blocks, write_hint)?;
        let block_size = self.bound_block_size()?;
        let mut submission = Submission::submit_io(io, DataBuffer::ToDevice(buf), block_size)?;
        self.submit(&mut submission)?;
        Ok(())
    }

    /// Submit a caller-built admin command. Returns completion dword 0.
    ///
    /// A zero `timeout_ms` in `cmd` is replaced by the session's admin timeout.
    #[instrument(skip(self, cmd, data), fields(opcode = cmd.opcode, len = data.len()))]
    pub fn admin_passthru(
        &mut self,
        mut cmd: PassthruCommand,
        data: DataBuffer<'_>,
    ) -> Result<u32> {
        if cmd.timeout_ms.get() == 0 {
            cmd.timeout_ms = self.config.admin_timeout_ms.into();
        }
        let mut submission = Submission::admin(cmd, data)?;
        self.submit(&mut submission)
    }

    /// Submit a caller-built I/O command. Returns completion dword 0.
    #[instrument(skip(self, cmd, data), fields(opcode = cmd.opcode, len = data.len()))]
    pub fn io_passthru(&mut self, mut cmd: PassthruCommand, data: DataBuffer<'_>) -> Result<u32> {
        if cmd.timeout_ms.get() == 0 {
            cmd.timeout_ms = self.config.io_timeout_ms.into();
        }
        let mut submission = Submission::io_passthru(cmd, data)?;
        self.submit(&mut submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NvmeError, TransportError};
    use crate::transport::{CommandBlock, SubmitMode};
    use tracing_test::traced_test;
    use zerocopy::{FromZeros, IntoBytes};

    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        mode: SubmitMode,
        block: CommandBlock,
        len: usize,
    }

    /// Records every submission and answers reads with a canned page.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<Seen>,
        reply: Vec<u8>,
        written: Vec<u8>,
        fail_status: Option<u32>,
        result: u32,
    }

    impl Transport for Recorder {
        fn submit(
            &mut self,
            submission: &mut Submission<'_>,
        ) -> std::result::Result<(), TransportError> {
            self.seen.push(Seen {
                mode: submission.mode(),
                block: submission.block().clone(),
                len: submission.data().len(),
            });
            if let Some(status) = self.fail_status.take() {
                return Err(TransportError::Status { status });
            }
            let (_, block, data) = submission.parts_mut();
            match data {
                DataBuffer::FromDevice(buf) => {
                    let n = buf.len().min(self.reply.len());
                    buf[..n].copy_from_slice(&self.reply[..n]);
                }
                DataBuffer::ToDevice(buf) => self.written.extend_from_slice(buf),
                DataBuffer::None => {}
            }
            if let CommandBlock::Passthru(cmd) = block {
                cmd.result = self.result.into();
            }
            Ok(())
        }
    }

    fn passthru(seen: &Seen) -> &PassthruCommand {
        match &seen.block {
            CommandBlock::Passthru(cmd) => cmd,
            other => panic!("expected passthru block, got {other:?}"),
        }
    }

    #[traced_test]
    #[test]
    fn test_identify_controller_caches_summary() {
        let mut ctrl = IdentifyController::new_zeroed();
        ctrl.vid = 0x1b96u16.into();
        ctrl.mn[..7].copy_from_slice(b"SIM SSD");
        ctrl.sn[..4].copy_from_slice(b"0001");
        ctrl.ieee = [0x0c, 0xca, 0x00];
        ctrl.mdts = 7;

        let mut session = DeviceSession::new(Recorder {
            reply: ctrl.as_bytes().to_vec(),
            ..Default::default()
        });
        assert!(session.controller().is_none());

        let decoded = session.identify_controller().unwrap();
        assert_eq!(decoded.vid.get(), 0x1b96);

        let summary = session.controller().unwrap();
        assert_eq!(summary.serial, "0001");
        assert_eq!(summary.oui, 0x00ca0c);
        assert_eq!(summary.max_data_transfer_size, 128);

        let seen = &session.transport().seen[0];
        assert_eq!(seen.mode, SubmitMode::AdminPassthru);
        assert_eq!(seen.len, 4096);
        let cmd = passthru(seen);
        assert_eq!(cmd.opcode, AdminOpcode::Identify as u8);
        assert_eq!(cmd.nsid.get(), 0);
        assert_eq!(cmd.cdw10.get(), 1);
        assert_eq!(cmd.data_len.get(), 4096);

        assert!(logs_contain("identified controller"));
    }

    #[test]
    fn test_logical_block_size() {
        let mut ns = IdentifyNamespace::new_zeroed();
        ns.flbas = 2;
        ns.lbaf[2].lbads = 9;
        let mut session = DeviceSession::new(Recorder {
            reply: ns.as_bytes().to_vec(),
            ..Default::default()
        });

        assert_eq!(session.logical_block_size(5).unwrap(), 512);
        let cmd = passthru(&session.transport().seen[0]);
        assert_eq!(cmd.nsid.get(), 5);
        assert_eq!(cmd.cdw10.get(), 0);
    }

    #[test]
    fn test_read_log_page_encodes_cdw10() {
        let mut session = DeviceSession::new(Recorder::default());
        let mut buf = vec![0u8; 64];
        session.read_log_page(NSID_ALL, 0x01, &mut buf).unwrap();

        let cmd = passthru(&session.transport().seen[0]);
        assert_eq!(cmd.opcode, AdminOpcode::GetLogPage as u8);
        assert_eq!(cmd.nsid.get(), NSID_ALL);
        assert_eq!(cmd.cdw10.get(), 0x000f_0001);
        assert_eq!(cmd.data_len.get(), 64);
    }

    #[test]
    fn test_read_log_page_rejects_bad_buffers_before_transport() {
        let mut session = DeviceSession::new(Recorder::default());
        for len in [0usize, 3, 10, 0x4004] {
            let mut buf = vec![0u8; len];
            let err = session.read_log_page(NSID_NONE, 0x02, &mut buf).unwrap_err();
            assert!(matches!(err, NvmeError::InvalidBufferLength { .. }));
        }
        assert!(session.transport().seen.is_empty());
    }

    #[test]
    fn test_smart_and_firmware_namespace_ids() {
        let mut smart = SmartLog::new_zeroed();
        smart.temperature = 300u16.to_le_bytes();
        let mut session = DeviceSession::new(Recorder {
            reply: smart.as_bytes().to_vec(),
            ..Default::default()
        });

        let log = session.smart_log().unwrap();
        assert_eq!(log.temperature_celsius(), 27);
        session.firmware_slot_info().unwrap();

        let seen = &session.transport().seen;
        let smart_cmd = passthru(&seen[0]);
        assert_eq!(smart_cmd.nsid.get(), 0xffff_ffff);
        assert_eq!(smart_cmd.cdw10.get(), 0x007f_0002);
        let fw_cmd = passthru(&seen[1]);
        assert_eq!(fw_cmd.nsid.get(), 0);
        assert_eq!(fw_cmd.cdw10.get(), 0x007f_0003);
    }

    #[traced_test]
    #[test]
    fn test_transport_error_propagates_verbatim() {
        let mut session = DeviceSession::new(Recorder {
            fail_status: Some(0x4002),
            ..Default::default()
        });
        let err = session.identify_namespace(1).unwrap_err();
        assert!(matches!(
            err,
            NvmeError::Transport(TransportError::Status { status: 0x4002 })
        ));
        assert_eq!(session.transport().seen.len(), 1);
        assert!(logs_contain("command failed"));

        // nothing retried, and the next command goes through
        session.identify_namespace(1).unwrap();
        assert_eq!(session.transport().seen.len(), 2);
    }

    #[test]
    fn test_zero_block_read_never_submits() {
        let mut session = DeviceSession::new(Recorder::default());
        let mut buf = vec![0u8; 512];
        let err = session.read(0, 0, &mut buf).unwrap_err();
        assert!(matches!(err, NvmeError::ZeroBlockCount));
        assert!(session.transport().seen.is_empty());
    }

    #[test]
    fn test_short_read_buffer_never_submits() {
        let mut session = DeviceSession::new(Recorder::default());
        session.set_io_block_size(512);
        let mut buf = vec![0u8; 16];
        let err = session.read(0, 64, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            NvmeError::ShortBuffer {
                len: 16,
                required: 32768
            }
        ));
        let err = session.write(0, 2, 0, &[0u8; 1023]).unwrap_err();
        assert!(matches!(err, NvmeError::ShortBuffer { len: 1023, .. }));
        assert!(session.transport().seen.is_empty());
    }

    #[test]
    fn test_block_io_needs_a_block_size() {
        let mut session = DeviceSession::new(Recorder::default());
        let mut buf = vec![0u8; 4096];
        let err = session.read(0, 1, &mut buf).unwrap_err();
        assert!(matches!(err, NvmeError::BlockSizeUnknown));
        assert!(session.transport().seen.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_bind_namespace_sizes_block_io() {
        let mut ns = IdentifyNamespace::new_zeroed();
        ns.lbaf[0].lbads = 12;
        let mut session = DeviceSession::new(Recorder {
            reply: ns.as_bytes().to_vec(),
            ..Default::default()
        });

        assert_eq!(session.bind_namespace(1).unwrap(), 4096);
        assert_eq!(session.io_block_size(), Some(4096));
        assert!(logs_contain("bound namespace for block I/O"));

        let mut buf = vec![0u8; 4096];
        assert!(session.read(0, 2, &mut buf).is_err());
        session.read(0, 1, &mut buf).unwrap();
        let seen = &session.transport().seen;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].mode, SubmitMode::SubmitIo);
    }

    #[test]
    fn test_passthru_direction_checked_before_transport() {
        let mut session = DeviceSession::new(Recorder::default());
        let data = vec![0u8; 4096];
        let cmd = CommandBuilder::admin(AdminOpcode::Identify).cdw10(1).build();
        let err = session.admin_passthru(cmd, DataBuffer::ToDevice(&data)).unwrap_err();
        assert!(matches!(err, NvmeError::DirectionMismatch { opcode: 0x06, .. }));

        let mut buf = vec![0u8; 512];
        let cmd = CommandBuilder::io(IoOpcode::Write).nsid(1).build();
        let err = session.io_passthru(cmd, DataBuffer::FromDevice(&mut buf)).unwrap_err();
        assert!(err.is_precondition());
        assert!(session.transport().seen.is_empty());
    }

    #[test]
    fn test_write_with_hint() {
        let mut session = DeviceSession::new(Recorder::default());
        session.set_io_block_size(512);
        let data = vec![0x5au8; 1024];
        session.write(100, 2, 7, &data).unwrap();

        let seen = &session.transport().seen[0];
        assert_eq!(seen.mode, SubmitMode::SubmitIo);
        match &seen.block {
            CommandBlock::UserIo(io) => {
                assert_eq!(io.opcode, IoOpcode::Write as u8);
                assert_eq!(io.slba.get(), 100);
                assert_eq!(io.nblocks.get(), 1);
                assert_eq!(io.control.get(), 0x10);
                assert_eq!(io.dsmgmt.get(), 7 << 16);
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert_eq!(session.transport().written, data);
    }

    #[test]
    fn test_passthru_applies_session_timeouts() {
        let config = SessionConfig::default().admin_timeout_ms(2000).io_timeout_ms(500);
        let mut session = DeviceSession::with_config(
            Recorder {
                result: 0x11,
                ..Default::default()
            },
            config,
        );

        let cmd = CommandBuilder::admin(AdminOpcode::GetFeatures).cdw10(0x06).build();
        assert_eq!(session.admin_passthru(cmd, DataBuffer::None).unwrap(), 0x11);

        let cmd = CommandBuilder::io(IoOpcode::Flush).nsid(1).timeout_ms(9).build();
        session.io_passthru(cmd, DataBuffer::None).unwrap();

        let seen = &session.transport().seen;
        assert_eq!(seen[0].mode, SubmitMode::AdminPassthru);
        assert_eq!(passthru(&seen[0]).timeout_ms.get(), 2000);
        assert_eq!(seen[1].mode, SubmitMode::IoPassthru);
        assert_eq!(passthru(&seen[1]).timeout_ms.get(), 9);
    }
}
