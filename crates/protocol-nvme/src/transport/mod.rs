//! Submission boundary between the protocol layer and the environment.
//!
//! A [`Submission`] pairs a command block with a borrowed data buffer. The
//! block's address field is left at zero; binding the buffer address is the
//! job of the transport that actually hands the block to the kernel.

#[cfg(target_os = "linux")]
mod ioctl;

#[cfg(target_os = "linux")]
pub use ioctl::{request_code, IoctlTransport};

use crate::command::{PassthruCommand, UserIo};
use crate::error::{NvmeError, Result, TransportError};

/// Magic (group) byte shared by the NVMe ioctls.
pub const NVME_IOCTL_MAGIC: u8 = b'N';

/// The three ways a command block can be handed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitMode {
    /// Admin queue passthrough (`NVME_IOCTL_ADMIN_CMD`).
    AdminPassthru,
    /// Simple read/write submission (`NVME_IOCTL_SUBMIT_IO`).
    SubmitIo,
    /// Generic I/O queue passthrough (`NVME_IOCTL_IO_CMD`).
    IoPassthru,
}

impl SubmitMode {
    pub const fn magic(self) -> u8 {
        NVME_IOCTL_MAGIC
    }

    /// Per-mode command number within the magic group.
    pub const fn number(self) -> u8 {
        match self {
            SubmitMode::AdminPassthru => 0x41,
            SubmitMode::SubmitIo => 0x42,
            SubmitMode::IoPassthru => 0x43,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubmitMode::AdminPassthru => "admin",
            SubmitMode::SubmitIo => "submit_io",
            SubmitMode::IoPassthru => "io_passthru",
        }
    }
}

/// Data phase of a command.
#[derive(Debug)]
pub enum DataBuffer<'a> {
    None,
    /// Controller writes into the buffer (identify, log pages, reads).
    FromDevice(&'a mut [u8]),
    /// Controller reads from the buffer (writes).
    ToDevice(&'a [u8]),
}

impl DataBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            DataBuffer::None => 0,
            DataBuffer::FromDevice(buf) => buf.len(),
            DataBuffer::ToDevice(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address of the buffer for the kernel ABI, zero without a data phase.
    /// A `FromDevice` address comes from the exclusive borrow.
    pub fn address(&mut self) -> u64 {
        match self {
            DataBuffer::FromDevice(buf) if !buf.is_empty() => buf.as_mut_ptr() as u64,
            DataBuffer::ToDevice(buf) if !buf.is_empty() => buf.as_ptr() as u64,
            _ => 0,
        }
    }

    pub fn direction(&self) -> &'static str {
        match self {
            DataBuffer::None => "none",
            DataBuffer::FromDevice(_) => "from-device",
            DataBuffer::ToDevice(_) => "to-device",
        }
    }

    /// Whether the transfer bits of `opcode` (bits 0..=1) allow this buffer.
    /// Bit 0 is host to controller, bit 1 controller to host.
    pub fn accepted_by(&self, opcode: u8) -> bool {
        match self {
            DataBuffer::None => true,
            DataBuffer::FromDevice(_) => opcode & XFER_CONTROLLER_TO_HOST != 0,
            DataBuffer::ToDevice(_) => opcode & XFER_HOST_TO_CONTROLLER != 0,
        }
    }
}

const XFER_HOST_TO_CONTROLLER: u8 = 0b01;
const XFER_CONTROLLER_TO_HOST: u8 = 0b10;

fn check_direction(opcode: u8, data: &DataBuffer<'_>) -> Result<()> {
    if data.accepted_by(opcode) {
        Ok(())
    } else {
        Err(NvmeError::DirectionMismatch {
            opcode,
            direction: data.direction(),
        })
    }
}

/// Command block variants understood by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBlock {
    Passthru(PassthruCommand),
    UserIo(UserIo),
}

impl CommandBlock {
    pub fn opcode(&self) -> u8 {
        match self {
            CommandBlock::Passthru(cmd) => cmd.opcode,
            CommandBlock::UserIo(io) => io.opcode,
        }
    }
}

/// One command ready to submit.
#[derive(Debug)]
pub struct Submission<'a> {
    mode: SubmitMode,
    block: CommandBlock,
    data: DataBuffer<'a>,
}

impl<'a> Submission<'a> {
    pub fn admin(cmd: PassthruCommand, data: DataBuffer<'a>) -> Result<Self> {
        Self::passthru(SubmitMode::AdminPassthru, cmd, data)
    }

    pub fn io_passthru(cmd: PassthruCommand, data: DataBuffer<'a>) -> Result<Self> {
        Self::passthru(SubmitMode::IoPassthru, cmd, data)
    }

    /// Simple I/O has no length field: the device moves `nblocks + 1` blocks
    /// of `block_size` bytes, so `data` must hold at least that much.
    pub fn submit_io(io: UserIo, data: DataBuffer<'a>, block_size: u64) -> Result<Self> {
        check_direction(io.opcode, &data)?;
        let len = data.len();
        let required = (u64::from(io.nblocks.get()) + 1).saturating_mul(block_size);
        if (len as u64) < required {
            return Err(NvmeError::ShortBuffer { len, required });
        }
        Ok(Self {
            mode: SubmitMode::SubmitIo,
            block: CommandBlock::UserIo(io),
            data,
        })
    }

    fn passthru(mode: SubmitMode, mut cmd: PassthruCommand, data: DataBuffer<'a>) -> Result<Self> {
        check_direction(cmd.opcode, &data)?;
        let len = data.len();
        let data_len = u32::try_from(len).map_err(|_| NvmeError::BufferTooLarge { len })?;
        cmd.data_len = data_len.into();
        Ok(Self {
            mode,
            block: CommandBlock::Passthru(cmd),
            data,
        })
    }

    pub fn mode(&self) -> SubmitMode {
        self.mode
    }

    pub fn block(&self) -> &CommandBlock {
        &self.block
    }

    pub fn data(&self) -> &DataBuffer<'a> {
        &self.data
    }

    /// Mutable access for transports that patch the block or fill the buffer.
    pub fn parts_mut(&mut self) -> (SubmitMode, &mut CommandBlock, &mut DataBuffer<'a>) {
        (self.mode, &mut self.block, &mut self.data)
    }

    /// Completion dword 0 after a passthrough command, zero for simple I/O.
    pub fn result(&self) -> u32 {
        match &self.block {
            CommandBlock::Passthru(cmd) => cmd.result.get(),
            CommandBlock::UserIo(_) => 0,
        }
    }
}

/// Executes one submission synchronously.
///
/// Implementations must not retry: a failure is reported once and the caller
/// decides what to do with it.
pub trait Transport {
    fn submit(
        &mut self,
        submission: &mut Submission<'_>,
    ) -> std::result::Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn submit(
        &mut self,
        submission: &mut Submission<'_>,
    ) -> std::result::Result<(), TransportError> {
        (**self).submit(submission)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(
        &mut self,
        submission: &mut Submission<'_>,
    ) -> std::result::Result<(), TransportError> {
        (**self).submit(submission)
    }
}
