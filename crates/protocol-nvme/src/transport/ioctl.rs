//! Character-device transport over the Linux NVMe ioctls.
//!
//! Layouts must stay in sync with `<linux/nvme_ioctl.h>`.

use super::{CommandBlock, DataBuffer, SubmitMode, Submission, Transport, NVME_IOCTL_MAGIC};
use crate::command::{PassthruCommand, UserIo};
use crate::error::TransportError;
use nix::{ioctl_readwrite, ioctl_write_ptr};
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

ioctl_readwrite!(nvme_admin_cmd, NVME_IOCTL_MAGIC, 0x41, PassthruCommand);
ioctl_write_ptr!(nvme_submit_io, NVME_IOCTL_MAGIC, 0x42, UserIo);
ioctl_readwrite!(nvme_io_cmd, NVME_IOCTL_MAGIC, 0x43, PassthruCommand);

/// Full ioctl request number for a submission mode.
pub fn request_code(mode: SubmitMode) -> u64 {
    let code = match mode {
        SubmitMode::AdminPassthru => nix::request_code_readwrite!(
            NVME_IOCTL_MAGIC,
            0x41,
            core::mem::size_of::<PassthruCommand>()
        ),
        SubmitMode::SubmitIo => nix::request_code_write!(
            NVME_IOCTL_MAGIC,
            0x42,
            core::mem::size_of::<UserIo>()
        ),
        SubmitMode::IoPassthru => nix::request_code_readwrite!(
            NVME_IOCTL_MAGIC,
            0x43,
            core::mem::size_of::<PassthruCommand>()
        ),
    };
    code as u64
}

/// An open NVMe controller or namespace node, e.g. `/dev/nvme0n1`.
#[derive(Debug)]
pub struct IoctlTransport {
    path: PathBuf,
    file: File,
}

impl IoctlTransport {
    /// Open the node read-write; the ioctls need write access.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!(path = %path.display(), "opened NVMe device");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for IoctlTransport {
    fn submit(&mut self, submission: &mut Submission<'_>) -> Result<(), TransportError> {
        let fd = self.file.as_raw_fd();
        let (mode, block, data) = submission.parts_mut();
        let addr = data.address();
        let from_device = matches!(data, DataBuffer::FromDevice(_));

        trace!(
            mode = mode.as_str(),
            request = request_code(mode),
            opcode = block.opcode(),
            len = data.len(),
            from_device,
            "ioctl submit"
        );

        // The buffer behind `addr` is borrowed by `submission` for the whole
        // call, so the kernel never sees a dangling pointer.
        let ret = match (mode, block) {
            (SubmitMode::AdminPassthru, CommandBlock::Passthru(cmd)) => {
                cmd.addr = addr.into();
                unsafe { nvme_admin_cmd(fd, cmd as *mut PassthruCommand) }
            }
            (SubmitMode::IoPassthru, CommandBlock::Passthru(cmd)) => {
                cmd.addr = addr.into();
                unsafe { nvme_io_cmd(fd, cmd as *mut PassthruCommand) }
            }
            (SubmitMode::SubmitIo, CommandBlock::UserIo(io)) => {
                io.addr = addr.into();
                unsafe { nvme_submit_io(fd, io as *const UserIo) }
            }
            (_, block) => {
                return Err(TransportError::Unsupported {
                    transport: "ioctl",
                    opcode: block.opcode(),
                })
            }
        }
        .map_err(std::io::Error::from)?;

        // A positive return value carries the NVMe completion status.
        if ret > 0 {
            return Err(TransportError::Status { status: ret as u32 });
        }
        Ok(())
    }
}
