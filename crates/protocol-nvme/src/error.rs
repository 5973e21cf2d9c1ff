use thiserror::Error;

/// Failures reported by a [`Transport`](crate::transport::Transport) while
/// executing a submission. These are handed back to the caller untouched.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The submission syscall itself failed (bad handle, permission, EIO...).
    #[error("submission failed: {0}")]
    Io(#[from] std::io::Error),

    /// The controller completed the command with a non-zero status field.
    #[error("controller returned status {status:#06x}")]
    Status { status: u32 },

    /// The transport does not implement the requested opcode.
    #[error("opcode {opcode:#04x} not supported by {transport}")]
    Unsupported {
        transport: &'static str,
        opcode: u8,
    },
}

/// Errors produced by the NVMe protocol layer.
#[derive(Debug, Error)]
pub enum NvmeError {
    /// Caller buffer outside the range the protocol accepts for an operation.
    /// Raised before any command is built.
    #[error("invalid buffer length {len}: must be within [{min}, {max}] and a multiple of {align}")]
    InvalidBufferLength {
        len: usize,
        min: usize,
        max: usize,
        align: usize,
    },

    /// Buffer size does not match the fixed layout it is decoded as.
    #[error("{layout} is {expected} bytes, buffer holds {actual}")]
    LayoutMismatch {
        layout: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Block I/O with zero blocks; the wire count is zero based.
    #[error("block count must be at least 1")]
    ZeroBlockCount,

    /// Block I/O buffer shorter than the transfer the command describes.
    /// Simple I/O carries no length field, so the device would run past it.
    #[error("buffer of {len} bytes is shorter than the {required} byte transfer")]
    ShortBuffer { len: usize, required: u64 },

    /// Block I/O before the namespace block size is known.
    #[error("logical block size unknown; bind a namespace before block I/O")]
    BlockSizeUnknown,

    /// Data buffer direction disagrees with the opcode's transfer bits.
    #[error("opcode {opcode:#04x} does not accept a {direction} buffer")]
    DirectionMismatch {
        opcode: u8,
        direction: &'static str,
    },

    /// Data buffer longer than the 32-bit length field can describe.
    #[error("data buffer of {len} bytes exceeds the command length field")]
    BufferTooLarge { len: usize },

    /// LBA format with a data size exponent that cannot be represented.
    #[error("LBA format {index} has unsupported data size exponent {lbads}")]
    InvalidLbaFormat { index: u8, lbads: u8 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl NvmeError {
    /// True for conditions caught before anything reached the transport.
    pub fn is_validation(&self) -> bool {
        matches!(self, NvmeError::InvalidBufferLength { .. })
    }

    /// True for internal contract breaches (programming errors).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            NvmeError::LayoutMismatch { .. }
                | NvmeError::ZeroBlockCount
                | NvmeError::ShortBuffer { .. }
                | NvmeError::BlockSizeUnknown
                | NvmeError::DirectionMismatch { .. }
                | NvmeError::BufferTooLarge { .. }
                | NvmeError::InvalidLbaFormat { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, NvmeError>;
