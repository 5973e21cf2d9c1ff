//! Fixed-offset binary records.
//!
//! Every wire structure in this crate is a `#[repr(C)]` struct made only of
//! byte-aligned fields, so the in-memory layout is exactly the declared field
//! sequence with no compiler padding. Multi-byte scalars use the target's
//! native byte order, fixed at build time.

use crate::error::{NvmeError, Result};
use zerocopy::byteorder::{NativeEndian, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub type Ne16 = U16<NativeEndian>;
pub type Ne32 = U32<NativeEndian>;
pub type Ne64 = U64<NativeEndian>;

/// A record with a fixed size and fixed field offsets.
pub trait FixedLayout: FromBytes + IntoBytes + Immutable + KnownLayout + Sized {
    /// Name used in diagnostics.
    const NAME: &'static str;

    /// Exact encoded size in bytes.
    const SIZE: usize = core::mem::size_of::<Self>();

    /// Decode a whole record. The buffer must be exactly `SIZE` bytes.
    fn decode(buf: &[u8]) -> Result<Self> {
        let mismatch = || NvmeError::LayoutMismatch {
            layout: Self::NAME,
            expected: Self::SIZE,
            actual: buf.len(),
        };
        if buf.len() != Self::SIZE {
            return Err(mismatch());
        }
        Self::read_from_bytes(buf).map_err(|_| mismatch())
    }

    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Encode into a caller buffer of exactly `SIZE` bytes.
    fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != Self::SIZE {
            return Err(NvmeError::LayoutMismatch {
                layout: Self::NAME,
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }
}

/// Implement [`FixedLayout`] and pin the record size at compile time.
macro_rules! fixed_layout {
    ($ty:ty, $size:expr) => {
        const _: () = assert!(core::mem::size_of::<$ty>() == $size);

        impl $crate::layout::FixedLayout for $ty {
            const NAME: &'static str = stringify!($ty);
        }
    };
}

pub(crate) use fixed_layout;

/// Decode a fixed ASCII field, trimming surrounding spaces and NULs.
pub fn trimmed_ascii(field: &[u8]) -> String {
    String::from_utf8_lossy(field)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}
