//! Command dword packing.
//!
//! Each command dword variant is a plain struct with one `u32` member per
//! sub-field plus a const table of `(tag, bit_start)` pairs. Packing ORs each
//! member shifted to its bit start. Members are not masked to their field
//! width; a value wider than its field spills into its neighbours, so callers
//! must keep values in range.

/// Position of one named sub-field inside a 32-bit command dword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField<T> {
    pub tag: T,
    pub bit_start: u8,
}

/// Pack a dword from a field table and a value lookup.
///
/// Fields for which `value_of` yields `None` contribute nothing. The result
/// does not depend on the order of `layout`.
pub fn pack_control_word<T, F>(layout: &[BitField<T>], value_of: F) -> u32
where
    T: Copy,
    F: Fn(T) -> Option<u32>,
{
    layout.iter().fold(0u32, |cdw, field| match value_of(field.tag) {
        Some(value) => cdw | value.checked_shl(u32::from(field.bit_start)).unwrap_or(0),
        None => cdw,
    })
}

/// Extract the inclusive bit range `start..=end` of `value`.
pub fn extract_bits(value: u64, start: u8, end: u8) -> u64 {
    debug_assert!(start <= end && end < 64, "bit range {start}..={end}");
    let width_minus_one = u32::from(end - start);
    let mask = u64::MAX >> (63 - width_minus_one);
    (value >> start) & mask
}

/// A typed command dword.
pub trait ControlWord {
    type Field: Copy + 'static;

    /// Every sub-field of the dword with its starting bit.
    const LAYOUT: &'static [BitField<Self::Field>];

    fn value(&self, field: Self::Field) -> u32;

    fn pack(&self) -> u32 {
        pack_control_word(Self::LAYOUT, |field| Some(self.value(field)))
    }
}

/// Declare a command dword struct, its field tag enum and its bit table.
macro_rules! control_word {
    (
        $(#[$meta:meta])*
        $name:ident, $tag_ty:ident {
            $( $(#[$fmeta:meta])* $member:ident => $tag:ident @ $bit:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $member: u32, )+
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $tag_ty {
            $( $tag, )+
        }

        impl $tag_ty {
            pub fn name(self) -> &'static str {
                match self {
                    $( $tag_ty::$tag => stringify!($tag), )+
                }
            }
        }

        impl $crate::bitfield::ControlWord for $name {
            type Field = $tag_ty;

            const LAYOUT: &'static [$crate::bitfield::BitField<$tag_ty>] = &[
                $( $crate::bitfield::BitField { tag: $tag_ty::$tag, bit_start: $bit }, )+
            ];

            fn value(&self, field: $tag_ty) -> u32 {
                match field {
                    $( $tag_ty::$tag => self.$member, )+
                }
            }
        }
    };
}

pub(crate) use control_word;
