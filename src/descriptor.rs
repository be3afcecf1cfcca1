//! Decoding for the data descriptors that trail entries written
//! before their sizes were known.
//!
//! 4.3.9  Data descriptor:
//!
//! ```text
//! crc-32                          4 bytes
//! compressed size                 4 bytes
//! uncompressed size               4 bytes
//! ```
//!
//! 4.3.9.3 Although not originally assigned a signature, the value
//! 0x08074b50 has commonly been adopted as a signature value
//! for the data descriptor record.  Implementers SHOULD be
//! aware that ZIP files MAY be encountered with or without this
//! signature marking data descriptors and SHOULD account for
//! either case when reading ZIP files to ensure compatibility.
//!
//! Nothing here does I/O. The scanner probes the first word with
//! [`has_signature()`], reads the rest of the record, and hands the bytes over.

use crate::spec::{FieldCursor, DATA_DESCRIPTOR_MAGIC, ZIP64_VERSION};

/// The width of a data descriptor's size fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeWidth {
    Bits32,
    /// Zip64 entries store 8-byte sizes (4.3.9.2).
    Bits64,
}

impl SizeWidth {
    /// Entries needing version 4.5 or later to extract get Zip64 descriptors.
    pub fn for_version(version: u16) -> Self {
        if version >= ZIP64_VERSION {
            SizeWidth::Bits64
        } else {
            SizeWidth::Bits32
        }
    }

    /// Length of the descriptor without its optional signature:
    /// a CRC and two sizes.
    pub fn unsigned_len(self) -> usize {
        match self {
            SizeWidth::Bits32 => 4 + 4 + 4,
            SizeWidth::Bits64 => 4 + 8 + 8,
        }
    }

    /// Length of the descriptor with the leading signature
    pub fn signed_len(self) -> usize {
        4 + self.unsigned_len()
    }
}

/// The longest a descriptor can be: signed, with 64-bit sizes.
pub const MAX_DESCRIPTOR_LEN: usize = 24;

/// CRC and sizes of an entry, written after its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Returns true if the given first word of a descriptor is its signature
/// (and not the CRC of a descriptor written without one).
pub fn has_signature(first_word: [u8; 4]) -> bool {
    u32::from_le_bytes(first_word) == DATA_DESCRIPTOR_MAGIC
}

impl DataDescriptor {
    /// Decodes a descriptor from a window holding exactly its bytes:
    /// [`SizeWidth::signed_len()`] of them if `signed`,
    /// [`SizeWidth::unsigned_len()`] otherwise.
    ///
    /// # Panics
    ///
    /// If the window is shorter than that.
    pub fn decode(window: &[u8], width: SizeWidth, signed: bool) -> Self {
        let mut fields = FieldCursor::new(window);
        if signed {
            let magic = fields.u32();
            debug_assert_eq!(magic, DATA_DESCRIPTOR_MAGIC);
        }
        let crc32 = fields.u32();
        let (compressed_size, uncompressed_size) = match width {
            SizeWidth::Bits32 => (u64::from(fields.u32()), u64::from(fields.u32())),
            SizeWidth::Bits64 => (fields.u64(), fields.u64()),
        };
        Self {
            crc32,
            compressed_size,
            uncompressed_size,
        }
    }
}
