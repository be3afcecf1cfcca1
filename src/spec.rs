//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`scan`] and [`read`] modules.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`scan`]: ../scan/index.html
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::borrow::Cow;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;
use log::*;
use memchr::memmem;

use crate::arch::usize;
use crate::read::{CompressionMethod, EntryHeader};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: u32 = 0x02014b50;
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: u32 = 0x04034b50;
/// Data descriptor magic number.
///
/// Optional per APPNOTE.TXT, but written by most tools (macOS Finder requires it).
pub const DATA_DESCRIPTOR_MAGIC: u32 = 0x08074b50;

/// The first version that reads and writes Zip64 archives (4.5).
/// Entries at or above it use 8-byte sizes in their data descriptors.
pub const ZIP64_VERSION: u16 = 45;

/// Sentinel in a 32-bit field meaning "look in the Zip64 extra field".
const ZIP64_PLACEHOLDER: u32 = u32::MAX;

/// Header ID of the Zip64 extended information extra field
const ZIP64_EXTRA_ID: u16 = 0x0001;

impl CompressionMethod {
    pub(crate) fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub(crate) fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// A little-endian cursor over a byte window.
///
/// Fixed-size records are read into arrays first, so the typed reads
/// treat running off the end as a bug. Variable-length data goes through
/// [`FieldCursor::take()`], which checks.
#[derive(Debug, Clone)]
pub struct FieldCursor<'a> {
    window: &'a [u8],
    offset: usize,
}

impl<'a> FieldCursor<'a> {
    pub fn new(window: &'a [u8]) -> Self {
        Self { window, offset: 0 }
    }

    /// Bytes left between the offset and the end of the window
    pub fn remaining(&self) -> usize {
        self.window.len() - self.offset
    }

    /// Returns the next `n` bytes, or None (without moving) if there aren't that many.
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(n)?;
        let bytes = self.window.get(self.offset..end)?;
        self.offset = end;
        Some(bytes)
    }

    /// Returns everything after the offset, leaving the cursor at the end.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.window[self.offset..];
        self.offset = self.window.len();
        rest
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0; N];
        bytes.copy_from_slice(self.take(N).expect("field cursor ran off its window"));
        bytes
    }

    pub fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.array())
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }
}

/// What sits at the position where an entry could start
#[derive(Debug)]
pub enum Record {
    LocalFile(LocalFileHeader),
    /// The central directory: there are no more entries.
    CentralDirectory,
}

/// Fixed-size data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// These headers allow for "streaming" decompression without
/// the use of the central directory.
#[derive(Debug)]
pub struct LocalFileHeader {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    /// Size of the header before the variable-length path and extra field
    pub const FIXED_SIZE: usize = 30;

    pub fn parse_fixed(fixed: &[u8; Self::FIXED_SIZE]) -> ZipResult<Record> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let mut header = FieldCursor::new(fixed);
        match header.u32() {
            LOCAL_FILE_HEADER_MAGIC => {}
            CENTRAL_DIRECTORY_MAGIC => return Ok(Record::CentralDirectory),
            other => return Err(ZipError::InvalidFileHeader(other)),
        }

        Ok(Record::LocalFile(Self {
            minimum_extract_version: header.u16(),
            flags: header.u16(),
            compression_method: header.u16(),
            last_modified_time: header.u16(),
            last_modified_date: header.u16(),
            crc32: header.u32(),
            compressed_size: header.u32(),
            uncompressed_size: header.u32(),
            path_length: header.u16(),
            extra_field_length: header.u16(),
        }))
    }

    /// Parses a local file header from the front of `mapping`,
    /// returning it, its path, and its extra field,
    /// and leaving `mapping` at the start of the file's data.
    pub fn parse_and_consume<'a>(mapping: &mut &'a [u8]) -> ZipResult<(Self, &'a [u8], &'a [u8])> {
        let mut cursor = FieldCursor::new(*mapping);
        let fixed: &[u8; Self::FIXED_SIZE] = cursor
            .take(Self::FIXED_SIZE)
            .and_then(|f| f.try_into().ok())
            .ok_or(ZipError::InvalidArchive("Truncated local file header"))?;
        let header = match Self::parse_fixed(fixed)? {
            Record::LocalFile(header) => header,
            Record::CentralDirectory => {
                return Err(ZipError::InvalidArchive(
                    "Expected a local file header, found the central directory",
                ))
            }
        };
        let path = cursor
            .take(usize::from(header.path_length))
            .ok_or(ZipError::InvalidArchive("Truncated local file header"))?;
        let extra_field = cursor
            .take(usize::from(header.extra_field_length))
            .ok_or(ZipError::InvalidArchive("Truncated local file header"))?;
        *mapping = cursor.rest();
        Ok((header, path, extra_field))
    }

    /// How many bytes of path and extra field follow the fixed header
    pub fn variable_size(&self) -> usize {
        usize::from(self.path_length) + usize::from(self.extra_field_length)
    }

    /// Builds an entry header from this header and the bytes that followed it
    /// (see [`variable_size()`](Self::variable_size)).
    pub fn into_entry_header(self, mut variable: Vec<u8>) -> EntryHeader {
        let extra = variable.split_off(variable.len().min(usize::from(self.path_length)));
        let mut header = EntryHeader {
            version_needed: self.minimum_extract_version,
            flags: self.flags,
            compression_method: CompressionMethod::from_u16(self.compression_method),
            last_modified_time: self.last_modified_time,
            last_modified_date: self.last_modified_date,
            crc32: self.crc32,
            compressed_size: u64::from(self.compressed_size),
            uncompressed_size: u64::from(self.uncompressed_size),
            name: variable,
            extra,
        };
        widen_from_extra_field(&mut header, ExtraFieldSource::LocalHeader, None);
        header
    }
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    const FIXED_SIZE: usize = 22;

    pub fn parse(eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        if eocdr.len() < Self::FIXED_SIZE || eocdr[..4] != EOCDR_MAGIC {
            return Err(ZipError::InvalidArchive(
                "Truncated End Of Central Directory Record",
            ));
        }
        let mut eocdr = FieldCursor::new(&eocdr[4..]);
        let disk_number = eocdr.u16();
        let disk_with_central_directory = eocdr.u16();
        let entries_on_this_disk = eocdr.u16();
        let entries = eocdr.u16();
        let central_directory_size = eocdr.u32();
        let central_directory_offset = eocdr.u32();
        // The comment length and comment follow. Nobody reads them.

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }
}

/// Searches backward through `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
pub fn find_eocdr(mapping: &[u8]) -> ZipResult<usize> {
    memmem::rfind(mapping, &EOCDR_MAGIC).ok_or(ZipError::InvalidArchive(
        "Couldn't find End Of Central Directory Record",
    ))
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub fn parse(mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < Self::size_in_file() || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        let mut mapping = FieldCursor::new(&mapping[4..]);
        let disk_with_central_directory = mapping.u32();
        let zip64_eocdr_offset = mapping.u64();
        let disks = mapping.u32();

        Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        })
    }

    pub fn size_in_file() -> usize {
        20
    }
}

/// Data from the Zip64 end of central directory record
///
/// On Zip64 files, this takes the place of the End of central directory record
/// for anything that didn't fit in its 16 and 32-bit fields.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn parse(eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        if eocdr.len() < Self::fixed_size_in_file() || eocdr[..4] != ZIP64_EOCDR_MAGIC {
            return Err(ZipError::InvalidArchive(
                "Truncated Zip64 End Of Central Directory Record",
            ));
        }
        let mut eocdr = FieldCursor::new(&eocdr[4..]);
        let eocdr_size = eocdr.u64();
        eocdr.u16(); // version made by
        eocdr.u16(); // version needed to extract
        let disk_number = eocdr.u32();
        let disk_with_central_directory = eocdr.u32();
        let entries_on_this_disk = eocdr.u64();
        let entries = eocdr.u64();
        eocdr.u64(); // size of the central directory
        let central_directory_offset = eocdr.u64();

        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        //
        // Size = SizeOfFixedFields + SizeOfVariableData - 12.
        // (SizeOfVariableData = Size - SizeOfFixedFields + 12)
        let extensible_data_length = usize(eocdr_size)?
            .checked_add(12)
            .and_then(|total| total.checked_sub(Self::fixed_size_in_file()))
            .ok_or(ZipError::InvalidArchive(
                "Invalid extensible data length in Zip64 End Of Central Directory Record",
            ))?;
        eocdr.take(extensible_data_length).ok_or(ZipError::InvalidArchive(
            "Invalid extensible data length in Zip64 End Of Central Directory Record",
        ))?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_offset,
        })
    }

    fn fixed_size_in_file() -> usize {
        56
    }
}

/// Finds the Zip64 end of central directory record in the given slice.
///
/// The slice should start at the Zip64 EOCDR's nominal location,
/// but we might have to do some searching since ZIP archives can have
/// arbitrary junk up front.
pub fn find_zip64_eocdr(mapping: &[u8]) -> ZipResult<usize> {
    memmem::find(mapping, &ZIP64_EOCDR_MAGIC).ok_or(ZipError::InvalidArchive(
        "Couldn't find zip64 End Of Central Directory Record",
    ))
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    const FIXED_SIZE: usize = 46;

    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        const TRUNCATED: ZipError = ZipError::InvalidArchive("Truncated central directory entry");

        let mut cursor = FieldCursor::new(*entry);
        let mut fixed = FieldCursor::new(cursor.take(Self::FIXED_SIZE).ok_or(TRUNCATED)?);
        if fixed.u32() != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::InvalidArchive("Invalid central directory entry"));
        }
        fixed.u16(); // version made by
        let minimum_extract_version = fixed.u16();
        let flags = fixed.u16();
        let compression_method = fixed.u16();
        let last_modified_time = fixed.u16();
        let last_modified_date = fixed.u16();
        let crc32 = fixed.u32();
        let compressed_size = fixed.u32();
        let uncompressed_size = fixed.u32();
        let path_length = usize::from(fixed.u16());
        let extra_field_length = usize::from(fixed.u16());
        let file_comment_length = usize::from(fixed.u16());
        let disk_number = fixed.u16();
        fixed.u16(); // internal file attributes
        fixed.u32(); // external file attributes
        let header_offset = fixed.u32();
        let path = cursor.take(path_length).ok_or(TRUNCATED)?;
        let extra_field = cursor.take(extra_field_length).ok_or(TRUNCATED)?;
        // The comment has to be skipped to get to the next entry.
        cursor.take(file_comment_length).ok_or(TRUNCATED)?;
        *entry = cursor.rest();

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            header_offset,
            path,
            extra_field,
        })
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Extracts the "sizes are in a trailing data descriptor" bit
/// from the 16-bit flags field.
pub fn has_data_descriptor(flags: u16) -> bool {
    // Bit 3: If this bit is set, the fields crc-32, compressed
    //        size and uncompressed size are set to zero in the
    //        local header.  The correct values are put in the
    //        data descriptor immediately following the compressed
    //        data.
    flags & (1 << 3) != 0
}

/// Decodes a raw entry name per the flags it came with.
pub fn decode_path(raw: &[u8], flags: u16) -> ZipResult<Cow<'_, Utf8Path>> {
    if is_utf8(flags) {
        let utf8 = std::str::from_utf8(raw).map_err(ZipError::Encoding)?;
        Ok(Cow::Borrowed(Utf8Path::new(utf8)))
    } else {
        let str_cow: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        // Annoying: doesn't seem to be any Cow<str> -> Cow<Path>
        Ok(match str_cow {
            Cow::Borrowed(s) => Cow::Borrowed(Utf8Path::new(s)),
            Cow::Owned(s) => Cow::Owned(Utf8PathBuf::from(s)),
        })
    }
}

impl EntryHeader {
    /// Extracts an entry header from a central directory entry,
    /// along with the offset of its local file header.
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry) -> ZipResult<(Self, usize)> {
        if cde.disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                String::from_utf8_lossy(cde.path),
                cde.disk_number,
            )));
        }

        let mut header = Self {
            version_needed: cde.minimum_extract_version,
            flags: cde.flags,
            compression_method: CompressionMethod::from_u16(cde.compression_method),
            last_modified_time: cde.last_modified_time,
            last_modified_date: cde.last_modified_date,
            crc32: cde.crc32,
            compressed_size: u64::from(cde.compressed_size),
            uncompressed_size: u64::from(cde.uncompressed_size),
            name: cde.path.to_vec(),
            extra: cde.extra_field.to_vec(),
        };
        let mut header_offset = u64::from(cde.header_offset);
        widen_from_extra_field(
            &mut header,
            ExtraFieldSource::CentralDirectory,
            Some(&mut header_offset),
        );

        Ok((header, usize(header_offset)?))
    }
}

pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtraFieldSource {
    LocalHeader,
    CentralDirectory,
}

/// Parses the "extra fields" found in central directory entries
/// and local file headers.
///
/// Currently we just look for Zip64 info (64-bit values for files > 2^32 in size),
/// and a malformed field just leaves the 32-bit values in place.
fn widen_from_extra_field(
    header: &mut EntryHeader,
    source: ExtraFieldSource,
    mut header_offset: Option<&mut u64>,
) {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let mut extra = FieldCursor::new(&header.extra);
    let mut widened = (None, None, None);
    while extra.remaining() >= 4 {
        let kind = extra.u16();
        let field_len = usize::from(extra.u16());
        let Some(data) = extra.take(field_len) else {
            warn!("Extra field {kind:#06x} overruns the extra data; ignoring it");
            break;
        };
        if kind != ZIP64_EXTRA_ID {
            continue;
        }

        // 4.5.3 -Zip64 Extended Information Extra Field (0x0001):
        //
        // Original Size       8 bytes    Original uncompressed file size
        // Compressed Size     8 bytes    Size of compressed data
        // Relative Header
        // Offset              8 bytes    Offset of local header record
        //
        // The order of the fields in the zip64 extended
        // information record is fixed, but the fields MUST
        // only appear if the corresponding Local or Central
        // directory record field is set to 0xFFFF or 0xFFFFFFFF.
        //
        // This entry in the Local header MUST include BOTH original
        // and compressed file size fields.
        let mut data = FieldCursor::new(data);
        let both_sizes = source == ExtraFieldSource::LocalHeader && data.remaining() >= 16;
        if (both_sizes || header.uncompressed_size == u64::from(ZIP64_PLACEHOLDER))
            && data.remaining() >= 8
        {
            widened.0 = Some(data.u64());
        }
        if (both_sizes || header.compressed_size == u64::from(ZIP64_PLACEHOLDER))
            && data.remaining() >= 8
        {
            widened.1 = Some(data.u64());
        }
        if let Some(offset) = header_offset.as_deref() {
            if *offset == u64::from(ZIP64_PLACEHOLDER) && data.remaining() >= 8 {
                widened.2 = Some(data.u64());
            }
        }
    }

    // Only take the 64-bit values where the 32-bit ones were placeholders.
    // (A local header's Zip64 field carries both sizes even if only one overflowed.)
    if header.uncompressed_size == u64::from(ZIP64_PLACEHOLDER) {
        if let Some(size) = widened.0 {
            header.uncompressed_size = size;
        }
    }
    if header.compressed_size == u64::from(ZIP64_PLACEHOLDER) {
        if let Some(size) = widened.1 {
            header.compressed_size = size;
        }
    }
    if let (Some(offset), Some(wide)) = (header_offset.as_deref_mut(), widened.2) {
        *offset = wide;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn local_header_bytes(version: u16, flags: u16, method: u16, sizes: (u32, u32)) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&method.to_le_bytes());
        bytes.extend_from_slice(&0x6b38u16.to_le_bytes()); // 13:25:48
        bytes.extend_from_slice(&0x5a93u16.to_le_bytes()); // 2025-04-19
        bytes.extend_from_slice(&0xcafef00du32.to_le_bytes());
        bytes.extend_from_slice(&sizes.0.to_le_bytes());
        bytes.extend_from_slice(&sizes.1.to_le_bytes());
        bytes.extend_from_slice(&5u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes
    }

    #[test]
    fn cursor_reads_little_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a];
        let mut cursor = FieldCursor::new(&bytes);
        assert_eq!(cursor.u16(), 0x0201);
        assert_eq!(cursor.remaining(), 8);
        assert_eq!(cursor.u64(), 0x0a09080706050403);
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.take(1), None);
    }

    #[test]
    fn cursor_take_doesnt_move_on_failure() {
        let bytes = [1, 2, 3];
        let mut cursor = FieldCursor::new(&bytes);
        assert_eq!(cursor.take(4), None);
        assert_eq!(cursor.take(2), Some(&bytes[..2]));
        assert_eq!(cursor.rest(), &bytes[2..]);
    }

    #[test]
    fn local_header_fields() {
        let bytes = local_header_bytes(20, 0x0808, 8, (100, 200));
        let fixed: [u8; LocalFileHeader::FIXED_SIZE] = bytes.try_into().unwrap();
        let header = match LocalFileHeader::parse_fixed(&fixed).unwrap() {
            Record::LocalFile(h) => h,
            other => panic!("Expected a local file header, got {:?}", other),
        };
        assert_eq!(header.minimum_extract_version, 20);
        assert_eq!(header.flags, 0x0808);
        assert_eq!(header.compression_method, 8);
        assert_eq!(header.crc32, 0xcafef00d);
        assert_eq!(header.compressed_size, 100);
        assert_eq!(header.uncompressed_size, 200);
        assert_eq!(header.variable_size(), 5);

        let entry = header.into_entry_header(b"hi.md".to_vec());
        assert_eq!(entry.name, b"hi.md");
        assert!(entry.extra.is_empty());
        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert!(entry.has_data_descriptor());
        assert_eq!(entry.path().unwrap().as_str(), "hi.md");
        assert_eq!(
            entry.last_modified().unwrap().to_string(),
            "2025-04-19 13:25:48"
        );
    }

    #[test]
    fn central_directory_magic_ends_entries() {
        let mut fixed = [0u8; LocalFileHeader::FIXED_SIZE];
        fixed[..4].copy_from_slice(&CENTRAL_DIRECTORY_MAGIC.to_le_bytes());
        assert!(matches!(
            LocalFileHeader::parse_fixed(&fixed),
            Ok(Record::CentralDirectory)
        ));
    }

    #[test]
    fn other_magic_is_invalid() {
        let mut fixed = [0u8; LocalFileHeader::FIXED_SIZE];
        fixed[..4].copy_from_slice(b"PK\x05\x06");
        assert!(matches!(
            LocalFileHeader::parse_fixed(&fixed),
            Err(ZipError::InvalidFileHeader(0x06054b50))
        ));
    }

    #[test]
    fn truncated_mapping_is_an_error() {
        let bytes = local_header_bytes(20, 0, 0, (5, 5));
        // Claims a five-byte name, but there isn't one.
        let mut mapping = &bytes[..];
        assert!(matches!(
            LocalFileHeader::parse_and_consume(&mut mapping),
            Err(ZipError::InvalidArchive(_))
        ));
        let mut mapping = &bytes[..12];
        assert!(matches!(
            LocalFileHeader::parse_and_consume(&mut mapping),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn zip64_extra_widens_local_sizes() {
        let bytes = local_header_bytes(45, 0, 0, (u32::MAX, u32::MAX));
        let fixed: [u8; LocalFileHeader::FIXED_SIZE] = bytes.try_into().unwrap();
        let Record::LocalFile(mut header) = LocalFileHeader::parse_fixed(&fixed).unwrap() else {
            panic!("Expected a local file header");
        };
        header.extra_field_length = 20;

        let mut variable = b"big.b".to_vec();
        variable.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        variable.extend_from_slice(&16u16.to_le_bytes());
        variable.extend_from_slice(&(5u64 << 32).to_le_bytes());
        variable.extend_from_slice(&(3u64 << 32).to_le_bytes());

        let entry = header.into_entry_header(variable);
        assert_eq!(entry.uncompressed_size, 5 << 32);
        assert_eq!(entry.compressed_size, 3 << 32);
        assert!(entry.is_zip64());
    }

    #[test]
    fn malformed_extra_keeps_narrow_sizes() {
        let mut header = EntryHeader {
            version_needed: 45,
            flags: 0,
            compression_method: CompressionMethod::None,
            last_modified_time: 0,
            last_modified_date: 0,
            crc32: 0,
            compressed_size: u64::from(u32::MAX),
            uncompressed_size: u64::from(u32::MAX),
            name: Vec::new(),
            // Claims 16 bytes of data, has 2.
            extra: vec![0x01, 0x00, 0x10, 0x00, 0xff, 0xff],
        };
        widen_from_extra_field(&mut header, ExtraFieldSource::LocalHeader, None);
        assert_eq!(header.uncompressed_size, u64::from(u32::MAX));
    }

    fn central_directory_entry_bytes(name: &str, comment: &str, offset: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&0x031eu16.to_le_bytes()); // made by Unix, 3.0
        bytes.extend_from_slice(&20u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // flags
        bytes.extend_from_slice(&8u16.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]); // time & date
        bytes.extend_from_slice(&0xcafef00du32.to_le_bytes());
        bytes.extend_from_slice(&10u32.to_le_bytes());
        bytes.extend_from_slice(&20u32.to_le_bytes());
        bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // disk
        bytes.extend_from_slice(&1u16.to_le_bytes()); // internal attributes
        bytes.extend_from_slice(&0o100644u32.to_le_bytes()); // external attributes
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(comment.as_bytes());
        bytes
    }

    #[test]
    fn central_directory_comments_are_skipped() {
        let mut bytes = central_directory_entry_bytes("first", "a comment", 0);
        bytes.extend(central_directory_entry_bytes("second", "", 1234));

        let mut directory = &bytes[..];
        let first = CentralDirectoryEntry::parse_and_consume(&mut directory).unwrap();
        assert_eq!(first.path, b"first");
        assert_eq!(first.minimum_extract_version, 20);
        let second = CentralDirectoryEntry::parse_and_consume(&mut directory).unwrap();
        assert_eq!(second.path, b"second");
        assert_eq!(second.header_offset, 1234);
        assert!(directory.is_empty());

        // A comment running off the end is truncation, not a panic.
        let bytes = central_directory_entry_bytes("first", "a comment", 0);
        let mut directory = &bytes[..bytes.len() - 1];
        assert!(matches!(
            CentralDirectoryEntry::parse_and_consume(&mut directory),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn zip64_eocdr_fields() {
        let mut bytes = ZIP64_EOCDR_MAGIC.to_vec();
        bytes.extend_from_slice(&(44u64 + 3).to_le_bytes()); // 3 bytes of extensible data
        bytes.extend_from_slice(&45u16.to_le_bytes());
        bytes.extend_from_slice(&45u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&7u64.to_le_bytes());
        bytes.extend_from_slice(&7u64.to_le_bytes());
        bytes.extend_from_slice(&500u64.to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 32).to_le_bytes());
        bytes.extend_from_slice(b"xyz");

        let eocdr = Zip64EndOfCentralDirectory::parse(&bytes).unwrap();
        assert_eq!(eocdr.entries, 7);
        assert_eq!(eocdr.entries_on_this_disk, 7);
        assert_eq!(eocdr.central_directory_offset, 1 << 32);

        // Claims more extensible data than there is.
        assert!(matches!(
            Zip64EndOfCentralDirectory::parse(&bytes[..bytes.len() - 1]),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn cp437_names() {
        // 0x81 is ü in CP437
        let path = decode_path(b"gr\x81n.txt", 0).unwrap();
        assert_eq!(path.as_str(), "grün.txt");
        let path = decode_path("grün.txt".as_bytes(), 1 << 11).unwrap();
        assert_eq!(path.as_str(), "grün.txt");
        assert!(matches!(
            decode_path(b"gr\x81n.txt", 1 << 11),
            Err(ZipError::Encoding(_))
        ));
    }

    #[test]
    fn nonsense_msdos_dates() {
        assert!(parse_msdos(0, 0).is_none()); // month zero
        assert_eq!(
            parse_msdos(0, (1 << 5) | 1).unwrap().to_string(),
            "1980-01-01 00:00:00"
        );
    }
}
