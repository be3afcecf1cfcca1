//! Reading a ZIP archive that's already all in memory (or memory-mapped),
//! by way of its central directory.
//!
//! Create a [`ZipArchive`] from the bytes, then either read its entries
//! directly or walk them with an [`IndexedScanner`], which behaves just like
//! the streaming [`ZipScanner`].
//!
//! [`ZipArchive`]: struct.ZipArchive.html
//! [`IndexedScanner`]: struct.IndexedScanner.html
//! [`ZipScanner`]: ../scan/struct.ZipScanner.html

use std::borrow::Cow;
use std::io;

use camino::Utf8Path;
use chrono::NaiveDateTime;
use log::*;

use crate::arch::usize;
use crate::body::{BodyPlan, EntryBody};
use crate::result::*;
use crate::scan::EntryScanner;
use crate::spec;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// Metadata for a file or directory in the archive
///
/// When streaming, this comes from the entry's local file header,
/// where the CRC and sizes may be zeros if the writer didn't know them yet
/// (see [`has_data_descriptor()`](Self::has_data_descriptor)).
/// From a [`ZipArchive`], it comes from the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Minimum ZIP version needed to extract the entry, times ten.
    /// 4.5 and up means Zip64.
    pub version_needed: u16,

    /// General purpose bit flags
    pub flags: u16,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// MS-DOS modification time
    pub last_modified_time: u16,

    /// MS-DOS modification date
    pub last_modified_date: u16,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// Compressed size of the file in bytes
    pub compressed_size: u64,

    /// Uncompressed size of the file in bytes
    pub uncompressed_size: u64,

    /// The file's path, undecoded. See [`path()`](Self::path).
    pub name: Vec<u8>,

    /// The extra field, undecoded. (We only look inside for Zip64 sizes.)
    pub extra: Vec<u8>,
}

impl EntryHeader {
    /// The provided path of the file,
    /// decoded as UTF-8 or CP437 depending on the entry's flags.
    pub fn path(&self) -> ZipResult<Cow<'_, Utf8Path>> {
        spec::decode_path(&self.name, self.flags)
    }

    /// The combined date and time the file was last modified,
    /// or None if the MS-DOS fields don't hold a real date.
    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        spec::parse_msdos(self.last_modified_time, self.last_modified_date)
    }

    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        self.name.ends_with(b"/")
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// True if the file is encrypted (decryption is unsupported)
    pub fn is_encrypted(&self) -> bool {
        spec::is_encrypted(self.flags)
    }

    /// True if the CRC and sizes follow the entry's data
    /// instead of (or in addition to) being in its header.
    pub fn has_data_descriptor(&self) -> bool {
        spec::has_data_descriptor(self.flags)
    }

    /// True if the entry needs Zip64 support, i.e., 64-bit sizes.
    pub fn is_zip64(&self) -> bool {
        self.version_needed >= spec::ZIP64_VERSION
    }
}

/// An entry in a [`ZipArchive`]'s central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    pub header: EntryHeader,

    /// The offset to the local file header in the archive
    pub(crate) header_offset: usize,
}

/// A ZIP archive to be read
pub struct ZipArchive<'a> {
    /// The contents of the ZIP archive, as a byte slice.
    mapping: &'a [u8],
    /// A list of entries from the ZIP's central directory
    entries: Vec<IndexedEntry>,
}

impl<'a> ZipArchive<'a> {
    /// Reads a ZIP archive from a byte slice.
    /// Smaller files can be read into a buffer.
    ///
    /// ```no_run
    /// # use std::fs;
    /// # use zipscan::*;
    /// let bytes = fs::read("foo.zip")?;
    /// let archive = ZipArchive::new(&bytes)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    ///
    /// For larger ones, memory map!
    /// ```no_run
    /// # use std::fs::{self, File};
    /// # use memmap2::Mmap;
    /// # use zipscan::*;
    /// let zip_file = File::open("foo.zip")?;
    /// let mapping = unsafe { Mmap::map(&zip_file)? };
    /// let archive = ZipArchive::new(&mapping)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(mapping: &'a [u8]) -> ZipResult<Self> {
        let (new_archive, archive_offset) = Self::with_prepended_data(mapping)?;
        if archive_offset != 0 {
            return Err(ZipError::PrependedWithUnknownBytes(archive_offset));
        }
        Ok(new_archive)
    }

    /// Like `ZipArchive::new()`, but allows arbitrary data to prepend the archive.
    /// Returns the ZipArchive and the number of bytes prepended to the archive.
    ///
    /// Since a ZIP archive's metadata sits at the back of the file,
    /// many formats consist of ZIP archives prepended with some other data.
    /// For example, a self-extracting archive is one with an executable in the front.
    pub fn with_prepended_data(mut mapping: &'a [u8]) -> ZipResult<(Self, usize)> {
        let eocdr_posit = spec::find_eocdr(mapping)?;
        let eocdr = spec::EndOfCentralDirectory::parse(&mapping[eocdr_posit..])?;
        trace!("{:?}", eocdr);

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }

        let nominal_central_directory_offset: usize;
        let entry_count: u64;

        // Zip files can be prepended by arbitrary junk,
        // so all the given positions might be off.
        // Calculate the offset.
        let archive_offset;

        let zip64_eocdr_locator = eocdr_posit
            .checked_sub(spec::Zip64EndOfCentralDirectoryLocator::size_in_file())
            .and_then(|posit| spec::Zip64EndOfCentralDirectoryLocator::parse(&mapping[posit..]));
        if let Some(zip64_eocdr_locator) = zip64_eocdr_locator {
            trace!("{:?}", zip64_eocdr_locator);

            if eocdr.disk_number as u32 != zip64_eocdr_locator.disk_with_central_directory {
                return Err(ZipError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: disk ({}) != disk with zip64 central directory ({})",
                    eocdr.disk_number, zip64_eocdr_locator.disk_with_central_directory
                )));
            }
            if zip64_eocdr_locator.disks != 1 {
                return Err(ZipError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                    zip64_eocdr_locator.disks
                )));
            }

            // Search for the zip64 EOCDR, from its nominal starting position
            // to the end of where it could be.
            let zip64_eocdr_search_start = usize(zip64_eocdr_locator.zip64_eocdr_offset)?;
            let zip64_eocdr_search_end =
                eocdr_posit - spec::Zip64EndOfCentralDirectoryLocator::size_in_file();
            let zip64_eocdr_search_space = mapping
                .get(zip64_eocdr_search_start..zip64_eocdr_search_end)
                .ok_or(ZipError::InvalidArchive(
                    "Invalid Zip64 End Of Central Directory Record offset",
                ))?;

            let zip64_eocdr_posit = spec::find_zip64_eocdr(zip64_eocdr_search_space)?;
            // Since we're searching starting at the provided offset,
            // the returned position is the archive offset.
            archive_offset = zip64_eocdr_posit;
            let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(
                &zip64_eocdr_search_space[zip64_eocdr_posit..],
            )?;

            trace!("{:?}", zip64_eocdr);

            if zip64_eocdr.disk_number != zip64_eocdr.disk_with_central_directory {
                return Err(ZipError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: Zip64 disk ({}) != disk with central directory ({})",
                    zip64_eocdr.disk_number, zip64_eocdr.disk_with_central_directory
                )));
            }
            if zip64_eocdr.entries != zip64_eocdr.entries_on_this_disk {
                return Err(ZipError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: Zip64 entries ({}) != entries this disk ({})",
                    zip64_eocdr.entries, zip64_eocdr.entries_on_this_disk
                )));
            }

            nominal_central_directory_offset = usize(zip64_eocdr.central_directory_offset)?;
            entry_count = zip64_eocdr.entries;
        } else {
            // The offset is the actual position versus the stored one.
            let actual_cdr_posit = eocdr_posit.checked_sub(usize(eocdr.central_directory_size)?);
            let nominal_offset = usize(eocdr.central_directory_offset)?;
            archive_offset = actual_cdr_posit
                .and_then(|off| off.checked_sub(nominal_offset))
                .ok_or(ZipError::InvalidArchive(
                    "Invalid central directory size or offset",
                ))?;
            nominal_central_directory_offset = nominal_offset;
            entry_count = eocdr.entries as u64;
        }

        mapping = &mapping[archive_offset..];
        trace!(
            "{} entries at nominal offset {}",
            entry_count,
            nominal_central_directory_offset
        );

        let mut central_directory =
            mapping
                .get(nominal_central_directory_offset..)
                .ok_or(ZipError::InvalidArchive(
                    "Central directory offset is past the end of the archive",
                ))?;

        // Don't trust the count for preallocation; each entry is at least 46 bytes.
        let mut entries = Vec::with_capacity(usize(entry_count)?.min(central_directory.len() / 46));

        for _ in 0..entry_count {
            let dir_entry = spec::CentralDirectoryEntry::parse_and_consume(&mut central_directory)?;
            trace!("{:?}", dir_entry);

            let (header, header_offset) = EntryHeader::from_cde(&dir_entry)?;
            debug!("{:?}", header);
            entries.push(IndexedEntry {
                header,
                header_offset,
            });
        }

        Ok((ZipArchive { mapping, entries }, archive_offset))
    }

    /// Returns the entries found in the ZIP archive's central directory.
    ///
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> &[IndexedEntry] {
        &self.entries
    }

    /// Walks the archive's entries through the same interface
    /// as the streaming [`ZipScanner`](crate::ZipScanner).
    pub fn scanner(&self) -> IndexedScanner<'_, 'a> {
        IndexedScanner::new(self)
    }

    /// Reads the given file from the ZIP archive.
    ///
    /// Since each file in a ZIP archive is compressed independently,
    /// multiple files can be read in parallel.
    pub fn read(&self, entry: &IndexedEntry) -> ZipResult<Box<dyn io::Read + Send + 'a>> {
        let metadata = &entry.header;
        let mut file_slice = self.mapping.get(entry.header_offset..).ok_or(
            ZipError::InvalidArchive("Local file header offset is past the end of the archive"),
        )?;
        let (local_header, local_path, _local_extra) =
            spec::LocalFileHeader::parse_and_consume(&mut file_slice)?;
        trace!("{:?}", local_header);
        debug!("Reading {}", String::from_utf8_lossy(&metadata.name));
        if cfg!(feature = "check-local-metadata")
            && (local_path != metadata.name.as_slice()
                || local_header.compression_method != metadata.compression_method.as_u16())
        {
            return Err(ZipError::InvalidArchive(
                "Central directory entry doesn't match local file header",
            ));
        }

        if metadata.is_encrypted() {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                String::from_utf8_lossy(&metadata.name)
            )));
        }

        let plan = match metadata.compression_method {
            CompressionMethod::None => BodyPlan::Stored {
                size: metadata.compressed_size,
            },
            CompressionMethod::Deflate => BodyPlan::Deflate,
            CompressionMethod::Unsupported(method) => {
                return Err(ZipError::UnsupportedCompression(method))
            }
        };
        let compressed = file_slice
            .get(..usize(metadata.compressed_size)?)
            .ok_or(ZipError::InvalidArchive(
                "File data runs past the end of the archive",
            ))?;
        Ok(Box::new(EntryBody::new(plan, compressed)))
    }
}

/// Walks the entries of a [`ZipArchive`] one at a time,
/// as an [`EntryScanner`].
///
/// No parsing happens here: the archive's central directory
/// already told us everything. This just lets code written against
/// [`EntryScanner`] take an indexed archive when it has one.
pub struct IndexedScanner<'b, 'a> {
    archive: &'b ZipArchive<'a>,
    /// Index of the current entry; None before the first advance.
    position: Option<usize>,
    error: Option<ZipError>,
}

impl<'b, 'a> IndexedScanner<'b, 'a> {
    pub fn new(archive: &'b ZipArchive<'a>) -> Self {
        Self {
            archive,
            position: None,
            error: None,
        }
    }

    fn current(&self) -> Option<&'b IndexedEntry> {
        let archive: &'b ZipArchive<'a> = self.archive;
        self.position.and_then(|i| archive.entries.get(i))
    }
}

impl EntryScanner for IndexedScanner<'_, '_> {
    fn advance(&mut self) -> bool {
        if self.error.is_some() {
            return false;
        }
        let next = self.position.map_or(0, |i| i + 1);
        self.position = Some(next);
        if next >= self.archive.entries.len() {
            debug!("Done after {} entries", self.archive.entries.len());
            self.error = Some(ZipError::EndOfArchive);
            return false;
        }
        true
    }

    fn current_header(&self) -> Option<&EntryHeader> {
        self.current().map(|e| &e.header)
    }

    /// Opens the current entry.
    ///
    /// Unlike the streaming scanner, failing to open one entry
    /// doesn't stop us from getting to the next, so the error isn't kept
    /// as [`last_error()`](EntryScanner::last_error).
    fn open_body(&mut self) -> ZipResult<Box<dyn io::Read + '_>> {
        if self.error.is_some() {
            return Err(ZipError::NoCurrentEntry);
        }
        let entry = self.current().ok_or(ZipError::NoCurrentEntry)?;
        let reader: Box<dyn io::Read + '_> = self.archive.read(entry)?;
        Ok(reader)
    }

    fn last_error(&self) -> Option<&ZipError> {
        self.error.as_ref()
    }
}
