//! Reading a ZIP archive front to back, without ever seeing its end.
//!
//! ZIP archives keep their table of contents (the central directory)
//! at the back, which is no help when the archive is coming in over a socket.
//! But each entry's data is also preceded by a local file header,
//! so with a bit of care we can walk the entries in order:
//!
//! ```text
//! [local file header 1][data 1][data descriptor 1]
//! [local file header 2][data 2]
//! ...
//! [central directory] <- we stop here
//! ```
//!
//! The catch is that nothing tells us where an entry's data ends
//! other than the data itself. Stored entries have their size up front,
//! and DEFLATE streams mark their own end, but once we lose our place
//! there's no getting it back. So every error is the end of the scan.

use std::io::{self, BufRead, BufReader, Read};

use log::*;

use crate::body::{self, EntryBody};
use crate::descriptor::{self, DataDescriptor, SizeWidth, MAX_DESCRIPTOR_LEN};
use crate::read::EntryHeader;
use crate::result::*;
use crate::spec::{LocalFileHeader, Record};

/// Something that hands out the entries of a ZIP archive, one at a time.
///
/// Implemented by [`ZipScanner`], which reads any [`Read`] front to back,
/// and by [`IndexedScanner`](crate::read::IndexedScanner),
/// which walks an archive whose central directory has already been read.
///
/// ```no_run
/// # use std::io;
/// # use zipscan::*;
/// fn list(entries: &mut dyn EntryScanner) -> ZipResult<()> {
///     while entries.advance() {
///         let header = entries.current_header().expect("advance() found an entry");
///         println!("{}", header.path()?);
///         io::copy(&mut entries.open_body()?, &mut io::sink())?;
///     }
///     match entries.last_error() {
///         Some(e) if !e.is_end_of_archive() => Err(ZipError::InvalidArchive("scan failed")),
///         _ => Ok(()),
///     }
/// }
/// ```
pub trait EntryScanner {
    /// Moves to the next entry, returning false once there are no more
    /// or something went wrong (see [`last_error()`](Self::last_error)).
    ///
    /// Any body opened for the previous entry must have been read to its end.
    fn advance(&mut self) -> bool;

    /// The header of the current entry, or None if there isn't one.
    fn current_header(&self) -> Option<&EntryHeader>;

    /// Opens the current entry's (decompressed) contents.
    fn open_body(&mut self) -> ZipResult<Box<dyn Read + '_>>;

    /// Why [`advance()`](Self::advance) returned false:
    /// [`ZipError::EndOfArchive`] if all went well.
    /// None while there are still entries to go.
    fn last_error(&self) -> Option<&ZipError>;
}

/// Where the scanner is in the archive
#[derive(Debug)]
enum ScannerState {
    /// The source is at the next header,
    /// or at the start of the current entry's unopened data.
    AwaitingHeader,
    /// The current entry's body was opened, and the source is somewhere
    /// in (or, hopefully, at the end of) its data.
    BodyOpen,
    /// Nothing more to read. `EndOfArchive` if that's a good thing.
    Finished(ZipError),
}

/// Reads the entries of a ZIP archive from front to back
/// out of anything implementing [`Read`], no seeking required.
///
/// ```no_run
/// # use std::io;
/// # use zipscan::*;
/// let mut scanner = ZipScanner::new(io::stdin());
/// while scanner.advance() {
///     let mut body = scanner.open_body()?;
///     io::copy(&mut body, &mut io::sink())?;
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// Bodies borrow the scanner, so the compiler makes sure they're gone
/// before the next [`advance()`](EntryScanner::advance). It can't make sure
/// they were read to the end, though. A body that wasn't leaves the source
/// somewhere in the middle of the entry's data, and the next advance
/// will try to decode whatever is there.
pub struct ZipScanner<R> {
    source: BufReader<R>,
    state: ScannerState,
    header: Option<EntryHeader>,
    descriptor: Option<DataDescriptor>,
}

impl<R: Read> ZipScanner<R> {
    /// Creates a scanner for the archive read out of `reader`.
    pub fn new(reader: R) -> Self {
        Self::from_buffered(BufReader::new(reader))
    }

    /// Like [`ZipScanner::new()`], with the given size for the read buffer.
    ///
    /// The buffer holds at least a local file header's fixed fields,
    /// whatever `capacity` says.
    pub fn with_capacity(capacity: usize, reader: R) -> Self {
        let capacity = capacity.max(LocalFileHeader::FIXED_SIZE);
        Self::from_buffered(BufReader::with_capacity(capacity, reader))
    }

    fn from_buffered(source: BufReader<R>) -> Self {
        Self {
            source,
            state: ScannerState::AwaitingHeader,
            header: None,
            descriptor: None,
        }
    }

    /// Returns the underlying reader.
    ///
    /// Anything the scanner buffered but didn't get to is lost.
    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }

    /// The data descriptor that followed the entry
    /// the most recent [`advance()`](EntryScanner::advance) moved past,
    /// if it had one.
    ///
    /// Since we don't check CRCs, this is informational.
    pub fn last_descriptor(&self) -> Option<&DataDescriptor> {
        self.descriptor.as_ref()
    }

    fn finish(&mut self, cause: ZipError) -> bool {
        if cause.is_end_of_archive() {
            debug!("No more entries");
        } else {
            debug!("Stopping: {}", cause);
        }
        self.header = None;
        self.state = ScannerState::Finished(cause);
        false
    }

    /// Reads the data descriptor following the current entry's data.
    fn read_descriptor(&mut self, width: SizeWidth) -> ZipResult<DataDescriptor> {
        let mut window = [0u8; MAX_DESCRIPTOR_LEN];
        self.source
            .read_exact(&mut window[..4])
            .map_err(ZipError::InvalidDataDescriptor)?;

        // The signature is optional, so the first word could be the CRC.
        let signed = descriptor::has_signature([window[0], window[1], window[2], window[3]]);
        let len = if signed {
            width.signed_len()
        } else {
            width.unsigned_len()
        };
        self.source
            .read_exact(&mut window[4..len])
            .map_err(ZipError::InvalidDataDescriptor)?;
        trace!("Data descriptor: {:02x?}", &window[..len]);

        let descriptor = DataDescriptor::decode(&window[..len], width, signed);
        debug!("{:?}", descriptor);
        Ok(descriptor)
    }

    /// Reads the next local file header, or None if we're out of entries.
    fn read_header(&mut self) -> ZipResult<Option<EntryHeader>> {
        // Running out right at an entry boundary means the archive
        // was cut off before its central directory. We've still seen everything.
        let at_end = loop {
            match self.source.fill_buf() {
                Ok(buffered) => break buffered.is_empty(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if at_end {
            debug!("Stream ended before the central directory");
            return Ok(None);
        }

        let mut fixed = [0u8; LocalFileHeader::FIXED_SIZE];
        self.source.read_exact(&mut fixed)?;
        let local = match LocalFileHeader::parse_fixed(&fixed)? {
            Record::CentralDirectory => return Ok(None),
            Record::LocalFile(local) => local,
        };
        trace!("{:?}", local);

        let mut variable = vec![0; local.variable_size()];
        self.source.read_exact(&mut variable)?;
        let header = local.into_entry_header(variable);
        debug!(
            "Found {} ({} bytes, {:?})",
            String::from_utf8_lossy(&header.name),
            header.uncompressed_size,
            header.compression_method
        );
        Ok(Some(header))
    }
}

impl<R: Read> EntryScanner for ZipScanner<R> {
    fn advance(&mut self) -> bool {
        self.descriptor = None;
        match &self.state {
            ScannerState::Finished(_) => return false,
            ScannerState::AwaitingHeader => {}
            ScannerState::BodyOpen => {
                let deferred = self
                    .header
                    .as_ref()
                    .filter(|h| h.has_data_descriptor())
                    .map(|h| SizeWidth::for_version(h.version_needed));
                if let Some(width) = deferred {
                    match self.read_descriptor(width) {
                        Ok(descriptor) => self.descriptor = Some(descriptor),
                        Err(e) => return self.finish(e),
                    }
                }
                self.state = ScannerState::AwaitingHeader;
            }
        }

        match self.read_header() {
            Ok(Some(header)) => {
                self.header = Some(header);
                true
            }
            Ok(None) => self.finish(ZipError::EndOfArchive),
            Err(e) => self.finish(e),
        }
    }

    /// The header of the current entry.
    ///
    /// After [`open_body()`](EntryScanner::open_body) fails, this is still
    /// the header of the entry that couldn't be opened.
    fn current_header(&self) -> Option<&EntryHeader> {
        self.header.as_ref()
    }

    /// Opens the current entry's contents.
    ///
    /// Failing to do so ends the scan, since it means we can't tell where
    /// the entry ends and the next one begins.
    fn open_body(&mut self) -> ZipResult<Box<dyn Read + '_>> {
        match self.state {
            ScannerState::AwaitingHeader => {}
            ScannerState::BodyOpen => return Err(ZipError::BodyAlreadyOpened),
            ScannerState::Finished(_) => return Err(ZipError::NoCurrentEntry),
        }
        let header = self.header.as_ref().ok_or(ZipError::NoCurrentEntry)?;

        match body::plan(header) {
            Ok(plan) => {
                self.state = ScannerState::BodyOpen;
                Ok(Box::new(EntryBody::new(plan, &mut self.source)))
            }
            Err(why) => {
                warn!(
                    "Can't read {}: {}",
                    String::from_utf8_lossy(&header.name),
                    ZipError::from(why)
                );
                // Keep the header around so the caller can see what failed.
                self.state = ScannerState::Finished(why.into());
                Err(why.into())
            }
        }
    }

    fn last_error(&self) -> Option<&ZipError> {
        match &self.state {
            ScannerState::Finished(cause) => Some(cause),
            _ => None,
        }
    }
}
