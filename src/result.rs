//! Error types and the related `Result<T>`

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// Something other than a local file header or the central directory
    /// sat where the next entry should start. (The u32 is what we found.)
    #[error("Invalid file header (magic {0:#010x})")]
    InvalidFileHeader(u32),

    /// The stream ended or failed while reading an entry's data descriptor.
    #[error("Invalid data descriptor")]
    InvalidDataDescriptor(#[source] std::io::Error),

    /// The entry uses a compression method we can't decode,
    /// so we can't find where it ends either.
    #[error("Unsupported compression method {0}")]
    UnsupportedCompression(u16),

    /// A stored entry deferred its size to a data descriptor,
    /// so there's no way to know where its data stops.
    #[error("Missing uncompressed size")]
    NoUncompressedSize,

    /// Not a failure: scanning reached the central directory
    /// (or the end of the stream) and there are no more entries.
    ///
    /// Check for it with [`ZipError::is_end_of_archive()`].
    #[error("No more entries")]
    EndOfArchive,

    /// A body was requested when there was no current entry to read.
    #[error("No current entry")]
    NoCurrentEntry,

    /// The current entry's body was already opened.
    /// Its data can only be read off the stream once.
    #[error("Entry body already opened")]
    BodyAlreadyOpened,

    /// The ZIP archive contained invalid data per APPNOTE.TXT.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The ZIP archive is prepended some unknown bytes.
    /// (Use [`ZipArchive::with_prepended_data()`] if this is okay.)
    ///
    /// [`ZipArchive::with_prepended_data()`]: ../read/struct.ZipArchive.html#method.with_prepended_data
    #[error("Archive prepended with {0} unknown bytes")]
    PrependedWithUnknownBytes(usize),

    /// A cast from a 64-bit int to a usize failed while indexing the archive,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

impl ZipError {
    /// Returns true if this is the marker for a normal end of entries
    /// rather than an actual failure.
    pub fn is_end_of_archive(&self) -> bool {
        matches!(self, ZipError::EndOfArchive)
    }
}
