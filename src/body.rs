//! Turns a header into a reader for the entry's contents.
//!
//! A body reads straight off the scanner's source (usually borrowing it)
//! and has to stop exactly where the entry's data does,
//! since whatever follows (a data descriptor or the next header)
//! gets decoded from there.

use std::io::{self, BufRead, Read, Take};

use flate2::bufread::DeflateDecoder;
use log::*;

use crate::read::{CompressionMethod, EntryHeader};
use crate::result::ZipError;

/// How to read an entry's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPlan {
    /// Read exactly `size` bytes as-is.
    Stored { size: u64 },
    /// Inflate until the DEFLATE stream says it's done.
    Deflate,
}

/// Why an entry's data can't be read (or skipped, for that matter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyError {
    UnsupportedCompression(u16),
    NoUncompressedSize,
}

impl From<BodyError> for ZipError {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::UnsupportedCompression(method) => ZipError::UnsupportedCompression(method),
            BodyError::NoUncompressedSize => ZipError::NoUncompressedSize,
        }
    }
}

/// Decides how to read the entry with the given header.
pub fn plan(header: &EntryHeader) -> Result<BodyPlan, BodyError> {
    match header.compression_method {
        // DEFLATE streams mark their own end, so it doesn't matter
        // whether the sizes were known when the header was written.
        CompressionMethod::Deflate => Ok(BodyPlan::Deflate),
        CompressionMethod::None => {
            let size = header.uncompressed_size;
            if size > 0 {
                if header.has_data_descriptor() {
                    // Sizes should be zero here when a descriptor follows,
                    // but some writers fill them in anyways. Take their word for it.
                    warn!(
                        "Trusting size {} of stored entry {} despite its data descriptor",
                        size,
                        String::from_utf8_lossy(&header.name)
                    );
                }
                Ok(BodyPlan::Stored { size })
            } else if !header.has_data_descriptor() {
                // An empty file or a directory
                Ok(BodyPlan::Stored { size: 0 })
            } else {
                // Stored data doesn't mark its end.
                // The real size is in the descriptor on the far side of it.
                Err(BodyError::NoUncompressedSize)
            }
        }
        CompressionMethod::Unsupported(method) => Err(BodyError::UnsupportedCompression(method)),
    }
}

/// An entry's contents, read from the source `S`
pub enum EntryBody<S> {
    Stored(Take<S>),
    Deflate(DeflateDecoder<S>),
}

impl<S: BufRead> EntryBody<S> {
    pub fn new(plan: BodyPlan, source: S) -> Self {
        debug!("Reading body as {:?}", plan);
        match plan {
            BodyPlan::Stored { size } => EntryBody::Stored(source.take(size)),
            BodyPlan::Deflate => EntryBody::Deflate(DeflateDecoder::new(source)),
        }
    }
}

impl<S: BufRead> Read for EntryBody<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryBody::Stored(take) => take.read(buf),
            EntryBody::Deflate(inflate) => inflate.read(buf),
        }
    }
}
