//! Builds ZIP archives byte by byte,
//! so tests can ask for exactly the layout they want.

#![allow(dead_code)]

use std::io::{self, Read, Write};

use flate2::write::DeflateEncoder;
use flate2::Compression;

/// How (and whether) an entry's sizes trail its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// Sizes are in the header.
    None,
    /// Sizes follow the data, without the optional signature.
    Unsigned,
    /// Sizes follow the data, signature and all.
    Signed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflate,
    Other(u16),
}

impl Method {
    fn code(self) -> u16 {
        match self {
            Method::Stored => 0,
            Method::Deflate => 8,
            Method::Other(code) => code,
        }
    }
}

pub const TIME: u16 = 0x6b38; // 13:25:48
pub const DATE: u16 = 0x5a93; // 2025-04-19

pub struct ArchiveBuilder {
    bytes: Vec<u8>,
    prefix_len: usize,
    central_directory: Vec<u8>,
    entries: u16,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::with_prefix(&[])
    }

    /// Starts the archive after some junk, like a self-extractor's executable.
    pub fn with_prefix(junk: &[u8]) -> Self {
        Self {
            bytes: junk.to_vec(),
            prefix_len: junk.len(),
            central_directory: Vec::new(),
            entries: 0,
        }
    }

    pub fn stored(&mut self, name: &str, contents: &[u8]) -> &mut Self {
        self.entry(name, contents, Method::Stored, Descriptor::None, false)
    }

    pub fn deflated(&mut self, name: &str, contents: &[u8], descriptor: Descriptor) -> &mut Self {
        self.entry(name, contents, Method::Deflate, descriptor, false)
    }

    /// A stored entry with a data descriptor whose header
    /// has its sizes filled in anyways, as some writers do.
    pub fn stored_with_sizes(
        &mut self,
        name: &str,
        contents: &[u8],
        descriptor: Descriptor,
    ) -> &mut Self {
        self.write_entry(name, contents, Method::Stored, descriptor, false, true)
    }

    pub fn entry(
        &mut self,
        name: &str,
        contents: &[u8],
        method: Method,
        descriptor: Descriptor,
        zip64: bool,
    ) -> &mut Self {
        let header_knows_sizes = descriptor == Descriptor::None;
        self.write_entry(name, contents, method, descriptor, zip64, header_knows_sizes)
    }

    fn write_entry(
        &mut self,
        name: &str,
        contents: &[u8],
        method: Method,
        descriptor: Descriptor,
        zip64: bool,
        header_knows_sizes: bool,
    ) -> &mut Self {
        let data = match method {
            Method::Deflate => deflate(contents),
            _ => contents.to_vec(),
        };
        let version: u16 = if zip64 { 45 } else { 20 };
        // UTF-8 names, plus the data descriptor bit if we need it
        let mut flags: u16 = 1 << 11;
        if descriptor != Descriptor::None {
            flags |= 1 << 3;
        }
        let crc = 0x1badb002u32;
        let compressed_size = data.len() as u32;
        let uncompressed_size = contents.len() as u32;
        let offset = (self.bytes.len() - self.prefix_len) as u32;

        let header_sizes = if header_knows_sizes {
            (crc, compressed_size, uncompressed_size)
        } else {
            (0, 0, 0)
        };
        put_u32(&mut self.bytes, 0x04034b50);
        put_u16(&mut self.bytes, version);
        put_u16(&mut self.bytes, flags);
        put_u16(&mut self.bytes, method.code());
        put_u16(&mut self.bytes, TIME);
        put_u16(&mut self.bytes, DATE);
        put_u32(&mut self.bytes, header_sizes.0);
        put_u32(&mut self.bytes, header_sizes.1);
        put_u32(&mut self.bytes, header_sizes.2);
        put_u16(&mut self.bytes, name.len() as u16);
        put_u16(&mut self.bytes, 0);
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.extend_from_slice(&data);

        if descriptor != Descriptor::None {
            if descriptor == Descriptor::Signed {
                put_u32(&mut self.bytes, 0x08074b50);
            }
            put_u32(&mut self.bytes, crc);
            if zip64 {
                put_u64(&mut self.bytes, u64::from(compressed_size));
                put_u64(&mut self.bytes, u64::from(uncompressed_size));
            } else {
                put_u32(&mut self.bytes, compressed_size);
                put_u32(&mut self.bytes, uncompressed_size);
            }
        }

        let cd = &mut self.central_directory;
        put_u32(cd, 0x02014b50);
        put_u16(cd, (3 << 8) | 63); // Unix, version 6.3
        put_u16(cd, version);
        put_u16(cd, flags);
        put_u16(cd, method.code());
        put_u16(cd, TIME);
        put_u16(cd, DATE);
        put_u32(cd, crc);
        put_u32(cd, compressed_size);
        put_u32(cd, uncompressed_size);
        put_u16(cd, name.len() as u16);
        put_u16(cd, 0); // extra field
        put_u16(cd, 0); // comment
        put_u16(cd, 0); // disk
        put_u16(cd, 0); // internal attributes
        put_u32(cd, 0); // external attributes
        put_u32(cd, offset);
        cd.extend_from_slice(name.as_bytes());

        self.entries += 1;
        self
    }

    /// Appends the central directory and the end of central directory record.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut bytes = self.bytes.clone();
        let cd_offset = (bytes.len() - self.prefix_len) as u32;
        bytes.extend_from_slice(&self.central_directory);

        put_u32(&mut bytes, 0x06054b50);
        put_u16(&mut bytes, 0);
        put_u16(&mut bytes, 0);
        put_u16(&mut bytes, self.entries);
        put_u16(&mut bytes, self.entries);
        put_u32(&mut bytes, self.central_directory.len() as u32);
        put_u32(&mut bytes, cd_offset);
        put_u16(&mut bytes, 0);
        bytes
    }

    /// Just the local entries, as if the stream were cut off
    /// before the central directory.
    pub fn local_entries_only(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

pub fn deflate(contents: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(contents).unwrap();
    encoder.finish().unwrap()
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// A reader that hands out a few bytes at a time, like a slow socket.
pub struct Trickle<'a> {
    data: &'a [u8],
    calls: usize,
}

impl<'a> Trickle<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, calls: 0 }
    }
}

impl Read for Trickle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.calls += 1;
        // 1 to 7 bytes, in no particular pattern
        let step = 1 + (self.calls * 5) % 7;
        let n = step.min(buf.len()).min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

/// Some text that compresses well enough to be worth the trouble
pub fn lorem(len: usize) -> Vec<u8> {
    b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}
