//! zipscan reads the entries of a ZIP archive front to back,
//! straight off a stream, without waiting for the central directory
//! at its end:
//!
//! ```no_run
//! # use std::io;
//! # use zipscan::*;
//! // Anything that implements Read will do: a socket, a pipe, an HTTP body...
//! let mut scanner = ZipScanner::new(io::stdin());
//!
//! while scanner.advance() {
//!     let header = scanner.current_header().expect("advance() found an entry");
//!     println!("{} ({} bytes)", header.path()?, header.uncompressed_size);
//!
//!     // Each entry's body has to be read to the end before moving on,
//!     // since that's the only way to find where the next one starts.
//!     let mut body = scanner.open_body()?;
//!     io::copy(&mut body, &mut io::sink())?;
//! }
//!
//! // advance() returns false when it runs out of entries *or* hits a problem.
//! match scanner.last_error() {
//!     Some(e) if !e.is_end_of_archive() => eprintln!("Scan failed: {}", e),
//!     _ => println!("All done!"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! If the whole archive is already at hand (read into memory or memory-mapped),
//! a [`ZipArchive`] reads its central directory instead,
//! and [`ZipArchive::scanner()`] walks its entries through the same
//! [`EntryScanner`] interface:
//!
//! ```no_run
//! # use std::fs::File;
//! # use memmap2::Mmap;
//! # use zipscan::*;
//! let zip_file = File::open("foo.zip")?;
//! let mapping = unsafe { Mmap::map(&zip_file)? };
//! let archive = ZipArchive::new(&mapping)?;
//!
//! let mut indexed = archive.scanner();
//! let scanner: &mut dyn EntryScanner = &mut indexed;
//! while scanner.advance() {
//!     // Same as above
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Why bother streaming? Zip is an interesting archive format: unlike
//! compressed tarballs often seen in Linux land (`*.tar.gz`, `*.tar.zst`, ...),
//! its table of contents is at the very end. That's great when you can seek,
//! but means waiting for the whole thing to arrive when you can't.
//! Each entry is also preceded by a local header, though,
//! and each one's data either has a known size or (with DEFLATE) marks its own end.
//! That's enough to walk through an archive as it comes in.
//!
//! What streaming can't do is recover from surprises.
//! With no directory to resynchronize against, a bad header, an unknown
//! compression method, or a truncated stream ends the scan.

pub mod body;
pub mod descriptor;
pub mod read;
pub mod result;
pub mod scan;

pub use read::CompressionMethod;
pub use read::EntryHeader;
pub use read::IndexedScanner;
pub use read::ZipArchive;
pub use result::{ZipError, ZipResult};
pub use scan::EntryScanner;
pub use scan::ZipScanner;

mod arch;
mod spec;
