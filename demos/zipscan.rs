use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, bail, ensure, Context, Result};
use log::*;
use memmap2::Mmap;
use structopt::*;

use zipscan::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zipscan",
    about = "Lists the entries of a .zip file, reading it front to back"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Only list entries whose names contain the given string.
    #[structopt(short, long)]
    matching: Option<String>,

    /// Memory map the file and read its central directory
    /// instead of streaming it.
    #[structopt(short, long)]
    index: bool,

    /// The ZIP file to read, or - for stdin
    #[structopt(name("ZIP file"), default_value = "-")]
    zip_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let streaming_stdin = args.zip_path.as_os_str() == "-";
    if args.index {
        ensure!(!streaming_stdin, "Can't memory map stdin");

        info!("Memory mapping {:#?}", &args.zip_path);
        let zip_file = File::open(&args.zip_path).context("Couldn't open zip file")?;
        let mapping = unsafe { Mmap::map(&zip_file).context("Couldn't mmap zip file")? };
        let archive = ZipArchive::with_prepended_data(&mapping)
            .context("Couldn't load archive")?
            .0;
        list(&mut archive.scanner(), &args)
    } else if streaming_stdin {
        list(&mut ZipScanner::new(io::stdin().lock()), &args)
    } else {
        let zip_file = File::open(&args.zip_path).context("Couldn't open zip file")?;
        list(&mut ZipScanner::new(zip_file), &args)
    }
}

fn list(scanner: &mut dyn EntryScanner, args: &Opt) -> Result<()> {
    let mut count = 0;
    while scanner.advance() {
        let header = scanner
            .current_header()
            .ok_or_else(|| anyhow!("No header for the current entry"))?;
        let name = header.path()?.into_owned();

        let wanted = args
            .matching
            .as_ref()
            .map_or(true, |m| name.as_str().contains(m.as_str()));
        if wanted {
            println!(
                "{:8} {:8} {:8x} {}",
                header.compressed_size, header.uncompressed_size, header.crc32, name
            );
            count += 1;
        }

        // Streaming or not, we have to get through the body to get to the next entry.
        match scanner.open_body() {
            Ok(mut body) => {
                let read = io::copy(&mut body, &mut io::sink())
                    .with_context(|| format!("Couldn't read {}", name))?;
                debug!("Read {} bytes of {}", read, name);
            }
            Err(e) => warn!("Couldn't open {}: {}", name, e),
        }
    }
    println!("total {}", count);

    match scanner.last_error() {
        Some(e) if e.is_end_of_archive() => Ok(()),
        Some(e) => bail!("Scan failed: {}", e),
        None => Ok(()),
    }
}
