use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use memmap2::Mmap;
use nv_chunk::Registry;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("NVCHUNK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let NvCommand { command } = NvCommand::parse();
    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

#[derive(Parser)]
#[command(name = "nvchunk", version, about = "Inspect and maintain nv-chunk backing files")]
struct NvCommand {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a zeroed backing file, or report the size of the existing one.
    Create {
        path: String,
        /// Bytes, optionally with a binary `K`, `M` or `G` suffix.
        #[arg(long, value_parser = parse_size)]
        size: usize,
    },
    /// Report the size and medium of an existing backing file.
    Probe { path: String },
    /// Hex dump a backing file, without writing to it.
    Dump {
        path: PathBuf,
        #[arg(long, default_value = "0", value_parser = parse_size)]
        offset: usize,
        #[arg(long, value_parser = parse_size)]
        len: Option<usize>,
    },
    /// Write text into an existing backing file and persist it.
    Write {
        path: String,
        #[arg(long, default_value = "0", value_parser = parse_size)]
        offset: usize,
        text: String,
    },
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Registry::default();

    match command {
        Command::Create { path, size } => {
            let device = registry.open_device(&path, size)?;
            println!("{}: {} bytes", device.name(), device.size());
        }
        Command::Probe { path } => {
            // A size of zero refuses to create anything.
            let device = registry.open_device(&path, 0)?;
            println!("path: {}", device.name());
            println!("size: {}", device.size());
            println!("pmem: {}", device.is_pmem(false));
            println!("pmem (probed): {}", device.is_pmem(true));
        }
        Command::Dump { path, offset, len } => {
            let file = File::open(&path)?;
            // Safety: read-only. Concurrent writers at worst make the dump inconsistent.
            let map = unsafe { Mmap::map(&file)? };
            let end = len.map_or(map.len(), |len| offset.saturating_add(len).min(map.len()));
            let bytes = map
                .get(offset..end)
                .ok_or("offset is past the end of the file")?;
            hexdump(offset, bytes, &mut std::io::stdout().lock())?;
        }
        Command::Write { path, offset, text } => {
            let chunk = registry.open_chunk("nvchunk-write", &path, 0, 0)?;
            chunk.write_at(offset, text.as_bytes())?;
            if !text.is_empty() {
                chunk.flush_range(offset, text.len())?;
            }
            tracing::info!(path = %path, offset, len = text.len(), "written");
        }
    }

    registry.clear();
    Ok(())
}

fn parse_size(arg: &str) -> Result<usize, String> {
    let arg = arg.trim();
    let (digits, shift) = match arg.char_indices().last() {
        Some((idx, 'k' | 'K')) => (&arg[..idx], 10),
        Some((idx, 'm' | 'M')) => (&arg[..idx], 20),
        Some((idx, 'g' | 'G')) => (&arg[..idx], 30),
        _ => (arg, 0),
    };

    let value: usize = digits
        .parse()
        .map_err(|err| format!("invalid size `{arg}`: {err}"))?;

    value
        .checked_mul(1 << shift)
        .ok_or_else(|| format!("size `{arg}` overflows"))
}

fn hexdump(start: usize, bytes: &[u8], out: &mut impl Write) -> std::io::Result<()> {
    for (idx, line) in bytes.chunks(16).enumerate() {
        write!(out, "{:08x} ", start + idx * 16)?;
        for column in 0..16 {
            match line.get(column) {
                Some(byte) => write!(out, " {byte:02x}")?,
                None => write!(out, "   ")?,
            }
        }

        let text: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        writeln!(out, "  |{text}|")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{hexdump, parse_size};

    #[test]
    fn sizes() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("1k"), Ok(1024));
        assert_eq!(parse_size("13M"), Ok(13 << 20));
        assert_eq!(parse_size("2G"), Ok(2 << 30));
        assert!(parse_size("M").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size(&format!("{}G", usize::MAX)).is_err());
    }

    #[test]
    fn dump_lines() {
        let mut out = vec![];
        hexdump(0x20, b"Hello NVM\0", &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("00000020  48 65 6c 6c 6f"), "{out}");
        assert!(out.ends_with("|Hello NVM.|\n"), "{out}");
    }
}
