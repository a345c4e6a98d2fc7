// =============================================================================
// MinimalOS NextGen — Virtual Memory Translator: Demo CLI
// =============================================================================
//
// A small interactive front end for `vmtranslate`, in the same spirit as
// the workspace's other host-side tools (e.g. `tools/uefi_builder` in the
// upstream pack pairs `clap` with `anyhow`). Not part of the translator's
// tested surface — just a way to poke at a session from a shell.
// =============================================================================

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use vmtranslate::{InMemoryBackingStore, MemoryConfig, Translator};

#[derive(Parser)]
#[command(author, version, about = "Drive a virtual memory translator session")]
struct Cli {
    /// Bits indexing within a frame (OFFSET_WIDTH).
    #[arg(long, default_value_t = MemoryConfig::EXAMPLE.offset_width)]
    offset_width: u32,

    /// Total bits in a virtual address.
    #[arg(long, default_value_t = MemoryConfig::EXAMPLE.virtual_address_width)]
    virtual_address_width: u32,

    /// Total bits in a physical address.
    #[arg(long, default_value_t = MemoryConfig::EXAMPLE.physical_address_width)]
    physical_address_width: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write one word, then read it back.
    RoundTrip {
        /// Virtual address, decimal or 0x-prefixed hex.
        address: String,
        /// Signed word value to write.
        value: i64,
    },
    /// Read one word without writing first.
    Read {
        /// Virtual address, decimal or 0x-prefixed hex.
        address: String,
    },
    /// Write a run of words across several pages, then print frame
    /// usage and frame-selection activity.
    Stress {
        /// Number of distinct pages to touch, spaced one page-ring
        /// stride apart so cyclic distance discriminates victims cleanly.
        #[arg(long, default_value_t = 40)]
        pages: u64,
    },
}

fn parse_address(text: &str) -> Result<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Ok(u64::from_str_radix(hex, 16)?)
    } else {
        Ok(text.parse()?)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = MemoryConfig::new(
        cli.offset_width,
        cli.virtual_address_width,
        cli.physical_address_width,
    )?;
    let mut translator = Translator::new(config, InMemoryBackingStore::new());

    match cli.command {
        Command::RoundTrip { address, value } => {
            let addr = parse_address(&address)?;
            let status = translator.write(addr, value);
            if status == 0 {
                bail!("address {addr:#x} is out of range (VIRTUAL_MEMORY_SIZE = {:#x})",
                    config.virtual_memory_size());
            }
            let (word, _) = translator.read(addr);
            println!("wrote {value} at {addr:#x}, read back {word}");
        }
        Command::Read { address } => {
            let addr = parse_address(&address)?;
            let (word, status) = translator.read(addr);
            if status == 0 {
                bail!("address {addr:#x} is out of range (VIRTUAL_MEMORY_SIZE = {:#x})",
                    config.virtual_memory_size());
            }
            println!("{addr:#x} -> {word}");
        }
        Command::Stress { pages } => {
            let stride = config.virtual_memory_size() / pages.max(1);
            for i in 0..pages {
                translator.write(i * stride, i as i64);
            }
            let stats = translator.stats();
            println!(
                "frames: {}/{} in use | claims: {} | reclamations: {} | evictions: {}",
                stats.frames_in_use,
                stats.num_frames,
                stats.claims,
                stats.reclamations,
                stats.evictions
            );
        }
    }

    Ok(())
}
