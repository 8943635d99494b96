//! Loads a flat guest binary into RAM and runs it through the recompiler
//! until it stops or exhausts its block budget

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use r3000_dynarec::api::{BlockExit, MemMap, Recompiler};
use std::fs;
use std::num::ParseIntError;

fn parse_address(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[derive(Debug, Parser)]
struct Args {
    /// Flat binary image of guest MIPS code
    image_path: String,
    /// Guest address the image is loaded at
    #[arg(short = 'l', long, default_value = "0x1000", value_parser = parse_address)]
    load_address: u32,
    /// Entry PC; defaults to the load address
    #[arg(short = 'e', long, value_parser = parse_address)]
    entry: Option<u32>,
    /// Guest RAM size in bytes
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    ram_size: u32,
    /// Maximum number of blocks to execute before giving up
    #[arg(short = 'b', long, default_value_t = 1_000_000)]
    max_blocks: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let image = fs::read(&args.image_path)
        .with_context(|| format!("Failed to read image from '{}'", args.image_path))?;

    let load_end = args.load_address as usize + image.len();
    if load_end > args.ram_size as usize {
        bail!(
            "Image of {} bytes at {:08X} does not fit in {} bytes of RAM",
            image.len(),
            args.load_address,
            args.ram_size
        );
    }

    let mut engine =
        Recompiler::builder().with_map(MemMap::zeroed(0, args.ram_size)).build()?;
    engine.map_bytes_mut(0).unwrap()[args.load_address as usize..load_end]
        .copy_from_slice(&image);

    let mut pc = args.entry.unwrap_or(args.load_address);
    let mut blocks = 0_u64;
    let mut cycles = 0_u64;

    while !engine.stop() && blocks < args.max_blocks {
        let next_pc = engine.execute(pc);
        if next_pc == pc {
            bail!("Execution wedged at PC {pc:08X}");
        }

        pc = next_pc;
        blocks += 1;
        cycles += u64::from(engine.block_exit_cycles());

        match engine.block_exit_flags() {
            BlockExit::Normal => {}
            BlockExit::Syscall => {
                log::info!("SYSCALL at PC {:08X}; stopping", engine.next_pc());
                break;
            }
            BlockExit::Breakpoint => {
                log::info!("BREAK at PC {:08X}; stopping", engine.next_pc());
                break;
            }
            // The engine already logged the faulting address
            BlockExit::Segfault => break,
        }
    }

    log::info!("Executed {blocks} blocks ({cycles} guest cycles); final PC {pc:08X}");

    Ok(())
}
