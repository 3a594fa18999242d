//! `rv64dbt`: a small front end over the translation core for inspecting
//! what it produces from a real guest image.
//!
//! Loads an ELF, walks its `.text` section one basic block at a time
//! through [`rv64dbt::pipeline::translate_block`], and prints the host
//! instruction listing the selector produced (virtual registers, since
//! allocation is out of scope here). This binary owns every CLI/tracing
//! concern; the core crate never touches argv or a logger directly.

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use clap_num::maybe_hex;
use itertools::Itertools;
use num::Integer;

use rv64dbt::abi::AbiInfo;
use rv64dbt::diag::Diag;
use rv64dbt::pipeline::translate_block;

#[derive(Parser, Debug)]
#[command(name = "rv64dbt", about = "Translate RV64GC blocks from an ELF image and print the result")]
struct Args {
    /// Path to an RV64GC ELF executable or object file.
    elf_path: String,

    /// Guest address to start translating from. Defaults to the ELF entry
    /// point.
    #[arg(long, value_parser = maybe_hex::<u64>)]
    start: Option<u64>,

    /// Number of consecutive blocks to translate.
    #[arg(long, default_value_t = 8)]
    count: usize,

    /// Log decode failures and per-instruction disassembly via `RUST_LOG`.
    #[arg(long)]
    trace: bool,

    /// Emulate LR/SC through the fallback CAS triplet instead of native IR
    /// primitives.
    #[arg(long)]
    fallback_llsc: bool,

    /// Forward-edge fast-entry-point hint; direct-exit targets above this
    /// address may skip their callee's event check.
    #[arg(long, value_parser = maybe_hex::<u64>)]
    fast_ep_hint: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rv64dbt: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(&args.elf_path)?;
    let file = elf::ElfBytes::<elf::endian::LittleEndian>::minimal_parse(&bytes)?;

    let (text_addr, text_bytes) = find_text_section(&file, &bytes)?;
    let start = args.start.unwrap_or(file.ehdr.e_entry);

    let abi = AbiInfo {
        use_fallback_llsc: args.fallback_llsc,
        max_guest_address_hint: args.fast_ep_hint,
        ..AbiInfo::default()
    };
    let diag = if args.trace { Diag::on() } else { Diag::off() };

    if start < text_addr || start >= text_addr + text_bytes.len() as u64 {
        return Err(format!("start address {start:#x} is outside .text [{text_addr:#x}, {:#x})", text_addr + text_bytes.len() as u64).into());
    }

    let mut pc = start;
    let mut blocks_printed = 0usize;
    let blocks_per_progress_dot = 4usize.max(args.count.div_ceil(&20));

    for block_no in 0..args.count {
        let offset = (pc - text_addr) as usize;
        if offset >= text_bytes.len() {
            break;
        }
        let (result, consumed) = match translate_block(&text_bytes[offset..], pc, &abi, &diag) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("block {block_no} at {pc:#x}: {e}");
                break;
            }
        };

        println!("block {block_no} @ {pc:#x} ({consumed} guest bytes, {} host insns, {} vregs)", result.instrs.len(), result.n_vregs);
        for (i, instr) in result.instrs.iter().enumerate() {
            println!("  [{i:>3}] {instr}");
        }
        print_opcode_histogram(&result.instrs);

        blocks_printed += 1;
        if block_no % blocks_per_progress_dot == 0 {
            log::debug!("translated {blocks_printed} blocks so far");
        }
        pc += consumed;
    }

    Ok(())
}

/// Print the three most common host-instruction kinds in a block, as a
/// quick sanity check on selector output without wading through the full
/// listing.
fn print_opcode_histogram(instrs: &[rv64dbt::host::HostInstr]) {
    let counts = instrs
        .iter()
        .map(|i| format!("{i:?}").split(['{', ' ']).next().unwrap_or("?").to_string())
        .sorted()
        .dedup_with_count()
        .sorted_by(|a, b| b.0.cmp(&a.0))
        .take(3);
    for (n, name) in counts {
        println!("    {name}: {n}");
    }
}

fn find_text_section<'a>(
    file: &elf::ElfBytes<'a, elf::endian::LittleEndian>,
    raw: &'a [u8],
) -> Result<(u64, &'a [u8]), Box<dyn std::error::Error>> {
    let (shdrs, strtab) = file
        .section_headers_with_strtab()?;
    let shdrs = shdrs.ok_or("ELF has no section headers")?;
    let strtab = strtab.ok_or("ELF has no section header string table")?;

    for shdr in shdrs.iter() {
        let name = strtab.get(shdr.sh_name as usize)?;
        if name == ".text" {
            let start = shdr.sh_offset as usize;
            let end = start + shdr.sh_size as usize;
            return Ok((shdr.sh_addr, &raw[start..end]));
        }
    }
    Err(".text section not found".into())
}
