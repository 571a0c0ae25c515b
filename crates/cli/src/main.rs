//! elfctl: inspect and load ELF32 guest binaries from the command line.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use elf32_loader::{ElfImage, LoadConfig, LoaderError, Memory, SymbolTable};

/// ELF32 guest binary loader and inspector
#[derive(Parser)]
#[command(name = "elfctl")]
#[command(version = "0.1.0")]
#[command(about = "Inspect ELF32 images and load them into a simulated address space", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header-level information
    Info {
        /// Path to the ELF32 file
        file: PathBuf,
    },

    /// List sections with kinds, addresses and sizes
    Sections {
        /// Path to the ELF32 file
        file: PathBuf,
    },

    /// List symbols from the symbol table
    Symbols {
        /// Path to the ELF32 file
        file: PathBuf,

        /// Only show function symbols
        #[arg(long)]
        functions: bool,
    },

    /// Load the image into target memory and report the outcome
    Load {
        /// Path to the ELF32 file
        file: PathBuf,

        /// Load bias (base address), decimal or 0x-prefixed hex
        #[arg(long, default_value = "0", value_parser = parse_u32)]
        bias: u32,

        /// Global-offset-table base, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_u32)]
        got_base: Option<u32>,

        /// Target memory size in bytes
        #[arg(long, default_value_t = 16 * 1024 * 1024)]
        memory_size: usize,

        /// Emit the load report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("{e}"))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { file } => cmd_info(&file),
        Commands::Sections { file } => cmd_sections(&file),
        Commands::Symbols { file, functions } => cmd_symbols(&file, functions),
        Commands::Load {
            file,
            bias,
            got_base,
            memory_size,
            json,
        } => cmd_load(&file, bias, got_base, memory_size, json),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn cmd_info(file: &PathBuf) -> Result<(), LoaderError> {
    let data = std::fs::read(file)?;
    let image = ElfImage::parse(&data)?;

    println!("ELF32 image: {}", file.display());
    println!("  type:     {:?}", image.elf_type());
    println!("  machine:  {:?}", image.machine());
    println!("  entry:    {:#010x}", image.entry_point());
    println!("  flags:    {:#010x}", image.flags());
    println!("  segments: {}", image.segment_count());
    println!("  sections: {}", image.section_count());
    Ok(())
}

fn cmd_sections(file: &PathBuf) -> Result<(), LoaderError> {
    let data = std::fs::read(file)?;
    let image = ElfImage::parse(&data)?;

    println!("{:<4} {:<20} {:<12} {:>10} {:>8}  code", "idx", "name", "kind", "addr", "size");
    for (i, section) in image.sections().iter().enumerate() {
        println!(
            "{:<4} {:<20} {:<12} {:#10x} {:#8x}  {}",
            i,
            image.section_name(i).unwrap_or("<unnamed>"),
            format!("{:?}", section.kind()),
            section.sh_addr,
            section.sh_size,
            if image.is_code_section(i) { "yes" } else { "" },
        );
    }
    Ok(())
}

fn cmd_symbols(file: &PathBuf, functions_only: bool) -> Result<(), LoaderError> {
    let data = std::fs::read(file)?;
    let image = ElfImage::parse(&data)?;

    // Listing reads the file's tables directly; no target memory is
    // involved, so images mapping anywhere in the 32-bit space work.
    let table = SymbolTable::build(&data, image.sections())?;
    println!("{:<32} {:>10} {:>8} {:<8} {:<8}", "name", "value", "size", "bind", "kind");
    for symbol in table.symbols() {
        if symbol.name.is_empty() {
            continue;
        }
        if functions_only && !symbol.is_function() {
            continue;
        }
        println!(
            "{:<32} {:#10x} {:>8} {:<8} {:<8}",
            symbol.name,
            symbol.value,
            symbol.size,
            format!("{:?}", symbol.binding()),
            format!("{:?}", symbol.kind()),
        );
    }
    Ok(())
}

fn cmd_load(
    file: &PathBuf,
    bias: u32,
    got_base: Option<u32>,
    memory_size: usize,
    json: bool,
) -> Result<(), LoaderError> {
    let data = std::fs::read(file)?;
    let mut image = ElfImage::parse(&data)?;
    let mut memory = Memory::new(memory_size);

    let config = LoadConfig { bias, got_base };
    let report = image.load_into(&mut memory, &config)?;

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        }
    } else {
        println!("loaded {}", file.display());
        println!("  entry point:         {:#010x}", report.entry_point);
        println!("  segments mapped:     {}", report.segments_mapped);
        println!("  relocations applied: {}", report.relocations_applied);
        println!("  symbols loaded:      {}", report.symbols_loaded);
        if report.symbols_missing {
            println!("  (no symbol table; symbolic names unavailable)");
        }
        println!("  relocated:           {}", report.did_relocate);
    }
    Ok(())
}
