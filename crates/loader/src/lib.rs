//! elf32-loader: ELF32 loader for guest binaries.
//!
//! Brings a guest ELF32 binary into an emulator's simulated address space:
//! validates the file header, maps loadable segments with zero-fill, applies
//! the target architecture's relocation set, and builds a symbol-name map
//! for later symbolic lookup (debugging, HLE stubs).
//!
//! The load runs synchronously for one file and never blocks on I/O; the
//! source buffer is assumed resident. The caller owns that buffer and the
//! target [`Memory`]; [`ElfImage`] borrows the buffer for its lifetime.
//!
//! # Usage
//!
//! ```ignore
//! use elf32_loader::{ElfImage, LoadConfig, Memory};
//!
//! let data = std::fs::read("guest.elf")?;
//! let mut image = ElfImage::parse(&data)?;
//! let mut memory = Memory::with_default_size();
//! let report = image.load_into(&mut memory, &LoadConfig::default())?;
//! println!("entry at {:#010x}", report.entry_point);
//! ```

pub mod dynamic;
pub mod error;
pub mod header;
pub mod image;
pub mod memory;
pub mod reloc;
pub mod section;
pub mod segment;
pub mod symbol;
pub mod testelf;

pub use dynamic::{DynTag, DynamicEntry};
pub use error::LoaderError;
pub use header::{ElfMachine, ElfType, FileHeader};
pub use image::{load_file, ElfImage, LoadConfig, LoadReport, LoadStage};
pub use memory::Memory;
pub use reloc::{RelocKind, RelocationEntry};
pub use section::{Section, SectionKind};
pub use segment::{ProgramSegment, SegmentKind};
pub use symbol::{Symbol, SymbolBinding, SymbolKind, SymbolTable};
