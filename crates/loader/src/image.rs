//! Whole-image load pipeline.
//!
//! `ElfImage` borrows the caller's byte buffer and walks the stages
//! `HeaderValidated -> SegmentsMapped -> RelocationsApplied ->
//! SymbolsResolved -> Ready`, with `Failed` terminal from any of them.
//! There is no retry: a failed instance is unusable and the caller must
//! discard the target memory, since mapping and relocation side effects are
//! not rolled back.

use std::path::Path;

use log::{debug, info, warn};
use serde::Serialize;

use crate::dynamic::{parse_dynamic, DynamicEntry};
use crate::error::LoaderError;
use crate::header::{read_word, ElfMachine, ElfType, FileHeader};
use crate::memory::Memory;
use crate::reloc::apply_reloc_section;
use crate::section::{
    parse_section_headers, section_bytes, strtab_name, Section, SectionKind,
};
use crate::segment::{map_segments, parse_program_headers, ProgramSegment};
use crate::symbol::SymbolTable;

/// Load-time parameters.
///
/// The bias is the base virtual address the image is actually placed at,
/// fed into the base-relative relocation formulas. It is an explicit input
/// rather than something the loader guesses from the image.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadConfig {
    /// Load bias `B`, added to every segment vaddr and relocation target.
    pub bias: u32,
    /// Established global-offset-table base, if any. GOT-family relocations
    /// are unsupported without it.
    pub got_base: Option<u32>,
}

/// Pipeline position of an image instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadStage {
    HeaderValidated,
    SegmentsMapped,
    RelocationsApplied,
    SymbolsResolved,
    Ready,
    Failed,
}

/// Outcome summary of a successful load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Entry point after bias application.
    pub entry_point: u32,
    pub segments_mapped: usize,
    pub relocations_applied: usize,
    pub symbols_loaded: usize,
    /// True when the image has no symbol table; the load still succeeds,
    /// just without symbolic names.
    pub symbols_missing: bool,
    pub did_relocate: bool,
}

/// A parsed ELF32 image over a borrowed byte buffer.
///
/// The caller owns the buffer; the image borrows it and never copies
/// section or segment contents except into target memory during mapping.
/// After reaching `Ready`, everything here is immutable and may be read
/// from multiple threads once published through the caller's
/// synchronization point.
pub struct ElfImage<'a> {
    data: &'a [u8],
    header: FileHeader,
    segments: Vec<ProgramSegment>,
    sections: Vec<Section>,
    shstrtab: Option<&'a [u8]>,
    dynamic: Vec<DynamicEntry>,
    /// Per-section resolved virtual addresses, rebased on load.
    section_addrs: Vec<u32>,
    symbols: Option<SymbolTable>,
    entry_point: u32,
    stage: LoadStage,
    did_relocate: bool,
}

impl<'a> ElfImage<'a> {
    /// Validate the header and decode the segment/section tables.
    ///
    /// No target memory is touched here; failures at this stage leave no
    /// side effects at all.
    pub fn parse(data: &'a [u8]) -> Result<Self, LoaderError> {
        let header = FileHeader::parse(data)?;
        let segments = parse_program_headers(data, &header)?;
        let sections = parse_section_headers(data, &header)?;
        let dynamic = parse_dynamic(data, &sections)?;

        let shstrtab = sections
            .get(header.e_shstrndx as usize)
            .filter(|s| s.kind() == SectionKind::StrTab)
            .and_then(|s| section_bytes(data, s));

        let section_addrs = sections.iter().map(|s| s.sh_addr).collect();
        let entry_point = header.e_entry;

        debug!(
            "parsed {:?} image: {} segment(s), {} section(s)",
            header.machine(),
            segments.len(),
            sections.len()
        );

        Ok(Self {
            data,
            header,
            segments,
            sections,
            shstrtab,
            dynamic,
            section_addrs,
            symbols: None,
            entry_point,
            stage: LoadStage::HeaderValidated,
            did_relocate: false,
        })
    }

    /// Run the full pipeline: map segments, apply relocations, resolve
    /// symbols.
    ///
    /// On failure the instance enters `Failed` and target memory may hold
    /// partial writes from the stages that already ran; the caller must
    /// discard the whole target image.
    pub fn load_into(
        &mut self,
        memory: &mut Memory,
        config: &LoadConfig,
    ) -> Result<LoadReport, LoaderError> {
        match self.run_load(memory, config) {
            Ok(report) => Ok(report),
            Err(err) => {
                self.stage = LoadStage::Failed;
                Err(err)
            }
        }
    }

    fn run_load(
        &mut self,
        memory: &mut Memory,
        config: &LoadConfig,
    ) -> Result<LoadReport, LoaderError> {
        let bias = config.bias;

        let segments_mapped = map_segments(self.data, &self.segments, memory, bias)?;
        self.stage = LoadStage::SegmentsMapped;

        for (addr, section) in self.section_addrs.iter_mut().zip(&self.sections) {
            *addr = bias.wrapping_add(section.sh_addr);
        }
        self.entry_point = bias.wrapping_add(self.header.e_entry);

        // The relocation stage resolves symbol values through the table, so
        // it is built here; a missing table only degrades the load.
        let mut symbols_missing = false;
        let symbols = match SymbolTable::build(self.data, &self.sections) {
            Ok(table) => Some(table),
            Err(LoaderError::MissingSymbolTable) => {
                warn!("no symbol table section; loading without symbolic names");
                symbols_missing = true;
                None
            }
            Err(other) => return Err(other),
        };

        let mut relocations_applied = 0;
        let reloc_sections: Vec<usize> = self
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.kind(), SectionKind::Rel | SectionKind::Rela))
            .map(|(i, _)| i)
            .collect();
        for index in reloc_sections {
            relocations_applied += apply_reloc_section(
                self.data,
                &self.sections[index],
                &self.sections,
                symbols.as_ref(),
                memory,
                bias,
                config.got_base,
            )?;
        }
        self.stage = LoadStage::RelocationsApplied;
        self.did_relocate = bias != 0 || relocations_applied > 0;

        self.symbols = symbols;
        self.stage = LoadStage::SymbolsResolved;

        self.stage = LoadStage::Ready;
        let report = LoadReport {
            entry_point: self.entry_point,
            segments_mapped,
            relocations_applied,
            symbols_loaded: self.symbols.as_ref().map_or(0, |t| t.len()),
            symbols_missing,
            did_relocate: self.did_relocate,
        };
        info!(
            "image ready: entry {:#010x}, {} segment(s), {} relocation(s)",
            report.entry_point, report.segments_mapped, report.relocations_applied
        );
        Ok(report)
    }

    // --- query surface, valid once parsed; addresses resolve after load ---

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn elf_type(&self) -> ElfType {
        self.header.elf_type()
    }

    pub fn machine(&self) -> ElfMachine {
        self.header.machine()
    }

    pub fn flags(&self) -> u32 {
        self.header.flags()
    }

    /// Entry point; rebased once the image has been loaded with a bias.
    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn segments(&self) -> &[ProgramSegment] {
        &self.segments
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Raw 32-bit word at a 4-byte-aligned file offset.
    pub fn read_word(&self, offset: usize) -> Result<u32, LoaderError> {
        read_word(self.data, offset)
    }

    /// Section name via the section-header string table.
    pub fn section_name(&self, index: usize) -> Option<&str> {
        let section = self.sections.get(index)?;
        strtab_name(self.shstrtab?, section.sh_name)
    }

    /// Borrowed file bytes of a section; `None` for no-bits sections.
    pub fn section_data(&self, index: usize) -> Option<&[u8]> {
        section_bytes(self.data, self.sections.get(index)?)
    }

    /// Whether the section carries executable program bytes.
    pub fn is_code_section(&self, index: usize) -> bool {
        self.sections.get(index).map_or(false, Section::is_code)
    }

    /// Borrowed file bytes of a segment.
    pub fn segment_data(&self, index: usize) -> Option<&[u8]> {
        let seg = self.segments.get(index)?;
        let start = seg.p_offset as usize;
        let end = start.checked_add(seg.p_filesz as usize)?;
        self.data.get(start..end)
    }

    /// Resolved (post-bias) virtual address of a section.
    pub fn section_addr(&self, index: usize) -> Option<u32> {
        self.section_addrs.get(index).copied()
    }

    pub fn section_size(&self, index: usize) -> Option<u32> {
        self.sections.get(index).map(|s| s.sh_size)
    }

    /// First section named `name`, scanning in table order from
    /// `first_section`. `None` when absent.
    pub fn find_section(&self, name: &str, first_section: usize) -> Option<usize> {
        (first_section..self.sections.len()).find(|&i| self.section_name(i) == Some(name))
    }

    /// The symbol table, when one was present at load.
    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    /// Raw dynamic entries; retained, never processed.
    pub fn dynamic_entries(&self) -> &[DynamicEntry] {
        &self.dynamic
    }

    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    /// Whether the image was placed at a nonzero bias or had relocations
    /// applied.
    pub fn did_relocate(&self) -> bool {
        self.did_relocate
    }
}

/// Load an ELF file from disk into target memory.
///
/// Convenience wrapper over `ElfImage::parse` + `load_into` for callers
/// that do not need to keep the image around for queries.
pub fn load_file(
    path: &Path,
    memory: &mut Memory,
    config: &LoadConfig,
) -> Result<LoadReport, LoaderError> {
    let data = std::fs::read(path)?;
    let mut image = ElfImage::parse(&data)?;
    image.load_into(memory, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testelf::{build_test_elf, TestElfBuilder};
    use crate::segment::{PF_R, PF_X};

    #[test]
    fn minimal_round_trip_reaches_ready() {
        let elf = build_test_elf(&[0x90, 0x90, 0x90, 0xc3], 0x1000, 0x1000);
        let mut image = ElfImage::parse(&elf).unwrap();
        assert_eq!(image.stage(), LoadStage::HeaderValidated);

        let mut memory = Memory::new(0x10000);
        let report = image.load_into(&mut memory, &LoadConfig::default()).unwrap();

        assert_eq!(image.stage(), LoadStage::Ready);
        assert_eq!(report.entry_point, 0x1000);
        assert_eq!(report.segments_mapped, 1);
        assert_eq!(report.relocations_applied, 0);
        assert!(report.symbols_missing);
        assert!(!report.did_relocate);
        assert_eq!(memory.read_u8(0x1003).unwrap(), 0xc3);
    }

    #[test]
    fn failed_load_enters_failed_stage() {
        let elf = build_test_elf(&[0x90; 4], 0x1000, 0x1000);
        let mut image = ElfImage::parse(&elf).unwrap();

        let mut memory = Memory::new(0x10); // far too small
        assert!(image.load_into(&mut memory, &LoadConfig::default()).is_err());
        assert_eq!(image.stage(), LoadStage::Failed);
    }

    #[test]
    fn find_section_scans_from_first() {
        let mut builder = TestElfBuilder::new(0x1000).segment(0x1000, &[0x90; 4], 4, PF_R | PF_X);
        let first_text = builder.text_section(0x1000, &[0x90; 4]);
        let second_text = builder.text_section(0x2000, &[0x90; 4]);
        let elf = builder.build();

        let image = ElfImage::parse(&elf).unwrap();
        assert_eq!(image.find_section(".text", 0), Some(first_text as usize));
        assert_eq!(
            image.find_section(".text", first_text as usize + 1),
            Some(second_text as usize)
        );
        assert_eq!(image.find_section(".missing", 0), None);
    }

    #[test]
    fn section_addrs_are_rebased() {
        let mut builder = TestElfBuilder::new(0x1000).segment(0x1000, &[0x90; 4], 4, PF_R | PF_X);
        let text = builder.text_section(0x1000, &[0x90; 4]) as usize;
        let elf = builder.build();

        let mut image = ElfImage::parse(&elf).unwrap();
        assert_eq!(image.section_addr(text), Some(0x1000));

        let mut memory = Memory::new(0x10000);
        let config = LoadConfig { bias: 0x4000, got_base: None };
        let report = image.load_into(&mut memory, &config).unwrap();

        assert_eq!(image.section_addr(text), Some(0x5000));
        assert_eq!(report.entry_point, 0x5000);
        assert!(report.did_relocate);
    }

    #[test]
    fn code_section_predicate_and_data() {
        let mut builder = TestElfBuilder::new(0x1000).segment(0x1000, &[0xcc; 4], 4, PF_R | PF_X);
        let text = builder.text_section(0x1000, &[0xcc; 4]) as usize;
        let bss = builder.bss_section(0x3000, 0x40) as usize;
        let elf = builder.build();

        let image = ElfImage::parse(&elf).unwrap();
        assert!(image.is_code_section(text));
        assert!(!image.is_code_section(bss));
        assert_eq!(image.section_data(text), Some(&[0xcc; 4][..]));
        assert_eq!(image.section_data(bss), None);
        assert_eq!(image.section_size(bss), Some(0x40));
    }

    #[test]
    fn segment_data_is_borrowed_from_file() {
        let elf = build_test_elf(&[1, 2, 3, 4], 0x1000, 0x1000);
        let image = ElfImage::parse(&elf).unwrap();
        assert_eq!(image.segment_data(0), Some(&[1, 2, 3, 4][..]));
        assert_eq!(image.segment_data(7), None);
    }
}
