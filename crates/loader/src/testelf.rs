//! Synthetic ELF32 image construction.
//!
//! Builds small, valid images for tests and the CLI self-check: an ELF
//! header, program headers for the requested segments, and optionally a
//! full section table with string/symbol/relocation sections. Images are
//! little-endian i386, matching what the loader accepts.

use crate::header::{
    ELF32_EHDR_SIZE, ELF32_PHDR_SIZE, ELF32_SHDR_SIZE, ELF32_SYM_SIZE, ELF_MAGIC, ELFCLASS32,
    ELFDATA2LSB, EV_CURRENT,
};
use crate::segment::{PF_R, PF_W, PF_X};

const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const PT_LOAD: u32 = 1;
const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;
const SHT_REL: u32 = 9;

struct SegmentDesc {
    vaddr: u32,
    data: Vec<u8>,
    memsz: u32,
    flags: u32,
}

struct SectionDesc {
    name: String,
    sh_type: u32,
    sh_flags: u32,
    sh_addr: u32,
    data: Vec<u8>,
    sh_link: u32,
    sh_info: u32,
    sh_entsize: u32,
}

/// Assembles a synthetic ELF32 image piece by piece.
pub struct TestElfBuilder {
    entry: u32,
    segments: Vec<SegmentDesc>,
    sections: Vec<SectionDesc>,
}

impl TestElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
            sections: Vec::new(),
        }
    }

    /// Add a loadable segment. `memsz` may exceed the data length to model
    /// a BSS tail.
    pub fn segment(mut self, vaddr: u32, data: &[u8], memsz: u32, flags: u32) -> Self {
        self.segments.push(SegmentDesc {
            vaddr,
            data: data.to_vec(),
            memsz,
            flags,
        });
        self
    }

    /// Add a raw section; returns the section index it will occupy
    /// (index 0 is the reserved null section).
    #[allow(clippy::too_many_arguments)]
    pub fn section(
        &mut self,
        name: &str,
        sh_type: u32,
        sh_flags: u32,
        sh_addr: u32,
        data: Vec<u8>,
        sh_link: u32,
        sh_info: u32,
        sh_entsize: u32,
    ) -> u32 {
        self.sections.push(SectionDesc {
            name: name.to_owned(),
            sh_type,
            sh_flags,
            sh_addr,
            data,
            sh_link,
            sh_info,
            sh_entsize,
        });
        self.sections.len() as u32
    }

    /// Add a `.text` program-bits section describing memory at `addr`.
    pub fn text_section(&mut self, addr: u32, data: &[u8]) -> u32 {
        self.section(".text", SHT_PROGBITS, 0x6, addr, data.to_vec(), 0, 0, 0)
    }

    /// Add a `.bss` no-bits section. The data vec only carries the
    /// reservation size for `sh_size`; no file bytes are emitted.
    pub fn bss_section(&mut self, addr: u32, size: u32) -> u32 {
        self.section(".bss", SHT_NOBITS, 0x3, addr, vec![0; size as usize], 0, 0, 0)
    }

    /// Add a `.strtab`/`.symtab` pair. Each entry is
    /// `(name, value, size, info, shndx)`; a null record is prepended.
    /// Returns the symtab section index.
    pub fn symtab(&mut self, entries: &[(&str, u32, u32, u8, u16)]) -> u32 {
        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(entries.len());
        for (name, ..) in entries {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }

        let strtab_idx = self.section(".strtab", SHT_STRTAB, 0, 0, strtab, 0, 0, 0);

        let mut records = vec![0u8; ELF32_SYM_SIZE]; // null symbol record
        for (i, &(_, value, size, info, shndx)) in entries.iter().enumerate() {
            records.extend_from_slice(&name_offsets[i].to_le_bytes());
            records.extend_from_slice(&value.to_le_bytes());
            records.extend_from_slice(&size.to_le_bytes());
            records.push(info);
            records.push(0); // st_other
            records.extend_from_slice(&shndx.to_le_bytes());
        }

        self.section(
            ".symtab",
            SHT_SYMTAB,
            0,
            0,
            records,
            strtab_idx,
            1,
            ELF32_SYM_SIZE as u32,
        )
    }

    /// Add a REL (implicit addend) section. Entries are `(offset, info)`.
    pub fn rel_section(&mut self, name: &str, symtab_idx: u32, entries: &[(u32, u32)]) -> u32 {
        let mut data = Vec::with_capacity(entries.len() * 8);
        for &(offset, info) in entries {
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&info.to_le_bytes());
        }
        self.section(name, SHT_REL, 0, 0, data, symtab_idx, 0, 8)
    }

    /// Add a RELA (explicit addend) section. Entries are
    /// `(offset, info, addend)`.
    pub fn rela_section(&mut self, name: &str, symtab_idx: u32, entries: &[(u32, u32, i32)]) -> u32 {
        let mut data = Vec::with_capacity(entries.len() * 12);
        for &(offset, info, addend) in entries {
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&info.to_le_bytes());
            data.extend_from_slice(&addend.to_le_bytes());
        }
        self.section(name, SHT_RELA, 0, 0, data, symtab_idx, 0, 12)
    }

    /// Serialize the image.
    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let phoff = if phnum > 0 { ELF32_EHDR_SIZE } else { 0 };
        let mut cursor = ELF32_EHDR_SIZE + phnum * ELF32_PHDR_SIZE;

        // Lay out segment data first, then section data, then the section
        // name table, then the section header table.
        let mut segment_offsets = Vec::with_capacity(phnum);
        for seg in &self.segments {
            segment_offsets.push(cursor);
            cursor += seg.data.len();
            cursor = (cursor + 3) & !3;
        }

        // shstrtab: null byte, user section names, then its own name.
        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.sections.len());
        for sec in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(sec.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name_off = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");

        let has_sections = !self.sections.is_empty();
        let mut section_offsets = Vec::with_capacity(self.sections.len());
        for sec in &self.sections {
            section_offsets.push(cursor);
            if sec.sh_type != SHT_NOBITS {
                cursor += sec.data.len();
                cursor = (cursor + 3) & !3;
            }
        }
        let shstrtab_offset = cursor;
        if has_sections {
            cursor += shstrtab.len();
            cursor = (cursor + 3) & !3;
        }

        let shoff = if has_sections { cursor } else { 0 };
        // null + user sections + shstrtab
        let shnum = if has_sections { self.sections.len() + 2 } else { 0 };
        let shstrndx = if has_sections { shnum - 1 } else { 0 };

        let mut elf = Vec::with_capacity(cursor + shnum * ELF32_SHDR_SIZE);

        // File header
        elf.extend_from_slice(&ELF_MAGIC);
        elf.push(ELFCLASS32);
        elf.push(ELFDATA2LSB);
        elf.push(EV_CURRENT);
        elf.push(0); // OS/ABI
        elf.extend_from_slice(&[0u8; 8]); // padding
        elf.extend_from_slice(&ET_EXEC.to_le_bytes());
        elf.extend_from_slice(&EM_386.to_le_bytes());
        elf.extend_from_slice(&1u32.to_le_bytes()); // e_version
        elf.extend_from_slice(&self.entry.to_le_bytes());
        elf.extend_from_slice(&(phoff as u32).to_le_bytes());
        elf.extend_from_slice(&(shoff as u32).to_le_bytes());
        elf.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        elf.extend_from_slice(&(ELF32_EHDR_SIZE as u16).to_le_bytes());
        elf.extend_from_slice(&(ELF32_PHDR_SIZE as u16).to_le_bytes());
        elf.extend_from_slice(&(phnum as u16).to_le_bytes());
        elf.extend_from_slice(&(ELF32_SHDR_SIZE as u16).to_le_bytes());
        elf.extend_from_slice(&(shnum as u16).to_le_bytes());
        elf.extend_from_slice(&(shstrndx as u16).to_le_bytes());

        // Program headers
        for (seg, &offset) in self.segments.iter().zip(&segment_offsets) {
            elf.extend_from_slice(&PT_LOAD.to_le_bytes());
            elf.extend_from_slice(&(offset as u32).to_le_bytes());
            elf.extend_from_slice(&seg.vaddr.to_le_bytes());
            elf.extend_from_slice(&seg.vaddr.to_le_bytes()); // paddr
            elf.extend_from_slice(&(seg.data.len() as u32).to_le_bytes());
            elf.extend_from_slice(&seg.memsz.to_le_bytes());
            elf.extend_from_slice(&seg.flags.to_le_bytes());
            elf.extend_from_slice(&4u32.to_le_bytes());
        }

        // Segment data
        for seg in &self.segments {
            elf.extend_from_slice(&seg.data);
            while elf.len() % 4 != 0 {
                elf.push(0);
            }
        }

        if has_sections {
            // Section data
            for sec in &self.sections {
                if sec.sh_type != SHT_NOBITS {
                    elf.extend_from_slice(&sec.data);
                    while elf.len() % 4 != 0 {
                        elf.push(0);
                    }
                }
            }

            debug_assert_eq!(elf.len(), shstrtab_offset);
            elf.extend_from_slice(&shstrtab);
            while elf.len() % 4 != 0 {
                elf.push(0);
            }

            // Section headers: null record first.
            debug_assert_eq!(elf.len(), shoff);
            elf.extend_from_slice(&[0u8; ELF32_SHDR_SIZE]);
            for (i, sec) in self.sections.iter().enumerate() {
                elf.extend_from_slice(&name_offsets[i].to_le_bytes());
                elf.extend_from_slice(&sec.sh_type.to_le_bytes());
                elf.extend_from_slice(&sec.sh_flags.to_le_bytes());
                elf.extend_from_slice(&sec.sh_addr.to_le_bytes());
                elf.extend_from_slice(&(section_offsets[i] as u32).to_le_bytes());
                elf.extend_from_slice(&(sec.data.len() as u32).to_le_bytes());
                elf.extend_from_slice(&sec.sh_link.to_le_bytes());
                elf.extend_from_slice(&sec.sh_info.to_le_bytes());
                elf.extend_from_slice(&4u32.to_le_bytes()); // addralign
                elf.extend_from_slice(&sec.sh_entsize.to_le_bytes());
            }
            // shstrtab header
            elf.extend_from_slice(&shstrtab_name_off.to_le_bytes());
            elf.extend_from_slice(&SHT_STRTAB.to_le_bytes());
            elf.extend_from_slice(&0u32.to_le_bytes());
            elf.extend_from_slice(&0u32.to_le_bytes());
            elf.extend_from_slice(&(shstrtab_offset as u32).to_le_bytes());
            elf.extend_from_slice(&(shstrtab.len() as u32).to_le_bytes());
            elf.extend_from_slice(&0u32.to_le_bytes());
            elf.extend_from_slice(&0u32.to_le_bytes());
            elf.extend_from_slice(&1u32.to_le_bytes());
            elf.extend_from_slice(&0u32.to_le_bytes());
        }

        elf
    }
}

/// Build a minimal valid image: one R+X loadable segment holding `code`.
pub fn build_test_elf(code: &[u8], entry: u32, load_addr: u32) -> Vec<u8> {
    TestElfBuilder::new(entry)
        .segment(load_addr, code, code.len() as u32, PF_R | PF_X)
        .build()
}

/// Build an image with a code segment plus a data segment carrying a BSS
/// tail of `bss_size` bytes.
pub fn build_test_elf_with_data(
    code: &[u8],
    data: &[u8],
    bss_size: u32,
    entry: u32,
    code_addr: u32,
    data_addr: u32,
) -> Vec<u8> {
    TestElfBuilder::new(entry)
        .segment(code_addr, code, code.len() as u32, PF_R | PF_X)
        .segment(data_addr, data, data.len() as u32 + bss_size, PF_R | PF_W)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FileHeader;

    #[test]
    fn minimal_image_parses() {
        let elf = build_test_elf(&[0x90; 8], 0x1000, 0x1000);
        let header = FileHeader::parse(&elf).unwrap();
        assert_eq!(header.entry(), 0x1000);
        assert_eq!(header.segment_count(), 1);
        assert_eq!(header.section_count(), 0);
    }

    #[test]
    fn sectioned_image_parses() {
        let mut builder = TestElfBuilder::new(0x1000).segment(
            0x1000,
            &[0x90; 8],
            8,
            PF_R | PF_X,
        );
        let text = builder.text_section(0x1000, &[0x90; 8]);
        let symtab = builder.symtab(&[("start", 0x1000, 8, 0x12, text as u16)]);
        let elf = builder.build();

        let header = FileHeader::parse(&elf).unwrap();
        // null + .text + .strtab + .symtab + .shstrtab
        assert_eq!(header.section_count(), 5);
        assert_eq!(text, 1);
        assert_eq!(symtab, 3);
    }
}
