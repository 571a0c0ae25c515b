//! Section headers and the string-table name lookup they hang off.

use crate::error::LoaderError;
use crate::header::{read_u32_at, FileHeader, ELF32_SHDR_SIZE};

/// Section type from `sh_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Null,
    ProgBits,
    SymTab,
    StrTab,
    Rela,
    Hash,
    Dynamic,
    Note,
    /// Occupies no file bytes; pure memory reservation (BSS).
    NoBits,
    Rel,
    ShLib,
    DynSym,
    Unknown(u32),
}

impl From<u32> for SectionKind {
    fn from(raw: u32) -> Self {
        match raw {
            0 => SectionKind::Null,
            1 => SectionKind::ProgBits,
            2 => SectionKind::SymTab,
            3 => SectionKind::StrTab,
            4 => SectionKind::Rela,
            5 => SectionKind::Hash,
            6 => SectionKind::Dynamic,
            7 => SectionKind::Note,
            8 => SectionKind::NoBits,
            9 => SectionKind::Rel,
            10 => SectionKind::ShLib,
            11 => SectionKind::DynSym,
            other => SectionKind::Unknown(other),
        }
    }
}

/// Section flag: writable at run time.
pub const SHF_WRITE: u32 = 0x1;
/// Section flag: occupies memory during execution.
pub const SHF_ALLOC: u32 = 0x2;
/// Section flag: holds executable instructions.
pub const SHF_EXECINSTR: u32 = 0x4;

/// One section-header record.
#[derive(Debug, Clone)]
pub struct Section {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
}

impl Section {
    pub fn kind(&self) -> SectionKind {
        SectionKind::from(self.sh_type)
    }

    /// Whether the section carries executable program bytes, as opposed to a
    /// marker or a bits-in-memory-only placeholder.
    pub fn is_code(&self) -> bool {
        self.kind() == SectionKind::ProgBits
    }

    /// Whether the section is backed by file bytes at all.
    pub fn has_file_data(&self) -> bool {
        !matches!(self.kind(), SectionKind::NoBits | SectionKind::Null)
    }
}

/// Decode the section-header table. Table bounds were validated with the
/// file header.
pub(crate) fn parse_section_headers(
    data: &[u8],
    header: &FileHeader,
) -> Result<Vec<Section>, LoaderError> {
    if header.e_shoff == 0 || header.e_shnum == 0 {
        return Ok(Vec::new());
    }

    let mut sections = Vec::with_capacity(header.e_shnum as usize);
    let shoff = header.e_shoff as usize;
    let shentsize = header.e_shentsize as usize;

    for i in 0..header.e_shnum as usize {
        let off = shoff + i * shentsize;
        if off + ELF32_SHDR_SIZE > data.len() {
            return Err(LoaderError::Truncated {
                what: "section header",
                offset: off,
                len: data.len(),
            });
        }

        sections.push(Section {
            sh_name: read_u32_at(data, off, "sh_name")?,
            sh_type: read_u32_at(data, off + 4, "sh_type")?,
            sh_flags: read_u32_at(data, off + 8, "sh_flags")?,
            sh_addr: read_u32_at(data, off + 12, "sh_addr")?,
            sh_offset: read_u32_at(data, off + 16, "sh_offset")?,
            sh_size: read_u32_at(data, off + 20, "sh_size")?,
            sh_link: read_u32_at(data, off + 24, "sh_link")?,
            sh_info: read_u32_at(data, off + 28, "sh_info")?,
            sh_addralign: read_u32_at(data, off + 32, "sh_addralign")?,
            sh_entsize: read_u32_at(data, off + 36, "sh_entsize")?,
        });
    }

    Ok(sections)
}

/// Borrow a section's file bytes out of the source buffer.
///
/// `None` for no-bits sections (nothing to read) and for ranges that do not
/// fit in the buffer.
pub(crate) fn section_bytes<'a>(data: &'a [u8], section: &Section) -> Option<&'a [u8]> {
    if !section.has_file_data() {
        return None;
    }
    let start = section.sh_offset as usize;
    let end = start.checked_add(section.sh_size as usize)?;
    data.get(start..end)
}

/// Resolve a null-terminated name at `offset` inside a string table.
pub(crate) fn strtab_name(strtab: &[u8], offset: u32) -> Option<&str> {
    let start = offset as usize;
    if start >= strtab.len() {
        return None;
    }
    let end = strtab[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|pos| start + pos)
        .unwrap_or(strtab.len());
    std::str::from_utf8(&strtab[start..end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strtab_name_terminates() {
        let tab = b"\0.text\0.data\0";
        assert_eq!(strtab_name(tab, 1), Some(".text"));
        assert_eq!(strtab_name(tab, 7), Some(".data"));
        assert_eq!(strtab_name(tab, 0), Some(""));
        assert_eq!(strtab_name(tab, 64), None);
    }

    #[test]
    fn nobits_has_no_file_data() {
        let bss = Section {
            sh_name: 0,
            sh_type: 8, // SHT_NOBITS
            sh_flags: SHF_ALLOC | SHF_WRITE,
            sh_addr: 0x3000,
            sh_offset: 0,
            sh_size: 0x100,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 4,
            sh_entsize: 0,
        };
        assert_eq!(bss.kind(), SectionKind::NoBits);
        assert!(!bss.is_code());
        assert!(section_bytes(&[0u8; 64], &bss).is_none());
    }
}
