//! ELF32 file header validation and decoding.
//!
//! The header is the gatekeeper of the load pipeline: nothing else is parsed
//! until the identification bytes and the table offsets declared here have
//! been checked against the buffer. All multi-byte fields are reassembled
//! from individual bytes per the declared (little-endian) encoding; the
//! buffer is never reinterpreted as a packed struct.

use crate::error::LoaderError;

/// ELF magic number: 0x7f 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF data encoding: little-endian (the fixed target encoding)
pub const ELFDATA2LSB: u8 = 1;

/// Current ELF version
pub const EV_CURRENT: u8 = 1;

/// ELF header size for 32-bit
pub const ELF32_EHDR_SIZE: usize = 52;

/// Program header entry size for 32-bit
pub const ELF32_PHDR_SIZE: usize = 32;

/// Section header entry size for 32-bit
pub const ELF32_SHDR_SIZE: usize = 40;

/// Symbol record size for 32-bit
pub const ELF32_SYM_SIZE: usize = 16;

/// Relocation record size without addend
pub const ELF32_REL_SIZE: usize = 8;

/// Relocation record size with addend
pub const ELF32_RELA_SIZE: usize = 12;

/// Object file type from `e_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    None,
    Relocatable,
    Executable,
    SharedObject,
    Core,
    Unknown(u16),
}

impl From<u16> for ElfType {
    fn from(raw: u16) -> Self {
        match raw {
            0 => ElfType::None,
            1 => ElfType::Relocatable,
            2 => ElfType::Executable,
            3 => ElfType::SharedObject,
            4 => ElfType::Core,
            other => ElfType::Unknown(other),
        }
    }
}

/// Machine architecture from `e_machine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMachine {
    None,
    M32,
    Sparc,
    Intel386,
    M68k,
    M88k,
    I860,
    Mips,
    Unknown(u16),
}

impl From<u16> for ElfMachine {
    fn from(raw: u16) -> Self {
        match raw {
            0 => ElfMachine::None,
            1 => ElfMachine::M32,
            2 => ElfMachine::Sparc,
            3 => ElfMachine::Intel386,
            4 => ElfMachine::M68k,
            5 => ElfMachine::M88k,
            7 => ElfMachine::I860,
            8 => ElfMachine::Mips,
            other => ElfMachine::Unknown(other),
        }
    }
}

/// Bounds-checked little-endian u16 read.
pub(crate) fn read_u16_at(data: &[u8], offset: usize, what: &'static str) -> Result<u16, LoaderError> {
    let end = offset.checked_add(2).filter(|&e| e <= data.len());
    match end {
        Some(_) => Ok(u16::from_le_bytes([data[offset], data[offset + 1]])),
        None => Err(LoaderError::Truncated {
            what,
            offset,
            len: data.len(),
        }),
    }
}

/// Bounds-checked little-endian u32 read.
pub(crate) fn read_u32_at(data: &[u8], offset: usize, what: &'static str) -> Result<u32, LoaderError> {
    let end = offset.checked_add(4).filter(|&e| e <= data.len());
    match end {
        Some(_) => Ok(u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ])),
        None => Err(LoaderError::Truncated {
            what,
            offset,
            len: data.len(),
        }),
    }
}

/// Raw-word reader shared by the query surface: a 32-bit little-endian value
/// at a 4-byte-aligned file offset.
pub fn read_word(data: &[u8], offset: usize) -> Result<u32, LoaderError> {
    if offset % 4 != 0 {
        return Err(LoaderError::Format {
            field: "word offset",
            detail: format!("{offset:#x} is not 4-byte aligned"),
        });
    }
    read_u32_at(data, offset, "word read")
}

/// Validated ELF32 file header.
///
/// Field names follow the on-disk record. `parse` performs all identity and
/// bounds checks; a constructed `FileHeader` is safe to index through.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl FileHeader {
    /// Validate the identification bytes and decode the fixed header.
    ///
    /// Checks, in order: buffer length, magic, class, encoding, version,
    /// declared header sizes, and that both header tables fit inside the
    /// buffer. Any violation is a `Format` or `Truncated` error naming the
    /// failing field; no later stage runs after a failure here.
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        if data.len() < ELF32_EHDR_SIZE {
            return Err(LoaderError::Truncated {
                what: "file header",
                offset: ELF32_EHDR_SIZE,
                len: data.len(),
            });
        }

        if data[0..4] != ELF_MAGIC {
            return Err(LoaderError::Format {
                field: "magic",
                detail: format!(
                    "{:02x} {:02x} {:02x} {:02x}",
                    data[0], data[1], data[2], data[3]
                ),
            });
        }

        if data[4] != ELFCLASS32 {
            return Err(LoaderError::Format {
                field: "class",
                detail: format!("expected ELFCLASS32, got {}", data[4]),
            });
        }

        if data[5] != ELFDATA2LSB {
            return Err(LoaderError::Format {
                field: "encoding",
                detail: format!("expected little-endian, got {}", data[5]),
            });
        }

        if data[6] != EV_CURRENT {
            return Err(LoaderError::Format {
                field: "ident version",
                detail: format!("{}", data[6]),
            });
        }

        let header = FileHeader {
            e_type: read_u16_at(data, 16, "e_type")?,
            e_machine: read_u16_at(data, 18, "e_machine")?,
            e_version: read_u32_at(data, 20, "e_version")?,
            e_entry: read_u32_at(data, 24, "e_entry")?,
            e_phoff: read_u32_at(data, 28, "e_phoff")?,
            e_shoff: read_u32_at(data, 32, "e_shoff")?,
            e_flags: read_u32_at(data, 36, "e_flags")?,
            e_ehsize: read_u16_at(data, 40, "e_ehsize")?,
            e_phentsize: read_u16_at(data, 42, "e_phentsize")?,
            e_phnum: read_u16_at(data, 44, "e_phnum")?,
            e_shentsize: read_u16_at(data, 46, "e_shentsize")?,
            e_shnum: read_u16_at(data, 48, "e_shnum")?,
            e_shstrndx: read_u16_at(data, 50, "e_shstrndx")?,
        };

        if header.e_version != 1 {
            return Err(LoaderError::Format {
                field: "e_version",
                detail: format!("{}", header.e_version),
            });
        }

        if header.e_ehsize as usize != ELF32_EHDR_SIZE {
            return Err(LoaderError::Format {
                field: "e_ehsize",
                detail: format!("expected {ELF32_EHDR_SIZE}, got {}", header.e_ehsize),
            });
        }

        if header.e_phnum > 0 && (header.e_phentsize as usize) < ELF32_PHDR_SIZE {
            return Err(LoaderError::Format {
                field: "e_phentsize",
                detail: format!("{} below record size {ELF32_PHDR_SIZE}", header.e_phentsize),
            });
        }

        if header.e_shnum > 0 && (header.e_shentsize as usize) < ELF32_SHDR_SIZE {
            return Err(LoaderError::Format {
                field: "e_shentsize",
                detail: format!("{} below record size {ELF32_SHDR_SIZE}", header.e_shentsize),
            });
        }

        header.check_table("program header table", header.e_phoff, header.e_phnum, header.e_phentsize, data.len())?;
        header.check_table("section header table", header.e_shoff, header.e_shnum, header.e_shentsize, data.len())?;

        Ok(header)
    }

    fn check_table(
        &self,
        what: &'static str,
        off: u32,
        num: u16,
        entsize: u16,
        len: usize,
    ) -> Result<(), LoaderError> {
        if num == 0 {
            return Ok(());
        }
        let table_bytes = num as usize * entsize as usize;
        let end = (off as usize).checked_add(table_bytes);
        match end {
            Some(end) if end <= len => Ok(()),
            _ => Err(LoaderError::Truncated {
                what,
                offset: off as usize,
                len,
            }),
        }
    }

    /// Object file type.
    pub fn elf_type(&self) -> ElfType {
        ElfType::from(self.e_type)
    }

    /// Target machine architecture.
    pub fn machine(&self) -> ElfMachine {
        ElfMachine::from(self.e_machine)
    }

    /// Processor-specific flags.
    pub fn flags(&self) -> u32 {
        self.e_flags
    }

    /// Declared entry point virtual address (pre-bias).
    pub fn entry(&self) -> u32 {
        self.e_entry
    }

    /// Number of program header entries.
    pub fn segment_count(&self) -> usize {
        self.e_phnum as usize
    }

    /// Number of section header entries.
    pub fn section_count(&self) -> usize {
        self.e_shnum as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testelf::build_test_elf;

    #[test]
    fn parse_minimal_header() {
        let elf = build_test_elf(&[0x13, 0x00, 0x00, 0x00], 0x1000, 0x1000);
        let header = FileHeader::parse(&elf).unwrap();
        assert_eq!(header.elf_type(), ElfType::Executable);
        assert_eq!(header.machine(), ElfMachine::Intel386);
        assert_eq!(header.entry(), 0x1000);
        assert_eq!(header.segment_count(), 1);
    }

    #[test]
    fn reject_short_buffer() {
        let err = FileHeader::parse(&[0x7f, b'E', b'L', b'F']).unwrap_err();
        assert!(matches!(err, LoaderError::Truncated { what: "file header", .. }));
    }

    #[test]
    fn reject_bad_magic() {
        let mut elf = build_test_elf(&[0; 4], 0, 0);
        elf[0] = 0xde;
        let err = FileHeader::parse(&elf).unwrap_err();
        assert!(matches!(err, LoaderError::Format { field: "magic", .. }));
    }

    #[test]
    fn reject_wrong_class() {
        let mut elf = build_test_elf(&[0; 4], 0, 0);
        elf[4] = 2; // ELFCLASS64
        let err = FileHeader::parse(&elf).unwrap_err();
        assert!(matches!(err, LoaderError::Format { field: "class", .. }));
    }

    #[test]
    fn reject_wrong_encoding() {
        let mut elf = build_test_elf(&[0; 4], 0, 0);
        elf[5] = 2; // big-endian
        let err = FileHeader::parse(&elf).unwrap_err();
        assert!(matches!(err, LoaderError::Format { field: "encoding", .. }));
    }

    #[test]
    fn reject_table_past_eof() {
        let mut elf = build_test_elf(&[0; 4], 0, 0);
        // Point the program header table far past the end of the buffer.
        elf[28..32].copy_from_slice(&0x1000_0000u32.to_le_bytes());
        let err = FileHeader::parse(&elf).unwrap_err();
        assert!(matches!(err, LoaderError::Truncated { .. }));
    }

    #[test]
    fn read_word_alignment() {
        let elf = build_test_elf(&[0; 4], 0, 0);
        assert!(read_word(&elf, 0).is_ok());
        assert!(read_word(&elf, 2).is_err());
        assert!(read_word(&elf, elf.len() + 4).is_err());
    }
}
