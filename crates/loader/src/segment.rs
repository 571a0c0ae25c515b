//! Program segments: decoding and mapping into target memory.

use log::{debug, trace};

use crate::error::LoaderError;
use crate::header::{read_u32_at, FileHeader, ELF32_PHDR_SIZE};
use crate::memory::Memory;

/// Segment type from `p_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Null,
    Load,
    Dynamic,
    Interp,
    Note,
    ShLib,
    Phdr,
    Unknown(u32),
}

impl From<u32> for SegmentKind {
    fn from(raw: u32) -> Self {
        match raw {
            0 => SegmentKind::Null,
            1 => SegmentKind::Load,
            2 => SegmentKind::Dynamic,
            3 => SegmentKind::Interp,
            4 => SegmentKind::Note,
            5 => SegmentKind::ShLib,
            6 => SegmentKind::Phdr,
            other => SegmentKind::Unknown(other),
        }
    }
}

/// Segment flag: executable.
pub const PF_X: u32 = 0x1;
/// Segment flag: writable.
pub const PF_W: u32 = 0x2;
/// Segment flag: readable.
pub const PF_R: u32 = 0x4;

/// One program-header record.
#[derive(Debug, Clone)]
pub struct ProgramSegment {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

impl ProgramSegment {
    pub fn kind(&self) -> SegmentKind {
        SegmentKind::from(self.p_type)
    }

    pub fn is_loadable(&self) -> bool {
        self.kind() == SegmentKind::Load
    }

    pub fn is_readable(&self) -> bool {
        self.p_flags & PF_R != 0
    }

    pub fn is_writable(&self) -> bool {
        self.p_flags & PF_W != 0
    }

    pub fn is_executable(&self) -> bool {
        self.p_flags & PF_X != 0
    }
}

/// Decode the program-header table.
///
/// The table bounds were already validated with the file header, so the
/// per-record reads cannot run past the buffer; the reads stay
/// bounds-checked anyway.
pub(crate) fn parse_program_headers(
    data: &[u8],
    header: &FileHeader,
) -> Result<Vec<ProgramSegment>, LoaderError> {
    let mut segments = Vec::with_capacity(header.e_phnum as usize);
    let phoff = header.e_phoff as usize;
    let phentsize = header.e_phentsize as usize;

    for i in 0..header.e_phnum as usize {
        let off = phoff + i * phentsize;
        if off + ELF32_PHDR_SIZE > data.len() {
            return Err(LoaderError::Truncated {
                what: "program header",
                offset: off,
                len: data.len(),
            });
        }

        segments.push(ProgramSegment {
            p_type: read_u32_at(data, off, "p_type")?,
            p_offset: read_u32_at(data, off + 4, "p_offset")?,
            p_vaddr: read_u32_at(data, off + 8, "p_vaddr")?,
            p_paddr: read_u32_at(data, off + 12, "p_paddr")?,
            p_filesz: read_u32_at(data, off + 16, "p_filesz")?,
            p_memsz: read_u32_at(data, off + 20, "p_memsz")?,
            p_flags: read_u32_at(data, off + 24, "p_flags")?,
            p_align: read_u32_at(data, off + 28, "p_align")?,
        });
    }

    Ok(segments)
}

/// Round an address down to the segment's declared alignment.
fn align_down(addr: u32, align: u32) -> u32 {
    if align <= 1 {
        addr
    } else {
        addr - addr % align
    }
}

/// Map all loadable segments into target memory at `bias + p_vaddr`.
///
/// File bytes are copied, then the `[filesz, memsz)` tail is zero-filled.
/// Segments are applied in ascending vaddr order; ELF permits layout-level
/// overlap between segments, so overlapping ranges are last-write-wins.
/// Non-loadable segments are recorded by the caller but skipped here.
///
/// Returns the number of segments mapped.
pub(crate) fn map_segments(
    data: &[u8],
    segments: &[ProgramSegment],
    memory: &mut Memory,
    bias: u32,
) -> Result<usize, LoaderError> {
    let mut loadable: Vec<(usize, &ProgramSegment)> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_loadable())
        .collect();
    loadable.sort_by_key(|(_, s)| s.p_vaddr);

    let mut mapped = 0;
    for (index, seg) in loadable {
        let file_offset = seg.p_offset as usize;
        let file_size = seg.p_filesz as usize;
        let mem_size = seg.p_memsz as usize;
        let vaddr = bias.wrapping_add(seg.p_vaddr);

        if mem_size < file_size {
            return Err(LoaderError::Format {
                field: "p_memsz",
                detail: format!(
                    "segment {index}: memsz {:#x} below filesz {:#x}",
                    seg.p_memsz, seg.p_filesz
                ),
            });
        }

        if file_size > 0 && file_offset.saturating_add(file_size) > data.len() {
            return Err(LoaderError::SegmentOutOfBounds {
                index,
                vaddr: seg.p_vaddr,
            });
        }

        // The whole aligned region must be reservable before any byte lands.
        let region_base = align_down(vaddr, seg.p_align);
        let region_len = (vaddr - region_base) as usize + mem_size;
        if !memory.is_valid_range(region_base, region_len) {
            return Err(LoaderError::AllocationFailure {
                vaddr: region_base,
                size: u32::try_from(region_len).unwrap_or(u32::MAX),
            });
        }

        trace!(
            "segment {index}: {:#010x}..{:#010x} from file {:#x}+{:#x}",
            vaddr,
            vaddr.wrapping_add(mem_size as u32),
            file_offset,
            file_size
        );

        if file_size > 0 {
            memory.load_region(vaddr, &data[file_offset..file_offset + file_size])?;
        }
        if mem_size > file_size {
            memory.zero_fill(vaddr.saturating_add(file_size as u32), mem_size - file_size)?;
        }
        mapped += 1;
    }

    debug!("mapped {mapped} loadable segment(s) at bias {bias:#x}");
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FileHeader;
    use crate::testelf::{build_test_elf, build_test_elf_with_data};

    #[test]
    fn decode_load_segment() {
        let elf = build_test_elf(&[1, 2, 3, 4], 0x1000, 0x1000);
        let header = FileHeader::parse(&elf).unwrap();
        let segs = parse_program_headers(&elf, &header).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].kind(), SegmentKind::Load);
        assert_eq!(segs[0].p_vaddr, 0x1000);
        assert_eq!(segs[0].p_filesz, 4);
        assert!(segs[0].is_readable());
        assert!(segs[0].is_executable());
        assert!(!segs[0].is_writable());
    }

    #[test]
    fn bss_tail_is_zeroed() {
        let data = [0xaau8; 8];
        let elf = build_test_elf_with_data(&[0x90; 4], &data, 16, 0x1000, 0x1000, 0x2000);
        let header = FileHeader::parse(&elf).unwrap();
        let segs = parse_program_headers(&elf, &header).unwrap();

        let mut mem = Memory::new(0x4000);
        // Dirty the BSS range first so the zero-fill is observable.
        mem.load_region(0x2008, &[0xffu8; 16]).unwrap();
        map_segments(&elf, &segs, &mut mem, 0).unwrap();

        assert_eq!(mem.slice(0x2000, 8).unwrap(), &data);
        assert_eq!(mem.slice(0x2008, 16).unwrap(), &[0u8; 16]);
    }

    #[test]
    fn file_range_past_eof_fails() {
        let mut elf = build_test_elf(&[0; 4], 0x1000, 0x1000);
        let header = FileHeader::parse(&elf).unwrap();
        // Corrupt p_filesz and p_memsz (program header starts at 52;
        // filesz at +16, memsz at +20).
        elf[52 + 16..52 + 20].copy_from_slice(&0x10000u32.to_le_bytes());
        elf[52 + 20..52 + 24].copy_from_slice(&0x10000u32.to_le_bytes());
        let segs = parse_program_headers(&elf, &header).unwrap();

        let mut mem = Memory::new(0x20000);
        let err = map_segments(&elf, &segs, &mut mem, 0).unwrap_err();
        assert!(matches!(err, LoaderError::SegmentOutOfBounds { index: 0, .. }));
    }

    #[test]
    fn huge_memsz_fails_reservation_without_truncation() {
        // vaddr 0xfff with align 4 rounds down to 0xffc; memsz 0xffffffff
        // makes the reserved region wider than the 32-bit space, which must
        // still be caught up front rather than slip through a narrowing cast.
        let mut elf = build_test_elf(&[0; 4], 0x1000, 0xfff);
        let header = FileHeader::parse(&elf).unwrap();
        elf[52 + 20..52 + 24].copy_from_slice(&0xffff_ffffu32.to_le_bytes());
        let segs = parse_program_headers(&elf, &header).unwrap();

        let mut mem = Memory::new(0x10000);
        let err = map_segments(&elf, &segs, &mut mem, 0).unwrap_err();
        assert!(matches!(err, LoaderError::AllocationFailure { vaddr: 0xffc, .. }));
    }

    #[test]
    fn target_region_too_small_fails() {
        let elf = build_test_elf(&[0; 4], 0x1000, 0x1000);
        let header = FileHeader::parse(&elf).unwrap();
        let segs = parse_program_headers(&elf, &header).unwrap();

        let mut mem = Memory::new(0x100);
        let err = map_segments(&elf, &segs, &mut mem, 0).unwrap_err();
        assert!(matches!(err, LoaderError::AllocationFailure { .. }));
    }

    #[test]
    fn bias_shifts_mapping() {
        let elf = build_test_elf(&[0xde, 0xad, 0xbe, 0xef], 0x1000, 0x1000);
        let header = FileHeader::parse(&elf).unwrap();
        let segs = parse_program_headers(&elf, &header).unwrap();

        let mut mem = Memory::new(0x10000);
        map_segments(&elf, &segs, &mut mem, 0x4000).unwrap();
        assert_eq!(mem.slice(0x5000, 4).unwrap(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn align_down_rounds() {
        assert_eq!(align_down(0x1234, 0x1000), 0x1000);
        assert_eq!(align_down(0x1234, 1), 0x1234);
        assert_eq!(align_down(0x1234, 0), 0x1234);
        assert_eq!(align_down(0x2000, 0x1000), 0x2000);
    }
}
