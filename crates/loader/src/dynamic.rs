//! Dynamic-section entries.
//!
//! Retained structurally for future use; this loader performs no dynamic
//! linking, so tags are decoded but never acted on.

use crate::error::LoaderError;
use crate::header::read_u32_at;
use crate::section::{section_bytes, Section, SectionKind};

/// Dynamic-entry tag from `d_tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynTag {
    Null,
    Needed,
    PltRelSz,
    PltGot,
    Hash,
    StrTab,
    SymTab,
    Rela,
    RelaSz,
    RelaEnt,
    StrSz,
    SymEnt,
    Init,
    Fini,
    SoName,
    RPath,
    Symbolic,
    Rel,
    RelSz,
    RelEnt,
    PltRel,
    Debug,
    TextRel,
    JmpRel,
    Unknown(u32),
}

impl From<u32> for DynTag {
    fn from(raw: u32) -> Self {
        match raw {
            0 => DynTag::Null,
            1 => DynTag::Needed,
            2 => DynTag::PltRelSz,
            3 => DynTag::PltGot,
            4 => DynTag::Hash,
            5 => DynTag::StrTab,
            6 => DynTag::SymTab,
            7 => DynTag::Rela,
            8 => DynTag::RelaSz,
            9 => DynTag::RelaEnt,
            10 => DynTag::StrSz,
            11 => DynTag::SymEnt,
            12 => DynTag::Init,
            13 => DynTag::Fini,
            14 => DynTag::SoName,
            15 => DynTag::RPath,
            16 => DynTag::Symbolic,
            17 => DynTag::Rel,
            18 => DynTag::RelSz,
            19 => DynTag::RelEnt,
            20 => DynTag::PltRel,
            21 => DynTag::Debug,
            22 => DynTag::TextRel,
            23 => DynTag::JmpRel,
            other => DynTag::Unknown(other),
        }
    }
}

/// One dynamic-section record: a tag and its value-or-address word.
#[derive(Debug, Clone, Copy)]
pub struct DynamicEntry {
    pub tag: DynTag,
    pub value: u32,
}

/// Decode all dynamic entries, stopping at the terminating null tag.
pub(crate) fn parse_dynamic(
    data: &[u8],
    sections: &[Section],
) -> Result<Vec<DynamicEntry>, LoaderError> {
    let dynamic = match sections.iter().find(|s| s.kind() == SectionKind::Dynamic) {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };

    let bytes = match section_bytes(data, dynamic) {
        Some(b) => b,
        None => return Ok(Vec::new()),
    };

    let mut entries = Vec::new();
    for record in bytes.chunks_exact(8) {
        let tag = DynTag::from(read_u32_at(record, 0, "d_tag")?);
        let value = read_u32_at(record, 4, "d_val")?;
        if tag == DynTag::Null {
            break;
        }
        entries.push(DynamicEntry { tag, value });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_decode() {
        assert_eq!(DynTag::from(1), DynTag::Needed);
        assert_eq!(DynTag::from(23), DynTag::JmpRel);
        assert_eq!(DynTag::from(99), DynTag::Unknown(99));
    }
}
