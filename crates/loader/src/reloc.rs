//! Relocation decoding and application.
//!
//! Covers the fixed i386 relocation set the target architecture requires.
//! A relocation section is all-or-nothing: REL entries read their addend
//! from the word they patch, so later entries may depend on writes made by
//! earlier ones, and processing stops at the first failure.

use log::{debug, trace};

use crate::error::LoaderError;
use crate::header::{read_u32_at, ELF32_RELA_SIZE, ELF32_REL_SIZE};
use crate::memory::Memory;
use crate::section::{section_bytes, Section, SectionKind};
use crate::symbol::{Symbol, SymbolTable, SHN_ABS};

/// Relocation type, the low byte of `r_info` (i386 set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// No operation.
    None,
    /// `S + A`
    Abs32,
    /// `S + A - P`
    Pc32,
    /// `G + A`; needs an established GOT.
    Got32,
    /// `S + A - P` once the call binds directly; needs an established GOT.
    Plt32,
    /// Copy `st_size` bytes from the symbol's defining section.
    Copy,
    /// `S`
    GlobDat,
    /// `S`
    JmpSlot,
    /// `B + A`
    Relative,
    /// `S + A - GOT`
    GotOff,
    /// `GOT + A - P`
    GotPc,
    Unknown(u8),
}

impl From<u8> for RelocKind {
    fn from(raw: u8) -> Self {
        match raw {
            0 => RelocKind::None,
            1 => RelocKind::Abs32,
            2 => RelocKind::Pc32,
            3 => RelocKind::Got32,
            4 => RelocKind::Plt32,
            5 => RelocKind::Copy,
            6 => RelocKind::GlobDat,
            7 => RelocKind::JmpSlot,
            8 => RelocKind::Relative,
            9 => RelocKind::GotOff,
            10 => RelocKind::GotPc,
            other => RelocKind::Unknown(other),
        }
    }
}

/// Symbol index from a packed `r_info` word.
pub fn r_sym(info: u32) -> u32 {
    info >> 8
}

/// Relocation type code from a packed `r_info` word.
pub fn r_type(info: u32) -> u8 {
    (info & 0xff) as u8
}

/// One relocation record. `addend` is `None` for the implicit-addend (REL)
/// variant, which reads the addend from the word being patched.
#[derive(Debug, Clone, Copy)]
pub struct RelocationEntry {
    pub offset: u32,
    pub info: u32,
    pub addend: Option<i32>,
}

impl RelocationEntry {
    pub fn symbol_index(&self) -> u32 {
        r_sym(self.info)
    }

    pub fn kind(&self) -> RelocKind {
        RelocKind::from(r_type(self.info))
    }
}

/// Decode the records of one REL or RELA section.
pub(crate) fn parse_reloc_section(
    data: &[u8],
    section: &Section,
) -> Result<Vec<RelocationEntry>, LoaderError> {
    let with_addend = match section.kind() {
        SectionKind::Rel => false,
        SectionKind::Rela => true,
        _ => return Ok(Vec::new()),
    };

    let bytes = section_bytes(data, section).ok_or(LoaderError::Truncated {
        what: "relocation section",
        offset: section.sh_offset as usize,
        len: data.len(),
    })?;

    let record_size = if with_addend { ELF32_RELA_SIZE } else { ELF32_REL_SIZE };
    let entsize = if section.sh_entsize as usize >= record_size {
        section.sh_entsize as usize
    } else {
        record_size
    };

    let mut entries = Vec::with_capacity(bytes.len() / entsize);
    for record in bytes.chunks_exact(entsize) {
        entries.push(RelocationEntry {
            offset: read_u32_at(record, 0, "r_offset")?,
            info: read_u32_at(record, 4, "r_info")?,
            addend: if with_addend {
                Some(read_u32_at(record, 8, "r_addend")? as i32)
            } else {
                None
            },
        });
    }

    Ok(entries)
}

/// Resolve `S` for a relocation: the symbol's loaded address.
///
/// Index 0 is the reserved undefined symbol and resolves to zero, as does
/// an undefined weak symbol. An undefined non-weak symbol, or an index past
/// the table, is an error.
fn resolve_symbol_value(
    index: u32,
    symbols: Option<&SymbolTable>,
    bias: u32,
) -> Result<u32, LoaderError> {
    if index == 0 {
        return Ok(0);
    }

    let symbol = symbols
        .and_then(|t| t.get(index as usize))
        .ok_or_else(|| LoaderError::UndefinedSymbol {
            index,
            name: "<out of range>".to_owned(),
        })?;

    if symbol.is_undefined() {
        if symbol.is_weak() {
            return Ok(0);
        }
        return Err(LoaderError::UndefinedSymbol {
            index,
            name: symbol.name.clone(),
        });
    }

    // Absolute symbols are immune to the load bias.
    if symbol.shndx == SHN_ABS {
        Ok(symbol.value)
    } else {
        Ok(bias.wrapping_add(symbol.value))
    }
}

fn copy_symbol_data(
    data: &[u8],
    sections: &[Section],
    symbol: &Symbol,
    target: u32,
    memory: &mut Memory,
) -> Result<(), LoaderError> {
    if symbol.size == 0 {
        return Err(LoaderError::Format {
            field: "copy relocation",
            detail: format!("symbol '{}' has no size", symbol.name),
        });
    }

    let section = sections
        .get(symbol.shndx as usize)
        .ok_or_else(|| LoaderError::UndefinedSymbol {
            index: 0,
            name: symbol.name.clone(),
        })?;
    let bytes = section_bytes(data, section).ok_or(LoaderError::Truncated {
        what: "copy relocation source",
        offset: section.sh_offset as usize,
        len: data.len(),
    })?;

    let start = symbol.value.wrapping_sub(section.sh_addr) as usize;
    let end = start
        .checked_add(symbol.size as usize)
        .filter(|&e| e <= bytes.len())
        .ok_or(LoaderError::Truncated {
            what: "copy relocation source",
            offset: start,
            len: bytes.len(),
        })?;

    memory.load_region(target, &bytes[start..end])
}

/// Apply every entry of one relocation section against mapped memory.
///
/// `bias` is the base load address `B`; each entry patches the word at
/// `P = B + offset`. Returns the number of entries applied. Stops at the
/// first failure, leaving earlier writes in place.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_reloc_section(
    data: &[u8],
    section: &Section,
    sections: &[Section],
    symbols: Option<&SymbolTable>,
    memory: &mut Memory,
    bias: u32,
    got_base: Option<u32>,
) -> Result<usize, LoaderError> {
    let entries = parse_reloc_section(data, section)?;
    let mut applied = 0;

    for entry in &entries {
        let p = bias.wrapping_add(entry.offset);
        let kind = entry.kind();

        // NONE never touches the target, so its offset is not required to
        // land in memory; skip it before the implicit-addend read.
        if kind == RelocKind::None {
            applied += 1;
            continue;
        }

        // Implicit-addend entries read the current word at the target.
        let a = match entry.addend {
            Some(a) => a,
            None => memory.read_u32(p)? as i32,
        };

        trace!(
            "reloc {:?} at P={p:#010x} sym={} addend={a:#x}",
            kind,
            entry.symbol_index()
        );

        match kind {
            RelocKind::None => {}
            RelocKind::Abs32 => {
                let s = resolve_symbol_value(entry.symbol_index(), symbols, bias)?;
                memory.write_u32(p, s.wrapping_add(a as u32))?;
            }
            RelocKind::Pc32 => {
                let s = resolve_symbol_value(entry.symbol_index(), symbols, bias)?;
                memory.write_u32(p, s.wrapping_add(a as u32).wrapping_sub(p))?;
            }
            RelocKind::Relative => {
                memory.write_u32(p, bias.wrapping_add(a as u32))?;
            }
            RelocKind::GlobDat | RelocKind::JmpSlot => {
                let s = resolve_symbol_value(entry.symbol_index(), symbols, bias)?;
                memory.write_u32(p, s)?;
            }
            RelocKind::Copy => {
                let index = entry.symbol_index();
                let symbol = symbols
                    .and_then(|t| t.get(index as usize))
                    .ok_or_else(|| LoaderError::UndefinedSymbol {
                        index,
                        name: "<out of range>".to_owned(),
                    })?;
                copy_symbol_data(data, sections, symbol, p, memory)?;
            }
            RelocKind::Got32 => {
                let got = got_base.ok_or(LoaderError::UnsupportedRelocation {
                    code: r_type(entry.info),
                    offset: p,
                })?;
                memory.write_u32(p, got.wrapping_add(a as u32))?;
            }
            RelocKind::Plt32 => {
                // Without lazy binding the call binds directly to the symbol.
                got_base.ok_or(LoaderError::UnsupportedRelocation {
                    code: r_type(entry.info),
                    offset: p,
                })?;
                let s = resolve_symbol_value(entry.symbol_index(), symbols, bias)?;
                memory.write_u32(p, s.wrapping_add(a as u32).wrapping_sub(p))?;
            }
            RelocKind::GotOff => {
                let got = got_base.ok_or(LoaderError::UnsupportedRelocation {
                    code: r_type(entry.info),
                    offset: p,
                })?;
                let s = resolve_symbol_value(entry.symbol_index(), symbols, bias)?;
                memory.write_u32(p, s.wrapping_add(a as u32).wrapping_sub(got))?;
            }
            RelocKind::GotPc => {
                let got = got_base.ok_or(LoaderError::UnsupportedRelocation {
                    code: r_type(entry.info),
                    offset: p,
                })?;
                memory.write_u32(p, got.wrapping_add(a as u32).wrapping_sub(p))?;
            }
            RelocKind::Unknown(code) => {
                return Err(LoaderError::UnsupportedRelocation { code, offset: p });
            }
        }

        applied += 1;
    }

    debug!("applied {applied} relocation(s) from one section");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(records: &[(&str, u32, u8, u16)]) -> SymbolTable {
        let mut table = SymbolTable::default();
        // Index 0 is always the reserved null record.
        table.push(Symbol {
            name: String::new(),
            value: 0,
            size: 0,
            info: 0,
            shndx: 0,
        });
        for &(name, value, info, shndx) in records {
            table.push(Symbol {
                name: name.to_owned(),
                value,
                size: 0,
                info,
                shndx,
            });
        }
        table
    }

    #[test]
    fn packed_info_accessors() {
        let info = (7 << 8) | 2; // symbol 7, R_386_PC32
        assert_eq!(r_sym(info), 7);
        assert_eq!(r_type(info), 2);
        assert_eq!(RelocKind::from(r_type(info)), RelocKind::Pc32);
        assert_eq!(RelocKind::from(42), RelocKind::Unknown(42));
    }

    #[test]
    fn undefined_weak_resolves_to_zero() {
        let table = table_with(&[("weak_thing", 0, 0x20, 0)]);
        assert_eq!(resolve_symbol_value(1, Some(&table), 0x1000).unwrap(), 0);
    }

    #[test]
    fn undefined_global_is_an_error() {
        let table = table_with(&[("missing", 0, 0x10, 0)]);
        let err = resolve_symbol_value(1, Some(&table), 0).unwrap_err();
        assert!(matches!(err, LoaderError::UndefinedSymbol { index: 1, .. }));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let table = SymbolTable::default();
        let err = resolve_symbol_value(5, Some(&table), 0).unwrap_err();
        assert!(matches!(err, LoaderError::UndefinedSymbol { index: 5, .. }));
    }

    #[test]
    fn absolute_symbol_ignores_bias() {
        let table = table_with(&[("abs", 0xcafe, 0x10, SHN_ABS)]);
        assert_eq!(resolve_symbol_value(1, Some(&table), 0x1000).unwrap(), 0xcafe);
    }

    #[test]
    fn defined_symbol_takes_bias() {
        let table = table_with(&[("f", 0x100, 0x12, 1)]);
        assert_eq!(resolve_symbol_value(1, Some(&table), 0x1000).unwrap(), 0x1100);
    }
}
