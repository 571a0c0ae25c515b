//! Symbol table decoding and the name-to-symbol map.

use std::collections::HashMap;

use log::debug;

use crate::error::LoaderError;
use crate::header::{read_u16_at, read_u32_at, ELF32_SYM_SIZE};
use crate::section::{section_bytes, strtab_name, Section, SectionKind};

/// Reserved section index: undefined symbol.
pub const SHN_UNDEF: u16 = 0;
/// Reserved section index: absolute value, not affected by the load bias.
pub const SHN_ABS: u16 = 0xfff1;
/// Reserved section index: common block.
pub const SHN_COMMON: u16 = 0xfff2;

/// Symbol binding, the top 4 bits of `st_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
    Unknown(u8),
}

/// Symbol kind, the bottom 4 bits of `st_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
    Unknown(u8),
}

/// Extract the binding from a packed `st_info` byte.
pub fn st_bind(info: u8) -> SymbolBinding {
    match info >> 4 {
        0 => SymbolBinding::Local,
        1 => SymbolBinding::Global,
        2 => SymbolBinding::Weak,
        other => SymbolBinding::Unknown(other),
    }
}

/// Extract the kind from a packed `st_info` byte.
pub fn st_type(info: u8) -> SymbolKind {
    match info & 0xf {
        0 => SymbolKind::NoType,
        1 => SymbolKind::Object,
        2 => SymbolKind::Func,
        3 => SymbolKind::Section,
        4 => SymbolKind::File,
        other => SymbolKind::Unknown(other),
    }
}

/// One decoded symbol record.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub size: u32,
    pub info: u8,
    /// Defining section index, or a reserved value (`SHN_UNDEF`, `SHN_ABS`).
    pub shndx: u16,
}

impl Symbol {
    pub fn binding(&self) -> SymbolBinding {
        st_bind(self.info)
    }

    pub fn kind(&self) -> SymbolKind {
        st_type(self.info)
    }

    pub fn is_undefined(&self) -> bool {
        self.shndx == SHN_UNDEF
    }

    pub fn is_weak(&self) -> bool {
        self.binding() == SymbolBinding::Weak
    }

    pub fn is_function(&self) -> bool {
        self.kind() == SymbolKind::Func
    }
}

/// Decoded symbol table with a name lookup map.
///
/// Iteration order over `symbols()` matches the file's record order. The
/// name map is first-definition-wins: a later record with a duplicate name
/// does not replace an earlier one, matching local/global precedence by
/// table order.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
}

impl SymbolTable {
    /// Locate the symbol table (falling back to the dynamic symbol table)
    /// and its linked string table, then decode every record.
    ///
    /// Fails with `MissingSymbolTable` when no symbol/string-table pair
    /// exists; callers may treat that as a degraded load rather than a
    /// fatal one.
    pub fn build(data: &[u8], sections: &[Section]) -> Result<Self, LoaderError> {
        let symtab = sections
            .iter()
            .find(|s| s.kind() == SectionKind::SymTab)
            .or_else(|| sections.iter().find(|s| s.kind() == SectionKind::DynSym))
            .ok_or(LoaderError::MissingSymbolTable)?;

        let strtab = sections
            .get(symtab.sh_link as usize)
            .filter(|s| s.kind() == SectionKind::StrTab)
            .and_then(|s| section_bytes(data, s))
            .ok_or(LoaderError::MissingSymbolTable)?;

        let records = section_bytes(data, symtab).ok_or(LoaderError::Truncated {
            what: "symbol table",
            offset: symtab.sh_offset as usize,
            len: data.len(),
        })?;

        let entsize = if symtab.sh_entsize as usize >= ELF32_SYM_SIZE {
            symtab.sh_entsize as usize
        } else {
            ELF32_SYM_SIZE
        };

        let mut table = SymbolTable::default();
        for record in records.chunks_exact(entsize) {
            let name_off = read_u32_at(record, 0, "st_name")?;
            let symbol = Symbol {
                name: strtab_name(strtab, name_off).unwrap_or("").to_owned(),
                value: read_u32_at(record, 4, "st_value")?,
                size: read_u32_at(record, 8, "st_size")?,
                info: record[12],
                shndx: read_u16_at(record, 14, "st_shndx")?,
            };
            table.push(symbol);
        }

        debug!("symbol table: {} record(s)", table.len());
        Ok(table)
    }

    pub(crate) fn push(&mut self, symbol: Symbol) {
        let index = self.symbols.len();
        if !symbol.name.is_empty() {
            self.by_name.entry(symbol.name.clone()).or_insert(index);
        }
        self.symbols.push(symbol);
    }

    /// All symbols in file record order.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbol record by table index.
    pub fn get(&self, index: usize) -> Option<&Symbol> {
        self.symbols.get(index)
    }

    /// First symbol with the given name, in file order.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_info_accessors() {
        // STB_GLOBAL << 4 | STT_FUNC
        assert_eq!(st_bind(0x12), SymbolBinding::Global);
        assert_eq!(st_type(0x12), SymbolKind::Func);
        assert_eq!(st_bind(0x21), SymbolBinding::Weak);
        assert_eq!(st_type(0x21), SymbolKind::Object);
        assert_eq!(st_bind(0xf0), SymbolBinding::Unknown(15));
        assert_eq!(st_type(0x0f), SymbolKind::Unknown(15));
    }

    #[test]
    fn first_definition_wins() {
        let mut table = SymbolTable::default();
        table.push(Symbol {
            name: "dup".into(),
            value: 0x1000,
            size: 4,
            info: 0x12,
            shndx: 1,
        });
        table.push(Symbol {
            name: "dup".into(),
            value: 0x2000,
            size: 4,
            info: 0x12,
            shndx: 1,
        });

        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("dup").unwrap().value, 0x1000);
        // Record order is preserved for iteration.
        assert_eq!(table.symbols()[1].value, 0x2000);
    }

    #[test]
    fn unnamed_symbols_are_not_mapped() {
        let mut table = SymbolTable::default();
        table.push(Symbol {
            name: String::new(),
            value: 0,
            size: 0,
            info: 0,
            shndx: SHN_UNDEF,
        });
        assert_eq!(table.len(), 1);
        assert!(table.lookup("").is_none());
    }
}
