//! Flat byte-addressable target memory.
//!
//! Stands in for the emulator's simulated address space: segment mapping
//! copies into it, relocations patch words inside it. The loader treats it
//! as already resident; no operation here blocks on I/O.

use crate::error::LoaderError;
use serde::{Deserialize, Serialize};

/// Default target memory size: 16 MB
pub const DEFAULT_MEM_SIZE: usize = 16 * 1024 * 1024;

/// Target memory for the mapped image.
#[derive(Clone, Serialize, Deserialize)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create a new memory with the given size in bytes.
    pub fn new(size: usize) -> Self {
        Self { data: vec![0; size] }
    }

    /// Create memory with default size.
    pub fn with_default_size() -> Self {
        Self::new(DEFAULT_MEM_SIZE)
    }

    /// Get the memory size.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<(), LoaderError> {
        let ok = (addr as usize)
            .checked_add(len)
            .map_or(false, |end| end <= self.data.len());
        if ok {
            Ok(())
        } else {
            Err(LoaderError::AllocationFailure {
                vaddr: addr,
                size: u32::try_from(len).unwrap_or(u32::MAX),
            })
        }
    }

    /// Copy a region into memory starting at the given address.
    pub fn load_region(&mut self, addr: u32, bytes: &[u8]) -> Result<(), LoaderError> {
        self.check_range(addr, bytes.len())?;
        let start = addr as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Zero a region of memory.
    pub fn zero_fill(&mut self, addr: u32, len: usize) -> Result<(), LoaderError> {
        self.check_range(addr, len)?;
        let start = addr as usize;
        self.data[start..start + len].fill(0);
        Ok(())
    }

    /// Read a word (32-bit, little-endian) from memory.
    ///
    /// Relocation targets are not required to be aligned, so no alignment
    /// check is made here.
    #[inline]
    pub fn read_u32(&self, addr: u32) -> Result<u32, LoaderError> {
        self.check_range(addr, 4)?;
        let idx = addr as usize;
        Ok(u32::from_le_bytes([
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]))
    }

    /// Write a word (32-bit, little-endian) to memory.
    #[inline]
    pub fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), LoaderError> {
        self.check_range(addr, 4)?;
        let idx = addr as usize;
        self.data[idx..idx + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// Read a byte from memory.
    #[inline]
    pub fn read_u8(&self, addr: u32) -> Result<u8, LoaderError> {
        self.check_range(addr, 1)?;
        Ok(self.data[addr as usize])
    }

    /// Get a slice of memory for inspection.
    pub fn slice(&self, start: u32, len: usize) -> Option<&[u8]> {
        let s = start as usize;
        if s.checked_add(len)? <= self.data.len() {
            Some(&self.data[s..s + len])
        } else {
            None
        }
    }

    /// Check whether an address range fits in memory. Takes the length as
    /// `usize` so a range wider than the 32-bit space cannot pass through
    /// truncation.
    pub fn is_valid_range(&self, start: u32, len: usize) -> bool {
        self.check_range(start, len).is_ok()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::with_default_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_u32() {
        let mut mem = Memory::new(1024);
        mem.write_u32(0x100, 0xDEADBEEF).unwrap();
        assert_eq!(mem.read_u32(0x100).unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn unaligned_word_is_allowed() {
        let mut mem = Memory::new(1024);
        mem.write_u32(0x101, 0x11223344).unwrap();
        assert_eq!(mem.read_u32(0x101).unwrap(), 0x11223344);
    }

    #[test]
    fn out_of_range_is_allocation_failure() {
        let mut mem = Memory::new(16);
        let err = mem.load_region(8, &[0u8; 12]).unwrap_err();
        assert!(matches!(err, LoaderError::AllocationFailure { vaddr: 8, .. }));
    }

    #[test]
    fn range_wider_than_u32_is_invalid() {
        let mem = Memory::new(0x10000);
        assert!(mem.is_valid_range(0, 0x10000));
        assert!(!mem.is_valid_range(0xffc, (u32::MAX as usize) + 2));
    }

    #[test]
    fn zero_fill_clears() {
        let mut mem = Memory::new(64);
        mem.load_region(0, &[0xff; 64]).unwrap();
        mem.zero_fill(16, 32).unwrap();
        assert_eq!(mem.read_u8(15).unwrap(), 0xff);
        assert_eq!(mem.read_u8(16).unwrap(), 0);
        assert_eq!(mem.read_u8(47).unwrap(), 0);
        assert_eq!(mem.read_u8(48).unwrap(), 0xff);
    }
}
