//! Loader errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// A fixed header field failed validation. Names the offending field.
    #[error("bad {field}: {detail}")]
    Format { field: &'static str, detail: String },

    /// A declared structure extends past the end of the file buffer.
    #[error("{what} out of bounds: offset {offset:#x} in a {len}-byte file")]
    Truncated {
        what: &'static str,
        offset: usize,
        len: usize,
    },

    /// A loadable segment's file range does not fit in the source buffer.
    #[error("segment {index} at vaddr {vaddr:#010x}: file range exceeds buffer")]
    SegmentOutOfBounds { index: usize, vaddr: u32 },

    /// No symbol table / string table pair exists in the image.
    ///
    /// Non-fatal for the overall load: the image runs without symbolic names.
    #[error("image has no symbol table section")]
    MissingSymbolTable,

    /// A relocation referenced a symbol index that is out of range, or an
    /// undefined non-weak symbol.
    #[error("relocation against undefined symbol {index} ({name})")]
    UndefinedSymbol { index: u32, name: String },

    /// A relocation entry carried a type code outside the supported set.
    #[error("unsupported relocation type {code} at {offset:#010x}")]
    UnsupportedRelocation { code: u8, offset: u32 },

    /// The target memory region for a write could not be reserved.
    #[error("cannot reserve {size:#x} bytes of target memory at {vaddr:#010x}")]
    AllocationFailure { vaddr: u32, size: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
