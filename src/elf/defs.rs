//! ELF64 structure definitions.
//!
//! Tables are decoded with the `elf` crate's bounds-checked parsers; the
//! types here are its native representations, plus a thin accessor wrapper
//! for relocation entries.

use elf::{
    ParseError,
    endian::LittleEndian,
    file::Class,
    parse::{ParseAt, ParsingTable},
    relocation::Rela,
};

pub(crate) const E_CLASS: Class = Class::ELF64;

/// ELF64 program header.
pub type ElfPhdr = elf::segment::ProgramHeader;
/// ELF64 section header.
pub type ElfShdr = elf::section::SectionHeader;
/// ELF64 symbol table entry.
pub type ElfSymbol = elf::symbol::Symbol;
/// ELF64 dynamic section entry.
pub type ElfDyn = elf::dynamic::Dyn;

/// A little-endian ELF64 table of `P` over borrowed file bytes.
pub(crate) type ElfTable<'data, P> = ParsingTable<'data, LittleEndian, P>;

/// Wraps `data` as a table of `P`, checking a non-zero `entsize` against the
/// ELF64 layout of `P`.
pub(crate) fn table<'data, P: ParseAt>(
    data: &'data [u8],
    entsize: u64,
) -> Result<ElfTable<'data, P>, ParseError> {
    if entsize != 0 {
        P::validate_entsize(E_CLASS, usize::try_from(entsize)?)?;
    }
    Ok(ElfTable::new(LittleEndian, E_CLASS, data))
}

/// ELF64 RELA relocation entry.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfRela {
    rela: Rela,
}

impl From<Rela> for ElfRela {
    fn from(rela: Rela) -> Self {
        Self { rela }
    }
}

impl ElfRela {
    /// Returns the relocation type.
    #[inline]
    pub fn r_type(&self) -> u32 {
        self.rela.r_type
    }

    /// Returns the symbol index.
    #[inline]
    pub fn r_symbol(&self) -> usize {
        self.rela.r_sym as usize
    }

    /// Returns the relocation offset.
    #[inline]
    pub fn r_offset(&self) -> usize {
        self.rela.r_offset as usize
    }

    /// Returns the relocation addend.
    #[inline]
    pub fn r_addend(&self) -> isize {
        self.rela.r_addend as isize
    }
}
