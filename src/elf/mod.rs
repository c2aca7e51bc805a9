//! ELF (Executable and Linkable Format) data structures and utilities.

mod defs;
mod ehdr;

pub use defs::{ElfDyn, ElfPhdr, ElfRela, ElfShdr, ElfSymbol};
pub(crate) use defs::{E_CLASS, ElfTable, table};
pub use ehdr::ElfHeader;
/// ELF ABI constants and definitions from the elf crate.
pub use elf::abi;
