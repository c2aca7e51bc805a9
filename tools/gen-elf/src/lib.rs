//! `gen-elf` generates small ELF64 images for testing the `elf_ld` loader.
//!
//! Images are laid out in a fixed, predictable way so tests can compute the
//! runtime address of any byte from [`Layout`] alone.

mod arch;
mod common;
mod writer;

pub use arch::Arch;
pub use common::{RawSegment, RelocDesc, RelocTarget, SymbolDesc, SymbolValue};
pub use writer::{ElfOutput, ImageWriter, Layout, PAGE_SIZE, write_segments_only};
