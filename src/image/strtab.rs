//! Locating the dynamic string table.
//!
//! Several equally plausible places describe where `.dynstr` lives. The
//! loader historically takes the section header that directly follows
//! `SHT_DYNSYM`, which holds for the usual linker output but is not
//! guaranteed by the format. The lookup is therefore a trait so a stricter
//! strategy can be swapped in.

use super::{LoadSegment, vaddr_to_offset};
use crate::elf::ElfShdr;
use core::ops::Range;

/// Everything a [`StrTabLocator`] may look at.
pub struct StrTabContext<'a> {
    /// All section headers, in table order.
    pub shdrs: &'a [ElfShdr],
    /// Index of the `SHT_DYNSYM` header inside `shdrs`.
    pub dynsym_index: usize,
    /// `DT_STRTAB`, an on-disk virtual address.
    pub strtab_addr: Option<usize>,
    /// `DT_STRSZ`.
    pub strtab_size: Option<usize>,
    /// The image's `PT_LOAD` segments.
    pub segments: &'a [LoadSegment],
}

/// The byte range of a section's contents inside the file.
fn file_range(shdr: &ElfShdr) -> Option<Range<usize>> {
    let start = usize::try_from(shdr.sh_offset).ok()?;
    let len = usize::try_from(shdr.sh_size).ok()?;
    Some(start..start.checked_add(len)?)
}

/// Strategy returning the file byte range of the dynamic string table.
pub trait StrTabLocator {
    fn locate(&self, ctx: &StrTabContext<'_>) -> Option<Range<usize>>;
}

/// The section header right after `SHT_DYNSYM`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SectionAdjacency;

impl StrTabLocator for SectionAdjacency {
    fn locate(&self, ctx: &StrTabContext<'_>) -> Option<Range<usize>> {
        file_range(ctx.shdrs.get(ctx.dynsym_index.checked_add(1)?)?)
    }
}

/// The section named by `sh_link` of the `SHT_DYNSYM` header.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkedSection;

impl StrTabLocator for LinkedSection {
    fn locate(&self, ctx: &StrTabContext<'_>) -> Option<Range<usize>> {
        let dynsym = ctx.shdrs.get(ctx.dynsym_index)?;
        file_range(ctx.shdrs.get(dynsym.sh_link as usize)?)
    }
}

/// `DT_STRTAB`/`DT_STRSZ`, translated from a virtual address to a file offset.
#[derive(Clone, Copy, Debug, Default)]
pub struct DynamicTag;

impl StrTabLocator for DynamicTag {
    fn locate(&self, ctx: &StrTabContext<'_>) -> Option<Range<usize>> {
        let start = vaddr_to_offset(ctx.segments, ctx.strtab_addr?);
        Some(start..start.checked_add(ctx.strtab_size?)?)
    }
}

/// The built-in lookups, selectable from [`crate::LoaderConfig`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StrTabLookup {
    /// See [`SectionAdjacency`].
    #[default]
    SectionAdjacency,
    /// See [`LinkedSection`].
    LinkedSection,
    /// See [`DynamicTag`].
    DynamicTag,
}

impl StrTabLocator for StrTabLookup {
    fn locate(&self, ctx: &StrTabContext<'_>) -> Option<Range<usize>> {
        match self {
            StrTabLookup::SectionAdjacency => SectionAdjacency.locate(ctx),
            StrTabLookup::LinkedSection => LinkedSection.locate(ctx),
            StrTabLookup::DynamicTag => DynamicTag.locate(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmap::ProtFlags;

    fn shdr(sh_offset: u64, sh_size: u64, sh_link: u32) -> ElfShdr {
        ElfShdr {
            sh_name: 0,
            sh_type: 0,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset,
            sh_size,
            sh_link,
            sh_info: 0,
            sh_addralign: 0,
            sh_entsize: 0,
        }
    }

    #[test]
    fn lookups_disagree_when_dynstr_is_not_adjacent() {
        // [null, dynsym(link=3), other, dynstr]
        let shdrs = [
            shdr(0, 0, 0),
            shdr(0x100, 0x30, 3),
            shdr(0x200, 0x10, 0),
            shdr(0x300, 0x20, 0),
        ];
        let segments = [LoadSegment {
            prot: ProtFlags::PROT_READ,
            vaddr: 0x1000,
            memsz: 0x1000,
            offset: 0,
            filesz: 0x1000,
        }];
        let ctx = StrTabContext {
            shdrs: &shdrs,
            dynsym_index: 1,
            strtab_addr: Some(0x1300),
            strtab_size: Some(0x20),
            segments: &segments,
        };
        assert_eq!(SectionAdjacency.locate(&ctx), Some(0x200..0x210));
        assert_eq!(LinkedSection.locate(&ctx), Some(0x300..0x320));
        assert_eq!(DynamicTag.locate(&ctx), Some(0x300..0x320));
        assert_eq!(StrTabLookup::default().locate(&ctx), Some(0x200..0x210));
    }

    #[test]
    fn adjacency_past_the_table() {
        let shdrs = [shdr(0, 0, 0), shdr(0x100, 0x30, 0)];
        let ctx = StrTabContext {
            shdrs: &shdrs,
            dynsym_index: 1,
            strtab_addr: Some(0x100),
            strtab_size: None,
            segments: &[],
        };
        assert_eq!(SectionAdjacency.locate(&ctx), None);
        assert_eq!(DynamicTag.locate(&ctx), None);
    }
}
