//! Mapping a parsed image into memory
//!
//! A [`LoadedObject`] owns one [`ElfImage`] and one [`MappedZone`] large
//! enough for the image's convex hull. Every on-disk virtual address `v` of
//! the image lives at `base() + v` at runtime.

use crate::{
    Result,
    elf::{ElfRela, ElfSymbol},
    error::{mmap_error, parse_phdr_error, relocate_error},
    image::{ConvexHull, ElfImage, LoadSegment},
    mmap::{DefaultMmap, Mmap},
    segment::{MappedZone, page_align_down},
};
use delegate::delegate;
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

/// How file contents are placed into an object's mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Copy each `PT_LOAD` segment's `p_filesz` bytes from its own file
    /// offset to `base + p_vaddr`; the rest of `p_memsz` stays zeroed.
    #[default]
    PerSegment,
    /// Copy the file verbatim from offset 0 to `base + hull.low`, for as many
    /// bytes as the hull is long. Only correct when every segment's file
    /// offset equals its virtual address minus the hull's low bound.
    WholeImage,
}

/// An image mapped at its final address, ready for relocation.
pub struct LoadedObject {
    path: PathBuf,
    image: ElfImage,
    hull: ConvexHull,
    zone: MappedZone,
}

impl Debug for LoadedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedObject")
            .field("path", &self.path)
            .field("base", &format_args!("{:#x}", self.base()))
            .field("hull", &self.hull)
            .field("needed", &self.image.needed())
            .finish()
    }
}

impl LoadedObject {
    /// Maps `image` with the default backend.
    pub fn load(path: impl Into<PathBuf>, image: ElfImage, strategy: CopyStrategy) -> Result<Self> {
        Self::load_with::<DefaultMmap>(path, image, strategy)
    }

    /// Allocates the hull-sized mapping through `M` and fills it from the image.
    pub fn load_with<M: Mmap>(
        path: impl Into<PathBuf>,
        image: ElfImage,
        strategy: CopyStrategy,
    ) -> Result<Self> {
        let path = path.into();
        let hull = image
            .convex_hull()
            .filter(|hull| !hull.is_empty())
            .ok_or_else(|| {
                mmap_error(format!("'{}' has nothing to map", path.display()))
            })?;
        let zone = MappedZone::new::<M>(hull.high - page_align_down(hull.low))?;
        let mut object = LoadedObject {
            path,
            image,
            hull,
            zone,
        };
        match strategy {
            CopyStrategy::PerSegment => object.copy_segments()?,
            CopyStrategy::WholeImage => object.copy_whole_image()?,
        }
        log::info!(
            "mapped '{}' at {:#x} (hull {:#x}..{:#x}, base {:#x})",
            object.path.display(),
            object.zone.addr(),
            hull.low,
            hull.high,
            object.base()
        );
        Ok(object)
    }

    fn zone_offset(&self, vaddr: usize) -> usize {
        vaddr - page_align_down(self.hull.low)
    }

    fn copy_segments(&mut self) -> Result<()> {
        for idx in 0..self.image.segments().len() {
            let seg = self.image.segments()[idx];
            let len = seg.filesz.min(seg.memsz);
            if len == 0 {
                continue;
            }
            let dest = self.zone_offset(seg.vaddr);
            let src = seg
                .offset
                .checked_add(len)
                .and_then(|end| self.image.bytes().get(seg.offset..end))
                .ok_or_else(|| {
                    parse_phdr_error(format!(
                        "segment at {:#x} reads {len:#x} bytes past the end of the file",
                        seg.vaddr
                    ))
                })?;
            self.zone.write(dest, src)?;
        }
        Ok(())
    }

    fn copy_whole_image(&mut self) -> Result<()> {
        let len = self.hull.len().min(self.image.bytes().len());
        let dest = self.zone_offset(self.hull.low);
        self.zone.write(dest, &self.image.bytes()[..len])
    }

    /// The resolved path the object was loaded from.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory containing the object, the value `$ORIGIN` expands to.
    #[inline]
    pub fn origin(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    #[inline]
    pub fn image(&self) -> &ElfImage {
        &self.image
    }

    #[inline]
    pub fn hull(&self) -> ConvexHull {
        self.hull
    }

    #[inline]
    pub fn zone(&self) -> &MappedZone {
        &self.zone
    }

    /// The load bias: runtime address minus on-disk virtual address.
    ///
    /// Computed as the mapping address minus the hull's low bound rounded
    /// down to a page. When `hull.low` is not page aligned this differs from
    /// `mapping - hull.low`, because the mapping starts at the page holding
    /// `hull.low`.
    #[inline]
    pub fn base(&self) -> usize {
        self.zone.addr().wrapping_sub(page_align_down(self.hull.low))
    }

    /// Runtime address of the entry point.
    #[inline]
    pub fn entry_point(&self) -> usize {
        self.base().wrapping_add(self.image.entry())
    }

    delegate! {
        to self.image {
            /// RELA entries in table order.
            pub fn relocations(&self) -> &[ElfRela];
            /// `DT_NEEDED` names in tag order.
            pub fn needed(&self) -> &[String];
            /// Raw `DT_RPATH`/`DT_RUNPATH` components.
            pub fn run_paths(&self) -> &[String];
            /// The dynamic symbol table.
            pub fn symbols(&self) -> &[ElfSymbol];
            pub fn symbol(&self, index: usize) -> Option<&ElfSymbol>;
            /// Resolves a symbol name through this object's own string table.
            pub fn symbol_name(&self, index: usize) -> Result<&str>;
            pub fn segments(&self) -> &[LoadSegment];
        }
    }

    /// Runtime address of the dynamic symbol at `index`.
    pub fn symbol_address(&self, index: usize) -> Result<usize> {
        let sym = self.symbol(index).ok_or_else(|| {
            relocate_error(format!(
                "{}: symbol index {index} out of range",
                self.path.display()
            ))
        })?;
        Ok(self.base().wrapping_add(sym.st_value as usize))
    }

    /// First dynamic symbol whose name equals `name`.
    pub fn find_symbol(&self, name: &str) -> Option<&ElfSymbol> {
        self.symbols()
            .iter()
            .find(|sym| self.image.dynstr(sym.st_name as usize).is_ok_and(|s| s == name))
    }

    /// Reads `len` bytes at runtime address `addr`.
    pub fn read_at(&self, addr: usize, len: usize) -> Result<&[u8]> {
        let bytes = self
            .zone
            .as_slice()
            .ok_or_else(|| relocate_error("object memory is sealed"))?;
        if !self.zone.contains(addr, len) {
            return Err(relocate_error(format!(
                "{}: read of {len:#x} bytes at {addr:#x} leaves the mapping",
                self.path.display()
            )));
        }
        let start = addr - self.zone.addr();
        Ok(&bytes[start..start + len])
    }

    /// Writes `bytes` at runtime address `addr`.
    pub fn write_at(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        if !self.zone.contains(addr, bytes.len()) {
            return Err(relocate_error(format!(
                "{}: write of {:#x} bytes at {addr:#x} leaves the mapping",
                self.path.display(),
                bytes.len()
            )));
        }
        let offset = addr - self.zone.addr();
        self.zone.write(offset, bytes)
    }

    /// Applies every `PT_LOAD` segment's own protection to its pages.
    ///
    /// Must run after all relocations targeting this object, since those
    /// need write access.
    pub fn set_final_protections(&mut self) -> Result<()> {
        let base = self.base();
        for idx in 0..self.image.segments().len() {
            let seg = self.image.segments()[idx];
            if seg.memsz == 0 {
                continue;
            }
            let start = base.wrapping_add(seg.vaddr);
            log::info!(
                "Setting prot @ {:#x}...{:#x} | {}",
                start,
                start.wrapping_add(seg.memsz),
                seg.prot
            );
            self.zone.protect_range(start, seg.memsz, seg.prot)?;
        }
        Ok(())
    }
}
