//! The memory mapping backing one loaded object
use crate::{
    Result,
    error::mmap_error,
    mmap::{MapFlags, Mmap, ProtFlags},
};
use std::{ffi::c_void, fmt::Debug, ptr::NonNull};

pub const PAGE_SIZE: usize = 0x1000;
pub const MASK: usize = !(PAGE_SIZE - 1);

#[inline]
pub const fn page_align_down(addr: usize) -> usize {
    addr & MASK
}

/// Rounds `addr` up to a page boundary, `None` past the end of the address space.
#[inline]
pub const fn page_align_up(addr: usize) -> Option<usize> {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(addr) => Some(addr & MASK),
        None => None,
    }
}

/// One anonymous private mapping.
///
/// A `MappedZone` is the only owner of its range: it cannot be cloned, moving
/// it moves ownership and dropping it unmaps the range. Contents can be
/// written until the first protection change seals the zone.
pub struct MappedZone {
    memory: NonNull<c_void>,
    len: usize,
    prot: ProtFlags,
    sealed: bool,
    munmap: unsafe fn(NonNull<c_void>, usize) -> Result<()>,
    mprotect: unsafe fn(NonNull<c_void>, usize, ProtFlags) -> Result<()>,
}

impl Debug for MappedZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedZone")
            .field("memory", &self.memory)
            .field("len", &self.len)
            .field("prot", &self.prot)
            .finish()
    }
}

impl Drop for MappedZone {
    fn drop(&mut self) {
        if let Err(err) = unsafe { (self.munmap)(self.memory, self.len) } {
            log::error!("failed to unmap zone at {:p}: {err}", self.memory);
        }
    }
}

impl MappedZone {
    /// Maps `len` bytes (rounded up to whole pages) of zeroed read-write memory
    /// at an address chosen by the OS.
    pub fn new<M: Mmap>(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(mmap_error("cannot map an empty zone"));
        }
        let len = page_align_up(len)
            .ok_or_else(|| mmap_error(format!("zone of {len:#x} bytes does not fit in memory")))?;
        let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE;
        let memory = unsafe { M::mmap_anonymous(None, len, prot, MapFlags::MAP_PRIVATE)? };
        Ok(MappedZone {
            memory,
            len,
            prot,
            sealed: false,
            munmap: M::munmap,
            mprotect: M::mprotect,
        })
    }

    /// Start address of the mapping.
    #[inline]
    pub fn addr(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    /// Length of the mapping in bytes, always a multiple of [`PAGE_SIZE`].
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Protection last applied to the whole zone.
    #[inline]
    pub fn prot(&self) -> ProtFlags {
        self.prot
    }

    /// Whether a protection change has been applied.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether `[addr, addr + len)` lies inside the mapping.
    #[inline]
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        addr >= self.addr()
            && addr
                .checked_add(len)
                .is_some_and(|end| end <= self.addr() + self.len)
    }

    /// Copies `bytes` to `offset` bytes past the start of the zone.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        if self.sealed {
            return Err(mmap_error("zone is no longer writable"));
        }
        if offset.checked_add(bytes.len()).is_none_or(|end| end > self.len) {
            return Err(mmap_error(format!(
                "write of {:#x} bytes at offset {offset:#x} overflows a {:#x} byte zone",
                bytes.len(),
                self.len
            )));
        }
        // SAFETY: bounds checked above; the zone is mapped read-write and owned by `self`.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.memory.as_ptr().cast::<u8>().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// The zone's contents.
    ///
    /// Returns `None` once the zone has been sealed, since parts of it may no
    /// longer be readable.
    pub fn as_slice(&self) -> Option<&[u8]> {
        if self.sealed {
            return None;
        }
        // SAFETY: the zone is mapped read-write until sealed.
        Some(unsafe { core::slice::from_raw_parts(self.memory.as_ptr().cast::<u8>(), self.len) })
    }

    /// Changes the protection of the pages covering `[addr, addr + len)`.
    ///
    /// The range is widened to page boundaries and must stay inside the zone.
    pub fn protect_range(&mut self, addr: usize, len: usize, prot: ProtFlags) -> Result<()> {
        let start = page_align_down(addr);
        let end = addr.checked_add(len).and_then(page_align_up).ok_or_else(|| {
            mmap_error(format!("protect range of {len:#x} bytes at {addr:#x} overflows"))
        })?;
        if !self.contains(start, end - start) {
            return Err(mmap_error(format!(
                "protect range {start:#x}..{end:#x} outside zone {:#x}..{:#x}",
                self.addr(),
                self.addr() + self.len
            )));
        }
        let ptr = NonNull::new(start as *mut c_void)
            .ok_or_else(|| mmap_error("protect range starts at null"))?;
        unsafe { (self.mprotect)(ptr, end - start, prot)? };
        self.sealed = true;
        Ok(())
    }
}
