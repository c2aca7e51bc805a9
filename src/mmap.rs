//! Memory mapping operations for the loader
//!
//! This module provides the trait and flag types for the memory mapping
//! operations the loader needs: mapping whole files read-only, allocating the
//! anonymous region an object is copied into, changing protections once
//! relocation is done and releasing everything on drop.
//!
//! # Safety
//! Memory mapping involves direct manipulation of the process's address space.
//! Incorrect usage can cause crashes, data corruption, or security issues.

pub use crate::os::DefaultMmap;

use crate::Result;
use bitflags::bitflags;
use elf::abi::{PF_R, PF_W, PF_X};
use std::{
    ffi::{c_int, c_void},
    fmt::Display,
    ptr::NonNull,
};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Memory protection flags for controlling access permissions.
    pub struct ProtFlags: c_int {
        /// No access allowed.
        const PROT_NONE = 0;

        /// Allow reading from the memory region.
        const PROT_READ = 1;

        /// Allow writing to the memory region.
        const PROT_WRITE = 2;

        /// Allow executing code in the memory region.
        const PROT_EXEC = 4;
    }
}

impl ProtFlags {
    /// Converts the `p_flags` of a program header into mapping protections.
    #[inline]
    pub fn from_segment_flags(p_flags: u32) -> Self {
        ProtFlags::from_bits_retain(
            ((p_flags & PF_X) << 2 | p_flags & PF_W | (p_flags & PF_R) >> 2) as _,
        )
    }
}

impl Display for ProtFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flag = |set: ProtFlags, c: char| if self.contains(set) { c } else { '.' };
        write!(
            f,
            "{}{}{}",
            flag(ProtFlags::PROT_READ, 'R'),
            flag(ProtFlags::PROT_WRITE, 'W'),
            flag(ProtFlags::PROT_EXEC, 'X')
        )
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug)]
    /// Memory mapping configuration flags.
    pub struct MapFlags: c_int {
        /// Create a private copy-on-write mapping.
        const MAP_PRIVATE = 2;

        /// Create an anonymous mapping not backed by any file.
        const MAP_ANONYMOUS = 32;
    }
}

/// A trait for low-level memory mapping operations.
///
/// The loader never calls the OS directly; every mapping it creates or
/// changes goes through an implementation of this trait, [`DefaultMmap`] by
/// default.
///
/// # Safety
/// All methods are unsafe because they manipulate the process's virtual address space.
pub trait Mmap {
    /// Maps `len` bytes of the file behind `fd`, starting at `offset`.
    ///
    /// # Safety
    /// `fd` must be a valid, open file descriptor and `offset` page-aligned.
    unsafe fn mmap(
        addr: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
        offset: usize,
        fd: i32,
    ) -> Result<NonNull<c_void>>;

    /// Creates an anonymous, zero-filled memory mapping.
    ///
    /// # Arguments
    /// * `addr` - Preferred starting address (page-aligned). `None` lets the system choose.
    /// * `len` - Size of the mapping in bytes.
    /// * `prot` - Initial memory protection flags.
    /// * `flags` - Mapping configuration flags.
    ///
    /// # Safety
    /// Manipulates address space. Ensure `addr` is valid and page-aligned if specified.
    unsafe fn mmap_anonymous(
        addr: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<NonNull<c_void>>;

    /// Unmaps a memory region, releasing the associated resources.
    ///
    /// # Safety
    /// Ensure `addr` and `len` match the original mapping. Do not access the region after unmapping.
    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()>;

    /// Changes the protection of a memory region.
    ///
    /// # Safety
    /// `addr` must be page-aligned and the range must belong to a live mapping.
    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_flags_translate_to_prot() {
        assert_eq!(
            ProtFlags::from_segment_flags(PF_R | PF_X),
            ProtFlags::PROT_READ | ProtFlags::PROT_EXEC
        );
        assert_eq!(
            ProtFlags::from_segment_flags(PF_R | PF_W),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        );
        assert_eq!(ProtFlags::from_segment_flags(0), ProtFlags::PROT_NONE);
    }

    #[test]
    fn prot_display() {
        assert_eq!(
            (ProtFlags::PROT_READ | ProtFlags::PROT_EXEC).to_string(),
            "R.X"
        );
        assert_eq!(ProtFlags::PROT_NONE.to_string(), "...");
    }
}
