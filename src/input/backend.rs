use crate::{
    Result,
    error::io_error,
    mmap::{MapFlags, Mmap, ProtFlags},
};
use std::{ffi::c_void, fs::File, os::fd::AsRawFd, path::Path, ptr::NonNull};

/// A private, read-only mapping of a whole file.
///
/// The file descriptor is closed as soon as the mapping exists; the mapping
/// itself is released on drop.
pub struct FileMapping {
    memory: NonNull<c_void>,
    len: usize,
    munmap: unsafe fn(NonNull<c_void>, usize) -> Result<()>,
}

impl FileMapping {
    pub(crate) fn new<M: Mmap>(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| io_error("file does not fit in the address space"))?;
        if len == 0 {
            return Err(io_error("file is empty"));
        }
        let memory = unsafe {
            M::mmap(
                None,
                len,
                ProtFlags::PROT_READ,
                MapFlags::MAP_PRIVATE,
                0,
                file.as_raw_fd(),
            )?
        };
        log::debug!("mapped '{}' ({len:#x} bytes) at {:p}", path.display(), memory);
        Ok(Self {
            memory,
            len,
            munmap: M::munmap,
        })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is readable and lives as long as `self`.
        unsafe { core::slice::from_raw_parts(self.memory.as_ptr().cast::<u8>(), self.len) }
    }
}

impl Drop for FileMapping {
    fn drop(&mut self) {
        if let Err(err) = unsafe { (self.munmap)(self.memory, self.len) } {
            log::error!("failed to unmap file image: {err}");
        }
    }
}
