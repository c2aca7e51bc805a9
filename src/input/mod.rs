//! Sources of ELF bytes
//!
//! An [`ElfSource`] holds the complete contents of one ELF file, either as a
//! private read-only mapping of the file on disk or as an owned buffer for
//! images that already live in memory.

pub use backend::FileMapping;

mod backend;

use crate::{
    Result,
    error::io_error,
    mmap::{DefaultMmap, Mmap},
};
use std::{fmt::Debug, path::Path};

enum SourceData {
    Mapped(FileMapping),
    Owned(Box<[u8]>),
}

/// The bytes of one ELF file plus the name it was opened under.
pub struct ElfSource {
    name: String,
    data: SourceData,
}

impl Debug for ElfSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElfSource")
            .field("name", &self.name)
            .field("len", &self.bytes().len())
            .field("mapped", &matches!(self.data, SourceData::Mapped(_)))
            .finish()
    }
}

impl ElfSource {
    /// Maps the whole file at `path` read-only.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path_with::<DefaultMmap>(path)
    }

    /// Maps the whole file at `path` read-only through the given backend.
    pub fn from_path_with<M: Mmap>(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mapping = FileMapping::new::<M>(path).map_err(|err| {
            io_error(format!("cannot map '{}': {err}", path.display()))
        })?;
        Ok(Self {
            name: path.display().to_string(),
            data: SourceData::Mapped(mapping),
        })
    }

    /// Wraps an in-memory image.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: SourceData::Owned(bytes.into()),
        }
    }

    /// The name or path of the image.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The complete file contents.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            SourceData::Mapped(mapping) => mapping.as_slice(),
            SourceData::Owned(bytes) => bytes,
        }
    }
}
