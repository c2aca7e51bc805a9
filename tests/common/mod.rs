#![allow(dead_code)]

use elf_ld::{Loader, LoadedObject, LoaderConfig};
use gen_elf::{Arch, ImageWriter};
use std::fs;
use std::path::{Path, PathBuf};

pub fn arch() -> Arch {
    Arch::host()
}

/// A scratch directory holding generated images, removed on drop.
pub struct Fixture {
    dir: PathBuf,
}

impl Fixture {
    pub fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("elf_ld-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        Self {
            dir: dir.canonicalize().unwrap(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.join(rel)
    }

    pub fn write(&self, rel: &str, writer: &ImageWriter) -> PathBuf {
        let path = self.path(rel);
        writer.write_file(&path).unwrap();
        path
    }

    /// A config whose default library directory is this fixture.
    pub fn config(&self) -> LoaderConfig {
        LoaderConfig::default().with_default_library_path(&self.dir)
    }

    pub fn loader(&self) -> Loader {
        Loader::with_config(self.config())
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

pub fn file_names(loader: &Loader) -> Vec<String> {
    loader
        .objects()
        .iter()
        .map(|object| {
            object
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

pub fn read_u64(object: &LoadedObject, vaddr: u64) -> u64 {
    let bytes = object.read_at(object.base() + vaddr as usize, 8).unwrap();
    u64::from_le_bytes(bytes.try_into().unwrap())
}
