//! # elf_ld
//! A minimal userspace loader for 64-bit little-endian ELF programs.
//! ## Usage
//! [`Loader`] resolves a program and its `DT_NEEDED` dependencies
//! breadth-first, maps every object into its own anonymous region, applies
//! `NONE`, absolute 64-bit, `COPY` and `RELATIVE` relocations, gives each
//! segment its final protection and calls the program's entry point.
//! ## Example
//! ```no_run
//! use elf_ld::Loader;
//!
//! let mut loader = Loader::new();
//! loader.load_object_and_dependencies("./hello").unwrap();
//! loader.apply_relocations().unwrap();
//! loader.adjust_permissions().unwrap();
//! let code = unsafe { loader.run() };
//! ```
pub mod arch;
mod config;
pub mod elf;
mod error;
pub mod image;
pub mod input;
mod loader;
pub mod mmap;
pub mod object;
mod os;
pub mod relocation;
pub mod segment;

pub use config::LoaderConfig;
pub use error::{Error, Stage};
pub use image::{ConvexHull, ElfImage, LoadSegment, ParseNote, StrTabLookup};
pub use input::ElfSource;
pub use loader::Loader;
pub use object::{CopyStrategy, LoadedObject};

pub type Result<T> = core::result::Result<T, Error>;
