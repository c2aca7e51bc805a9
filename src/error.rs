use std::borrow::Cow;
use std::fmt::{Debug, Display};

/// Error types used throughout the `elf_ld` crate.
/// These errors represent the failure conditions that can occur while
/// parsing, mapping, linking and starting an ELF program.
#[derive(Debug)]
pub enum Error {
    /// An error occurred while opening, inspecting or mapping an ELF file.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// An error occurred during anonymous memory mapping operations.
    ///
    /// This error typically indicates issues such as:
    /// * Failed to reserve memory for an object
    /// * Failed to change memory protection
    /// * An image without any `PT_LOAD` segment
    Mmap {
        /// A descriptive message about the memory mapping error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing the ELF header.
    ///
    /// This error typically indicates issues with the ELF header such as:
    /// * Invalid magic bytes
    /// * Unsupported ELF class or data encoding
    /// * A file shorter than the header itself
    ParseEhdr {
        /// A descriptive message about the ELF header parsing error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing program headers.
    ParsePhdr {
        /// A descriptive message about the program header parsing error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing section headers or a table they describe.
    ParseShdr {
        /// A descriptive message about the section header parsing error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing the dynamic section.
    ///
    /// This error typically indicates issues such as:
    /// * A dynamic entry pointing outside of the file
    /// * A malformed relocation table
    /// * A string offset outside of the string table
    ParseDynamic {
        /// A descriptive message about the dynamic section parsing error.
        msg: Cow<'static, str>,
    },

    /// The image has a dynamic section but no `SHT_DYNSYM` section.
    MissingDynSym,

    /// A `DT_NEEDED` entry (or the root path) could not be found on disk.
    DependencyNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// An error occurred while applying a supported relocation.
    ///
    /// This error typically indicates issues such as:
    /// * A COPY relocation whose symbol is defined by no other object
    /// * A relocation target outside of the object's mapping
    /// * A symbol index outside of the dynamic symbol table
    Relocation {
        /// A descriptive message about the relocation error.
        msg: Cow<'static, str>,
    },

    /// A relocation type this loader does not implement.
    UnsupportedRelocation {
        /// The raw relocation type.
        r_type: u32,
        /// Index of the entry inside the object's relocation table.
        index: usize,
    },
}

impl Display for Error {
    /// Formats the error for display purposes.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::Mmap { msg } => write!(f, "Memory mapping error: {msg}"),
            Error::ParseEhdr { msg } => write!(f, "ELF header parsing error: {msg}"),
            Error::ParsePhdr { msg } => write!(f, "Program header parsing error: {msg}"),
            Error::ParseShdr { msg } => write!(f, "Section header parsing error: {msg}"),
            Error::ParseDynamic { msg } => write!(f, "Dynamic section parsing error: {msg}"),
            Error::MissingDynSym => {
                write!(f, "dynamic section present but no SHT_DYNSYM section")
            }
            Error::DependencyNotFound { name } => write!(f, "cannot find dependency '{name}'"),
            Error::Relocation { msg } => write!(f, "Relocation error: {msg}"),
            Error::UnsupportedRelocation { r_type, index } => write!(
                f,
                "unsupported relocation type {} ({r_type}) at entry {index}",
                crate::arch::rel_type_to_str(*r_type)
            ),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(value: std::io::Error) -> Self {
        Error::Io {
            msg: value.to_string().into(),
        }
    }
}

/// Creates an I/O error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

/// Creates a memory mapping error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn mmap_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Mmap { msg: msg.into() }
}

/// Creates a relocation error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn relocate_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Relocation { msg: msg.into() }
}

/// Creates a dynamic section parsing error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn parse_dynamic_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseDynamic { msg: msg.into() }
}

/// Creates an ELF header parsing error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn parse_ehdr_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseEhdr { msg: msg.into() }
}

/// Creates a program header parsing error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn parse_phdr_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParsePhdr { msg: msg.into() }
}

/// Creates a section header parsing error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn parse_shdr_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseShdr { msg: msg.into() }
}

/// The loader stage a failure happened in.
///
/// The command line front-end turns the stage into the process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Dependency discovery, parsing and mapping.
    Resolve,
    /// The global relocation pass.
    Relocate,
    /// Final segment protections.
    Protect,
}

impl Stage {
    /// Exit code reported by the `elf-ld` binary when this stage fails.
    ///
    /// The relocation and protection passes report their status of `-1`
    /// unchanged, which the process sees as 255.
    pub const fn exit_code(self) -> i32 {
        match self {
            Stage::Resolve => 2,
            Stage::Relocate | Stage::Protect => 255,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Resolve => "dependency resolution",
            Stage::Relocate => "relocation",
            Stage::Protect => "permission adjustment",
        })
    }
}
