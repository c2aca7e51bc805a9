//! x86-64 relocation numbers and platform defaults.

use elf::abi::*;

/// The ELF machine type for x86-64 architecture.
pub const EM_ARCH: u16 = EM_X86_64;

/// Symbolic relocation type - absolute 64-bit address.
pub const REL_SYMBOLIC: u32 = R_X86_64_64;
/// COPY relocation type - copy data from another object.
pub const REL_COPY: u32 = R_X86_64_COPY;
/// Relative relocation type - add base address to the addend.
pub const REL_RELATIVE: u32 = R_X86_64_RELATIVE;

/// Directory the library search path starts with.
pub const DEFAULT_LIBRARY_PATH: &str = "/usr/lib/x86_64-linux-gnu/";

pub(crate) fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        R_X86_64_NONE => "R_X86_64_NONE",
        R_X86_64_64 => "R_X86_64_64",
        R_X86_64_PC32 => "R_X86_64_PC32",
        R_X86_64_GOT32 => "R_X86_64_GOT32",
        R_X86_64_PLT32 => "R_X86_64_PLT32",
        R_X86_64_COPY => "R_X86_64_COPY",
        R_X86_64_GLOB_DAT => "R_X86_64_GLOB_DAT",
        R_X86_64_JUMP_SLOT => "R_X86_64_JUMP_SLOT",
        R_X86_64_RELATIVE => "R_X86_64_RELATIVE",
        R_X86_64_GOTPCREL => "R_X86_64_GOTPCREL",
        R_X86_64_32 => "R_X86_64_32",
        R_X86_64_32S => "R_X86_64_32S",
        R_X86_64_IRELATIVE => "R_X86_64_IRELATIVE",
        _ => "UNKNOWN",
    }
}
