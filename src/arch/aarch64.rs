//! AArch64 relocation numbers and platform defaults.

use elf::abi::*;

/// The ELF machine type for AArch64 architecture.
pub const EM_ARCH: u16 = EM_AARCH64;

/// Symbolic relocation type - absolute 64-bit address.
pub const REL_SYMBOLIC: u32 = R_AARCH64_ABS64;
/// COPY relocation type - copy data from another object.
pub const REL_COPY: u32 = R_AARCH64_COPY;
/// Relative relocation type - add base address to the addend.
pub const REL_RELATIVE: u32 = R_AARCH64_RELATIVE;

/// Directory the library search path starts with.
pub const DEFAULT_LIBRARY_PATH: &str = "/usr/lib/aarch64-linux-gnu/";

pub(crate) fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        0 => "R_AARCH64_NONE",
        R_AARCH64_ABS64 => "R_AARCH64_ABS64",
        R_AARCH64_COPY => "R_AARCH64_COPY",
        R_AARCH64_GLOB_DAT => "R_AARCH64_GLOB_DAT",
        R_AARCH64_JUMP_SLOT => "R_AARCH64_JUMP_SLOT",
        R_AARCH64_RELATIVE => "R_AARCH64_RELATIVE",
        R_AARCH64_IRELATIVE => "R_AARCH64_IRELATIVE",
        _ => "UNKNOWN",
    }
}
