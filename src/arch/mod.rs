//! Architectures supported by the loader.
//!
//! Each architecture module exports the relocation type numbers the
//! relocation engine dispatches on, the machine id checked against the ELF
//! header and the default library directory the search path is seeded with.
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")]{
        mod x86_64;
        pub use x86_64::*;
    }else if #[cfg(target_arch="aarch64")]{
        mod aarch64;
        pub use aarch64::*;
    }else {
        compile_error!("unsupport arch");
    }
}

pub const REL_NONE: u32 = 0;
