cfg_if::cfg_if! {
    if #[cfg(unix)]{
        pub(crate) mod unix;
        pub use unix::*;
    }else {
        compile_error!("elf_ld only runs on unix hosts");
    }
}
