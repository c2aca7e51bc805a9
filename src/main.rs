use clap::{CommandFactory, Parser};
use elf_ld::{Loader, Stage};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

/// Load an ELF program with its shared dependencies and run it.
#[derive(Parser, Debug)]
#[command(name = "elf-ld", version)]
struct Cli {
    /// Program to load.
    program: Option<PathBuf>,
}

fn fail(stage: Stage, program: &Path, err: elf_ld::Error) -> ExitCode {
    log::error!("{}: {} failed: {}", program.display(), stage, err);
    ExitCode::from(stage.exit_code() as u8)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Some(program) = cli.program else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    let mut loader = Loader::new();
    if let Err(err) = loader.load_object_and_dependencies(&program) {
        return fail(Stage::Resolve, &program, err);
    }
    if let Err(err) = loader.apply_relocations() {
        return fail(Stage::Relocate, &program, err);
    }
    if let Err(err) = loader.adjust_permissions() {
        return fail(Stage::Protect, &program, err);
    }
    // SAFETY: every object is relocated and protected; the entry point is
    // trusted to be a C function returning int.
    let code = unsafe { loader.run() }.unwrap_or_default();
    log::info!("{} returned {}", program.display(), code);
    ExitCode::from(code as u8)
}
