mod common;

use common::{Fixture, arch};
use elf_ld::Stage;
use gen_elf::{ImageWriter, RelocDesc, SymbolDesc};
use rstest::rstest;
use std::process::Command;

fn elf_ld() -> Command {
    Command::new(env!("CARGO_BIN_EXE_elf-ld"))
}

#[rstest]
fn no_argument_prints_usage() {
    let out = elf_ld().output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Usage"));
}

#[rstest]
fn wrong_name_fails_resolution() {
    let out = elf_ld()
        .arg("target/this_location_is_definitely_non existent:^~")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(Stage::Resolve.exit_code()));
}

#[rstest]
fn relocation_failure_exit_code() {
    let arch = arch();
    let fixture = Fixture::new("cli-reloc");
    let program = fixture.write(
        "program",
        &ImageWriter::new(arch)
            .with_data(&[0; 8])
            .symbol(SymbolDesc::undefined("f"))
            .reloc(RelocDesc::glob_dat(arch, "f", 0)),
    );
    let out = elf_ld().arg(&program).output().unwrap();
    assert_eq!(out.status.code(), Some(255));
    assert_eq!(Stage::Relocate.exit_code(), 255);
}

#[rstest]
fn program_exit_code_is_forwarded() {
    let arch = arch();
    let fixture = Fixture::new("cli-run");
    let program = fixture.write(
        "program",
        &ImageWriter::new(arch)
            .executable()
            .with_text(&arch.return_code(7))
            .with_data(&[0; 8])
            .reloc(RelocDesc::relative(arch, 0)),
    );
    let out = elf_ld().arg(&program).output().unwrap();
    assert_eq!(out.status.code(), Some(7));
}
