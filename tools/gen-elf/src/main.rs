use anyhow::Result;
use clap::Parser;
use gen_elf::{Arch, ImageWriter, RelocDesc, SymbolDesc};
use std::path::{Path, PathBuf};

const SHARED_VAR_NAME: &str = "shared_var";
const LOCAL_VAR_NAME: &str = "local_var";
const LIB_NAME: &str = "libshared.so";

/// A library defining `shared_var`, and a program that copies it, takes the
/// address of its own `local_var`, depends on the library through
/// `RUNPATH=$ORIGIN/lib` and returns `exit_code`.
fn gen_program(out_dir: &Path, arch: Arch, exit_code: u16) -> Result<()> {
    let lib_path = out_dir.join("lib").join(LIB_NAME);
    ImageWriter::new(arch)
        .with_data(&0x1122_3344_5566_7788u64.to_le_bytes())
        .symbol(SymbolDesc::data(SHARED_VAR_NAME, 0, 8))
        .write_file(&lib_path)?;
    println!("Wrote {}", lib_path.display());

    let exe_path = out_dir.join("program");
    ImageWriter::new(arch)
        .executable()
        .with_text(&arch.return_code(exit_code))
        .with_data(&[0; 24])
        .needed(LIB_NAME)
        .runpath("$ORIGIN/lib")
        .symbol(SymbolDesc::undefined(SHARED_VAR_NAME).with_size(8))
        .symbol(SymbolDesc::data(LOCAL_VAR_NAME, 16, 8))
        .reloc(RelocDesc::copy(arch, SHARED_VAR_NAME, 0))
        .reloc(RelocDesc::abs(arch, LOCAL_VAR_NAME, 8))
        .reloc(RelocDesc::relative(arch, 16).with_addend(0x10))
        .write_file(&exe_path)?;
    println!("Wrote {}", exe_path.display());
    Ok(())
}

#[derive(Parser)]
#[command(name = "gen-elf")]
struct Args {
    /// Output directory for generated artifacts
    #[arg(short)]
    output: Option<PathBuf>,
    /// Target architecture
    #[arg(short, long, value_enum, default_value_t = Arch::host())]
    target: Arch,
    /// Value the generated program returns
    #[arg(short, long, default_value_t = 42)]
    exit_code: u16,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let output = match args.output {
        Some(p) => p,
        None => {
            let mut cwd = std::env::current_dir()?;
            cwd.push("out");
            cwd
        }
    };

    println!(
        "out: {}\ntarget: {:?}\nexit code: {}",
        output.display(),
        args.target,
        args.exit_code
    );

    gen_program(&output, args.target, args.exit_code)?;

    Ok(())
}
