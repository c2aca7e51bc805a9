use object::elf::*;

/// Target architecture of a generated image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// The architecture this crate was compiled for, falling back to x86_64.
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Aarch64
        } else {
            Arch::X86_64
        }
    }

    pub fn machine(self) -> u16 {
        match self {
            Arch::X86_64 => EM_X86_64,
            Arch::Aarch64 => EM_AARCH64,
        }
    }

    pub fn abs_reloc(self) -> u32 {
        match self {
            Arch::X86_64 => R_X86_64_64,
            Arch::Aarch64 => R_AARCH64_ABS64,
        }
    }

    pub fn copy_reloc(self) -> u32 {
        match self {
            Arch::X86_64 => R_X86_64_COPY,
            Arch::Aarch64 => R_AARCH64_COPY,
        }
    }

    pub fn relative_reloc(self) -> u32 {
        match self {
            Arch::X86_64 => R_X86_64_RELATIVE,
            Arch::Aarch64 => R_AARCH64_RELATIVE,
        }
    }

    pub fn glob_dat_reloc(self) -> u32 {
        match self {
            Arch::X86_64 => R_X86_64_GLOB_DAT,
            Arch::Aarch64 => R_AARCH64_GLOB_DAT,
        }
    }

    pub fn jump_slot_reloc(self) -> u32 {
        match self {
            Arch::X86_64 => R_X86_64_JUMP_SLOT,
            Arch::Aarch64 => R_AARCH64_JUMP_SLOT,
        }
    }

    /// Machine code of a C function taking nothing and returning `value`.
    pub fn return_code(self, value: u16) -> Vec<u8> {
        match self {
            // mov eax, imm32; ret
            Arch::X86_64 => {
                let mut code = vec![0xb8];
                code.extend_from_slice(&u32::from(value).to_le_bytes());
                code.push(0xc3);
                code
            }
            // movz w0, #imm16; ret
            Arch::Aarch64 => {
                let movz = 0x5280_0000u32 | (u32::from(value) << 5);
                let ret = 0xd65f_03c0u32;
                [movz.to_le_bytes(), ret.to_le_bytes()].concat()
            }
        }
    }
}
