//! ELF header parsing and validation

use crate::{Result, arch::EM_ARCH, elf::E_CLASS, error::parse_ehdr_error};
use core::ops::Deref;
use elf::{
    abi::EI_NIDENT,
    endian::LittleEndian,
    file::{ELF64_EHDR_TAILSIZE, FileHeader, parse_ident},
};

/// A decoded and validated ELF64 file header.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElfHeader {
    ehdr: FileHeader<LittleEndian>,
}

impl Deref for ElfHeader {
    type Target = FileHeader<LittleEndian>;

    fn deref(&self) -> &Self::Target {
        &self.ehdr
    }
}

impl ElfHeader {
    /// Size of an ELF64 file header in bytes.
    pub const SIZE: usize = EI_NIDENT + ELF64_EHDR_TAILSIZE;

    /// Decodes the file header at the start of `data`.
    ///
    /// Magic, version and byte order are checked by the decoder; the class
    /// must be ELF64. A machine mismatch is only logged.
    pub(crate) fn new(data: &[u8]) -> Result<Self> {
        let (ident, tail) = data
            .get(..EI_NIDENT)
            .zip(data.get(EI_NIDENT..Self::SIZE))
            .ok_or_else(|| {
                parse_ehdr_error(format!(
                    "file is {} bytes, shorter than an ELF64 header",
                    data.len()
                ))
            })?;
        let ident = parse_ident::<LittleEndian>(ident)
            .map_err(|err| parse_ehdr_error(err.to_string()))?;
        let ehdr = FileHeader::parse_tail(ident, tail)
            .map_err(|err| parse_ehdr_error(err.to_string()))?;
        let header = ElfHeader { ehdr };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.class != E_CLASS {
            return Err(parse_ehdr_error("file class mismatch, only ELF64 is supported"));
        }
        if self.e_machine != EM_ARCH {
            log::warn!(
                "image machine {} does not match the host machine {}",
                self.e_machine,
                EM_ARCH
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use elf::abi::{EI_CLASS, EI_DATA, EI_VERSION, ELFCLASS32, ELFDATA2MSB, ELFMAGIC, EV_CURRENT};

    fn ident() -> Vec<u8> {
        let mut data = vec![0u8; ElfHeader::SIZE];
        data[..4].copy_from_slice(&ELFMAGIC);
        data[EI_CLASS] = elf::abi::ELFCLASS64;
        data[EI_DATA] = elf::abi::ELFDATA2LSB;
        data[EI_VERSION] = EV_CURRENT;
        data[18..20].copy_from_slice(&EM_ARCH.to_le_bytes());
        data
    }

    #[test]
    fn accepts_host_elf64() {
        let header = ElfHeader::new(&ident()).unwrap();
        assert_eq!(header.e_machine, EM_ARCH);
        assert_eq!(header.class, E_CLASS);
    }

    #[test]
    fn rejects_other_layouts() {
        let mut class32 = ident();
        class32[EI_CLASS] = ELFCLASS32;
        let mut big = ident();
        big[EI_DATA] = ELFDATA2MSB;
        let mut version = ident();
        version[EI_VERSION] = 0;
        for data in [class32, big, version, ident()[..40].to_vec()] {
            assert!(matches!(ElfHeader::new(&data), Err(Error::ParseEhdr { .. })));
        }
    }
}
