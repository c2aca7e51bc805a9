use crate::Arch;

/// Where a symbol's value points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolValue {
    /// Offset into the text segment.
    Text(u64),
    /// Offset into the data segment.
    Data(u64),
    /// A raw value, emitted with `SHN_ABS`.
    Absolute(u64),
    /// Not defined in this image.
    Undefined,
}

/// A dynamic symbol to be generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolDesc {
    pub name: String,
    pub value: SymbolValue,
    pub size: u64,
}

impl SymbolDesc {
    /// A function defined at `offset` in the text segment.
    pub fn text(name: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            value: SymbolValue::Text(offset),
            size,
        }
    }

    /// An object defined at `offset` in the data segment.
    pub fn data(name: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            value: SymbolValue::Data(offset),
            size,
        }
    }

    pub fn absolute(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value: SymbolValue::Absolute(value),
            size: 0,
        }
    }

    /// A reference to a symbol some other object defines.
    pub fn undefined(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: SymbolValue::Undefined,
            size: 0,
        }
    }

    /// Set a custom size for the symbol.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

/// The location a relocation patches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocTarget {
    /// Offset into the data segment.
    Data(u64),
    /// A raw on-disk virtual address.
    Vaddr(u64),
}

/// Represents a relocation entry to be generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelocDesc {
    pub r_type: u32,
    /// Symbol this relocation references, `None` for index 0.
    pub symbol: Option<String>,
    pub target: RelocTarget,
    pub addend: i64,
}

impl RelocDesc {
    pub fn new(r_type: u32, symbol: Option<String>, target: RelocTarget) -> Self {
        Self {
            r_type,
            symbol,
            target,
            addend: 0,
        }
    }

    /// Set the addend for the relocation.
    pub fn with_addend(mut self, addend: i64) -> Self {
        self.addend = addend;
        self
    }

    /// A RELATIVE relocation patching `data_offset` in the data segment.
    pub fn relative(arch: Arch, data_offset: u64) -> Self {
        Self::new(arch.relative_reloc(), None, RelocTarget::Data(data_offset))
    }

    /// A RELATIVE relocation patching an arbitrary virtual address.
    pub fn relative_at(arch: Arch, vaddr: u64) -> Self {
        Self::new(arch.relative_reloc(), None, RelocTarget::Vaddr(vaddr))
    }

    pub fn abs(arch: Arch, symbol: impl Into<String>, data_offset: u64) -> Self {
        Self::new(
            arch.abs_reloc(),
            Some(symbol.into()),
            RelocTarget::Data(data_offset),
        )
    }

    pub fn copy(arch: Arch, symbol: impl Into<String>, data_offset: u64) -> Self {
        Self::new(
            arch.copy_reloc(),
            Some(symbol.into()),
            RelocTarget::Data(data_offset),
        )
    }

    pub fn glob_dat(arch: Arch, symbol: impl Into<String>, data_offset: u64) -> Self {
        Self::new(
            arch.glob_dat_reloc(),
            Some(symbol.into()),
            RelocTarget::Data(data_offset),
        )
    }

    pub fn jump_slot(arch: Arch, symbol: impl Into<String>, data_offset: u64) -> Self {
        Self::new(
            arch.jump_slot_reloc(),
            Some(symbol.into()),
            RelocTarget::Data(data_offset),
        )
    }

    /// An `R_*_NONE` entry.
    pub fn none() -> Self {
        Self::new(0, None, RelocTarget::Vaddr(0))
    }
}

/// A memory-only `PT_LOAD` segment, used by [`crate::write_segments_only`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawSegment {
    pub flags: u32,
    pub vaddr: u64,
    pub memsz: u64,
}
