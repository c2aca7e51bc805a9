//! Relocation of loaded objects
//!
//! Entries are interpreted against the whole set of loaded objects, since a
//! `COPY` relocation pulls its bytes from a definition in another object.
//! Only `NONE`, the absolute 64-bit type, `COPY` and `RELATIVE` are handled;
//! anything else stops the pass.

use crate::{
    Error, Result,
    arch::{REL_COPY, REL_NONE, REL_RELATIVE, REL_SYMBOLIC, rel_type_to_str},
    elf::ElfRela,
    error::relocate_error,
    object::LoadedObject,
};
use std::fmt::Display;

/// A value about to be written into an object's memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RelocValue(pub usize);

impl RelocValue {
    #[inline]
    fn to_bytes(self) -> [u8; size_of::<u64>()] {
        (self.0 as u64).to_le_bytes()
    }
}

impl Display for RelocValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What to do with a `COPY` relocation whose symbol no other object defines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CopyMissPolicy {
    #[default]
    Fail,
    /// Log a warning and leave the target untouched.
    Skip,
}

/// Applies the relocations of every object, in load order.
pub fn relocate_all(objects: &mut [LoadedObject], policy: CopyMissPolicy) -> Result<()> {
    for idx in 0..objects.len() {
        relocate_object(objects, idx, policy)?;
    }
    Ok(())
}

/// Applies the relocations of `objects[idx]` in table order.
///
/// The first unsupported or failing entry aborts the pass. Entries before it
/// stay applied.
pub fn relocate_object(
    objects: &mut [LoadedObject],
    idx: usize,
    policy: CopyMissPolicy,
) -> Result<()> {
    let count = objects[idx].relocations().len();
    log::debug!(
        "relocating '{}': {} entries",
        objects[idx].path().display(),
        count
    );
    for index in 0..count {
        let rela = objects[idx].relocations()[index].clone();
        apply_one(objects, idx, index, &rela, policy)?;
    }
    Ok(())
}

fn apply_one(
    objects: &mut [LoadedObject],
    idx: usize,
    index: usize,
    rela: &ElfRela,
    policy: CopyMissPolicy,
) -> Result<()> {
    let r_type = rela.r_type();
    let object = &objects[idx];
    let target = object.base().wrapping_add(rela.r_offset());
    match r_type {
        REL_NONE => Ok(()),
        REL_SYMBOLIC => {
            let value = RelocValue(object.symbol_address(rela.r_symbol())?);
            write_value(&mut objects[idx], index, r_type, target, value)
        }
        REL_RELATIVE => {
            let value = RelocValue(object.base().wrapping_add_signed(rela.r_addend()));
            write_value(&mut objects[idx], index, r_type, target, value)
        }
        REL_COPY => apply_copy(objects, idx, index, rela, target, policy),
        _ => Err(Error::UnsupportedRelocation { r_type, index }),
    }
}

fn write_value(
    object: &mut LoadedObject,
    index: usize,
    r_type: u32,
    target: usize,
    value: RelocValue,
) -> Result<()> {
    log::trace!(
        "[{}] #{index} {}: {:#x} <- {}",
        object.path().display(),
        rel_type_to_str(r_type),
        target,
        value
    );
    object.write_at(target, &value.to_bytes())
}

fn apply_copy(
    objects: &mut [LoadedObject],
    idx: usize,
    index: usize,
    rela: &ElfRela,
    target: usize,
    policy: CopyMissPolicy,
) -> Result<()> {
    let name = objects[idx].symbol_name(rela.r_symbol())?.to_owned();
    let source = objects
        .iter()
        .enumerate()
        .filter(|(other, _)| *other != idx)
        .find_map(|(other, object)| {
            object
                .find_symbol(&name)
                .filter(|sym| !sym.is_undefined())
                .map(|sym| (other, sym.st_value as usize, sym.st_size as usize))
        });
    let Some((other, value, size)) = source else {
        return match policy {
            CopyMissPolicy::Fail => Err(relocate_error(format!(
                "{}: no object defines '{name}' for COPY relocation #{index}",
                objects[idx].path().display()
            ))),
            CopyMissPolicy::Skip => {
                log::warn!(
                    "{}: no object defines '{name}', skipping COPY relocation #{index}",
                    objects[idx].path().display()
                );
                Ok(())
            }
        };
    };
    let from = objects[other].base().wrapping_add(value);
    let bytes = objects[other].read_at(from, size)?.to_vec();
    log::trace!(
        "[{}] #{index} {}: {:#x} <- {size:#x} bytes of '{name}' from '{}'",
        objects[idx].path().display(),
        rel_type_to_str(REL_COPY),
        target,
        objects[other].path().display()
    );
    objects[idx].write_at(target, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{image::ElfImage, input::ElfSource, object::CopyStrategy};
    use gen_elf::{Arch, ImageWriter, RelocDesc, SymbolDesc};

    fn load(name: &str, writer: &ImageWriter) -> LoadedObject {
        let out = writer.write().unwrap();
        let image = ElfImage::parse(ElfSource::from_bytes(name, out.data)).unwrap();
        LoadedObject::load(name, image, CopyStrategy::PerSegment).unwrap()
    }

    fn read_u64(object: &LoadedObject, vaddr: u64) -> u64 {
        let bytes = object.read_at(object.base() + vaddr as usize, 8).unwrap();
        u64::from_le_bytes(bytes.try_into().unwrap())
    }

    #[test]
    fn relative_writes_base_plus_addend() {
        let arch = Arch::host();
        let writer = ImageWriter::new(arch)
            .with_data(&[0; 16])
            .reloc(RelocDesc::relative(arch, 8).with_addend(0x40));
        let mut objects = vec![load("rel.so", &writer)];
        relocate_all(&mut objects, CopyMissPolicy::Fail).unwrap();
        let data = writer.layout().data_vaddr;
        assert_eq!(read_u64(&objects[0], data + 8), objects[0].base() as u64 + 0x40);
        assert_eq!(read_u64(&objects[0], data), 0);
    }

    #[test]
    fn absolute_ignores_addend() {
        let arch = Arch::host();
        let writer = ImageWriter::new(arch)
            .with_data(&[0; 16])
            .symbol(SymbolDesc::data("counter", 8, 8))
            .reloc(RelocDesc::abs(arch, "counter", 0).with_addend(0x1234));
        let mut objects = vec![load("abs.so", &writer)];
        relocate_all(&mut objects, CopyMissPolicy::Fail).unwrap();
        let data = writer.layout().data_vaddr;
        assert_eq!(
            read_u64(&objects[0], data),
            objects[0].base() as u64 + data + 8
        );
    }

    #[test]
    fn unsupported_type_stops_after_earlier_entries() {
        let arch = Arch::host();
        let writer = ImageWriter::new(arch)
            .with_data(&[0; 24])
            .symbol(SymbolDesc::data("slot", 0, 8))
            .reloc(RelocDesc::relative(arch, 0).with_addend(1))
            .reloc(RelocDesc::glob_dat(arch, "slot", 8))
            .reloc(RelocDesc::relative(arch, 16).with_addend(2));
        let mut objects = vec![load("bad.so", &writer)];
        let err = relocate_all(&mut objects, CopyMissPolicy::Fail).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedRelocation { index: 1, r_type } if r_type == arch.glob_dat_reloc()
        ));
        let data = writer.layout().data_vaddr;
        assert_eq!(read_u64(&objects[0], data), objects[0].base() as u64 + 1);
        assert_eq!(read_u64(&objects[0], data + 16), 0);
    }

    #[test]
    fn copy_pulls_bytes_from_other_object() {
        let arch = Arch::host();
        let exe = ImageWriter::new(arch)
            .with_data(&[0; 8])
            .symbol(SymbolDesc::undefined("shared"))
            .reloc(RelocDesc::copy(arch, "shared", 0));
        let lib = ImageWriter::new(arch)
            .with_data(&0xdead_beef_u64.to_le_bytes())
            .symbol(SymbolDesc::data("shared", 0, 8));
        let mut objects = vec![load("exe", &exe), load("lib.so", &lib)];
        relocate_all(&mut objects, CopyMissPolicy::Fail).unwrap();
        assert_eq!(read_u64(&objects[0], exe.layout().data_vaddr), 0xdead_beef);
    }

    #[test]
    fn copy_miss_policy() {
        let arch = Arch::host();
        let exe = ImageWriter::new(arch)
            .with_data(&[0; 8])
            .symbol(SymbolDesc::undefined("nowhere"))
            .reloc(RelocDesc::copy(arch, "nowhere", 0));
        let mut objects = vec![load("exe", &exe)];
        assert!(matches!(
            relocate_all(&mut objects, CopyMissPolicy::Fail),
            Err(Error::Relocation { .. })
        ));
        relocate_all(&mut objects, CopyMissPolicy::Skip).unwrap();
    }

    #[test]
    fn write_outside_mapping_is_rejected() {
        let arch = Arch::host();
        let writer = ImageWriter::new(arch)
            .with_data(&[0; 8])
            .reloc(RelocDesc::relative_at(arch, 0x10_0000));
        let mut objects = vec![load("far.so", &writer)];
        assert!(matches!(
            relocate_all(&mut objects, CopyMissPolicy::Fail),
            Err(Error::Relocation { .. })
        ));
    }
}
