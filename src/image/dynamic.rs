//! Parsing the `.dynamic` section
use crate::elf::ElfDyn;
use elf::abi::*;

/// The tags of the dynamic section the loader cares about.
///
/// Values are kept raw: string offsets are relative to the image's own
/// dynamic string table and addresses are on-disk virtual addresses.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ElfRawDynamic {
    /// DT_NEEDED, in tag order
    pub needed_libs: Vec<usize>,
    /// DT_RPATH
    pub rpath_off: Vec<usize>,
    /// DT_RUNPATH
    pub runpath_off: Vec<usize>,
    /// DT_STRTAB
    pub strtab_off: Option<usize>,
    /// DT_STRSZ
    pub strtab_size: Option<usize>,
    /// DT_RELA
    pub rela_off: Option<usize>,
    /// DT_RELASZ
    pub rela_size: Option<usize>,
    /// DT_RELAENT
    pub rela_ent: Option<usize>,
}

impl ElfRawDynamic {
    pub(crate) fn new(entries: &[ElfDyn]) -> ElfRawDynamic {
        let mut dynamic = ElfRawDynamic::default();
        for entry in entries {
            let value = entry.d_val() as usize;
            match entry.d_tag {
                DT_NEEDED => dynamic.needed_libs.push(value),
                DT_RPATH => dynamic.rpath_off.push(value),
                DT_RUNPATH => dynamic.runpath_off.push(value),
                DT_STRTAB => dynamic.strtab_off = Some(value),
                DT_STRSZ => dynamic.strtab_size = Some(value),
                DT_RELA => dynamic.rela_off = Some(value),
                DT_RELASZ => dynamic.rela_size = Some(value),
                DT_RELAENT => dynamic.rela_ent = Some(value),
                DT_NULL => break,
                _ => {}
            }
        }
        dynamic
    }

    /// `(address, size, entry size)` of the RELA table, only when all three
    /// tags are present.
    pub(crate) fn rela(&self) -> Option<(usize, usize, usize)> {
        match (self.rela_off, self.rela_size, self.rela_ent) {
            (Some(off), Some(size), Some(ent)) if ent != 0 => Some((off, size, ent)),
            _ => None,
        }
    }

    /// Run path string offsets, `DT_RPATH` entries first.
    pub(crate) fn run_path_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.rpath_off.iter().chain(self.runpath_off.iter()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::table;

    fn dynamic(entries: &[(i64, u64)]) -> ElfRawDynamic {
        let bytes: Vec<u8> = entries
            .iter()
            .flat_map(|&(tag, val)| tag.to_le_bytes().into_iter().chain(val.to_le_bytes()))
            .collect();
        let entries: Vec<ElfDyn> = table::<ElfDyn>(&bytes, 16).unwrap().iter().collect();
        ElfRawDynamic::new(&entries)
    }

    #[test]
    fn stops_at_null() {
        let dynamic = dynamic(&[(DT_NEEDED, 1), (DT_NEEDED, 9), (DT_NULL, 0), (DT_NEEDED, 20)]);
        assert_eq!(dynamic.needed_libs, vec![1, 9]);
    }

    #[test]
    fn rela_requires_all_three_tags() {
        let partial = dynamic(&[(DT_RELA, 0x400), (DT_RELASZ, 48)]);
        assert_eq!(partial.rela(), None);

        let zero_ent = dynamic(&[(DT_RELA, 0x400), (DT_RELASZ, 48), (DT_RELAENT, 0)]);
        assert_eq!(zero_ent.rela(), None);

        let full = dynamic(&[(DT_RELAENT, 24), (DT_RELA, 0x400), (DT_RELASZ, 48)]);
        assert_eq!(full.rela(), Some((0x400, 48, 24)));
    }

    #[test]
    fn rpath_before_runpath() {
        let dynamic = dynamic(&[(DT_RUNPATH, 7), (DT_RPATH, 3)]);
        assert_eq!(dynamic.run_path_offsets().collect::<Vec<_>>(), vec![3, 7]);
    }

    #[test]
    fn string_table_tags() {
        let dynamic = dynamic(&[(DT_STRTAB, 0x2000), (DT_STRSZ, 0x40)]);
        assert_eq!(dynamic.strtab_off, Some(0x2000));
        assert_eq!(dynamic.strtab_size, Some(0x40));
    }
}
