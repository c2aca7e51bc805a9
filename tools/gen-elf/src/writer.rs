use crate::{Arch, RawSegment, RelocDesc, RelocTarget, SymbolDesc, SymbolValue};
use anyhow::{Context, Result, anyhow, ensure};
use byteorder::{LittleEndian, WriteBytesExt};
use object::elf::*;
use std::{fs, path::Path};

pub const PAGE_SIZE: u64 = 0x1000;
const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;
const SHDR_SIZE: u64 = 64;
const SYM_SIZE: u64 = 24;
const RELA_SIZE: u64 = 24;
const DYN_SIZE: u64 = 16;

pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

struct StringTable {
    data: Vec<u8>,
}

impl StringTable {
    fn new() -> Self {
        Self { data: vec![0] }
    }

    fn add(&mut self, s: &str) -> u32 {
        let off = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        off
    }
}

struct DynStrings {
    table: StringTable,
    needed: Vec<u32>,
    rpath: Option<u32>,
    runpath: Option<u32>,
    symbols: Vec<u32>,
}

/// File offsets and virtual addresses of everything an [`ImageWriter`] emits.
///
/// Virtual addresses equal `base_addr + file offset` throughout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Layout {
    pub phnum: u64,
    pub text_offset: u64,
    pub text_vaddr: u64,
    pub text_size: u64,
    pub dyn_seg_offset: u64,
    pub dyn_seg_size: u64,
    pub dynsym_offset: u64,
    pub dynsym_size: u64,
    pub dynstr_offset: u64,
    pub dynstr_size: u64,
    pub rela_offset: u64,
    pub rela_size: u64,
    pub dynamic_offset: u64,
    pub dynamic_size: u64,
    pub data_offset: u64,
    pub data_vaddr: u64,
    pub data_filesz: u64,
    pub data_memsz: u64,
    pub shstrtab_offset: u64,
    pub shstrtab_size: u64,
    pub shoff: u64,
}

/// Result of [`ImageWriter::write`].
pub struct ElfOutput {
    pub data: Vec<u8>,
    pub layout: Layout,
}

struct SectionDesc {
    name: &'static str,
    sh_type: u32,
    flags: u64,
    offset: u64,
    size: u64,
    link: &'static str,
    info: u32,
    align: u64,
    entsize: u64,
}

/// Builds a little-endian ELF64 image with a text segment, an optional
/// read-only segment holding the dynamic tables and an optional data segment.
///
/// As in linker output, the text segment starts at file offset 0 and so also
/// maps the file and program headers. Each later segment starts on a new page.
///
/// Section order is `.text .dynsym .dynstr .rela.dyn .dynamic .data .bss
/// .shstrtab`, so `.dynstr` directly follows `.dynsym` unless
/// [`ImageWriter::dynstr_not_adjacent`] is set.
#[derive(Clone, Debug)]
pub struct ImageWriter {
    arch: Arch,
    base_addr: u64,
    elf_type: u16,
    entry_offset: u64,
    text: Vec<u8>,
    data: Vec<u8>,
    bss: u64,
    needed: Vec<String>,
    rpath: Option<String>,
    runpath: Option<String>,
    symbols: Vec<SymbolDesc>,
    relocs: Vec<RelocDesc>,
    dynamic: bool,
    dynsym: bool,
    relaent: bool,
    dynstr_adjacent: bool,
}

impl ImageWriter {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            base_addr: 0,
            elf_type: ET_DYN,
            entry_offset: 0,
            text: arch.return_code(0),
            data: Vec::new(),
            bss: 0,
            needed: Vec::new(),
            rpath: None,
            runpath: None,
            symbols: Vec::new(),
            relocs: Vec::new(),
            dynamic: true,
            dynsym: true,
            relaent: true,
            dynstr_adjacent: true,
        }
    }

    pub fn base_addr(mut self, addr: u64) -> Self {
        self.base_addr = addr;
        self
    }

    pub fn executable(mut self) -> Self {
        self.elf_type = ET_EXEC;
        self
    }

    pub fn with_text(mut self, code: &[u8]) -> Self {
        self.text = code.to_vec();
        self
    }

    /// Entry point, as an offset into the text segment.
    pub fn entry_offset(mut self, offset: u64) -> Self {
        self.entry_offset = offset;
        self
    }

    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Zero-initialised bytes following the data segment's file contents.
    pub fn with_bss(mut self, len: u64) -> Self {
        self.bss = len;
        self
    }

    pub fn needed(mut self, name: impl Into<String>) -> Self {
        self.needed.push(name.into());
        self
    }

    pub fn rpath(mut self, path: impl Into<String>) -> Self {
        self.rpath = Some(path.into());
        self
    }

    pub fn runpath(mut self, path: impl Into<String>) -> Self {
        self.runpath = Some(path.into());
        self
    }

    pub fn symbol(mut self, symbol: SymbolDesc) -> Self {
        self.symbols.push(symbol);
        self
    }

    pub fn reloc(mut self, reloc: RelocDesc) -> Self {
        self.relocs.push(reloc);
        self
    }

    /// Emit no dynamic section at all, like a static executable.
    pub fn without_dynamic(mut self) -> Self {
        self.dynamic = false;
        self
    }

    /// Keep the dynamic section but drop the `.dynsym` section header.
    pub fn without_dynsym(mut self) -> Self {
        self.dynsym = false;
        self
    }

    /// Leave `DT_RELAENT` out of the dynamic section.
    pub fn without_relaent(mut self) -> Self {
        self.relaent = false;
        self
    }

    /// Put `.text` between `.dynsym` and `.dynstr` in the section table.
    pub fn dynstr_not_adjacent(mut self) -> Self {
        self.dynstr_adjacent = false;
        self
    }

    fn has_data(&self) -> bool {
        !self.data.is_empty() || self.bss != 0
    }

    fn has_relocs(&self) -> bool {
        self.dynamic && !self.relocs.is_empty()
    }

    fn dyn_strings(&self) -> DynStrings {
        let mut table = StringTable::new();
        let needed = self.needed.iter().map(|name| table.add(name)).collect();
        let rpath = self.rpath.as_deref().map(|path| table.add(path));
        let runpath = self.runpath.as_deref().map(|path| table.add(path));
        let symbols = self.symbols.iter().map(|sym| table.add(&sym.name)).collect();
        DynStrings {
            table,
            needed,
            rpath,
            runpath,
            symbols,
        }
    }

    fn dynamic_count(&self) -> u64 {
        let mut count = self.needed.len() + 4 + 1;
        count += usize::from(self.rpath.is_some()) + usize::from(self.runpath.is_some());
        if self.has_relocs() {
            count += 2 + usize::from(self.relaent);
        }
        count as u64
    }

    fn shstrtab(&self) -> (StringTable, Vec<(&'static str, u32)>) {
        let mut table = StringTable::new();
        let names = [
            ".text",
            ".dynsym",
            ".dynstr",
            ".rela.dyn",
            ".dynamic",
            ".data",
            ".bss",
            ".shstrtab",
        ];
        let offsets = names.iter().map(|name| (*name, table.add(name))).collect();
        (table, offsets)
    }

    /// Computes where everything lands without producing bytes.
    pub fn layout(&self) -> Layout {
        let mut l = Layout {
            phnum: 1 + u64::from(self.has_data()) + if self.dynamic { 2 } else { 0 },
            ..Default::default()
        };
        let mut off = align_up(EHDR_SIZE + l.phnum * PHDR_SIZE, PAGE_SIZE);
        l.text_offset = off;
        l.text_vaddr = self.base_addr + off;
        l.text_size = self.text.len() as u64;
        off += l.text_size;

        if self.dynamic {
            off = align_up(off, PAGE_SIZE);
            l.dyn_seg_offset = off;
            l.dynsym_offset = off;
            l.dynsym_size = (self.symbols.len() as u64 + 1) * SYM_SIZE;
            off += l.dynsym_size;
            l.dynstr_offset = off;
            l.dynstr_size = self.dyn_strings().table.data.len() as u64;
            off += l.dynstr_size;
            off = align_up(off, 8);
            l.rela_offset = off;
            l.rela_size = if self.has_relocs() {
                self.relocs.len() as u64 * RELA_SIZE
            } else {
                0
            };
            off += l.rela_size;
            l.dynamic_offset = off;
            l.dynamic_size = self.dynamic_count() * DYN_SIZE;
            off += l.dynamic_size;
            l.dyn_seg_size = off - l.dyn_seg_offset;
        }

        off = align_up(off, PAGE_SIZE);
        l.data_offset = off;
        l.data_vaddr = self.base_addr + off;
        l.data_filesz = self.data.len() as u64;
        l.data_memsz = l.data_filesz + self.bss;
        off += l.data_filesz;

        l.shstrtab_offset = off;
        l.shstrtab_size = self.shstrtab().0.data.len() as u64;
        off += l.shstrtab_size;
        l.shoff = align_up(off, 8);
        l
    }

    fn sections(&self, l: &Layout) -> Vec<SectionDesc> {
        let text = SectionDesc {
            name: ".text",
            sh_type: SHT_PROGBITS,
            flags: u64::from(SHF_ALLOC | SHF_EXECINSTR),
            offset: l.text_offset,
            size: l.text_size,
            link: "",
            info: 0,
            align: 16,
            entsize: 0,
        };
        let mut sections = Vec::new();
        if !self.dynamic {
            sections.push(text);
        } else {
            let dynsym = SectionDesc {
                name: ".dynsym",
                sh_type: SHT_DYNSYM,
                flags: u64::from(SHF_ALLOC),
                offset: l.dynsym_offset,
                size: l.dynsym_size,
                link: ".dynstr",
                info: 1,
                align: 8,
                entsize: SYM_SIZE,
            };
            match (self.dynsym, self.dynstr_adjacent) {
                (false, _) => sections.push(text),
                (true, true) => sections.extend([text, dynsym]),
                (true, false) => sections.extend([dynsym, text]),
            }
            sections.push(SectionDesc {
                name: ".dynstr",
                sh_type: SHT_STRTAB,
                flags: u64::from(SHF_ALLOC),
                offset: l.dynstr_offset,
                size: l.dynstr_size,
                link: "",
                info: 0,
                align: 1,
                entsize: 0,
            });
            if self.has_relocs() {
                sections.push(SectionDesc {
                    name: ".rela.dyn",
                    sh_type: SHT_RELA,
                    flags: u64::from(SHF_ALLOC),
                    offset: l.rela_offset,
                    size: l.rela_size,
                    link: if self.dynsym { ".dynsym" } else { "" },
                    info: 0,
                    align: 8,
                    entsize: RELA_SIZE,
                });
            }
            sections.push(SectionDesc {
                name: ".dynamic",
                sh_type: SHT_DYNAMIC,
                flags: u64::from(SHF_ALLOC | SHF_WRITE),
                offset: l.dynamic_offset,
                size: l.dynamic_size,
                link: ".dynstr",
                info: 0,
                align: 8,
                entsize: DYN_SIZE,
            });
        }
        if l.data_filesz != 0 {
            sections.push(SectionDesc {
                name: ".data",
                sh_type: SHT_PROGBITS,
                flags: u64::from(SHF_ALLOC | SHF_WRITE),
                offset: l.data_offset,
                size: l.data_filesz,
                link: "",
                info: 0,
                align: 8,
                entsize: 0,
            });
        }
        if self.bss != 0 {
            sections.push(SectionDesc {
                name: ".bss",
                sh_type: SHT_NOBITS,
                flags: u64::from(SHF_ALLOC | SHF_WRITE),
                offset: l.data_offset + l.data_filesz,
                size: self.bss,
                link: "",
                info: 0,
                align: 8,
                entsize: 0,
            });
        }
        sections.push(SectionDesc {
            name: ".shstrtab",
            sh_type: SHT_STRTAB,
            flags: 0,
            offset: l.shstrtab_offset,
            size: l.shstrtab_size,
            link: "",
            info: 0,
            align: 1,
            entsize: 0,
        });
        sections
    }

    fn vaddr(&self, offset: u64) -> u64 {
        self.base_addr + offset
    }

    fn symbol_index(&self, name: &str) -> Result<u64> {
        self.symbols
            .iter()
            .position(|sym| sym.name == name)
            .map(|idx| idx as u64 + 1)
            .ok_or_else(|| anyhow!("relocation references unknown symbol '{name}'"))
    }

    /// Produces the image bytes.
    pub fn write(&self) -> Result<ElfOutput> {
        let l = self.layout();
        let sections = self.sections(&l);
        let section_index = |name: &str| -> u32 {
            sections
                .iter()
                .position(|sec| sec.name == name)
                .map_or(0, |idx| idx as u32 + 1)
        };
        let shnum = sections.len() as u64 + 1;
        let mut buf = Vec::with_capacity((l.shoff + shnum * SHDR_SIZE) as usize);

        // ELF header
        buf.extend_from_slice(&ELFMAG);
        buf.extend_from_slice(&[ELFCLASS64, ELFDATA2LSB, EV_CURRENT, ELFOSABI_NONE]);
        buf.resize(16, 0);
        buf.write_u16::<LittleEndian>(self.elf_type)?;
        buf.write_u16::<LittleEndian>(self.arch.machine())?;
        buf.write_u32::<LittleEndian>(u32::from(EV_CURRENT))?;
        buf.write_u64::<LittleEndian>(l.text_vaddr + self.entry_offset)?;
        buf.write_u64::<LittleEndian>(EHDR_SIZE)?;
        buf.write_u64::<LittleEndian>(l.shoff)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(EHDR_SIZE as u16)?;
        buf.write_u16::<LittleEndian>(PHDR_SIZE as u16)?;
        buf.write_u16::<LittleEndian>(l.phnum as u16)?;
        buf.write_u16::<LittleEndian>(SHDR_SIZE as u16)?;
        buf.write_u16::<LittleEndian>(shnum as u16)?;
        buf.write_u16::<LittleEndian>(section_index(".shstrtab") as u16)?;

        // Program headers, ascending by address
        let mut phdr = |p_type: u32, flags: u32, offset: u64, filesz: u64, memsz: u64, align: u64| {
            write_phdr(&mut buf, p_type, flags, offset, self.vaddr(offset), filesz, memsz, align)
        };
        let text_end = l.text_offset + l.text_size;
        phdr(PT_LOAD, PF_R | PF_X, 0, text_end, text_end, PAGE_SIZE)?;
        if self.dynamic {
            phdr(
                PT_LOAD,
                PF_R,
                l.dyn_seg_offset,
                l.dyn_seg_size,
                l.dyn_seg_size,
                PAGE_SIZE,
            )?;
        }
        if self.has_data() {
            phdr(PT_LOAD, PF_R | PF_W, l.data_offset, l.data_filesz, l.data_memsz, PAGE_SIZE)?;
        }
        if self.dynamic {
            phdr(PT_DYNAMIC, PF_R, l.dynamic_offset, l.dynamic_size, l.dynamic_size, 8)?;
        }

        pad_to(&mut buf, l.text_offset)?;
        buf.extend_from_slice(&self.text);

        if self.dynamic {
            let strings = self.dyn_strings();
            pad_to(&mut buf, l.dynsym_offset)?;
            buf.resize(buf.len() + SYM_SIZE as usize, 0);
            for (sym, name_off) in self.symbols.iter().zip(&strings.symbols) {
                let (shndx, value, kind) = match sym.value {
                    SymbolValue::Text(off) => (section_index(".text"), l.text_vaddr + off, STT_FUNC),
                    SymbolValue::Data(off) => {
                        let data = section_index(".data");
                        let shndx = if data != 0 { data } else { section_index(".bss") };
                        (shndx, l.data_vaddr + off, STT_OBJECT)
                    }
                    SymbolValue::Absolute(value) => (u32::from(SHN_ABS), value, STT_NOTYPE),
                    SymbolValue::Undefined => (u32::from(SHN_UNDEF), 0, STT_NOTYPE),
                };
                buf.write_u32::<LittleEndian>(*name_off)?;
                buf.write_u8((STB_GLOBAL << 4) | kind)?;
                buf.write_u8(STV_DEFAULT)?;
                buf.write_u16::<LittleEndian>(shndx as u16)?;
                buf.write_u64::<LittleEndian>(value)?;
                buf.write_u64::<LittleEndian>(sym.size)?;
            }

            pad_to(&mut buf, l.dynstr_offset)?;
            buf.extend_from_slice(&strings.table.data);

            pad_to(&mut buf, l.rela_offset)?;
            if self.has_relocs() {
                for reloc in &self.relocs {
                    let sym = match &reloc.symbol {
                        Some(name) => self.symbol_index(name)?,
                        None => 0,
                    };
                    let offset = match reloc.target {
                        RelocTarget::Data(off) => l.data_vaddr + off,
                        RelocTarget::Vaddr(vaddr) => vaddr,
                    };
                    buf.write_u64::<LittleEndian>(offset)?;
                    buf.write_u64::<LittleEndian>((sym << 32) | u64::from(reloc.r_type))?;
                    buf.write_i64::<LittleEndian>(reloc.addend)?;
                }
            }

            pad_to(&mut buf, l.dynamic_offset)?;
            let mut entries: Vec<(u32, u64)> = Vec::new();
            entries.extend(strings.needed.iter().map(|off| (DT_NEEDED, u64::from(*off))));
            entries.extend(strings.rpath.map(|off| (DT_RPATH, u64::from(off))));
            entries.extend(strings.runpath.map(|off| (DT_RUNPATH, u64::from(off))));
            entries.push((DT_STRTAB, self.vaddr(l.dynstr_offset)));
            entries.push((DT_STRSZ, l.dynstr_size));
            entries.push((DT_SYMTAB, self.vaddr(l.dynsym_offset)));
            entries.push((DT_SYMENT, SYM_SIZE));
            if self.has_relocs() {
                entries.push((DT_RELA, self.vaddr(l.rela_offset)));
                entries.push((DT_RELASZ, l.rela_size));
                if self.relaent {
                    entries.push((DT_RELAENT, RELA_SIZE));
                }
            }
            entries.push((DT_NULL, 0));
            ensure!(
                entries.len() as u64 == self.dynamic_count(),
                "dynamic entry count mismatch"
            );
            for (tag, value) in entries {
                buf.write_i64::<LittleEndian>(i64::from(tag))?;
                buf.write_u64::<LittleEndian>(value)?;
            }
        }

        pad_to(&mut buf, l.data_offset)?;
        buf.extend_from_slice(&self.data);

        let (shstrtab, names) = self.shstrtab();
        pad_to(&mut buf, l.shstrtab_offset)?;
        buf.extend_from_slice(&shstrtab.data);

        pad_to(&mut buf, l.shoff)?;
        buf.resize(buf.len() + SHDR_SIZE as usize, 0);
        for sec in &sections {
            let name_off = names
                .iter()
                .find(|(name, _)| *name == sec.name)
                .map_or(0, |(_, off)| *off);
            let addr = if sec.flags & u64::from(SHF_ALLOC) != 0 {
                self.vaddr(sec.offset)
            } else {
                0
            };
            buf.write_u32::<LittleEndian>(name_off)?;
            buf.write_u32::<LittleEndian>(sec.sh_type)?;
            buf.write_u64::<LittleEndian>(sec.flags)?;
            buf.write_u64::<LittleEndian>(addr)?;
            buf.write_u64::<LittleEndian>(sec.offset)?;
            buf.write_u64::<LittleEndian>(sec.size)?;
            buf.write_u32::<LittleEndian>(section_index(sec.link))?;
            buf.write_u32::<LittleEndian>(sec.info)?;
            buf.write_u64::<LittleEndian>(sec.align)?;
            buf.write_u64::<LittleEndian>(sec.entsize)?;
        }

        Ok(ElfOutput { data: buf, layout: l })
    }

    /// Writes the image to `path`, creating parent directories.
    pub fn write_file(&self, path: &Path) -> Result<ElfOutput> {
        let out = self.write()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(path, &out.data).with_context(|| format!("writing {}", path.display()))?;
        Ok(out)
    }
}

fn pad_to(buf: &mut Vec<u8>, offset: u64) -> Result<()> {
    ensure!(
        buf.len() as u64 <= offset,
        "layout overlap: at {:#x}, next piece starts at {offset:#x}",
        buf.len()
    );
    buf.resize(offset as usize, 0);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_phdr(
    buf: &mut Vec<u8>,
    p_type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
) -> Result<()> {
    buf.write_u32::<LittleEndian>(p_type)?;
    buf.write_u32::<LittleEndian>(flags)?;
    buf.write_u64::<LittleEndian>(offset)?;
    buf.write_u64::<LittleEndian>(vaddr)?;
    buf.write_u64::<LittleEndian>(vaddr)?;
    buf.write_u64::<LittleEndian>(filesz)?;
    buf.write_u64::<LittleEndian>(memsz)?;
    buf.write_u64::<LittleEndian>(align)?;
    Ok(())
}

/// An image made of nothing but an ELF header and memory-only `PT_LOAD`
/// program headers, without any section table.
pub fn write_segments_only(arch: Arch, entry: u64, segments: &[RawSegment]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&ELFMAG);
    buf.extend_from_slice(&[ELFCLASS64, ELFDATA2LSB, EV_CURRENT, ELFOSABI_NONE]);
    buf.resize(16, 0);
    buf.write_u16::<LittleEndian>(ET_DYN)?;
    buf.write_u16::<LittleEndian>(arch.machine())?;
    buf.write_u32::<LittleEndian>(u32::from(EV_CURRENT))?;
    buf.write_u64::<LittleEndian>(entry)?;
    buf.write_u64::<LittleEndian>(EHDR_SIZE)?;
    buf.write_u64::<LittleEndian>(0)?;
    buf.write_u32::<LittleEndian>(0)?;
    buf.write_u16::<LittleEndian>(EHDR_SIZE as u16)?;
    buf.write_u16::<LittleEndian>(PHDR_SIZE as u16)?;
    buf.write_u16::<LittleEndian>(segments.len() as u16)?;
    buf.write_u16::<LittleEndian>(SHDR_SIZE as u16)?;
    buf.write_u16::<LittleEndian>(0)?;
    buf.write_u16::<LittleEndian>(0)?;
    for seg in segments {
        write_phdr(&mut buf, PT_LOAD, seg.flags, 0, seg.vaddr, 0, seg.memsz, PAGE_SIZE)?;
    }
    Ok(buf)
}
