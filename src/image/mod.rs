//! Parsing an ELF file into an [`ElfImage`]
//!
//! [`ElfImage::parse`] decodes everything the loader needs from one file in a
//! fixed order: the file header, the section and program header tables, the
//! `PT_LOAD` segments and, for dynamically linked images, the dynamic symbol
//! table, the dynamic string table, run paths, `DT_NEEDED` entries and the
//! RELA relocation table.
//!
//! The image never holds pointers into the file: every table is decoded into
//! owned values with the `elf` crate's bounds-checked parsers, so a malformed
//! file yields a parse error instead of an out-of-bounds access.

mod dynamic;
mod strtab;

pub use strtab::{
    DynamicTag, LinkedSection, SectionAdjacency, StrTabContext, StrTabLocator, StrTabLookup,
};

use crate::{
    Error, Result,
    elf::{E_CLASS, ElfDyn, ElfHeader, ElfPhdr, ElfRela, ElfShdr, ElfSymbol, ElfTable, table},
    error::{parse_dynamic_error, parse_phdr_error, parse_shdr_error},
    input::ElfSource,
    mmap::ProtFlags,
};
use core::ops::Range;
use dynamic::ElfRawDynamic;
use elf::{
    ElfBytes, ParseError,
    abi::{PT_LOAD, SHT_DYNAMIC, SHT_DYNSYM},
    endian::LittleEndian,
    parse::ParseAt,
    relocation::{Rela, RelaIterator},
    string_table::StringTable,
};
use std::fmt::{Debug, Display};

/// One `PT_LOAD` program header, reduced to what mapping needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadSegment {
    /// Final protection of the segment.
    pub prot: ProtFlags,
    /// On-disk virtual address.
    pub vaddr: usize,
    /// Size in memory.
    pub memsz: usize,
    /// Offset of the segment contents in the file.
    pub offset: usize,
    /// Size of the segment contents in the file.
    pub filesz: usize,
}

impl From<&ElfPhdr> for LoadSegment {
    fn from(phdr: &ElfPhdr) -> Self {
        LoadSegment {
            prot: ProtFlags::from_segment_flags(phdr.p_flags),
            vaddr: phdr.p_vaddr as usize,
            memsz: phdr.p_memsz as usize,
            offset: phdr.p_offset as usize,
            filesz: phdr.p_filesz as usize,
        }
    }
}

/// The smallest address range covering every `PT_LOAD` segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvexHull {
    pub low: usize,
    pub high: usize,
}

impl ConvexHull {
    #[inline]
    pub fn len(&self) -> usize {
        self.high - self.low
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.high == self.low
    }
}

/// A non-fatal finding recorded while parsing.
///
/// Parsing continues past these; they are kept on the image so callers can
/// report them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseNote {
    /// No dynamic string table could be located.
    MissingStrTab,
    /// The dynamic symbol table is empty.
    MissingSymbols,
    /// The image declares neither `DT_RPATH` nor `DT_RUNPATH`.
    MissingRunPath,
}

impl Display for ParseNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ParseNote::MissingStrTab => "no dynamic string table",
            ParseNote::MissingSymbols => "empty dynamic symbol table",
            ParseNote::MissingRunPath => "no run path",
        })
    }
}

/// Translates an on-disk virtual address into a file offset through the
/// `PT_LOAD` segment that contains it. Addresses outside every segment's file
/// image are returned unchanged.
pub(crate) fn vaddr_to_offset(segments: &[LoadSegment], vaddr: usize) -> usize {
    segments
        .iter()
        .find(|seg| vaddr >= seg.vaddr && vaddr - seg.vaddr < seg.filesz)
        .map(|seg| seg.offset + (vaddr - seg.vaddr))
        .unwrap_or(vaddr)
}

/// A parsed ELF64 file.
pub struct ElfImage {
    source: ElfSource,
    header: ElfHeader,
    segments: Vec<LoadSegment>,
    dynamic: Option<Vec<ElfDyn>>,
    symbols: Vec<ElfSymbol>,
    dynstr: Option<Range<usize>>,
    relocations: Vec<ElfRela>,
    needed: Vec<String>,
    run_paths: Vec<String>,
    notes: Vec<ParseNote>,
}

impl Debug for ElfImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElfImage")
            .field("name", &self.source.name())
            .field("segments", &self.segments.len())
            .field("symbols", &self.symbols.len())
            .field("relocations", &self.relocations.len())
            .field("needed", &self.needed)
            .field("run_paths", &self.run_paths)
            .finish()
    }
}

impl ElfImage {
    /// Parses `source`, locating `.dynstr` by section adjacency.
    pub fn parse(source: ElfSource) -> Result<Self> {
        Self::parse_with(source, &SectionAdjacency)
    }

    /// Parses `source` with a custom dynamic string table lookup.
    pub fn parse_with(source: ElfSource, locator: &dyn StrTabLocator) -> Result<Self> {
        let parsed = Parser::new(source.bytes(), source.name()).run(locator)?;
        Ok(ElfImage {
            source,
            header: parsed.header,
            segments: parsed.segments,
            dynamic: parsed.dynamic,
            symbols: parsed.symbols,
            dynstr: parsed.dynstr,
            relocations: parsed.relocations,
            needed: parsed.needed,
            run_paths: parsed.run_paths,
            notes: parsed.notes,
        })
    }

    /// The name the image was opened under.
    #[inline]
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// The raw file contents.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.source.bytes()
    }

    #[inline]
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// The on-disk entry point address.
    #[inline]
    pub fn entry(&self) -> usize {
        self.header.e_entry as usize
    }

    /// `PT_LOAD` segments in program header order.
    #[inline]
    pub fn segments(&self) -> &[LoadSegment] {
        &self.segments
    }

    /// The dynamic entries, `None` for static images.
    #[inline]
    pub fn dynamic(&self) -> Option<&[ElfDyn]> {
        self.dynamic.as_deref()
    }

    /// The dynamic symbol table; indices match relocation symbol indices.
    #[inline]
    pub fn symbols(&self) -> &[ElfSymbol] {
        &self.symbols
    }

    #[inline]
    pub fn symbol(&self, index: usize) -> Option<&ElfSymbol> {
        self.symbols.get(index)
    }

    /// RELA entries in table order.
    #[inline]
    pub fn relocations(&self) -> &[ElfRela] {
        &self.relocations
    }

    /// `DT_NEEDED` names in tag order.
    #[inline]
    pub fn needed(&self) -> &[String] {
        &self.needed
    }

    /// Colon-split `DT_RPATH`/`DT_RUNPATH` components, unsubstituted.
    #[inline]
    pub fn run_paths(&self) -> &[String] {
        &self.run_paths
    }

    #[inline]
    pub fn notes(&self) -> &[ParseNote] {
        &self.notes
    }

    /// Looks up a string in this image's dynamic string table.
    pub fn dynstr(&self, offset: usize) -> Result<&str> {
        let strings = self
            .dynstr
            .clone()
            .and_then(|range| self.bytes().get(range))
            .map(StringTable::new)
            .ok_or_else(|| parse_dynamic_error("image has no dynamic string table"))?;
        read_str(&strings, offset)
    }

    /// The name of the dynamic symbol at `index`.
    pub fn symbol_name(&self, index: usize) -> Result<&str> {
        let sym = self.symbol(index).ok_or_else(|| {
            parse_dynamic_error(format!("symbol index {index} out of range"))
        })?;
        self.dynstr(sym.st_name as usize)
    }

    /// The address range spanned by all `PT_LOAD` segments, `None` when the
    /// image has none.
    pub fn convex_hull(&self) -> Option<ConvexHull> {
        let low = self.segments.iter().map(|seg| seg.vaddr).min()?;
        let high = self
            .segments
            .iter()
            .map(|seg| seg.vaddr.saturating_add(seg.memsz))
            .max()?;
        Some(ConvexHull { low, high })
    }
}

fn read_str<'data>(strings: &StringTable<'data>, offset: usize) -> Result<&'data str> {
    strings
        .get(offset)
        .map_err(|err| parse_dynamic_error(format!("string at {offset:#x}: {err}")))
}

struct Parsed {
    header: ElfHeader,
    segments: Vec<LoadSegment>,
    dynamic: Option<Vec<ElfDyn>>,
    symbols: Vec<ElfSymbol>,
    dynstr: Option<Range<usize>>,
    relocations: Vec<ElfRela>,
    needed: Vec<String>,
    run_paths: Vec<String>,
    notes: Vec<ParseNote>,
}

struct Parser<'data> {
    data: &'data [u8],
    name: &'data str,
}

impl<'data> Parser<'data> {
    fn new(data: &'data [u8], name: &'data str) -> Self {
        Self { data, name }
    }

    fn run(self, locator: &dyn StrTabLocator) -> Result<Parsed> {
        let header = ElfHeader::new(self.data)?;
        let file = ElfBytes::<LittleEndian>::minimal_parse(self.data)
            .map_err(|err| self.header_table_error(&header, err))?;
        let shdrs: Vec<ElfShdr> = file
            .section_headers()
            .map(|shdrs| shdrs.iter().collect())
            .unwrap_or_default();
        let segments: Vec<LoadSegment> = file
            .segments()
            .map(|phdrs| {
                phdrs
                    .iter()
                    .filter(|phdr| phdr.p_type == PT_LOAD)
                    .map(|phdr| LoadSegment::from(&phdr))
                    .collect()
            })
            .unwrap_or_default();
        let mut parsed = Parsed {
            header,
            segments,
            dynamic: None,
            symbols: Vec::new(),
            dynstr: None,
            relocations: Vec::new(),
            needed: Vec::new(),
            run_paths: Vec::new(),
            notes: Vec::new(),
        };

        let Some(dynamic_shdr) = shdrs.iter().find(|shdr| shdr.sh_type == SHT_DYNAMIC) else {
            log::debug!("[{}] no dynamic section, treating as static", self.name);
            return Ok(parsed);
        };
        let dynsym_index = shdrs
            .iter()
            .position(|shdr| shdr.sh_type == SHT_DYNSYM)
            .ok_or(Error::MissingDynSym)?;
        let entries: Vec<ElfDyn> = self
            .section::<ElfDyn>(&file, dynamic_shdr, "dynamic section")?
            .iter()
            .collect();
        let raw = ElfRawDynamic::new(&entries);

        let dynstr = locator.locate(&StrTabContext {
            shdrs: &shdrs,
            dynsym_index,
            strtab_addr: raw.strtab_off,
            strtab_size: raw.strtab_size,
            segments: &parsed.segments,
        });
        let strings = match &dynstr {
            Some(range) => {
                let bytes = self.data.get(range.clone()).ok_or_else(|| {
                    parse_shdr_error(format!("dynamic string table {range:#x?} lies outside the file"))
                })?;
                Some(StringTable::new(bytes))
            }
            None => {
                parsed.notes.push(ParseNote::MissingStrTab);
                None
            }
        };

        parsed.symbols = self
            .section::<ElfSymbol>(&file, &shdrs[dynsym_index], "dynamic symbol table")?
            .iter()
            .collect();
        if parsed.symbols.is_empty() {
            parsed.notes.push(ParseNote::MissingSymbols);
        }

        if raw.rpath_off.is_empty() && raw.runpath_off.is_empty() {
            parsed.notes.push(ParseNote::MissingRunPath);
        }
        // Without a string table the names cannot be read; the note above
        // already records why they are missing.
        if let Some(strings) = &strings {
            parsed.run_paths = run_paths(&raw, strings)?;
            parsed.needed = needed(&raw, strings)?;
        }
        parsed.relocations = self.relocations(&raw, &parsed.segments)?;
        parsed.dynamic = Some(entries);
        parsed.dynstr = dynstr;
        Ok(parsed)
    }

    /// Names the header table `minimal_parse` could not locate. The section
    /// header table is checked first.
    fn header_table_error(&self, header: &ElfHeader, err: ParseError) -> Error {
        let len = self.data.len() as u64;
        let fits = |offset: u64, entsize: u16, count: u16, expected: usize| {
            usize::from(entsize) == expected
                && offset
                    .checked_add(u64::from(entsize) * u64::from(count))
                    .is_some_and(|end| end <= len)
        };
        if header.e_shoff != 0
            && !fits(
                header.e_shoff,
                header.e_shentsize,
                header.e_shnum,
                ElfShdr::size_for(E_CLASS),
            )
        {
            parse_shdr_error(format!(
                "section header table ({} x {} bytes at {:#x}): {err}",
                header.e_shnum, header.e_shentsize, header.e_shoff
            ))
        } else {
            parse_phdr_error(format!(
                "program header table ({} x {} bytes at {:#x}): {err}",
                header.e_phnum, header.e_phentsize, header.e_phoff
            ))
        }
    }

    /// The contents of a section holding an array of `P`.
    fn section<P: ParseAt>(
        &self,
        file: &ElfBytes<'data, LittleEndian>,
        shdr: &ElfShdr,
        what: &str,
    ) -> Result<ElfTable<'data, P>> {
        file.section_data(shdr)
            .and_then(|(data, _)| table::<P>(data, shdr.sh_entsize))
            .map_err(|err| {
                parse_shdr_error(format!(
                    "{what} ({:#x} bytes at {:#x}): {err}",
                    shdr.sh_size, shdr.sh_offset
                ))
            })
    }

    fn relocations(&self, raw: &ElfRawDynamic, segments: &[LoadSegment]) -> Result<Vec<ElfRela>> {
        let Some((addr, size, entsize)) = raw.rela() else {
            return Ok(Vec::new());
        };
        Rela::validate_entsize(E_CLASS, entsize)
            .map_err(|err| parse_dynamic_error(format!("DT_RELAENT: {err}")))?;
        let offset = vaddr_to_offset(segments, addr);
        let bytes = offset
            .checked_add(size)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                parse_dynamic_error(format!(
                    "relocation table ({size:#x} bytes at {offset:#x}) lies outside the file"
                ))
            })?;
        Ok(RelaIterator::<LittleEndian>::new(LittleEndian, E_CLASS, bytes)
            .map(ElfRela::from)
            .collect())
    }
}

fn run_paths(raw: &ElfRawDynamic, strings: &StringTable<'_>) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for offset in raw.run_path_offsets() {
        paths.extend(read_str(strings, offset)?.split(':').map(str::to_owned));
    }
    Ok(paths)
}

fn needed(raw: &ElfRawDynamic, strings: &StringTable<'_>) -> Result<Vec<String>> {
    raw.needed_libs
        .iter()
        .map(|&offset| read_str(strings, offset).map(str::to_owned))
        .collect()
}
