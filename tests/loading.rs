mod common;

use common::{Fixture, arch};
use elf_ld::{
    ConvexHull, CopyStrategy, ElfImage, ElfSource, Error, LoadedObject, ParseNote, StrTabLookup,
    elf::abi::{PF_R, PF_W, PF_X},
    image::{StrTabContext, StrTabLocator},
    mmap::ProtFlags,
};
use gen_elf::{ImageWriter, RawSegment, RelocDesc, SymbolDesc, write_segments_only};
use rstest::rstest;
use std::ops::Range;

fn parse(writer: &ImageWriter) -> ElfImage {
    let out = writer.write().unwrap();
    ElfImage::parse(ElfSource::from_bytes("test.so", out.data)).unwrap()
}

#[rstest]
fn segments_keep_program_header_order() {
    let bytes = write_segments_only(
        arch(),
        0x1000,
        &[
            RawSegment {
                flags: PF_R | PF_X,
                vaddr: 0x1000,
                memsz: 0x2000,
            },
            RawSegment {
                flags: PF_R | PF_W,
                vaddr: 0x4000,
                memsz: 0x500,
            },
        ],
    )
    .unwrap();
    let image = ElfImage::parse(ElfSource::from_bytes("raw", bytes)).unwrap();
    let segments = image.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!((segments[0].vaddr, segments[0].memsz), (0x1000, 0x2000));
    assert_eq!(segments[0].prot, ProtFlags::PROT_READ | ProtFlags::PROT_EXEC);
    assert_eq!((segments[1].vaddr, segments[1].memsz), (0x4000, 0x500));
    assert_eq!(segments[1].prot, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE);
    assert_eq!(
        image.convex_hull(),
        Some(ConvexHull {
            low: 0x1000,
            high: 0x4500
        })
    );
    assert!(image.dynamic().is_none());
}

#[rstest]
fn no_load_segments_means_no_hull() {
    let bytes = write_segments_only(arch(), 0, &[]).unwrap();
    let image = ElfImage::parse(ElfSource::from_bytes("empty", bytes)).unwrap();
    assert!(image.convex_hull().is_none());
    let err = LoadedObject::load("empty", image, CopyStrategy::PerSegment).unwrap_err();
    assert!(matches!(err, Error::Mmap { .. }));
}

#[rstest]
#[case(u64::MAX - 0x10)]
#[case(u64::MAX)]
fn segment_larger_than_memory_fails_to_map(#[case] memsz: u64) {
    let bytes = write_segments_only(
        arch(),
        0,
        &[RawSegment {
            flags: PF_R | PF_W,
            vaddr: 0,
            memsz,
        }],
    )
    .unwrap();
    let image = ElfImage::parse(ElfSource::from_bytes("huge", bytes)).unwrap();
    let err = LoadedObject::load("huge", image, CopyStrategy::PerSegment).unwrap_err();
    assert!(matches!(err, Error::Mmap { .. }));
}

#[rstest]
fn static_image_has_no_dynamic_data() {
    let image = parse(&ImageWriter::new(arch()).without_dynamic().with_data(&[1; 8]));
    assert!(image.dynamic().is_none());
    assert!(image.symbols().is_empty());
    assert!(image.needed().is_empty());
    assert!(image.run_paths().is_empty());
    assert!(image.relocations().is_empty());
    assert_eq!(image.segments().len(), 2);
}

#[rstest]
fn dynamic_section_without_dynsym_fails() {
    let out = ImageWriter::new(arch()).without_dynsym().write().unwrap();
    let err = ElfImage::parse(ElfSource::from_bytes("nosym.so", out.data)).unwrap_err();
    assert!(matches!(err, Error::MissingDynSym));
}

#[rstest]
fn missing_relaent_yields_no_relocations() {
    let arch = arch();
    let image = parse(
        &ImageWriter::new(arch)
            .with_data(&[0; 8])
            .reloc(RelocDesc::relative(arch, 0))
            .without_relaent(),
    );
    assert!(image.relocations().is_empty());
}

#[rstest]
fn relocation_entries_are_decoded_in_order() {
    let arch = arch();
    let writer = ImageWriter::new(arch)
        .with_data(&[0; 16])
        .symbol(SymbolDesc::data("first", 0, 8))
        .symbol(SymbolDesc::data("second", 8, 8))
        .reloc(RelocDesc::abs(arch, "second", 0))
        .reloc(RelocDesc::relative(arch, 8).with_addend(-8));
    let data = writer.layout().data_vaddr as usize;
    let image = parse(&writer);
    let relocs = image.relocations();
    assert_eq!(relocs.len(), 2);
    assert_eq!(relocs[0].r_type(), arch.abs_reloc());
    assert_eq!(relocs[0].r_symbol(), 2);
    assert_eq!(relocs[0].r_offset(), data);
    assert_eq!(relocs[1].r_type(), arch.relative_reloc());
    assert_eq!(relocs[1].r_symbol(), 0);
    assert_eq!(relocs[1].r_addend(), -8);
    assert_eq!(image.symbol_name(2).unwrap(), "second");
}

#[rstest]
fn run_paths_keep_empty_components_rpath_first() {
    let image = parse(
        &ImageWriter::new(arch())
            .runpath("/run::$ORIGIN:")
            .rpath("/old")
            .needed("liba.so")
            .needed("libb.so"),
    );
    assert_eq!(image.run_paths(), ["/old", "/run", "", "$ORIGIN", ""]);
    assert_eq!(image.needed(), ["liba.so", "libb.so"]);
    assert!(!image.notes().contains(&ParseNote::MissingRunPath));
}

#[rstest]
fn notes_are_soft() {
    let image = parse(&ImageWriter::new(arch()));
    assert!(image.notes().contains(&ParseNote::MissingRunPath));
}

struct NoStrTab;

impl StrTabLocator for NoStrTab {
    fn locate(&self, _: &StrTabContext<'_>) -> Option<Range<usize>> {
        None
    }
}

#[rstest]
fn names_are_skipped_without_a_string_table() {
    let arch = arch();
    let out = ImageWriter::new(arch)
        .needed("liba.so")
        .runpath("$ORIGIN")
        .with_data(&[0; 8])
        .reloc(RelocDesc::relative(arch, 0))
        .write()
        .unwrap();
    let image = ElfImage::parse_with(ElfSource::from_bytes("nostr.so", out.data), &NoStrTab).unwrap();
    assert!(image.notes().contains(&ParseNote::MissingStrTab));
    assert!(image.needed().is_empty());
    assert!(image.run_paths().is_empty());
    assert_eq!(image.relocations().len(), 1);
    assert!(image.dynstr(0).is_err());
}

#[rstest]
#[case(StrTabLookup::LinkedSection)]
#[case(StrTabLookup::DynamicTag)]
fn strtab_found_when_not_adjacent(#[case] lookup: StrTabLookup) {
    let writer = ImageWriter::new(arch())
        .needed("libdep.so")
        .symbol(SymbolDesc::text("main", 0, 6))
        .dynstr_not_adjacent();
    let out = writer.write().unwrap();
    let image = ElfImage::parse_with(ElfSource::from_bytes("far.so", out.data), &lookup).unwrap();
    assert_eq!(image.needed(), ["libdep.so"]);
    assert_eq!(image.symbol_name(1).unwrap(), "main");
}

#[rstest]
fn lookups_agree_on_linker_layout() {
    let writer = ImageWriter::new(arch()).needed("libdep.so");
    let out = writer.write().unwrap();
    for lookup in [
        StrTabLookup::SectionAdjacency,
        StrTabLookup::LinkedSection,
        StrTabLookup::DynamicTag,
    ] {
        let locator: &dyn StrTabLocator = &lookup;
        let image =
            ElfImage::parse_with(ElfSource::from_bytes("near.so", out.data.clone()), locator)
                .unwrap();
        assert_eq!(image.needed(), ["libdep.so"], "{lookup:?}");
    }
}

#[rstest]
fn parsing_is_idempotent() {
    let arch = arch();
    let writer = ImageWriter::new(arch)
        .with_data(&[7; 32])
        .needed("libx.so")
        .runpath("$ORIGIN")
        .symbol(SymbolDesc::data("v", 0, 8))
        .reloc(RelocDesc::abs(arch, "v", 8))
        .reloc(RelocDesc::relative(arch, 16));
    let first = parse(&writer);
    let second = parse(&writer);
    assert_eq!(first.segments(), second.segments());
    assert_eq!(first.symbols(), second.symbols());
    assert_eq!(first.relocations(), second.relocations());
    assert_eq!(first.needed(), second.needed());
    assert_eq!(first.run_paths(), second.run_paths());
    assert_eq!(first.convex_hull(), second.convex_hull());
}

#[rstest]
#[case(CopyStrategy::PerSegment)]
#[case(CopyStrategy::WholeImage)]
fn file_contents_land_at_base_plus_vaddr(#[case] strategy: CopyStrategy) {
    let fixture = Fixture::new(&format!("copy-{strategy:?}"));
    let writer = ImageWriter::new(arch())
        .with_data(&0x0102_0304_0506_0708u64.to_le_bytes())
        .with_bss(0x20);
    let path = fixture.write("data.so", &writer);
    let layout = writer.layout();
    let image = ElfImage::parse(ElfSource::from_path(&path).unwrap()).unwrap();
    let object = LoadedObject::load(&path, image, strategy).unwrap();
    assert_eq!(
        common::read_u64(&object, layout.data_vaddr),
        0x0102_0304_0506_0708
    );
    // A whole-image copy also brings in whatever follows the data in the file.
    if strategy == CopyStrategy::PerSegment {
        assert_eq!(common::read_u64(&object, layout.data_vaddr + 8), 0);
    }
    let code = object
        .read_at(object.base() + layout.text_vaddr as usize, layout.text_size as usize)
        .unwrap();
    assert_eq!(code, arch().return_code(0));
}

#[rstest]
fn truncated_file_is_a_parse_error() {
    let out = ImageWriter::new(arch()).write().unwrap();
    let cut = out.data[..out.data.len() - 10].to_vec();
    assert!(ElfImage::parse(ElfSource::from_bytes("cut.so", cut)).is_err());
}
