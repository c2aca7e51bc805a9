use criterion::{Criterion, criterion_group, criterion_main};
use elf_ld::{
    CopyStrategy, ElfImage, ElfSource, LoadedObject,
    relocation::{CopyMissPolicy, relocate_all},
};
use gen_elf::{Arch, ImageWriter, RelocDesc, SymbolDesc};
use std::hint::black_box;

const SLOTS: u64 = 512;

fn image_bytes() -> Vec<u8> {
    let arch = Arch::host();
    let mut writer = ImageWriter::new(arch)
        .with_data(&vec![0; (SLOTS * 16) as usize])
        .symbol(SymbolDesc::data("table", 0, SLOTS * 16));
    for slot in 0..SLOTS {
        writer = writer
            .reloc(RelocDesc::relative(arch, slot * 16).with_addend(slot as i64))
            .reloc(RelocDesc::abs(arch, "table", slot * 16 + 8));
    }
    writer.write().unwrap().data
}

fn parse_benchmark(c: &mut Criterion) {
    let bytes = image_bytes();
    c.bench_function("elf_ld:parse", |b| {
        b.iter(|| {
            let image = ElfImage::parse(ElfSource::from_bytes("bench.so", bytes.clone())).unwrap();
            black_box(image.relocations().len())
        });
    });
}

fn relocate_benchmark(c: &mut Criterion) {
    let bytes = image_bytes();
    let image = ElfImage::parse(ElfSource::from_bytes("bench.so", bytes)).unwrap();
    let mut objects = vec![LoadedObject::load("bench.so", image, CopyStrategy::PerSegment).unwrap()];
    c.bench_function("elf_ld:relocate", |b| {
        b.iter(|| relocate_all(black_box(&mut objects), CopyMissPolicy::Fail).unwrap());
    });
}

criterion_group!(benches, parse_benchmark, relocate_benchmark);
criterion_main!(benches);
