use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{Array, Array2, ArrayD, IxDyn};

use brainseg::{
    apply, apply_inplace, load_volume, CompiledRemap, LabelTable, LabelVolume, LutParseMode,
    NiftiHeader, RemapTable, VolumeHeader, VoxelType,
};

const DIM: usize = 128;

fn demo_labels() -> ArrayD<i32> {
    Array::from_shape_fn(IxDyn(&[DIM, DIM, DIM]), |idx| ((idx[0] * 7 + idx[1] * 3 + idx[2]) % 180) as i32)
}

fn dense_table() -> RemapTable {
    (0..180).map(|id| (id, (id * 13) % 256)).collect()
}

fn sparse_table() -> RemapTable {
    (0..180).map(|id| (id, 1_000_000 + id * 1_000)).chain(std::iter::once((50_000_000, 1))).collect()
}

fn demo_lut(num_entries: i32) -> String {
    let mut lut = String::from("#No. Label Name:                 R   G   B   A\n\n");
    for id in 0..num_entries {
        lut.push_str(&format!("{:<5} Structure-{:<20} {} {} {} 0\n", id, id, id % 256, (id * 3) % 256, (id * 7) % 256));
    }
    lut
}

fn bench_remap(c: &mut Criterion) {
    let labels = demo_labels();
    let dense = dense_table();
    let sparse = sparse_table();
    assert_eq!("sparse", CompiledRemap::compile(&sparse).strategy());

    c.bench_function("apply_dense", |b| b.iter(|| apply(black_box(&labels), &dense)));
    c.bench_function("apply_sparse", |b| b.iter(|| apply(black_box(&labels), &sparse)));
    c.bench_function("apply_inplace_dense", |b| {
        b.iter_batched(|| labels.clone(), |mut data| apply_inplace(&mut data, &dense), criterion::BatchSize::LargeInput)
    });
}

fn bench_lut(c: &mut Criterion) {
    let lut = demo_lut(1300);
    c.bench_function("parse_lut", |b| {
        b.iter(|| LabelTable::from_str_with_mode(black_box(&lut), LutParseMode::Tolerant).unwrap())
    });
}

fn bench_volume_io(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let header = NiftiHeader::new(&[DIM, DIM, DIM], VoxelType::I16, &Array2::eye(4)).unwrap();
    let volume = LabelVolume { data: demo_labels(), header: VolumeHeader::Nifti(header) };

    let nii = dir.path().join("seg.nii");
    let nii_gz = dir.path().join("seg.nii.gz");
    volume.to_file(&nii).unwrap();
    volume.to_file(&nii_gz).unwrap();

    c.bench_function("load_nii", |b| b.iter(|| load_volume(black_box(&nii)).unwrap()));
    c.bench_function("load_nii_gz", |b| b.iter(|| load_volume(black_box(&nii_gz)).unwrap()));
    c.bench_function("save_nii", |b| b.iter(|| volume.to_file(black_box(&nii)).unwrap()));
}

criterion_group!(benches, bench_remap, bench_lut, bench_volume_io);
criterion_main!(benches);
