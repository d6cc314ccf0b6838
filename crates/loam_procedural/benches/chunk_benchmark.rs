//! Benchmark for chunk generation and compaction.
//!
//! Run with: cargo bench --package loam_procedural --bench chunk_benchmark

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use loam_procedural::{
    CachedSampler, Chunk, ChunkGenerator, ChunkPos, ChunkState, ClimateSampler, TerrainGenerator,
    WorldSeed,
};

fn generator() -> TerrainGenerator {
    let mut gen = TerrainGenerator::new();
    gen.set_world_seed("bench");
    gen.set_biome_sampler(Arc::new(CachedSampler::new(
        ClimateSampler::new(WorldSeed::from_text("bench")),
        1 << 16,
    )));
    gen
}

fn benchmark_single_chunk(c: &mut Criterion) {
    let gen = generator();

    c.bench_function("single_chunk_generation", |b| {
        let mut coord = 0i32;
        b.iter(|| {
            coord = coord.wrapping_add(1);
            let mut chunk = Chunk::new(ChunkPos::new(coord, 0, coord / 2));
            gen.generate_chunk(&mut chunk).unwrap();
            black_box(chunk)
        });
    });
}

fn benchmark_chunk_grid(c: &mut Criterion) {
    let gen = generator();

    let mut group = c.benchmark_group("chunk_grid");

    // 16x16 columns, 2 chunks tall
    group.throughput(Throughput::Elements(16 * 16 * 2));
    group.bench_function("16x16x2_chunks", |b| {
        b.iter(|| {
            for z in 0..16 {
                for x in 0..16 {
                    for y in 0..2 {
                        let mut chunk = Chunk::new(ChunkPos::new(x, y, z));
                        gen.generate_chunk(&mut chunk).unwrap();
                        black_box(&chunk);
                    }
                }
            }
        });
    });

    group.finish();
}

fn benchmark_deflate(c: &mut Criterion) {
    let gen = generator();
    let mut template = Chunk::new(ChunkPos::new(3, 0, 3));
    template.advance_state(ChunkState::Generating).unwrap();
    gen.generate_chunk(&mut template).unwrap();
    for to in [ChunkState::Generated, ChunkState::PostProcessing, ChunkState::Complete] {
        template.advance_state(to).unwrap();
    }

    c.bench_function("deflate_inflate", |b| {
        b.iter(|| {
            let mut chunk = template.clone();
            chunk.deflate().unwrap();
            chunk.inflate().unwrap();
            black_box(chunk)
        });
    });
}

criterion_group!(benches, benchmark_single_chunk, benchmark_chunk_grid, benchmark_deflate);
criterion_main!(benches);
