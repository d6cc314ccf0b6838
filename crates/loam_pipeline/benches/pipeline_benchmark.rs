//! Benchmark for end-to-end pipeline throughput.
//!
//! Run with: cargo bench --package loam_pipeline --bench pipeline_benchmark

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use loam_pipeline::{
    ChunkProvider, GeneratingChunkProvider, GenerationPipeline, PipelineConfig, RequestOutcome,
    TargetStage, WorldBounds,
};
use loam_procedural::{
    CachedSampler, ChunkGenerator, ChunkPos, ClimateSampler, TerrainGenerator, WorldSeed,
};

const AREA_RADIUS: i32 = 3;

fn generator() -> Arc<dyn ChunkGenerator> {
    let mut gen = TerrainGenerator::new();
    gen.set_world_seed("bench");
    gen.set_biome_sampler(Arc::new(CachedSampler::new(
        ClimateSampler::new(WorldSeed::from_text("bench")),
        1 << 16,
    )));
    Arc::new(gen)
}

/// Fresh provider and pipeline so every iteration starts from an empty world.
fn pipeline(generator: &Arc<dyn ChunkGenerator>) -> GenerationPipeline {
    let config = PipelineConfig {
        bounds: WorldBounds {
            min_y: 0,
            max_y: 1,
            horizontal_radius: Some(AREA_RADIUS + 1),
        },
        ..PipelineConfig::default()
    };
    let provider: Arc<dyn ChunkProvider> = Arc::new(GeneratingChunkProvider::new(config.bounds));
    GenerationPipeline::new(&config, provider, Arc::clone(generator)).unwrap()
}

fn request_area(pipeline: &GenerationPipeline, target: TargetStage) {
    let mut requests = Vec::new();
    for x in -AREA_RADIUS..=AREA_RADIUS {
        for z in -AREA_RADIUS..=AREA_RADIUS {
            for y in 0..=1 {
                requests.push(pipeline.request_chunk(ChunkPos::new(x, y, z), target));
            }
        }
    }
    for request in requests {
        assert!(matches!(request.wait(), RequestOutcome::Reached(_)));
    }
}

fn benchmark_area(c: &mut Criterion) {
    let gen = generator();
    let side = u64::from((2 * AREA_RADIUS + 1).unsigned_abs());

    let mut group = c.benchmark_group("pipeline_area");
    group.sample_size(10);
    group.throughput(Throughput::Elements(side * side * 2));

    group.bench_function("7x7x2_to_complete", |b| {
        b.iter(|| {
            let pipeline = pipeline(&gen);
            request_area(&pipeline, TargetStage::Complete);
        });
    });

    group.bench_function("7x7x2_to_deflated", |b| {
        b.iter(|| {
            let pipeline = pipeline(&gen);
            request_area(&pipeline, TargetStage::Deflated);
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_area);
criterion_main!(benches);
