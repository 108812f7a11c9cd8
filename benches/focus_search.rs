use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use focus_retrieval::{
    Collection, EmbeddingProvider, ImageEmbedding, ImageId, ImageRef, InMemoryVectorIndex,
    PatchEmbedding, RecommendError, RecommenderConfig, Result, SimilarityAggregator, VectorIndex,
};

const DIM: usize = 128;
const PATCHES_PER_IMAGE: usize = 64;

/// Aggregation benches never reach the model.
struct NoEmbeddings;

impl EmbeddingProvider for NoEmbeddings {
    fn embed_image(&self, image: &ImageRef) -> Result<ImageEmbedding> {
        Err(RecommendError::embedding(format!("{image}: not available")))
    }

    fn embed_patches(&self, image: &ImageRef) -> Result<PatchEmbedding> {
        Err(RecommendError::embedding(format!("{image}: not available")))
    }
}

fn vector(seed: usize) -> Vec<f32> {
    (0..DIM)
        .map(|d| (((seed * 131 + d * 7) % 101) as f32 / 50.0) - 1.0)
        .collect()
}

fn populated_index(images: usize) -> InMemoryVectorIndex {
    let index = InMemoryVectorIndex::new();
    index.recreate(Collection::PatchEmbeddings).unwrap();
    let entries = (0..images)
        .flat_map(|i| {
            (0..PATCHES_PER_IMAGE).map(move |p| (ImageId(i as u64), vector(i * PATCHES_PER_IMAGE + p)))
        })
        .collect();
    index.insert(Collection::PatchEmbeddings, entries).unwrap();
    index
}

fn bench_focus_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("focus_search");
    group.sample_size(10);

    let focus: Vec<Vec<f32>> = (0..8).map(|p| vector(10_000 + p)).collect();
    for images in [100usize, 500] {
        let index = Arc::new(populated_index(images));
        let candidates = index.image_ids(Collection::PatchEmbeddings).unwrap();
        let aggregator =
            SimilarityAggregator::new(Arc::new(NoEmbeddings), index, None, &RecommenderConfig::default())
                .unwrap();

        group.bench_with_input(
            BenchmarkId::new("rank_by_patches", images),
            &candidates,
            |bencher, candidates| {
                bencher.iter(|| black_box(aggregator.rank_by_patches(black_box(&focus), candidates).unwrap()))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_focus_search);
criterion_main!(benches);
