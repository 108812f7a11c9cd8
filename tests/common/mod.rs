#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use focus_retrieval::{
    CatalogImage, EmbeddingProvider, GridShape, ImageEmbedding, ImageId, ImageRef, ImageShape,
    InMemoryVectorIndex, PatchEmbedding, RecommendError, Result,
};

pub const PATCH: usize = 14;

/// Embedding model stand-in keyed by image reference.
#[derive(Default)]
pub struct FakeEmbeddingProvider {
    images: HashMap<String, (Vec<f32>, PatchEmbedding)>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, reference: &str, image: Vec<f32>, patches: PatchEmbedding) -> Self {
        self.images.insert(reference.to_string(), (image, patches));
        self
    }

    /// Every request for `reference` fails as if the service returned 503.
    pub fn failing(mut self, reference: &str) -> Self {
        self.failing.insert(reference.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, image: &ImageRef) -> Result<&(Vec<f32>, PatchEmbedding)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(image.as_str()) {
            return Err(RecommendError::embedding(format!("{}: status 503", image)));
        }
        self.images
            .get(image.as_str())
            .ok_or_else(|| RecommendError::embedding(format!("{}: status 404", image)))
    }
}

impl EmbeddingProvider for FakeEmbeddingProvider {
    fn embed_image(&self, image: &ImageRef) -> Result<ImageEmbedding> {
        Ok(ImageEmbedding::new(self.lookup(image)?.0.clone()))
    }

    fn embed_patches(&self, image: &ImageRef) -> Result<PatchEmbedding> {
        Ok(self.lookup(image)?.1.clone())
    }
}

/// Patch response for a `rows x cols` grid of 14px patches, row-major.
pub fn patch_grid(rows: usize, cols: usize, vectors: Vec<Vec<f32>>) -> PatchEmbedding {
    assert_eq!(vectors.len(), rows * cols);
    let dim = vectors[0].len();
    let shape = ImageShape::new(rows * PATCH, cols * PATCH);
    assert_eq!(GridShape::from_image(shape, PATCH), GridShape::new(rows, cols));
    PatchEmbedding {
        embedding: vectors,
        embedding_shape: [rows, cols, dim],
        image_shape: [shape.height, shape.width],
        patch_size: PATCH,
    }
}

pub fn catalog_entry(id: u64, reference: &str) -> CatalogImage {
    CatalogImage::new(ImageId(id), ImageRef::new(reference).unwrap())
}

/// Three catalog images on 2x2 grids plus a query image.
///
/// Foreground patches have a large first component, background patches do
/// not. The query's top-left patch matches image 1 exactly while its
/// whole-image vector is closest to image 2, so focus and whole-image
/// rankings disagree.
pub fn fixture_provider() -> FakeEmbeddingProvider {
    FakeEmbeddingProvider::new()
        .with_image(
            "catalog/1.jpg",
            vec![1.0, 0.0, 0.0],
            patch_grid(
                2,
                2,
                vec![
                    vec![5.0, 1.0, 0.0],
                    vec![5.0, 0.9, 0.1],
                    vec![0.0, 0.0, 1.0],
                    vec![0.0, 0.1, 1.0],
                ],
            ),
        )
        .with_image(
            "catalog/2.jpg",
            vec![0.0, 1.0, 0.0],
            patch_grid(
                2,
                2,
                vec![
                    vec![5.0, 0.0, 1.0],
                    vec![5.0, 0.1, 0.9],
                    vec![0.0, 1.0, 0.0],
                    vec![0.1, 1.0, 0.0],
                ],
            ),
        )
        .with_image(
            "catalog/3.jpg",
            vec![0.0, 0.0, 1.0],
            patch_grid(
                2,
                2,
                vec![
                    vec![5.0, -1.0, 0.0],
                    vec![0.0, 0.0, 1.0],
                    vec![0.0, 0.0, 1.0],
                    vec![0.0, 0.0, 1.0],
                ],
            ),
        )
        .with_image(
            "query.jpg",
            vec![0.1, 0.9, 0.0],
            patch_grid(
                2,
                2,
                vec![
                    vec![5.0, 1.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.0, 0.0, 1.0],
                    vec![0.0, 0.1, 1.0],
                ],
            ),
        )
}

pub fn fixture_catalog() -> Vec<CatalogImage> {
    vec![
        catalog_entry(1, "catalog/1.jpg"),
        catalog_entry(2, "catalog/2.jpg"),
        catalog_entry(3, "catalog/3.jpg"),
    ]
}

pub fn shared(provider: FakeEmbeddingProvider) -> (Arc<FakeEmbeddingProvider>, Arc<InMemoryVectorIndex>) {
    (Arc::new(provider), Arc::new(InMemoryVectorIndex::new()))
}
