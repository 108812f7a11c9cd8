//! Ranking strategies for catalog images
//!
//! - **Whole-image**: one query vector, one nearest-neighbor search over
//!   `image_embeddings`.
//! - **Focus**: the query's patch grid is narrowed to the foreground cells
//!   under the focus rectangle; each catalog image is scored by the mean over
//!   focus patches of the best cosine similarity among that image's stored
//!   patches.
//!
//! Focus mode falls back to whole-image ranking when the rectangle covers no
//! foreground patch. The fallback is a normal outcome reported as
//! [`RankingMode::FocusFallback`], not an error.
//!
//! Focus scoring costs one filtered search per (catalog image, focus patch)
//! pair. Per-image scoring is independent, so it fans out over a rayon pool;
//! the final ordering does not depend on completion or enumeration order.

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::RecommenderConfig;
use crate::core::foreground::ForegroundClassifier;
use crate::core::grid::GridCoordinateMapper;
use crate::embedding::{EmbeddingProvider, PatchEmbedding};
use crate::error::Result;
use crate::index::{Collection, VectorIndex};
use crate::similarity::is_zero_vector;
use crate::types::{FocusRegion, ImageId, ImageRef};

/// How a ranking was produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankingMode {
    /// Whole-image similarity was requested
    WholeImage,
    /// Patch-level focus aggregation
    Focus,
    /// Focus was requested but no foreground patch was selected
    FocusFallback,
}

impl RankingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingMode::WholeImage => "whole_image",
            RankingMode::Focus => "focus",
            RankingMode::FocusFallback => "focus_fallback",
        }
    }
}

impl fmt::Display for RankingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked catalog image
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankedImage {
    pub image_id: ImageId,
    /// Cosine similarity (whole-image) or mean best-patch similarity (focus)
    pub score: f32,
    /// Rank in results (1-indexed)
    pub rank: usize,
}

/// Ordered results plus the mode that produced them
#[derive(Clone, Debug, PartialEq)]
pub struct Ranking {
    pub mode: RankingMode,
    pub results: Vec<RankedImage>,
}

impl Ranking {
    pub fn image_ids(&self) -> Vec<ImageId> {
        self.results.iter().map(|r| r.image_id).collect()
    }
}

/// Computes whole-image and focus rankings against a vector index.
pub struct SimilarityAggregator<E: ?Sized, V: ?Sized> {
    embedder: Arc<E>,
    index: Arc<V>,
    classifier: Option<Arc<ForegroundClassifier>>,
    top_k: usize,
    pool: rayon::ThreadPool,
}

impl<E, V> SimilarityAggregator<E, V>
where
    E: EmbeddingProvider + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(
        embedder: Arc<E>,
        index: Arc<V>,
        classifier: Option<Arc<ForegroundClassifier>>,
        config: &RecommenderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pool = RecommenderConfig::thread_pool(config.query_threads)?;
        Ok(Self {
            embedder,
            index,
            classifier,
            top_k: config.top_k,
            pool,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Rank catalog images by whole-image cosine similarity.
    pub fn whole_image(&self, image: &ImageRef) -> Result<Ranking> {
        self.rank_whole_image(image, RankingMode::WholeImage)
    }

    /// Rank catalog images by the patches under `region`.
    pub fn focus(&self, image: &ImageRef, region: &FocusRegion) -> Result<Ranking> {
        let Some(classifier) = self.classifier.as_deref() else {
            return self.fall_back(image, "no fitted foreground pipeline");
        };

        let patches = self.embedder.embed_patches(image)?;
        patches.validate()?;

        let focus = focus_embeddings(patches, region, classifier)?;
        if focus.is_empty() {
            return self.fall_back(image, "focus region has no foreground patches");
        }

        let candidates = self.index.image_ids(Collection::PatchEmbeddings)?;
        tracing::debug!(
            focus_patches = focus.len(),
            candidates = candidates.len(),
            "scoring catalog by focus patches"
        );
        let results = self.rank_by_patches(&focus, &candidates)?;
        Ok(Ranking {
            mode: RankingMode::Focus,
            results,
        })
    }

    /// Score each candidate by mean best-patch similarity and keep the top k.
    ///
    /// Ties are broken by image id, so the result does not depend on the
    /// order of `candidates`.
    pub fn rank_by_patches(
        &self,
        focus: &[Vec<f32>],
        candidates: &[ImageId],
    ) -> Result<Vec<RankedImage>> {
        let scored: Vec<Option<(ImageId, f32)>> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|&image_id| -> Result<Option<(ImageId, f32)>> {
                    let score = mean_best_similarity(self.index.as_ref(), focus, image_id)?;
                    Ok(score.map(|s| (image_id, s)))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut ranked: Vec<(ImageId, f32)> = scored.into_iter().flatten().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(self.top_k);

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(idx, (image_id, score))| RankedImage {
                image_id,
                score,
                rank: idx + 1,
            })
            .collect())
    }

    fn rank_whole_image(&self, image: &ImageRef, mode: RankingMode) -> Result<Ranking> {
        let embedding = self.embedder.embed_image(image)?;
        embedding.validate()?;

        let hits = self.index.search(
            Collection::ImageEmbeddings,
            &embedding.embedding,
            self.top_k,
            None,
        )?;
        let results = hits
            .into_iter()
            .enumerate()
            .map(|(idx, hit)| RankedImage {
                image_id: hit.image_id,
                score: hit.similarity,
                rank: idx + 1,
            })
            .collect();
        Ok(Ranking { mode, results })
    }

    fn fall_back(&self, image: &ImageRef, reason: &str) -> Result<Ranking> {
        tracing::info!(
            mode = RankingMode::FocusFallback.as_str(),
            image = %image,
            reason,
            "falling back to whole-image ranking"
        );
        self.rank_whole_image(image, RankingMode::FocusFallback)
    }
}

/// Foreground patch vectors under the focus rectangle.
///
/// Background patches are zeroed across the whole grid first, then the cells
/// covered by the rectangle are read out and zero rows dropped.
pub fn focus_embeddings(
    patches: PatchEmbedding,
    region: &FocusRegion,
    classifier: &ForegroundClassifier,
) -> Result<Vec<Vec<f32>>> {
    let mapper = GridCoordinateMapper::new(patches.patch_size);
    let cells = mapper.map(&region.rect, region.surface, patches.image_shape());
    if cells.is_empty() {
        return Ok(Vec::new());
    }

    let grid = patches.grid();
    let mut rows = patches.embedding;
    classifier.zero_background(&mut rows)?;

    Ok(cells
        .iter()
        .filter_map(|cell| rows.get(cell.flat_index(grid)))
        .filter(|row| !is_zero_vector(row))
        .cloned()
        .collect())
}

/// Mean over focus patches of the best similarity within one catalog image.
///
/// `None` if the image has no stored patch to compare against.
pub fn mean_best_similarity<V>(
    index: &V,
    focus: &[Vec<f32>],
    image_id: ImageId,
) -> Result<Option<f32>>
where
    V: VectorIndex + ?Sized,
{
    let mut total = 0.0f64;
    let mut matched = 0usize;
    for patch in focus {
        let hits = index.search(Collection::PatchEmbeddings, patch, 1, Some(image_id))?;
        if let Some(best) = hits.first() {
            total += best.similarity as f64;
            matched += 1;
        }
    }
    if matched == 0 {
        return Ok(None);
    }
    Ok(Some((total / matched as f64) as f32))
}
