//! Offline index construction
//!
//! A rebuild runs in three phases:
//!
//! ```text
//!   catalog ──▶ embed (parallel, bounded) ──▶ barrier
//!                                               │
//!                          fit foreground pipeline over every patch
//!                                               │
//!          recreate collections ──▶ insert image vectors + foreground patches
//! ```
//!
//! Nothing is written to the index until the fit has succeeded, so a failed
//! embedding request or a degenerate corpus leaves the previous collections
//! untouched. The fitted pipeline is staged beside its target and only moved
//! into place after both collections are filled; a rebuild that fails at the
//! index keeps the previously persisted pipeline. An empty catalog removes it.

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::RecommenderConfig;
use crate::core::foreground::ForegroundClassifier;
use crate::embedding::{EmbeddingProvider, ImageEmbedding, PatchEmbedding};
use crate::error::{RecommendError, Result};
use crate::index::{Collection, VectorIndex};
use crate::types::{ImageId, ImageRef};

/// One catalog image to index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogImage {
    pub image_id: ImageId,
    pub image: ImageRef,
}

impl CatalogImage {
    pub fn new(image_id: ImageId, image: ImageRef) -> Self {
        Self { image_id, image }
    }
}

/// Outcome of a rebuild
#[derive(Clone, Debug)]
pub struct BuildReport {
    /// Catalog images indexed
    pub image_count: usize,
    /// Patch embeddings produced by the model
    pub patch_count: usize,
    /// Patch embeddings kept after foreground filtering
    pub retained_patch_count: usize,
    /// Fitted pipeline; `None` for an empty catalog
    pub classifier: Option<Arc<ForegroundClassifier>>,
}

struct EmbeddedImage {
    image_id: ImageId,
    image: ImageEmbedding,
    patches: PatchEmbedding,
}

/// Builds both collections and the foreground pipeline from a catalog.
pub struct IndexBuilder<E: ?Sized, V: ?Sized> {
    embedder: Arc<E>,
    index: Arc<V>,
    config: RecommenderConfig,
    pool: rayon::ThreadPool,
}

impl<E, V> IndexBuilder<E, V>
where
    E: EmbeddingProvider + ?Sized,
    V: VectorIndex + ?Sized,
{
    /// Create a builder. Embedding requests run on a pool bounded by
    /// `config.ingest_threads`.
    pub fn new(embedder: Arc<E>, index: Arc<V>, config: RecommenderConfig) -> Result<Self> {
        config.validate()?;
        let pool = RecommenderConfig::thread_pool(config.ingest_threads)?;
        Ok(Self {
            embedder,
            index,
            config,
            pool,
        })
    }

    /// Rebuild the index from scratch.
    ///
    /// # Errors
    /// - `InvalidInput` for duplicate image ids
    /// - `CollaboratorUnavailable` if any embedding request fails
    /// - `DegeneratePipeline` if the patch corpus has no variance
    pub fn build(&self, catalog: &[CatalogImage]) -> Result<BuildReport> {
        let mut seen = HashSet::with_capacity(catalog.len());
        if let Some(dup) = catalog.iter().find(|c| !seen.insert(c.image_id)) {
            return Err(RecommendError::InvalidInput(format!(
                "duplicate image id {} in catalog",
                dup.image_id
            )));
        }

        tracing::info!(image_count = catalog.len(), "starting index rebuild");
        let embedded = self.embed_catalog(catalog)?;

        if embedded.is_empty() {
            self.recreate_collections()?;
            if let Some(path) = &self.config.pipeline_path {
                ForegroundClassifier::remove_persisted(path)?;
            }
            tracing::info!("catalog is empty; collections recreated without fitting");
            return Ok(BuildReport {
                image_count: 0,
                patch_count: 0,
                retained_patch_count: 0,
                classifier: None,
            });
        }

        let corpus: Vec<&[f32]> = embedded
            .iter()
            .flat_map(|e| e.patches.embedding.iter().map(Vec::as_slice))
            .collect();
        let patch_count = corpus.len();
        let classifier = match ForegroundClassifier::fit(&corpus) {
            Ok(classifier) => classifier,
            Err(err) => {
                tracing::warn!(patch_count, error = %err, "foreground fit failed; index left untouched");
                return Err(err);
            }
        };
        drop(corpus);

        // The pipeline file is only replaced once both collections are filled.
        let staged = match &self.config.pipeline_path {
            Some(path) => Some(classifier.stage(path)?),
            None => None,
        };

        let (image_count, retained_patch_count) = match self.populate(embedded, &classifier) {
            Ok(counts) => counts,
            Err(err) => {
                tracing::warn!(error = %err, "index population failed; pipeline file left untouched");
                return Err(err);
            }
        };
        if let Some(staged) = staged {
            staged.commit()?;
        }

        tracing::info!(
            image_count,
            patch_count,
            retained_patch_count,
            "index rebuild complete"
        );

        Ok(BuildReport {
            image_count,
            patch_count,
            retained_patch_count,
            classifier: Some(Arc::new(classifier)),
        })
    }

    /// Recreate both collections and insert foreground patches and image
    /// vectors. Returns the image count and the retained patch count.
    fn populate(
        &self,
        embedded: Vec<EmbeddedImage>,
        classifier: &ForegroundClassifier,
    ) -> Result<(usize, usize)> {
        self.recreate_collections()?;

        let image_count = embedded.len();
        let mut image_entries = Vec::with_capacity(image_count);
        let mut retained_patch_count = 0;
        for item in embedded {
            let mask = classifier.mask(&item.patches.embedding)?;
            let retained: Vec<(ImageId, Vec<f32>)> = item
                .patches
                .embedding
                .into_iter()
                .zip(mask)
                .filter(|(_, keep)| *keep)
                .map(|(vector, _)| (item.image_id, vector))
                .collect();
            retained_patch_count += retained.len();
            if !retained.is_empty() {
                self.index.insert(Collection::PatchEmbeddings, retained)?;
            }
            image_entries.push((item.image_id, item.image.embedding));
        }
        self.index.insert(Collection::ImageEmbeddings, image_entries)?;

        tracing::debug!(image_count, retained_patch_count, "collections populated");
        Ok((image_count, retained_patch_count))
    }

    /// Request both embedding shapes for every image; returns only once all
    /// requests have completed.
    fn embed_catalog(&self, catalog: &[CatalogImage]) -> Result<Vec<EmbeddedImage>> {
        let embedded: Vec<EmbeddedImage> = self.pool.install(|| {
            catalog
                .par_iter()
                .map(|entry| -> Result<EmbeddedImage> {
                    let image = self.embedder.embed_image(&entry.image)?;
                    image.validate()?;
                    let patches = self.embedder.embed_patches(&entry.image)?;
                    patches.validate()?;
                    Ok(EmbeddedImage {
                        image_id: entry.image_id,
                        image,
                        patches,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })?;

        if let Some(first) = embedded.first() {
            let image_dim = first.image.embedding.len();
            let patch_dim = first.patches.dimension();
            for item in &embedded {
                if item.image.embedding.len() != image_dim || item.patches.dimension() != patch_dim {
                    return Err(RecommendError::embedding(format!(
                        "inconsistent embedding dimensions for image {}",
                        item.image_id
                    )));
                }
            }
        }

        tracing::debug!(image_count = embedded.len(), "embedding barrier reached");
        Ok(embedded)
    }

    fn recreate_collections(&self) -> Result<()> {
        for collection in Collection::ALL {
            self.index.recreate(collection)?;
        }
        Ok(())
    }
}
