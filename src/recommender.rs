//! Public recommendation entry point.
//!
//! [`Recommender`] owns no process-wide state: every call receives its query
//! as a parameter and returns the ranking as a value. The embedding model,
//! the vector index and the fitted foreground pipeline are injected at
//! construction and shared read-only across concurrent calls.

use std::sync::Arc;

use crate::builder::BuildReport;
use crate::config::RecommenderConfig;
use crate::core::foreground::ForegroundClassifier;
use crate::embedding::EmbeddingProvider;
use crate::error::{RecommendError, Result};
use crate::index::VectorIndex;
use crate::search::{RankingMode, SimilarityAggregator};
use crate::types::{ImageId, Query, RecommendRequest, RecommendResponse};

/// Ranked recommendation with the mode that produced it
#[derive(Clone, Debug, PartialEq)]
pub struct Recommendation {
    /// Catalog identifiers, most similar first
    pub image_ids: Vec<ImageId>,
    /// Score of each entry in `image_ids`
    pub scores: Vec<f32>,
    pub mode: RankingMode,
}

/// Selects whole-image or focus ranking for each query.
pub struct Recommender<E: ?Sized, V: ?Sized> {
    aggregator: SimilarityAggregator<E, V>,
}

impl<E, V> Recommender<E, V>
where
    E: EmbeddingProvider + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(
        embedder: Arc<E>,
        index: Arc<V>,
        classifier: Option<Arc<ForegroundClassifier>>,
        config: RecommenderConfig,
    ) -> Result<Self> {
        let aggregator = SimilarityAggregator::new(embedder, index, classifier, &config)?;
        Ok(Self { aggregator })
    }

    /// Serve the index produced by a rebuild in this process.
    pub fn from_build(
        embedder: Arc<E>,
        index: Arc<V>,
        report: &BuildReport,
        config: RecommenderConfig,
    ) -> Result<Self> {
        Self::new(embedder, index, report.classifier.clone(), config)
    }

    /// Serve an existing index, loading the pipeline from `config.pipeline_path`.
    pub fn with_persisted_pipeline(
        embedder: Arc<E>,
        index: Arc<V>,
        config: RecommenderConfig,
    ) -> Result<Self> {
        let path = config.pipeline_path.as_ref().ok_or_else(|| {
            RecommendError::Config("pipeline_path is required to load a fitted pipeline".into())
        })?;
        let classifier = ForegroundClassifier::load(path)?;
        tracing::info!(
            path = %path.display(),
            dimension = classifier.dimension(),
            "loaded foreground pipeline"
        );
        Self::new(embedder, index, Some(Arc::new(classifier)), config)
    }

    /// Ordered catalog ids for a query, at most `top_k` long.
    pub fn recommend(&self, query: &Query) -> Result<Vec<ImageId>> {
        Ok(self.recommend_detailed(query)?.image_ids)
    }

    /// Like [`Recommender::recommend`], also reporting scores and ranking mode.
    pub fn recommend_detailed(&self, query: &Query) -> Result<Recommendation> {
        let ranking = match query {
            Query::WholeImage(image) => self.aggregator.whole_image(image)?,
            Query::FocusedImage(image, region) => self.aggregator.focus(image, region)?,
        };
        tracing::debug!(
            mode = ranking.mode.as_str(),
            results = ranking.results.len(),
            "recommendation ready"
        );

        Ok(Recommendation {
            image_ids: ranking.image_ids(),
            scores: ranking.results.iter().map(|r| r.score).collect(),
            mode: ranking.mode,
        })
    }

    /// Wire-level entry: validate the request, then rank.
    pub fn handle(&self, request: RecommendRequest) -> Result<RecommendResponse> {
        let query = Query::try_from(request)?;
        Ok(RecommendResponse {
            image_id: self.recommend(&query)?,
        })
    }
}
