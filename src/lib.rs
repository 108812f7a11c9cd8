//! # focus-retrieval
//!
//! Patch-level localization and similarity aggregation for visual
//! recommendation.
//!
//! A query image is ranked against a catalog either as a whole
//! (one vector, cosine nearest neighbors) or through a focus rectangle: the
//! rectangle is mapped onto the embedding model's patch grid, background
//! patches are removed by a fitted foreground projection, and catalog images
//! are scored by the mean of per-patch best similarities.
//!
//! The embedding model and the vector store are collaborators behind the
//! [`EmbeddingProvider`] and [`VectorIndex`] traits.

pub mod builder;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod index;
pub mod recommender;
pub mod search;
pub mod similarity;
pub mod types;

// Re-export key types
pub use builder::{BuildReport, CatalogImage, IndexBuilder};
pub use config::RecommenderConfig;
pub use crate::core::foreground::{ForegroundClassifier, StagedPipeline, FOREGROUND_THRESHOLD};
pub use crate::core::grid::{FocusRect, GridCell, GridCoordinateMapper, GridShape, ImageShape};
pub use embedding::{EmbeddingProvider, ImageEmbedding, PatchEmbedding};
pub use error::{Collaborator, RecommendError, Result};
pub use index::{Collection, InMemoryVectorIndex, IndexRecord, SearchHit, VectorIndex};
pub use recommender::{Recommendation, Recommender};
pub use search::{RankedImage, Ranking, RankingMode, SimilarityAggregator};
pub use types::{
    CoordsInfo, FocusRegion, ImageId, ImageRef, Query, RecommendRequest, RecommendResponse,
};
