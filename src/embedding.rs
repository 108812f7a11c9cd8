//! Embedding model collaborator.
//!
//! The model itself is out of scope; this module fixes the contract it must
//! satisfy. Response shapes follow the model service's JSON:
//!
//! ```text
//! whole image:  {"embedding": [f32; D]}
//! patch grid:   {"embedding": [[f32; D]; grid_h * grid_w],
//!                "embedding_shape": [grid_h, grid_w, D],
//!                "image_shape": [height, width],
//!                "patch_size": p}
//! ```
//!
//! Patch rows are in row-major grid order.

use serde::{Deserialize, Serialize};

use crate::core::grid::{GridShape, ImageShape};
use crate::error::{RecommendError, Result};
use crate::types::ImageRef;

/// Source of image and patch embeddings.
///
/// Implementations report any non-success response or timeout as
/// [`RecommendError::CollaboratorUnavailable`]; they must never substitute
/// default vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// One vector for the whole image
    fn embed_image(&self, image: &ImageRef) -> Result<ImageEmbedding>;

    /// One vector per patch grid cell
    fn embed_patches(&self, image: &ImageRef) -> Result<PatchEmbedding>;
}

/// Whole-image embedding response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageEmbedding {
    pub embedding: Vec<f32>,
}

impl ImageEmbedding {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self { embedding }
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.is_empty() {
            return Err(RecommendError::embedding("empty image embedding"));
        }
        Ok(())
    }
}

/// Patch-grid embedding response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchEmbedding {
    /// `grid_h * grid_w` rows of dimension `D`
    pub embedding: Vec<Vec<f32>>,
    /// `[grid_h, grid_w, D]`
    pub embedding_shape: [usize; 3],
    /// Processed image `[height, width]`
    pub image_shape: [usize; 2],
    pub patch_size: usize,
}

impl PatchEmbedding {
    pub fn grid(&self) -> GridShape {
        GridShape::new(self.embedding_shape[0], self.embedding_shape[1])
    }

    pub fn image_shape(&self) -> ImageShape {
        ImageShape::new(self.image_shape[0], self.image_shape[1])
    }

    pub fn dimension(&self) -> usize {
        self.embedding_shape[2]
    }

    /// Check the response is internally consistent.
    ///
    /// A malformed response is treated like any other non-success reply.
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(RecommendError::embedding("patch_size must be positive"));
        }
        let expected = GridShape::from_image(self.image_shape(), self.patch_size);
        if self.grid() != expected {
            return Err(RecommendError::embedding(format!(
                "grid {}x{} does not match image {}x{} with patch size {}",
                self.embedding_shape[0],
                self.embedding_shape[1],
                self.image_shape[0],
                self.image_shape[1],
                self.patch_size
            )));
        }
        let cells = expected.checked_len().ok_or_else(|| {
            RecommendError::embedding(format!(
                "grid {}x{} is too large",
                expected.rows, expected.cols
            ))
        })?;
        if self.embedding.len() != cells {
            return Err(RecommendError::embedding(format!(
                "expected {} patch embeddings, got {}",
                cells,
                self.embedding.len()
            )));
        }
        let dim = self.dimension();
        if dim == 0 {
            return Err(RecommendError::embedding("embedding dimension is zero"));
        }
        if let Some(row) = self.embedding.iter().position(|r| r.len() != dim) {
            return Err(RecommendError::embedding(format!(
                "patch {} has dimension {}, expected {}",
                row,
                self.embedding[row].len(),
                dim
            )));
        }
        Ok(())
    }
}
