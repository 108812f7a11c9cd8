//! Learned foreground scoring for patch embeddings
//!
//! The pipeline is a rank-1 principal projection followed by min-max
//! scaling, fitted once over every patch embedding in the catalog. On
//! self-supervised ViT features the first principal component separates
//! object patches from background, so a patch whose scaled projection
//! exceeds [`FOREGROUND_THRESHOLD`] is treated as foreground.
//!
//! # Fitting
//!
//! The principal axis is found by power iteration on the covariance matrix,
//! which is never materialized: each step computes
//! `C·v = (1/n) Σ (x - μ) ((x - μ) · v)` in O(n·D). The start vector is the
//! centered sample with the largest norm (ties broken by value, not by
//! position). The axis sign is fixed so its largest-magnitude component is
//! positive. Together these make the fit independent of corpus order up to
//! floating-point summation order in the mean and covariance.
//!
//! # Persistence
//!
//! [`ForegroundClassifier::save`] writes the parameters as a JSON string
//! inside an envelope carrying the SHA-256 of exactly those bytes;
//! [`ForegroundClassifier::load`] refuses files whose checksum or shape does
//! not verify. [`ForegroundClassifier::stage`] writes the file beside its
//! target so a rebuild can defer replacing it until the index is populated.

use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RecommendError, Result};

/// Scaled score above which a patch counts as foreground
pub const FOREGROUND_THRESHOLD: f64 = 0.5;

const MAX_POWER_ITERATIONS: usize = 256;
const POWER_TOLERANCE: f64 = 1e-10;
/// Smallest projection spread accepted as informative
const MIN_RANGE: f64 = 1e-12;
/// Rows per parallel work unit; fixed so partial sums combine in a stable order
const CHUNK_ROWS: usize = 1024;
const PIPELINE_FORMAT_VERSION: u32 = 1;

/// Fitted foreground pipeline: projection axis plus min-max range.
///
/// Immutable once fitted; share it across queries behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForegroundClassifier {
    mean: Vec<f64>,
    axis: Vec<f64>,
    min: f64,
    max: f64,
}

#[derive(Serialize, Deserialize)]
struct PersistedPipeline {
    version: u32,
    /// SHA-256 of `classifier`, hex encoded
    checksum: String,
    /// Serialized parameters, hashed exactly as written
    classifier: String,
}

impl ForegroundClassifier {
    /// Fit the pipeline over a corpus of patch embeddings.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty corpus or inconsistent dimensions
    /// - `DegeneratePipeline` when the corpus has no variance
    pub fn fit<V>(corpus: &[V]) -> Result<Self>
    where
        V: AsRef<[f32]> + Sync,
    {
        let Some(first) = corpus.first() else {
            return Err(RecommendError::InvalidInput(
                "cannot fit foreground pipeline on an empty corpus".into(),
            ));
        };
        let dim = first.as_ref().len();
        if dim == 0 {
            return Err(RecommendError::InvalidInput(
                "patch embeddings must not be empty".into(),
            ));
        }
        if let Some(bad) = corpus.iter().position(|v| v.as_ref().len() != dim) {
            return Err(RecommendError::InvalidInput(format!(
                "patch {} has dimension {}, expected {}",
                bad,
                corpus[bad].as_ref().len(),
                dim
            )));
        }

        let mean = corpus_mean(corpus, dim);

        // Start from the most eccentric sample; all-zero means no variance at all.
        // Equal norms are broken by value so the choice does not follow position.
        let start = corpus
            .iter()
            .map(|v| centered(v.as_ref(), &mean))
            .max_by(|a, b| norm(a).total_cmp(&norm(b)).then_with(|| lexicographic(a, b)))
            .unwrap_or_default();
        let start_norm = norm(&start);
        if start_norm <= MIN_RANGE {
            return Err(RecommendError::DegeneratePipeline { min: 0.0, max: 0.0 });
        }

        let mut axis: Vec<f64> = start.iter().map(|x| x / start_norm).collect();
        for _ in 0..MAX_POWER_ITERATIONS {
            let next = covariance_product(corpus, &mean, &axis);
            let next_norm = norm(&next);
            if next_norm <= MIN_RANGE {
                break;
            }
            let next: Vec<f64> = next.into_iter().map(|x| x / next_norm).collect();
            let delta = next
                .iter()
                .zip(&axis)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            axis = next;
            if delta < POWER_TOLERANCE {
                break;
            }
        }
        fix_sign(&mut axis);

        let (min, max) = corpus
            .iter()
            .map(|v| project(v.as_ref(), &mean, &axis))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p), hi.max(p))
            });
        if !(max - min > MIN_RANGE) {
            return Err(RecommendError::DegeneratePipeline { min, max });
        }

        tracing::debug!(
            patch_count = corpus.len(),
            dimension = dim,
            min,
            max,
            "fitted foreground pipeline"
        );

        Ok(Self {
            mean,
            axis,
            min,
            max,
        })
    }

    /// Embedding dimension the pipeline was fitted on
    pub fn dimension(&self) -> usize {
        self.axis.len()
    }

    /// Projection range observed at fit time
    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Scaled projection of one vector. Roughly in [0, 1]; not clipped.
    pub fn score(&self, vector: &[f32]) -> Result<f64> {
        self.check_dimension(vector)?;
        Ok((project(vector, &self.mean, &self.axis) - self.min) / (self.max - self.min))
    }

    pub fn scores<V: AsRef<[f32]>>(&self, vectors: &[V]) -> Result<Vec<f64>> {
        vectors.iter().map(|v| self.score(v.as_ref())).collect()
    }

    /// `true` where the score exceeds [`FOREGROUND_THRESHOLD`].
    pub fn mask<V: AsRef<[f32]>>(&self, vectors: &[V]) -> Result<Vec<bool>> {
        Ok(self
            .scores(vectors)?
            .into_iter()
            .map(|s| s > FOREGROUND_THRESHOLD)
            .collect())
    }

    /// Zero background rows in place and return the mask.
    ///
    /// Rows are zeroed rather than removed so grid positions stay aligned.
    pub fn zero_background(&self, rows: &mut [Vec<f32>]) -> Result<Vec<bool>> {
        let mask = self.mask(&*rows)?;
        for (row, keep) in rows.iter_mut().zip(&mask) {
            if !keep {
                row.iter_mut().for_each(|x| *x = 0.0);
            }
        }
        Ok(mask)
    }

    /// Persist the pipeline; the file is replaced atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.stage(path)?.commit()
    }

    /// Write the pipeline next to `path` without replacing it yet.
    ///
    /// The file only takes the place of `path` on [`StagedPipeline::commit`].
    pub fn stage(&self, path: impl AsRef<Path>) -> Result<StagedPipeline> {
        let target = path.as_ref().to_path_buf();
        let classifier = serde_json::to_string(self)?;
        let envelope = PersistedPipeline {
            version: PIPELINE_FORMAT_VERSION,
            checksum: sha256_hex(classifier.as_bytes()),
            classifier,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        let mut staging = target.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, bytes)?;

        Ok(StagedPipeline {
            staging: Some(staging),
            target,
        })
    }

    /// Load a pipeline written by [`ForegroundClassifier::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let envelope: PersistedPipeline = serde_json::from_slice(&bytes)?;

        if envelope.version != PIPELINE_FORMAT_VERSION {
            return Err(RecommendError::PipelineStore(format!(
                "unsupported pipeline format version {}",
                envelope.version
            )));
        }
        if sha256_hex(envelope.classifier.as_bytes()) != envelope.checksum {
            return Err(RecommendError::PipelineStore(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        let classifier: Self = serde_json::from_str(&envelope.classifier)?;
        if classifier.axis.is_empty() || classifier.axis.len() != classifier.mean.len() {
            return Err(RecommendError::PipelineStore(format!(
                "pipeline shape mismatch: mean {} vs axis {}",
                classifier.mean.len(),
                classifier.axis.len()
            )));
        }
        if !(classifier.max - classifier.min > MIN_RANGE) {
            return Err(RecommendError::PipelineStore(
                "pipeline range has no spread".into(),
            ));
        }
        Ok(classifier)
    }

    /// Delete a persisted pipeline. A missing file is not an error.
    pub fn remove_persisted(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "removed foreground pipeline");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.axis.len() {
            return Err(RecommendError::InvalidInput(format!(
                "vector has dimension {}, pipeline expects {}",
                vector.len(),
                self.axis.len()
            )));
        }
        Ok(())
    }
}

/// A pipeline written to a staging file, waiting to replace its target.
///
/// Dropping it without committing removes the staging file and leaves the
/// target untouched.
#[derive(Debug)]
pub struct StagedPipeline {
    staging: Option<PathBuf>,
    target: PathBuf,
}

impl StagedPipeline {
    /// Move the staged file into place.
    pub fn commit(mut self) -> Result<()> {
        let Some(staging) = self.staging.take() else {
            return Ok(());
        };
        if let Err(err) = std::fs::rename(&staging, &self.target) {
            self.staging = Some(staging);
            return Err(err.into());
        }
        tracing::info!(path = %self.target.display(), "saved foreground pipeline");
        Ok(())
    }
}

impl Drop for StagedPipeline {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            if let Err(err) = std::fs::remove_file(&staging) {
                tracing::warn!(
                    path = %staging.display(),
                    error = %err,
                    "could not remove staged pipeline"
                );
            }
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn corpus_mean<V: AsRef<[f32]>>(corpus: &[V], dim: usize) -> Vec<f64> {
    let mut sum = vec![0.0f64; dim];
    for v in corpus {
        for (acc, &x) in sum.iter_mut().zip(v.as_ref()) {
            *acc += x as f64;
        }
    }
    let n = corpus.len() as f64;
    sum.into_iter().map(|s| s / n).collect()
}

fn covariance_product<V>(corpus: &[V], mean: &[f64], v: &[f64]) -> Vec<f64>
where
    V: AsRef<[f32]> + Sync,
{
    let partials: Vec<Vec<f64>> = corpus
        .par_chunks(CHUNK_ROWS)
        .map(|chunk| {
            let mut acc = vec![0.0f64; mean.len()];
            for row in chunk {
                let c = centered(row.as_ref(), mean);
                let weight: f64 = c.iter().zip(v).map(|(a, b)| a * b).sum();
                for (out, x) in acc.iter_mut().zip(&c) {
                    *out += weight * x;
                }
            }
            acc
        })
        .collect();

    let n = corpus.len() as f64;
    let mut total = vec![0.0f64; mean.len()];
    for partial in partials {
        for (t, p) in total.iter_mut().zip(partial) {
            *t += p;
        }
    }
    total.into_iter().map(|t| t / n).collect()
}

fn centered(v: &[f32], mean: &[f64]) -> Vec<f64> {
    v.iter().zip(mean).map(|(&x, m)| x as f64 - m).collect()
}

fn project(v: &[f32], mean: &[f64], axis: &[f64]) -> f64 {
    v.iter()
        .zip(mean)
        .zip(axis)
        .map(|((&x, m), a)| (x as f64 - m) * a)
        .sum()
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn lexicographic(a: &[f64], b: &[f64]) -> std::cmp::Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(std::cmp::Ordering::Equal)
}

fn fix_sign(axis: &mut [f64]) {
    let pivot = axis
        .iter()
        .copied()
        .max_by(|a, b| {
            a.abs()
                .partial_cmp(&b.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0.0);
    if pivot < 0.0 {
        axis.iter_mut().for_each(|x| *x = -*x);
    }
}
