//! Similarity metrics for dense embeddings
//!
//! Catalog ranking uses cosine similarity throughout: higher is more similar,
//! range [-1, 1].

/// Euclidean norm, accumulated in f64
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

/// `true` if every component is exactly zero (a masked-out patch).
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|&x| x == 0.0)
}

/// Cosine similarity between two vectors
///
/// Returns 0.0 when either vector has zero norm or the lengths differ.
///
/// # Examples
///
/// ```
/// use focus_retrieval::similarity::cosine_similarity;
///
/// let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]);
/// assert!((sim - 1.0).abs() < 1e-6);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as f64) * (y as f64))
        .sum();
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    (dot / denom) as f32
}
