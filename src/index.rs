//! Vector index collaborator
//!
//! Two logical collections are kept side by side:
//! - `image_embeddings`: one whole-image vector per catalog image
//! - `patch_embeddings`: the foreground patch vectors of every catalog image
//!
//! Both are searched by cosine similarity and can be filtered to a single
//! `image_id`. There is no update or delete; a rebuild recreates a collection
//! and refills it. The index has one writer (ingestion) and any number of
//! concurrent readers once the rebuild has finished.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;

use crate::error::{RecommendError, Result};
use crate::similarity::cosine_similarity;
use crate::types::ImageId;

/// Logical collection in the vector index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Whole-image embeddings, one per catalog image
    ImageEmbeddings,
    /// Foreground patch embeddings, many per catalog image
    PatchEmbeddings,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::ImageEmbeddings, Collection::PatchEmbeddings];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::ImageEmbeddings => "image_embeddings",
            Collection::PatchEmbeddings => "patch_embeddings",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored vector with its owning catalog image
#[derive(Clone, Debug, PartialEq)]
pub struct IndexRecord {
    /// Internal id assigned on insert
    pub id: u64,
    pub image_id: ImageId,
    pub vector: Vec<f32>,
}

/// One nearest-neighbor hit
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchHit {
    /// Internal id of the matched record
    pub id: u64,
    pub image_id: ImageId,
    /// Cosine similarity, higher is better
    pub similarity: f32,
}

/// Abstract similarity-searchable store with two collections.
///
/// All methods take `&self`; implementations synchronize internally.
pub trait VectorIndex: Send + Sync {
    /// Drop the collection if it exists and create it empty.
    fn recreate(&self, collection: Collection) -> Result<()>;

    /// Append records; returns the assigned internal ids in input order.
    fn insert(&self, collection: Collection, entries: Vec<(ImageId, Vec<f32>)>) -> Result<Vec<u64>>;

    /// Top-`k` records by cosine similarity, optionally restricted to one image.
    ///
    /// A query whose dimension differs from the stored vectors is `InvalidInput`.
    fn search(
        &self,
        collection: Collection,
        query: &[f32],
        k: usize,
        filter: Option<ImageId>,
    ) -> Result<Vec<SearchHit>>;

    /// Every record, optionally restricted to one image.
    fn enumerate(&self, collection: Collection, filter: Option<ImageId>) -> Result<Vec<IndexRecord>>;

    /// Distinct image ids present in the collection, ascending.
    fn image_ids(&self, collection: Collection) -> Result<Vec<ImageId>> {
        let ids: BTreeSet<ImageId> = self
            .enumerate(collection, None)?
            .into_iter()
            .map(|r| r.image_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Number of stored records.
    fn count(&self, collection: Collection) -> Result<usize> {
        Ok(self.enumerate(collection, None)?.len())
    }
}

#[derive(Debug, Default)]
struct CollectionData {
    records: Vec<IndexRecord>,
    /// Positions in `records` per image, for filtered scans
    by_image: HashMap<ImageId, Vec<usize>>,
    dimension: Option<usize>,
    next_id: u64,
}

impl CollectionData {
    fn candidates<'a>(
        &'a self,
        filter: Option<ImageId>,
    ) -> Box<dyn Iterator<Item = &'a IndexRecord> + 'a> {
        match filter {
            None => Box::new(self.records.iter()),
            Some(image_id) => match self.by_image.get(&image_id) {
                Some(positions) => Box::new(positions.iter().map(|&i| &self.records[i])),
                None => Box::new(std::iter::empty()),
            },
        }
    }
}

/// Brute-force in-memory index - exact cosine scan
///
/// Useful for:
/// - Tests and fakes for the aggregation logic
/// - Small catalogs (exact results, no approximation)
/// - Ground truth when evaluating an approximate store
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<Collection, CollectionData>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, collection: Collection, f: impl FnOnce(&CollectionData) -> T) -> Result<T> {
        let guard = self
            .collections
            .read()
            .map_err(|_| RecommendError::index("index lock poisoned"))?;
        let data = guard.get(&collection).ok_or_else(|| {
            RecommendError::index(format!("collection {} does not exist", collection))
        })?;
        Ok(f(data))
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn recreate(&self, collection: Collection) -> Result<()> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| RecommendError::index("index lock poisoned"))?;
        guard.insert(collection, CollectionData::default());
        tracing::debug!(collection = collection.name(), "recreated collection");
        Ok(())
    }

    fn insert(&self, collection: Collection, entries: Vec<(ImageId, Vec<f32>)>) -> Result<Vec<u64>> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| RecommendError::index("index lock poisoned"))?;
        let data = guard.get_mut(&collection).ok_or_else(|| {
            RecommendError::index(format!("collection {} does not exist", collection))
        })?;

        // Validate the whole batch before touching the collection.
        let mut dimension = data.dimension;
        for (image_id, vector) in &entries {
            let expected = *dimension.get_or_insert(vector.len());
            if vector.is_empty() || vector.len() != expected {
                return Err(RecommendError::InvalidInput(format!(
                    "vector for image {} has dimension {}, collection {} expects {}",
                    image_id,
                    vector.len(),
                    collection,
                    expected
                )));
            }
        }
        data.dimension = dimension;

        let mut ids = Vec::with_capacity(entries.len());
        for (image_id, vector) in entries {
            let id = data.next_id;
            data.next_id += 1;
            data.by_image
                .entry(image_id)
                .or_default()
                .push(data.records.len());
            data.records.push(IndexRecord {
                id,
                image_id,
                vector,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    fn search(
        &self,
        collection: Collection,
        query: &[f32],
        k: usize,
        filter: Option<ImageId>,
    ) -> Result<Vec<SearchHit>> {
        self.read(collection, |data| -> Result<Vec<SearchHit>> {
            if let Some(dimension) = data.dimension {
                if query.len() != dimension {
                    return Err(RecommendError::InvalidInput(format!(
                        "query has dimension {}, collection {} expects {}",
                        query.len(),
                        collection,
                        dimension
                    )));
                }
            }
            if k == 0 {
                return Ok(Vec::new());
            }
            let mut hits: Vec<SearchHit> = data
                .candidates(filter)
                .map(|record| SearchHit {
                    id: record.id,
                    image_id: record.image_id,
                    similarity: cosine_similarity(query, &record.vector),
                })
                .collect();

            hits.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            hits.truncate(k);
            Ok(hits)
        })?
    }

    fn enumerate(&self, collection: Collection, filter: Option<ImageId>) -> Result<Vec<IndexRecord>> {
        self.read(collection, |data| data.candidates(filter).cloned().collect())
    }

    fn image_ids(&self, collection: Collection) -> Result<Vec<ImageId>> {
        self.read(collection, |data| {
            let mut ids: Vec<ImageId> = data.by_image.keys().copied().collect();
            ids.sort_unstable();
            ids
        })
    }

    fn count(&self, collection: Collection) -> Result<usize> {
        self.read(collection, |data| data.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(records: Vec<(u64, Vec<f32>)>) -> InMemoryVectorIndex {
        let index = InMemoryVectorIndex::new();
        index.recreate(Collection::ImageEmbeddings).unwrap();
        index
            .insert(
                Collection::ImageEmbeddings,
                records
                    .into_iter()
                    .map(|(id, v)| (ImageId(id), v))
                    .collect(),
            )
            .unwrap();
        index
    }

    #[test]
    fn test_search_ranks_by_cosine() {
        let index = index_with(vec![
            (1, vec![1.0, 0.0]),
            (2, vec![0.0, 1.0]),
            (3, vec![1.0, 1.0]),
        ]);

        let hits = index
            .search(Collection::ImageEmbeddings, &[1.0, 0.1], 3, None)
            .unwrap();
        let order: Vec<u64> = hits.iter().map(|h| h.image_id.0).collect();
        assert_eq!(order, vec![1, 3, 2]);
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[test]
    fn test_search_k_zero() {
        let index = index_with(vec![(1, vec![1.0, 0.0])]);
        assert!(index
            .search(Collection::ImageEmbeddings, &[1.0, 0.0], 0, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_filter_by_image() {
        let index = index_with(vec![
            (1, vec![1.0, 0.0]),
            (2, vec![0.9, 0.1]),
            (2, vec![0.0, 1.0]),
        ]);
        let hits = index
            .search(Collection::ImageEmbeddings, &[1.0, 0.0], 5, Some(ImageId(2)))
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.image_id == ImageId(2)));

        let none = index
            .search(Collection::ImageEmbeddings, &[1.0, 0.0], 5, Some(ImageId(9)))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_ties_break_by_insert_order() {
        let index = index_with(vec![(7, vec![1.0, 0.0]), (3, vec![2.0, 0.0])]);
        let hits = index
            .search(Collection::ImageEmbeddings, &[1.0, 0.0], 2, None)
            .unwrap();
        assert_eq!(hits[0].image_id, ImageId(7));
        assert_eq!(hits[1].image_id, ImageId(3));
    }

    #[test]
    fn test_missing_collection_is_collaborator_failure() {
        let index = InMemoryVectorIndex::new();
        let err = index
            .search(Collection::PatchEmbeddings, &[1.0], 1, None)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_dimension_mismatch_rejected_atomically() {
        let index = index_with(vec![(1, vec![1.0, 0.0])]);
        let result = index.insert(
            Collection::ImageEmbeddings,
            vec![(ImageId(2), vec![1.0, 0.0]), (ImageId(3), vec![1.0])],
        );
        assert!(matches!(result, Err(RecommendError::InvalidInput(_))));
        assert_eq!(index.count(Collection::ImageEmbeddings).unwrap(), 1);
    }

    #[test]
    fn test_recreate_drops_contents() {
        let index = index_with(vec![(1, vec![1.0, 0.0])]);
        index.recreate(Collection::ImageEmbeddings).unwrap();
        assert_eq!(index.count(Collection::ImageEmbeddings).unwrap(), 0);
        assert!(index.image_ids(Collection::ImageEmbeddings).unwrap().is_empty());

        // A new dimension is accepted after a rebuild.
        index
            .insert(Collection::ImageEmbeddings, vec![(ImageId(1), vec![1.0, 0.0, 0.0])])
            .unwrap();
    }

    #[test]
    fn test_image_ids_distinct_sorted() {
        let index = index_with(vec![
            (5, vec![1.0]),
            (2, vec![1.0]),
            (5, vec![0.5]),
            (9, vec![0.1]),
        ]);
        let ids = index.image_ids(Collection::ImageEmbeddings).unwrap();
        assert_eq!(ids, vec![ImageId(2), ImageId(5), ImageId(9)]);
    }

    #[test]
    fn test_enumerate_filtered() {
        let index = index_with(vec![(1, vec![1.0]), (2, vec![2.0]), (1, vec![3.0])]);
        let records = index
            .enumerate(Collection::ImageEmbeddings, Some(ImageId(1)))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].vector, vec![1.0]);
        assert_eq!(records[1].vector, vec![3.0]);
        assert!(records[0].id < records[1].id);
    }

    #[test]
    fn test_search_rejects_wrong_dimension() {
        let index = index_with(vec![(1, vec![1.0, 0.0, 0.0]), (2, vec![0.0, 1.0, 0.0])]);
        assert!(matches!(
            index.search(Collection::ImageEmbeddings, &[1.0, 0.0], 2, None),
            Err(RecommendError::InvalidInput(_))
        ));
        assert!(matches!(
            index.search(Collection::ImageEmbeddings, &[1.0, 0.0], 2, Some(ImageId(1))),
            Err(RecommendError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_search_empty_collection_accepts_any_dimension() {
        let index = InMemoryVectorIndex::new();
        index.recreate(Collection::PatchEmbeddings).unwrap();
        assert!(index
            .search(Collection::PatchEmbeddings, &[1.0, 0.0], 3, None)
            .unwrap()
            .is_empty());
    }
}
