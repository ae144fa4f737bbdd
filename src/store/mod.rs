//! Vector index integration
//!
//! Two collections back the engine: clip vectors in the shared text/vision
//! space and chunk vectors in the text embedding space. Both sit behind the
//! `VectorIndex` trait; `QdrantIndex` is the production implementation and
//! `MemoryIndex` backs tests and ephemeral runs.

mod payload;

pub use payload::*;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Filter applied to vector searches
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict hits to a single video
    pub video_id: Option<String>,
}

impl SearchFilter {
    fn to_qdrant_filter(&self) -> Option<Filter> {
        let video_id = self.video_id.as_ref()?;
        Some(Filter {
            must: vec![Condition::matches("video_id", video_id.clone())],
            should: vec![],
            must_not: vec![],
            min_should: None,
        })
    }

    fn matches(&self, payload: &Map<String, Value>) -> bool {
        match &self.video_id {
            Some(id) => payload.get("video_id").and_then(Value::as_str) == Some(id.as_str()),
            None => true,
        }
    }
}

/// A vector collection supporting upsert-replace and cosine search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet.
    async fn ensure_ready(&self) -> Result<()>;

    /// Upsert points; a point whose record id was seen before replaces the
    /// stored vector and payload.
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()>;

    /// Cosine search, best first. Ties are broken by record id so result
    /// order is stable.
    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Remove all points belonging to a video.
    async fn delete_by_video(&self, video_id: &str) -> Result<()>;

    /// Number of stored points.
    async fn count(&self) -> Result<usize>;

    /// Drop and recreate the collection.
    async fn reset(&self) -> Result<()>;
}

/// Qdrant-backed implementation of `VectorIndex`
pub struct QdrantIndex {
    client: Arc<Qdrant>,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    pub fn new(client: Arc<Qdrant>, collection: &str, dimension: usize) -> Self {
        Self {
            client,
            collection: collection.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_ready(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                ),
            )
            .await?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );

        let point_structs: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                let id = p.point_id().to_string();
                let payload = Payload::try_from(Value::Object(p.payload))
                    .map_err(|e| Error::Qdrant(format!("invalid payload: {e}")))?;
                Ok(PointStruct::new(id, p.vector, payload))
            })
            .collect::<Result<_>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, point_structs))
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector, limit as u64).with_payload(true);
        if let Some(qf) = filter.and_then(|f| f.to_qdrant_filter()) {
            builder = builder.filter(qf);
        }

        let response = self.client.search_points(builder).await?;

        let mut hits: Vec<SearchHit> = response
            .result
            .into_iter()
            .map(|p| {
                let payload: Map<String, Value> = p
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, json_from_qdrant_value(v)))
                    .collect();
                let record_id = payload
                    .get("record_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                SearchHit {
                    record_id,
                    score: p.score,
                    payload,
                }
            })
            .collect();

        // Qdrant leaves equal-score order unspecified
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        Ok(hits)
    }

    async fn delete_by_video(&self, video_id: &str) -> Result<()> {
        debug!(
            "Deleting points for video {video_id} from collection {}",
            self.collection
        );
        let filter = Filter {
            must: vec![Condition::matches("video_id", video_id.to_string())],
            should: vec![],
            must_not: vec![],
            min_should: None,
        };
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(filter))
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(0);
        }
        let info = self.client.collection_info(&self.collection).await?;
        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize)
    }

    async fn reset(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            info!("Deleting collection {}", self.collection);
            self.client.delete_collection(&self.collection).await?;
        }
        self.ensure_ready().await
    }
}

/// In-memory implementation of `VectorIndex` for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryIndex {
    points: RwLock<HashMap<uuid::Uuid, IndexPoint>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        let mut store = self.points.write().await;
        for point in points {
            store.insert(point.point_id(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let store = self.points.read().await;
        let filter = filter.unwrap_or_default();

        let mut hits: Vec<SearchHit> = store
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| SearchHit {
                record_id: p.record_id.clone(),
                score: cosine_similarity(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_video(&self, video_id: &str) -> Result<()> {
        let mut store = self.points.write().await;
        store.retain(|_, p| {
            p.payload.get("video_id").and_then(Value::as_str) != Some(video_id)
        });
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.read().await.len())
    }

    async fn reset(&self) -> Result<()> {
        self.points.write().await.clear();
        Ok(())
    }
}

/// The clip and chunk collections used by the pipelines
#[derive(Clone)]
pub struct VectorStores {
    pub clips: Arc<dyn VectorIndex>,
    pub chunks: Arc<dyn VectorIndex>,
}

impl VectorStores {
    /// Connect to Qdrant and bind both collections.
    pub fn connect(config: &Config) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", config.qdrant_url);
        let client = Arc::new(
            Qdrant::from_url(&config.qdrant_url)
                .skip_compatibility_check()
                .build()
                .map_err(|e| Error::Qdrant(e.to_string()))?,
        );

        Ok(Self {
            clips: Arc::new(QdrantIndex::new(
                client.clone(),
                &config.storage.clip_collection,
                config.storage.clip_dimension,
            )),
            chunks: Arc::new(QdrantIndex::new(
                client,
                &config.storage.chunk_collection,
                config.storage.chunk_dimension,
            )),
        })
    }

    /// In-memory stores, used by tests.
    pub fn in_memory() -> Self {
        Self {
            clips: Arc::new(MemoryIndex::new()),
            chunks: Arc::new(MemoryIndex::new()),
        }
    }

    pub async fn ensure_ready(&self) -> Result<()> {
        self.clips.ensure_ready().await?;
        self.chunks.ensure_ready().await?;
        Ok(())
    }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: qdrant_client::qdrant::Value) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(json_from_qdrant_value).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_point(record_id: &str, video_id: &str, vector: Vec<f32>) -> IndexPoint {
        let payload = match json!({ "record_id": record_id, "video_id": video_id }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        IndexPoint {
            record_id: record_id.to_string(),
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn test_memory_index_upsert_replaces() {
        let index = MemoryIndex::new();
        index
            .upsert(vec![test_point("v1_clip_0000", "v1", vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert(vec![test_point("v1_clip_0000", "v1", vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 1);

        let hits = index.search(vec![0.0, 1.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_memory_index_search_order_and_tiebreak() {
        let index = MemoryIndex::new();
        index
            .upsert(vec![
                test_point("b", "v1", vec![1.0, 0.0]),
                test_point("a", "v1", vec![1.0, 0.0]),
                test_point("c", "v1", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(vec![1.0, 0.0], 10, None).await.unwrap();
        // Equal scores fall back to record id order
        assert_eq!(hits[0].record_id, "a");
        assert_eq!(hits[1].record_id, "b");
        assert_eq!(hits[2].record_id, "c");
    }

    #[tokio::test]
    async fn test_memory_index_video_filter_and_delete() {
        let index = MemoryIndex::new();
        index
            .upsert(vec![
                test_point("v1_clip_0000", "v1", vec![1.0, 0.0]),
                test_point("v2_clip_0000", "v2", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let filter = SearchFilter {
            video_id: Some("v2".to_string()),
        };
        let hits = index
            .search(vec![1.0, 0.0], 10, Some(filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "v2_clip_0000");

        index.delete_by_video("v1").await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
