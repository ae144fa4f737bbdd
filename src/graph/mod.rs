//! Knowledge graph storage and search
//!
//! Entities and relationships extracted from chunk text live in the same
//! SQLite database as the rest of the metadata. Entity identity is decided by
//! an `EntityResolver` (default: normalized name), merges union provenance
//! instead of overwriting it, and entity lookup is a brute-force cosine scan
//! over the stored description embeddings.

pub mod extract;

use crate::error::{Error, Result};
use crate::store::cosine_similarity;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A knowledge graph node
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    pub entity_type: String,
    pub description: String,
    pub chunk_ids_json: String,
    pub clip_ids_json: String,
    pub embedding_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Entity {
    pub fn chunk_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.chunk_ids_json).unwrap_or_default()
    }

    pub fn clip_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.clip_ids_json).unwrap_or_default()
    }

    pub fn embedding(&self) -> Option<Vec<f32>> {
        self.embedding_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
    }
}

/// A directed labeled edge between two entities. Edges between the same pair
/// with different labels are distinct relationships.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub label: String,
    pub description: String,
    pub chunk_ids_json: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Relationship {
    pub fn chunk_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.chunk_ids_json).unwrap_or_default()
    }
}

/// Decides when two extracted entity mentions are the same entity.
pub trait EntityResolver: Send + Sync {
    fn resolve_key(&self, name: &str) -> String;
}

/// Default resolver: lowercase, with whitespace and underscores collapsed to
/// single spaces.
pub struct NormalizedNameResolver;

impl EntityResolver for NormalizedNameResolver {
    fn resolve_key(&self, name: &str) -> String {
        name.to_lowercase()
            .replace('_', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An entity scored against a query embedding
#[derive(Debug, Clone)]
pub struct ScoredEntity {
    pub entity: Entity,
    pub score: f32,
}

/// The subgraph gathered for one query: seed entities, their one-hop
/// neighborhood, and the connecting relationships.
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl GraphContext {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All clip ids referenced by the context's entities, deduplicated and
    /// sorted.
    pub fn provenance_clip_ids(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .entities
            .iter()
            .flat_map(|e| e.clip_ids())
            .collect();
        set.into_iter().collect()
    }

    /// Render the context as prompt text for answer synthesis.
    pub fn textualize(&self) -> String {
        let mut lines = Vec::new();
        for entity in &self.entities {
            lines.push(format!(
                "- {} ({}): {}",
                entity.name, entity.entity_type, entity.description
            ));
        }
        if !self.relationships.is_empty() {
            let by_id: std::collections::HashMap<&str, &str> = self
                .entities
                .iter()
                .map(|e| (e.id.as_str(), e.name.as_str()))
                .collect();
            for rel in &self.relationships {
                let source = by_id
                    .get(rel.source_entity_id.as_str())
                    .copied()
                    .unwrap_or("?");
                let target = by_id
                    .get(rel.target_entity_id.as_str())
                    .copied()
                    .unwrap_or("?");
                lines.push(format!(
                    "- {} -[{}]-> {}: {}",
                    source, rel.label, target, rel.description
                ));
            }
        }
        lines.join("\n")
    }
}

fn union_json_sets(existing_json: &str, additions: &[String]) -> String {
    let mut set: BTreeSet<String> = serde_json::from_str(existing_json).unwrap_or_default();
    set.extend(additions.iter().cloned());
    serde_json::to_string(&set.into_iter().collect::<Vec<_>>()).unwrap_or_default()
}

/// Knowledge graph store over the shared metadata pool
#[derive(Clone)]
pub struct GraphStore {
    pool: SqlitePool,
    resolver: Arc<dyn EntityResolver>,
}

impl GraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            resolver: Arc::new(NormalizedNameResolver),
        }
    }

    pub fn with_resolver(pool: SqlitePool, resolver: Arc<dyn EntityResolver>) -> Self {
        Self { pool, resolver }
    }

    /// Upsert an extracted entity mention. A mention that resolves to an
    /// existing entity unions provenance and refreshes the description and
    /// embedding; otherwise a new entity row is created. Returns the entity id.
    ///
    /// The whole merge runs inside one transaction so concurrent extraction
    /// tasks serialize on the row rather than clobbering each other.
    pub async fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        description: &str,
        embedding: Option<&[f32]>,
        chunk_id: &str,
        clip_ids: &[String],
    ) -> Result<String> {
        let key = self.resolver.resolve_key(name);
        if key.is_empty() {
            return Err(Error::Graph("entity with empty name".to_string()));
        }
        let now = Utc::now().to_rfc3339();
        let embedding_json = embedding
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Entity>(
            "SELECT * FROM entities WHERE normalized_name = ?",
        )
        .bind(&key)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some(entity) => {
                let chunk_ids_json =
                    union_json_sets(&entity.chunk_ids_json, &[chunk_id.to_string()]);
                let clip_ids_json = union_json_sets(&entity.clip_ids_json, clip_ids);
                sqlx::query(
                    r#"
                    UPDATE entities SET
                        description = ?,
                        embedding_json = COALESCE(?, embedding_json),
                        chunk_ids_json = ?,
                        clip_ids_json = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(description)
                .bind(&embedding_json)
                .bind(&chunk_ids_json)
                .bind(&clip_ids_json)
                .bind(&now)
                .bind(&entity.id)
                .execute(&mut *tx)
                .await?;
                entity.id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO entities (id, name, normalized_name, entity_type, description, chunk_ids_json, clip_ids_json, embedding_json, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(name)
                .bind(&key)
                .bind(entity_type)
                .bind(description)
                .bind(serde_json::to_string(&[chunk_id])?)
                .bind(serde_json::to_string(clip_ids)?)
                .bind(&embedding_json)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    /// Upsert a directed labeled relationship. Identity is the
    /// `(source, target, label)` triple, so differently labeled edges between
    /// the same pair coexist; re-extracting an existing edge unions provenance
    /// and refreshes the description.
    pub async fn upsert_relationship(
        &self,
        source_entity_id: &str,
        target_entity_id: &str,
        label: &str,
        description: &str,
        chunk_id: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Relationship>(
            "SELECT * FROM relationships WHERE source_entity_id = ? AND target_entity_id = ? AND label = ?",
        )
        .bind(source_entity_id)
        .bind(target_entity_id)
        .bind(label)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(rel) => {
                let chunk_ids_json = union_json_sets(&rel.chunk_ids_json, &[chunk_id.to_string()]);
                sqlx::query(
                    "UPDATE relationships SET description = ?, chunk_ids_json = ?, updated_at = ? WHERE id = ?",
                )
                .bind(description)
                .bind(&chunk_ids_json)
                .bind(&now)
                .bind(&rel.id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO relationships (id, source_entity_id, target_entity_id, label, description, chunk_ids_json, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(source_entity_id)
                .bind(target_entity_id)
                .bind(label)
                .bind(description)
                .bind(serde_json::to_string(&[chunk_id])?)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get an entity by id
    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let entity = sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entity)
    }

    /// Find the entity a name resolves to, if any.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Entity>> {
        let entity =
            sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE normalized_name = ?")
                .bind(self.resolver.resolve_key(name))
                .fetch_optional(&self.pool)
                .await?;
        Ok(entity)
    }

    /// Top-k entities by cosine similarity of description embeddings to the
    /// query vector. Equal scores fall back to entity id so the order is
    /// deterministic. Entities without an embedding are skipped.
    pub async fn seed_entities(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredEntity>> {
        let entities = sqlx::query_as::<_, Entity>(
            "SELECT * FROM entities WHERE embedding_json IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredEntity> = entities
            .into_iter()
            .filter_map(|entity| {
                let embedding = entity.embedding()?;
                let score = cosine_similarity(query, &embedding);
                Some(ScoredEntity { entity, score })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Expand seed entities one hop along incoming and outgoing edges. The
    /// total entity count (seeds plus neighbors) is bounded by `cap`; seeds
    /// are kept first, neighbors join in deterministic id order.
    pub async fn expand_one_hop(&self, seeds: &[Entity], cap: usize) -> Result<GraphContext> {
        if seeds.is_empty() {
            return Ok(GraphContext::default());
        }

        let seed_ids: BTreeSet<String> = seeds.iter().map(|e| e.id.clone()).collect();

        let mut relationships = Vec::new();
        for id in &seed_ids {
            let touching = sqlx::query_as::<_, Relationship>(
                "SELECT * FROM relationships WHERE source_entity_id = ? OR target_entity_id = ? ORDER BY id",
            )
            .bind(id)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
            relationships.extend(touching);
        }
        relationships.sort_by(|a, b| a.id.cmp(&b.id));
        relationships.dedup_by(|a, b| a.id == b.id);

        let mut neighbor_ids: BTreeSet<String> = BTreeSet::new();
        for rel in &relationships {
            for id in [&rel.source_entity_id, &rel.target_entity_id] {
                if !seed_ids.contains(id.as_str()) {
                    neighbor_ids.insert(id.clone());
                }
            }
        }

        let mut entities: Vec<Entity> = seeds.to_vec();
        for id in neighbor_ids {
            if entities.len() >= cap {
                break;
            }
            if let Some(entity) = self.get_entity(&id).await? {
                entities.push(entity);
            }
        }
        entities.truncate(cap);

        // Keep only edges whose endpoints survived the cap
        let kept: BTreeSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        relationships.retain(|r| {
            kept.contains(r.source_entity_id.as_str()) && kept.contains(r.target_entity_id.as_str())
        });

        debug!(
            "Graph expansion: {} seeds -> {} entities, {} relationships",
            seeds.len(),
            entities.len(),
            relationships.len()
        );
        Ok(GraphContext {
            entities,
            relationships,
        })
    }

    /// Delete every entity and relationship whose provenance is limited to the
    /// given video's chunks, and strip the video's provenance from the rest.
    pub async fn delete_video_provenance(&self, video_id: &str) -> Result<()> {
        let prefix = format!("{video_id}_chunk_");
        let entities = sqlx::query_as::<_, Entity>("SELECT * FROM entities")
            .fetch_all(&self.pool)
            .await?;

        for entity in entities {
            let remaining: Vec<String> = entity
                .chunk_ids()
                .into_iter()
                .filter(|c| !c.starts_with(&prefix))
                .collect();
            let clips: Vec<String> = entity
                .clip_ids()
                .into_iter()
                .filter(|c| !c.starts_with(&format!("{video_id}_clip_")))
                .collect();

            if remaining.is_empty() {
                sqlx::query("DELETE FROM relationships WHERE source_entity_id = ? OR target_entity_id = ?")
                    .bind(&entity.id)
                    .bind(&entity.id)
                    .execute(&self.pool)
                    .await?;
                sqlx::query("DELETE FROM entities WHERE id = ?")
                    .bind(&entity.id)
                    .execute(&self.pool)
                    .await?;
            } else {
                sqlx::query(
                    "UPDATE entities SET chunk_ids_json = ?, clip_ids_json = ?, updated_at = ? WHERE id = ?",
                )
                .bind(serde_json::to_string(&remaining)?)
                .bind(serde_json::to_string(&clips)?)
                .bind(Utc::now().to_rfc3339())
                .bind(&entity.id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MetaDb;
    use tempfile::TempDir;

    async fn setup() -> (GraphStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        (GraphStore::new(db.pool().clone()), tmp)
    }

    #[test]
    fn test_resolver_normalization() {
        let resolver = NormalizedNameResolver;
        assert_eq!(resolver.resolve_key("Marie Curie"), "marie curie");
        assert_eq!(resolver.resolve_key("marie_curie"), "marie curie");
        assert_eq!(resolver.resolve_key("  MARIE   CURIE  "), "marie curie");
    }

    #[tokio::test]
    async fn test_entity_merge_unions_provenance() {
        let (store, _tmp) = setup().await;

        let id1 = store
            .upsert_entity(
                "Marie Curie",
                "person",
                "A physicist",
                Some(&[1.0, 0.0]),
                "v1_chunk_0000",
                &["v1_clip_0000".to_string()],
            )
            .await
            .unwrap();

        let id2 = store
            .upsert_entity(
                "marie_curie",
                "person",
                "A physicist and chemist",
                Some(&[0.9, 0.1]),
                "v1_chunk_0001",
                &["v1_clip_0003".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(id1, id2);

        let entity = store.get_entity(&id1).await.unwrap().unwrap();
        assert_eq!(
            entity.chunk_ids(),
            vec!["v1_chunk_0000".to_string(), "v1_chunk_0001".to_string()]
        );
        assert_eq!(entity.clip_ids().len(), 2);
        // Latest extraction wins the description
        assert_eq!(entity.description, "A physicist and chemist");
    }

    #[tokio::test]
    async fn test_entity_merge_idempotent() {
        let (store, _tmp) = setup().await;

        for _ in 0..3 {
            store
                .upsert_entity(
                    "Radium",
                    "concept",
                    "An element",
                    None,
                    "v1_chunk_0000",
                    &["v1_clip_0000".to_string()],
                )
                .await
                .unwrap();
        }

        let entity = store.find_by_name("radium").await.unwrap().unwrap();
        assert_eq!(entity.chunk_ids(), vec!["v1_chunk_0000".to_string()]);
        assert_eq!(entity.clip_ids(), vec!["v1_clip_0000".to_string()]);
    }

    #[tokio::test]
    async fn test_seed_entities_ordering() {
        let (store, _tmp) = setup().await;

        store
            .upsert_entity("Aligned", "concept", "d", Some(&[1.0, 0.0]), "c1", &[])
            .await
            .unwrap();
        store
            .upsert_entity("Orthogonal", "concept", "d", Some(&[0.0, 1.0]), "c1", &[])
            .await
            .unwrap();
        store
            .upsert_entity("NoEmbedding", "concept", "d", None, "c1", &[])
            .await
            .unwrap();

        let seeds = store.seed_entities(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].entity.name, "Aligned");
        assert!(seeds[0].score > seeds[1].score);

        let top1 = store.seed_entities(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(top1.len(), 1);
    }

    #[tokio::test]
    async fn test_one_hop_expansion_with_cap() {
        let (store, _tmp) = setup().await;

        let a = store
            .upsert_entity("A", "concept", "d", Some(&[1.0]), "c1", &["v1_clip_0000".to_string()])
            .await
            .unwrap();
        let b = store
            .upsert_entity("B", "concept", "d", None, "c1", &["v1_clip_0001".to_string()])
            .await
            .unwrap();
        let c = store
            .upsert_entity("C", "concept", "d", None, "c2", &[])
            .await
            .unwrap();

        store
            .upsert_relationship(&a, &b, "relates_to", "a relates to b", "c1")
            .await
            .unwrap();
        store
            .upsert_relationship(&c, &a, "relates_to", "c relates to a", "c2")
            .await
            .unwrap();

        let seed = store.get_entity(&a).await.unwrap().unwrap();
        let context = store.expand_one_hop(&[seed.clone()], 10).await.unwrap();
        assert_eq!(context.entities.len(), 3);
        assert_eq!(context.relationships.len(), 2);
        assert_eq!(
            context.provenance_clip_ids(),
            vec!["v1_clip_0000".to_string(), "v1_clip_0001".to_string()]
        );

        // Cap of 1 keeps only the seed and drops edges to pruned neighbors
        let capped = store.expand_one_hop(&[seed], 1).await.unwrap();
        assert_eq!(capped.entities.len(), 1);
        assert!(capped.relationships.is_empty());
    }

    #[tokio::test]
    async fn test_distinctly_labeled_edges_coexist() {
        let (store, _tmp) = setup().await;

        let curie = store
            .upsert_entity("Marie Curie", "person", "d", None, "c1", &[])
            .await
            .unwrap();
        let radium = store
            .upsert_entity("Radium", "concept", "d", None, "c1", &[])
            .await
            .unwrap();

        store
            .upsert_relationship(&curie, &radium, "discovered", "she discovered it", "c1")
            .await
            .unwrap();
        store
            .upsert_relationship(&curie, &radium, "lectured_about", "she lectured on it", "c2")
            .await
            .unwrap();

        // Same triple again from another chunk unions provenance, no new edge
        store
            .upsert_relationship(&curie, &radium, "discovered", "she discovered it", "c3")
            .await
            .unwrap();

        let seed = store.get_entity(&curie).await.unwrap().unwrap();
        let context = store.expand_one_hop(&[seed], 10).await.unwrap();
        assert_eq!(context.relationships.len(), 2);

        let mut labels: Vec<&str> = context
            .relationships
            .iter()
            .map(|r| r.label.as_str())
            .collect();
        labels.sort();
        assert_eq!(labels, vec!["discovered", "lectured_about"]);

        let discovered = context
            .relationships
            .iter()
            .find(|r| r.label == "discovered")
            .unwrap();
        assert_eq!(
            discovered.chunk_ids(),
            vec!["c1".to_string(), "c3".to_string()]
        );

        let text = context.textualize();
        assert!(text.contains("-[discovered]->"));
        assert!(text.contains("-[lectured_about]->"));
    }

    #[tokio::test]
    async fn test_delete_video_provenance() {
        let (store, _tmp) = setup().await;

        let only_v1 = store
            .upsert_entity("OnlyV1", "concept", "d", None, "v1_chunk_0000", &[])
            .await
            .unwrap();
        let shared = store
            .upsert_entity("Shared", "concept", "d", None, "v1_chunk_0000", &[])
            .await
            .unwrap();
        store
            .upsert_entity("Shared", "concept", "d", None, "v2_chunk_0000", &[])
            .await
            .unwrap();
        store
            .upsert_relationship(&only_v1, &shared, "related_to", "r", "v1_chunk_0000")
            .await
            .unwrap();

        store.delete_video_provenance("v1").await.unwrap();

        assert!(store.get_entity(&only_v1).await.unwrap().is_none());
        let survivor = store.get_entity(&shared).await.unwrap().unwrap();
        assert_eq!(survivor.chunk_ids(), vec!["v2_chunk_0000".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let (store, _tmp) = setup().await;
        let result = store
            .upsert_entity("   ", "concept", "d", None, "c1", &[])
            .await;
        assert!(matches!(result, Err(Error::Graph(_))));
    }
}
