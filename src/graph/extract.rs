//! LLM-based entity and relationship extraction from chunk text

use super::GraphStore;
use crate::error::Result;
use crate::meta::ChunkRecord;
use crate::models::{LlmClient, TextEncoder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// An entity mention proposed by the extraction LLM
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EntityCandidate {
    pub name: String,
    #[serde(default = "default_entity_type", alias = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
}

fn default_entity_type() -> String {
    "concept".to_string()
}

/// A relationship proposed by the extraction LLM
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RelationshipCandidate {
    pub source: String,
    pub target: String,
    #[serde(default = "default_relation_label", alias = "type")]
    pub label: String,
    #[serde(default)]
    pub description: String,
}

fn default_relation_label() -> String {
    "related_to".to_string()
}

/// The parsed output of one extraction call
#[derive(Debug, Clone, Default)]
pub struct ExtractedGraph {
    pub entities: Vec<EntityCandidate>,
    pub relationships: Vec<RelationshipCandidate>,
}

/// Counts reported back to the indexing pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionStats {
    pub entities: usize,
    pub relationships: usize,
}

/// Build the extraction prompt for one chunk of combined clip text.
pub fn extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"You are an expert information extraction system. From the video content below, extract the named entities (people, objects, places, organizations, concepts, events) and the relationships between them.

Respond with a single JSON object, and nothing else, in this exact shape:
{{
  "entities": [
    {{"name": "...", "type": "...", "description": "..."}}
  ],
  "relationships": [
    {{"source": "...", "target": "...", "label": "...", "description": "..."}}
  ]
}}

Every relationship source and target must be the name of an extracted entity. Labels are short snake_case verbs such as "explains" or "developed_at". Descriptions should be one short sentence grounded in the content.

Video content:
{chunk_text}"#
    )
}

/// Parse an extraction response. Tolerant of missing keys and malformed
/// elements: anything unparsable is dropped rather than failing the chunk.
pub fn parse_extraction(value: &Value) -> ExtractedGraph {
    let entities = value
        .get("entities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<EntityCandidate>(item.clone()).ok())
                .filter(|e| !e.name.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();

    let relationships = value
        .get("relationships")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    serde_json::from_value::<RelationshipCandidate>(item.clone()).ok()
                })
                .filter(|r| !r.source.trim().is_empty() && !r.target.trim().is_empty())
                .collect()
        })
        .unwrap_or_default();

    ExtractedGraph {
        entities,
        relationships,
    }
}

/// Extract a chunk's subgraph and merge it into the store.
///
/// New entity descriptions are embedded in one batch with the text encoder.
/// Relationships whose endpoints did not resolve to an entity are skipped.
pub async fn build_chunk_graph(
    store: &GraphStore,
    llm: &dyn LlmClient,
    encoder: &dyn TextEncoder,
    chunk: &ChunkRecord,
) -> Result<ExtractionStats> {
    let response = llm.generate_json(&extraction_prompt(&chunk.chunk_text)).await?;
    let extracted = parse_extraction(&response);
    if extracted.entities.is_empty() {
        debug!("No entities extracted from chunk {}", chunk.id);
        return Ok(ExtractionStats::default());
    }

    let descriptions: Vec<String> = extracted
        .entities
        .iter()
        .map(|e| format!("{}: {}", e.name, e.description))
        .collect();
    let embeddings = encoder.embed(descriptions).await?;

    let clip_ids = chunk.clip_ids();
    let mut ids_by_name: HashMap<String, String> = HashMap::new();
    let mut stats = ExtractionStats::default();

    for (candidate, embedding) in extracted.entities.iter().zip(embeddings.iter()) {
        let id = store
            .upsert_entity(
                &candidate.name,
                &candidate.entity_type,
                &candidate.description,
                Some(embedding),
                &chunk.id,
                &clip_ids,
            )
            .await?;
        ids_by_name.insert(candidate.name.clone(), id);
        stats.entities += 1;
    }

    for rel in &extracted.relationships {
        let source = match resolve_endpoint(store, &ids_by_name, &rel.source).await? {
            Some(id) => id,
            None => {
                warn!("Dropping relationship with unknown source '{}'", rel.source);
                continue;
            }
        };
        let target = match resolve_endpoint(store, &ids_by_name, &rel.target).await? {
            Some(id) => id,
            None => {
                warn!("Dropping relationship with unknown target '{}'", rel.target);
                continue;
            }
        };
        store
            .upsert_relationship(&source, &target, &rel.label, &rel.description, &chunk.id)
            .await?;
        stats.relationships += 1;
    }

    debug!(
        "Chunk {}: merged {} entities, {} relationships",
        chunk.id, stats.entities, stats.relationships
    );
    Ok(stats)
}

async fn resolve_endpoint(
    store: &GraphStore,
    ids_by_name: &HashMap<String, String>,
    name: &str,
) -> Result<Option<String>> {
    if let Some(id) = ids_by_name.get(name) {
        return Ok(Some(id.clone()));
    }
    Ok(store.find_by_name(name).await?.map(|e| e.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_extraction_full() {
        let value = json!({
            "entities": [
                {"name": "Marie Curie", "type": "person", "description": "A physicist"},
                {"name": "Radium", "description": "An element"}
            ],
            "relationships": [
                {"source": "Marie Curie", "target": "Radium", "type": "discovered", "description": "she discovered it"},
                {"source": "Radium", "target": "Marie Curie", "description": "glows for her"}
            ]
        });

        let graph = parse_extraction(&value);
        assert_eq!(graph.entities.len(), 2);
        // Missing type falls back to "concept"
        assert_eq!(graph.entities[1].entity_type, "concept");
        assert_eq!(graph.relationships.len(), 2);
        assert_eq!(graph.relationships[0].source, "Marie Curie");
        // "type" aliases onto the label; a missing label gets the default
        assert_eq!(graph.relationships[0].label, "discovered");
        assert_eq!(graph.relationships[1].label, "related_to");
    }

    #[test]
    fn test_parse_extraction_tolerates_garbage() {
        let value = json!({
            "entities": [
                {"name": ""},
                {"notaname": "x"},
                {"name": "Valid"}
            ],
            "relationships": [
                {"source": "Valid"},
                "not an object"
            ]
        });

        let graph = parse_extraction(&value);
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].name, "Valid");
        assert!(graph.relationships.is_empty());
    }

    #[test]
    fn test_parse_extraction_missing_keys() {
        let graph = parse_extraction(&json!({}));
        assert!(graph.entities.is_empty());
        assert!(graph.relationships.is_empty());
    }

    #[test]
    fn test_prompt_includes_chunk_text() {
        let prompt = extraction_prompt("CLIP_ID: v1_clip_0000\nVISUALS: a lab bench");
        assert!(prompt.contains("a lab bench"));
        assert!(prompt.contains("\"entities\""));
    }
}
