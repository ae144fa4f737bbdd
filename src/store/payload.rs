//! Payload schema for vector index points

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Derive the deterministic point UUID for a record id.
///
/// UUIDv5 over the record id means re-indexing the same video writes the same
/// point ids, so upserts replace stale vectors instead of duplicating them.
pub fn point_id_for(record_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes())
}

/// A point ready to be upserted into a vector index
#[derive(Debug, Clone)]
pub struct IndexPoint {
    /// Domain record id (clip id or chunk id); the point UUID is derived
    /// from it
    pub record_id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

impl IndexPoint {
    pub fn point_id(&self) -> Uuid {
        point_id_for(&self.record_id)
    }
}

/// A search hit returned from a vector index
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record_id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// Payload stored with each clip vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipPayload {
    pub record_id: String,
    pub video_id: String,
    pub clip_ordinal: usize,
    pub start_secs: f64,
    pub end_secs: f64,
    pub caption: String,
    pub transcript: String,
    pub indexed_at: String,
}

/// Payload stored with each chunk vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub record_id: String,
    pub video_id: String,
    pub chunk_index: usize,
    /// Clip ids aggregated into this chunk, in order
    pub clip_ids: Vec<String>,
    pub text: String,
    pub indexed_at: String,
}

impl ClipPayload {
    pub fn into_point(self, vector: Vec<f32>) -> IndexPoint {
        IndexPoint {
            record_id: self.record_id.clone(),
            vector,
            payload: to_map(&self),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(map.clone())).ok()
    }
}

impl ChunkPayload {
    pub fn into_point(self, vector: Vec<f32>) -> IndexPoint {
        IndexPoint {
            record_id: self.record_id.clone(),
            vector,
            payload: to_map(&self),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(map.clone())).ok()
    }
}

fn to_map<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_deterministic() {
        let a = point_id_for("lecture_01_clip_0003");
        let b = point_id_for("lecture_01_clip_0003");
        let c = point_id_for("lecture_01_clip_0004");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_clip_payload_roundtrip() {
        let payload = ClipPayload {
            record_id: "v1_clip_0000".to_string(),
            video_id: "v1".to_string(),
            clip_ordinal: 0,
            start_secs: 0.0,
            end_secs: 30.0,
            caption: "a whiteboard lecture".to_string(),
            transcript: "welcome to the course".to_string(),
            indexed_at: "2025-01-01T00:00:00Z".to_string(),
        };

        let point = payload.clone().into_point(vec![0.1, 0.2]);
        assert_eq!(point.record_id, "v1_clip_0000");

        let parsed = ClipPayload::from_map(&point.payload).unwrap();
        assert_eq!(parsed.video_id, "v1");
        assert_eq!(parsed.end_secs, 30.0);
    }
}
