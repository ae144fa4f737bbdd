//! videorag: a multi-modal video RAG engine
//!
//! Indexes videos into clip and chunk vector collections plus a knowledge
//! graph, then answers natural-language questions over the library with
//! graph-assisted hybrid retrieval and query-aware re-captioning.

pub mod commands;
pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod media;
pub mod meta;
pub mod models;
pub mod progress;
pub mod retrieval;
pub mod store;

pub use error::{Error, Result};
