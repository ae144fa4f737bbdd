//! Query command implementation

use crate::error::Result;
use crate::retrieval::{QueryResponse, RetrievalPipeline};

/// Run one question through the retrieval pipeline.
pub async fn cmd_query(pipeline: &RetrievalPipeline, query: &str) -> Result<QueryResponse> {
    pipeline.answer(query).await
}

/// Print the answer and its sources.
pub fn print_query_response(response: &QueryResponse) {
    println!("{}", response.answer);

    if response.retrieved_sources.is_empty() {
        return;
    }

    println!("\nSources:");
    for source in &response.retrieved_sources {
        println!(
            "  [{:.2}] {} ({}) {}",
            source.score, source.video_id, source.timestamp, source.caption
        );
    }
}
