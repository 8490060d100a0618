//! Query-analytics persistence. Best-effort by design: losing a row is
//! logged, never surfaced to the user.

use tracing::warn;

use crate::chat::ChatRequestContext;
use crate::stores::QueryLogStore;
use crate::timefmt::now_iso;
use crate::types::{StudentQueryRecord, embedding_decimals};

/// Builds the base analytics row shared by every intent; callers fill in
/// their intent-specific fields before persisting.
pub fn base_record(
    ctx: &ChatRequestContext,
    course_id: &str,
    embedding_model: &str,
    processing_time_ms: u64,
) -> StudentQueryRecord {
    StudentQueryRecord {
        course_id: course_id.to_string(),
        query_id: ctx.query_id.clone(),
        user_id: ctx.user_id.clone(),
        raw_query: ctx.raw_query.clone(),
        normalized_query: ctx.normalized_query.clone(),
        embedding: embedding_decimals(&ctx.embedding),
        embedding_model: embedding_model.to_string(),
        intent: ctx.intent,
        gpt_model: ctx.gpt_model.clone(),
        connection_id: ctx.connection_id.clone(),
        created_at: now_iso(),
        processing_time_ms,
        prioritize_instructor: None,
        needs_more_context: None,
        num_chunks_retrieved: None,
        top_chunk_score: None,
        avg_chunk_score: None,
        top_chunk_scores: None,
        num_citations: None,
        citation_post_numbers: None,
        num_summaries_processed: None,
        summary_days: None,
    }
}

/// Persists the row, swallowing (but logging) failures.
pub async fn persist(log: &dyn QueryLogStore, record: StudentQueryRecord) {
    let query_id = record.query_id.clone();
    if let Err(err) = log.put(record).await {
        warn!(query_id = %query_id, error = %err, "failed to persist student query");
    }
}
