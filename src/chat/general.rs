//! The general-query handler: retrieval, context assembly, and the framed
//! streaming answer.

use std::collections::BTreeMap;
use std::time::Instant;

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::chat::ChatRequestContext;
use crate::chat::citations::{create_citation_map, format_citations};
use crate::chat::context::{ContextAssembler, format_context};
use crate::chat::framing::BodyFramer;
use crate::chat::prompts::general_system_prompt;
use crate::chat::queries;
use crate::error::PlatformError;
use crate::llm::CompletionRequest;
use crate::services::Services;
use crate::stores::VectorHit;
use crate::transport::WsMessage;
use crate::types::Citation;

#[derive(Default)]
struct GeneralState {
    course_id: Option<String>,
    needs_more_context: bool,
    top_chunks: Vec<VectorHit>,
    citations: Vec<Citation>,
    citation_map: BTreeMap<String, Citation>,
}

/// Handles one general query end to end.
///
/// Whatever the inner pipeline does, the connection gets a terminal done
/// frame carrying `needs_more_context`, and the analytics row is persisted
/// when the course resolved. Failures are reported to the user in-band;
/// the caller sees success either way.
pub async fn handle(services: &Services, ctx: &ChatRequestContext) -> Result<(), PlatformError> {
    let started = Instant::now();
    let mut state = GeneralState::default();

    let result = run_query(services, ctx, &mut state).await;
    if let Err(err) = &result {
        warn!(
            connection_id = %ctx.connection_id,
            course_id = state.course_id.as_deref().unwrap_or(""),
            error = %err,
            "error processing general query"
        );
        let _ = services
            .transport
            .post_to_connection(
                &ctx.connection_id,
                &WsMessage::chunk(
                    "An error occurred while processing your request. Please try again later.",
                ),
            )
            .await;
        state.needs_more_context = false;
    }

    let _ = services
        .transport
        .post_to_connection(
            &ctx.connection_id,
            &WsMessage::done(Some(state.needs_more_context)),
        )
        .await;

    if let Some(course_id) = &state.course_id {
        let mut record = queries::base_record(
            ctx,
            course_id,
            services.embedder.model_name(),
            started.elapsed().as_millis() as u64,
        );

        let scores: Vec<f32> = state.top_chunks.iter().map(|hit| hit.score).collect();
        record.prioritize_instructor = Some(ctx.prioritize_instructor);
        record.needs_more_context = Some(state.needs_more_context);
        record.num_chunks_retrieved = Some(state.top_chunks.len());
        record.top_chunk_score = scores.first().copied();
        record.avg_chunk_score = (!scores.is_empty())
            .then(|| scores.iter().sum::<f32>() / scores.len() as f32);
        record.top_chunk_scores = (!scores.is_empty()).then(|| scores.clone());
        record.num_citations = Some(state.citations.len());
        let citation_numbers: Vec<u64> = state
            .citations
            .iter()
            .filter_map(|citation| citation.post_number)
            .collect();
        record.citation_post_numbers = (!citation_numbers.is_empty()).then_some(citation_numbers);

        queries::persist(services.query_log.as_ref(), record).await;
    }

    Ok(())
}

async fn run_query(
    services: &Services,
    ctx: &ChatRequestContext,
    state: &mut GeneralState,
) -> Result<(), PlatformError> {
    if ctx.normalized_query.is_empty() || ctx.course_name.is_empty() {
        return Err(PlatformError::invalid(
            "missing required fields: message or course_name",
        ));
    }
    let course = services
        .courses
        .resolve(&ctx.course_name)
        .ok_or_else(|| PlatformError::invalid(format!("unknown course: {}", ctx.course_name)))?;
    let course_id = course.course_id.clone();
    state.course_id = Some(course_id.clone());

    let assembler = ContextAssembler::new(services.chunks.clone(), services.vector.clone());
    state.top_chunks = assembler
        .top_chunks(&ctx.normalized_query, &course_id)
        .await?;
    debug!(
        connection_id = %ctx.connection_id,
        hits = state.top_chunks.len(),
        "retrieved context chunks"
    );

    let context_chunks = assembler
        .hydrate(&state.top_chunks, ctx.prioritize_instructor)
        .await?;

    let (citation_map, post_to_post_number) = create_citation_map(&state.top_chunks, &course_id);
    let context = format_context(&context_chunks, &citation_map, &post_to_post_number);
    state.citation_map = citation_map;

    let prompt = format!(
        "Context:\n{context}\n\nUser's Question: {query}\nAnswer:",
        query = ctx.normalized_query
    );

    let mut stream = services
        .llm
        .stream_completion(CompletionRequest::new(
            ctx.gpt_model.clone(),
            general_system_prompt(),
            prompt,
        ))
        .await?;

    services
        .transport
        .post_to_connection(&ctx.connection_id, &WsMessage::start())
        .await?;

    let mut framer = BodyFramer::new();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        for piece in framer.push(&delta) {
            services
                .transport
                .post_to_connection(&ctx.connection_id, &WsMessage::chunk(piece))
                .await?;
        }
    }

    let outcome = framer.finish();
    state.needs_more_context = outcome.needs_more_context;
    if !outcome.saw_body {
        warn!(connection_id = %ctx.connection_id, "stream ended without a complete body frame");
    }

    state.citations = format_citations(&state.top_chunks, &course_id);
    services
        .transport
        .post_to_connection(
            &ctx.connection_id,
            &WsMessage::Citations {
                citations: state.citations.clone(),
                citation_map: state.citation_map.clone(),
            },
        )
        .await?;

    Ok(())
}
