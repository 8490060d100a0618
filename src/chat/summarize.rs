//! The summarize handler: a "catch me up" digest over recently-summarized
//! posts.

use std::time::Instant;

use chrono::{Duration, SecondsFormat, Utc};
use futures_util::StreamExt;
use rand::RngExt;
use tracing::warn;

use crate::chat::ChatRequestContext;
use crate::chat::prompts::DIGEST_SYSTEM_PROMPT;
use crate::chat::queries;
use crate::config::SUMMARY_LOOKBACK_DAYS;
use crate::error::PlatformError;
use crate::llm::CompletionRequest;
use crate::services::Services;
use crate::transport::WsMessage;

struct RecentSummary {
    title: String,
    summary: String,
    updated: String,
}

#[derive(Default)]
struct SummarizeState {
    course_id: Option<String>,
    num_summaries: usize,
}

pub async fn handle(services: &Services, ctx: &ChatRequestContext) -> Result<(), PlatformError> {
    let started = Instant::now();
    let mut state = SummarizeState::default();

    let result = run_digest(services, ctx, &mut state).await;
    if let Err(err) = &result {
        warn!(
            connection_id = %ctx.connection_id,
            course_id = state.course_id.as_deref().unwrap_or(""),
            error = %err,
            "error processing summarize request"
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
    }

    let _ = services
        .transport
        .post_to_connection(&ctx.connection_id, &WsMessage::done(None))
        .await;

    if let Some(course_id) = &state.course_id {
        let mut record = queries::base_record(
            ctx,
            course_id,
            services.embedder.model_name(),
            started.elapsed().as_millis() as u64,
        );
        record.num_summaries_processed =
            (state.num_summaries > 0).then_some(state.num_summaries);
        record.summary_days = Some(SUMMARY_LOOKBACK_DAYS as u32);
        queries::persist(services.query_log.as_ref(), record).await;
    }

    Ok(())
}

async fn run_digest(
    services: &Services,
    ctx: &ChatRequestContext,
    state: &mut SummarizeState,
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

    let summaries = recent_summaries(services, &course_id, SUMMARY_LOOKBACK_DAYS).await?;
    state.num_summaries = summaries.len();

    if summaries.is_empty() {
        let message = format!(
            "You're all caught up! There have been no updates in the last {SUMMARY_LOOKBACK_DAYS} days."
        );
        stream_canned(services, &ctx.connection_id, &message).await;
        return Ok(());
    }

    let summaries_text = format_summaries(&summaries);
    let prompt = format!(
        "Here are summaries of {count} Piazza posts from the last {SUMMARY_LOOKBACK_DAYS} days:\n\n\
         {summaries_text}\n\n\
         Create a brief digest that tells the user what topics are being discussed and where there's activity. \
         Don't include all the details - just help them know what's happening and what might need their attention. \
         If there are no summaries, let the user know that there are no recent posts.",
        count = summaries.len(),
    );

    let mut stream = services
        .llm
        .stream_completion(CompletionRequest::new(
            ctx.gpt_model.clone(),
            DIGEST_SYSTEM_PROMPT,
            prompt,
        ))
        .await?;

    services
        .transport
        .post_to_connection(&ctx.connection_id, &WsMessage::start())
        .await?;

    while let Some(delta) = stream.next().await {
        let delta = delta?;
        services
            .transport
            .post_to_connection(&ctx.connection_id, &WsMessage::chunk(delta))
            .await?;
    }

    Ok(())
}

/// Posts of a course summarized within the window, newest first. Viewing a
/// summary flags the post so the summarizer switches to fresh-updates-only
/// mode next time.
async fn recent_summaries(
    services: &Services,
    course_id: &str,
    days: i64,
) -> Result<Vec<RecentSummary>, PlatformError> {
    let cutoff =
        (Utc::now() - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let posts = services.posts.summarized_since(course_id, &cutoff).await?;

    let mut summaries = Vec::new();
    for post in &posts {
        let Some(summary) = &post.current_summary else {
            continue;
        };
        summaries.push(RecentSummary {
            title: if post.post_title.is_empty() {
                "Untitled Post".to_string()
            } else {
                post.post_title.clone()
            },
            summary: summary.clone(),
            updated: post.summary_last_updated.clone().unwrap_or_default(),
        });

        if !post.needs_new_summary {
            if let Err(err) = services
                .posts
                .set_needs_new_summary(&post.course_id, &post.post_id, true)
                .await
            {
                warn!(
                    course_id = %post.course_id,
                    post_id = %post.post_id,
                    error = %err,
                    "failed to flag summary as read"
                );
            }
        }
    }

    summaries.sort_by(|a, b| b.updated.cmp(&a.updated));
    Ok(summaries)
}

fn format_summaries(summaries: &[RecentSummary]) -> String {
    let mut formatted = Vec::new();
    for (i, summary) in summaries.iter().enumerate() {
        formatted.push(format!("{}. **{}**", i + 1, summary.title));
        formatted.push(format!("   {}", summary.summary));
        formatted.push(String::new());
    }
    formatted.join("\n")
}

/// Streams a fixed message in small pieces with a little jitter so the
/// client renders it like a live response.
pub(crate) async fn stream_canned(services: &Services, connection_id: &str, message: &str) {
    let chars: Vec<char> = message.chars().collect();
    for piece in chars.chunks(5) {
        let delay_ms = rand::rng().random_range(5..=30);
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        let _ = services
            .transport
            .post_to_connection(
                connection_id,
                &WsMessage::chunk(piece.iter().collect::<String>()),
            )
            .await;
    }
}
