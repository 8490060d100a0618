//! Concurrent post summarization.
//!
//! Scans for posts whose major activity postdates their last summary and
//! rewrites each post's summary from its new diffs, merging into the running
//! summary by default and starting fresh when the post was flagged or has
//! gone stale.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{
    DIFF_CONTENT_PREVIEW_CHARS, FRESH_SUMMARY_GAP_DAYS, NO_SUMMARY_SENTINEL,
    SUMMARIZER_MAX_WORKERS,
};
use crate::error::PlatformError;
use crate::llm::{CompletionRequest, LanguageModel};
use crate::stores::{DiffStore, PostStore};
use crate::timefmt::{now_iso, parse_timestamp};
use crate::types::{DiffRecord, PostRecord};

const SYSTEM_PROMPT: &str = "You are a backend summarization engine for a technical course forum. \
Your output is for a 'Catch Me Up' dashboard. The user should know what's been happening on the forum.\n\
RULES:\n\
1. ATTRIBUTED BREVITY: Always identify the source of key info (e.g., 'Instructor confirmed...', 'Student reported issue with...').\n\
2. IF RESOLVED: State the solution clearly (e.g., 'Instructor clarified that only one screenshot is required').\n\
3. IF UNRESOLVED: Summarize the core question (e.g., 'Student asked for clarification on the deadline; no response yet.').\n\
4. FORMATTING: Max 2 sentences. No bullet points.";

/// Which prompt shape a post gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryStrategy {
    /// Merge the new diffs into the running summary.
    RunningLog,
    /// Summarize only the new updates, with the old summary as context.
    Fresh,
}

/// Picks the prompt strategy for a post.
///
/// Fresh applies when the post was flagged (`needs_new_summary`) or when the
/// previous summary is older than the staleness gap. A post that has never
/// been summarized has nothing to anchor a fresh summary against, so it
/// always takes the running-log form with an empty running summary.
pub fn choose_strategy(post: &PostRecord) -> SummaryStrategy {
    let watermark = post.summary_watermark();
    let never_summarized = watermark <= NO_SUMMARY_SENTINEL;
    if never_summarized {
        return SummaryStrategy::RunningLog;
    }

    if post.needs_new_summary {
        return SummaryStrategy::Fresh;
    }

    let stale = parse_timestamp(watermark)
        .map(|last| Utc::now() - last > Duration::days(FRESH_SUMMARY_GAP_DAYS))
        .unwrap_or(false);
    if stale {
        SummaryStrategy::Fresh
    } else {
        SummaryStrategy::RunningLog
    }
}

/// Renders the diff log for a prompt, newest state last, content previews
/// bounded.
pub fn format_diffs(diffs: &[DiffRecord]) -> String {
    let mut lines = Vec::new();
    for diff in diffs {
        lines.push(format!(
            "[{}] {}",
            diff.timestamp(),
            diff.kind.as_str().to_uppercase()
        ));
        if !diff.subject.is_empty() {
            lines.push(format!("Subject: {}", diff.subject));
        }
        if !diff.content.is_empty() {
            let preview: String = diff
                .content
                .chars()
                .take(DIFF_CONTENT_PREVIEW_CHARS)
                .collect();
            lines.push(format!("Content: {preview}..."));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

fn build_prompt(post: &PostRecord, strategy: SummaryStrategy, events_text: &str) -> String {
    let title = if post.post_title.is_empty() {
        "Untitled"
    } else {
        &post.post_title
    };

    match strategy {
        SummaryStrategy::Fresh => {
            let previous = post
                .current_summary
                .as_deref()
                .unwrap_or("No summary available.");
            format!(
                "Post Title: {title}\n\
                 Previous summary (context only, do not repeat it):\n{previous}\n\n\
                 New Updates to Post:\n{events_text}\n\n\
                 Task: Create a concise summary of only the new updates."
            )
        }
        SummaryStrategy::RunningLog => {
            let current = post
                .current_summary
                .as_deref()
                .unwrap_or("No summary available.");
            format!(
                "Current Summary: {current}\n\n\
                 New Updates to Post:\n{events_text}\n\n\
                 Task: Update the Current Summary to reflect the New Updates."
            )
        }
    }
}

/// Totals for one summarizer run.
#[derive(Clone, Copy, Debug, Default)]
pub struct SummaryRunReport {
    pub candidates: usize,
    pub summarized: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Summarizer {
    posts: Arc<dyn PostStore>,
    diffs: Arc<dyn DiffStore>,
    llm: Arc<dyn LanguageModel>,
    model: String,
    max_workers: usize,
}

impl Summarizer {
    pub fn new(
        posts: Arc<dyn PostStore>,
        diffs: Arc<dyn DiffStore>,
        llm: Arc<dyn LanguageModel>,
        model: impl Into<String>,
    ) -> Self {
        Summarizer {
            posts,
            diffs,
            llm,
            model: model.into(),
            max_workers: SUMMARIZER_MAX_WORKERS,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// One scheduled run: find candidates, summarize them concurrently.
    ///
    /// Posts are disjoint work items partitioned by id, so workers need no
    /// coordination; a failing post is reported and does not block others.
    pub async fn run(&self) -> Result<SummaryRunReport, PlatformError> {
        let candidates = self.collect_candidates().await?;
        let mut report = SummaryRunReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        info!(candidates = candidates.len(), "posts pending summarization");

        if candidates.is_empty() {
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();

        for post in candidates {
            let semaphore = semaphore.clone();
            let posts = self.posts.clone();
            let diffs = self.diffs.clone();
            let llm = self.llm.clone();
            let model = self.model.clone();

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|err| PlatformError::invalid(err.to_string()))?;
                let key = (post.course_id.clone(), post.post_id.clone());
                summarize_post(posts, diffs, llm, model, post)
                    .await
                    .map(|wrote| (key, wrote))
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok((_, true))) => report.summarized += 1,
                Ok(Ok((_, false))) => report.skipped += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(error = %err, "summarization worker failed");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(error = %err, "summarization worker panicked");
                }
            }
        }

        info!(
            summarized = report.summarized,
            skipped = report.skipped,
            failed = report.failed,
            "summarizer run complete"
        );
        Ok(report)
    }

    async fn collect_candidates(&self) -> Result<Vec<PostRecord>, PlatformError> {
        let mut candidates = Vec::new();
        let mut token = None;
        loop {
            let page = self.posts.scan(token.take()).await?;
            candidates.extend(
                page.items
                    .into_iter()
                    .filter(PostRecord::needs_summarization),
            );
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(candidates)
    }
}

async fn summarize_post(
    posts: Arc<dyn PostStore>,
    diffs: Arc<dyn DiffStore>,
    llm: Arc<dyn LanguageModel>,
    model: String,
    post: PostRecord,
) -> Result<bool, PlatformError> {
    let watermark = post.summary_watermark().to_string();
    let new_diffs = diffs
        .query_after(&post.course_id, &post.post_id, &watermark)
        .await?;
    if new_diffs.is_empty() {
        debug!(course_id = %post.course_id, post_id = %post.post_id, "no diffs since last summary");
        return Ok(false);
    }

    let strategy = choose_strategy(&post);
    let events_text = format_diffs(&new_diffs);
    let prompt = build_prompt(&post, strategy, &events_text);

    let summary = llm
        .complete(CompletionRequest::new(model, SYSTEM_PROMPT, prompt))
        .await?;

    posts
        .write_summary(
            &post.course_id,
            &post.post_id,
            summary.trim(),
            &now_iso(),
        )
        .await?;

    info!(
        course_id = %post.course_id,
        post_id = %post.post_id,
        strategy = ?strategy,
        "summarized post"
    );
    Ok(true)
}
