//! Full and incremental scrape orchestration.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::config::{CourseRegistry, QUEUE_RECEIVE_BATCH, QUEUE_RECEIVE_WAIT};
use crate::error::PlatformError;
use crate::extract::BlobExtractor;
use crate::forum::ForumClient;
use crate::ingest::ChunkManager;
use crate::posts::PostManager;
use crate::queue::{QueueMessage, UpdateQueue};

/// Totals for one scrape run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScrapeReport {
    pub posts_processed: usize,
    pub posts_failed: usize,
    pub chunks_upserted: usize,
}

/// Initial index build: walks every post of a course through the extractor
/// and the chunk manager.
///
/// Full scrape deliberately does not touch the Post/Diff tables; it exists
/// to (re)build the chunk table and the vector index quickly.
pub struct FullScraper {
    forum: Arc<dyn ForumClient>,
    chunk_manager: ChunkManager,
    courses: CourseRegistry,
    pause: Duration,
}

impl FullScraper {
    pub fn new(
        forum: Arc<dyn ForumClient>,
        chunk_manager: ChunkManager,
        courses: CourseRegistry,
        pause: Duration,
    ) -> Self {
        FullScraper {
            forum,
            chunk_manager,
            courses,
            pause,
        }
    }

    pub async fn scrape_course(&mut self, course_id: &str) -> Result<ScrapeReport, PlatformError> {
        let mut report = ScrapeReport::default();

        if self.courses.is_ignored(course_id) {
            info!(course_id, "skipping ignored course");
            return Ok(report);
        }

        info!(course_id, "starting full scrape");
        let mut extractor = BlobExtractor::new(self.forum.clone(), course_id);
        let post_ids = self.forum.list_post_ids(course_id).await?;

        for (index, post_id) in post_ids.iter().enumerate() {
            // The forum rate-limits aggressively; pause between fetches.
            if index > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            match self.forum.fetch_post(course_id, post_id).await {
                Ok(post) => {
                    let blobs = extractor.extract_post_blobs(&post).await;
                    let post_chunks = ChunkManager::derive_post_chunks(&blobs, course_id);
                    self.chunk_manager.process_post_chunks(post_chunks).await?;
                    report.posts_processed += 1;
                }
                Err(err) => {
                    report.posts_failed += 1;
                    warn!(course_id, post_id = %post_id, error = %err, "failed to fetch post");
                }
            }
        }

        report.chunks_upserted = self.chunk_manager.finalize().await?;
        info!(
            course_id,
            posts = report.posts_processed,
            chunks = report.chunks_upserted,
            "full scrape complete"
        );
        Ok(report)
    }
}

/// Queue-driven scrape: drains the update queue, refetches the posts it
/// names, and maintains chunk, post, and diff state.
pub struct IncrementalScraper {
    forum: Arc<dyn ForumClient>,
    queue: Arc<dyn UpdateQueue>,
    chunk_manager: ChunkManager,
    post_manager: PostManager,
    courses: CourseRegistry,
}

impl IncrementalScraper {
    pub fn new(
        forum: Arc<dyn ForumClient>,
        queue: Arc<dyn UpdateQueue>,
        chunk_manager: ChunkManager,
        post_manager: PostManager,
        courses: CourseRegistry,
    ) -> Self {
        IncrementalScraper {
            forum,
            queue,
            chunk_manager,
            post_manager,
            courses,
        }
    }

    pub async fn run(&mut self) -> Result<ScrapeReport, PlatformError> {
        let messages = self.drain_queue().await?;
        info!(message_count = messages.len(), "drained update queue");

        let (grouped, by_post) = group_messages_by_course(messages);
        let mut report = ScrapeReport::default();

        for (course_id, post_ids) in grouped {
            if self.courses.is_ignored(&course_id) {
                info!(course_id = %course_id, post_count = post_ids.len(), "deleting messages for ignored course");
                for post_id in &post_ids {
                    if let Some(message) = by_post.get(post_id) {
                        if let Err(err) = self.queue.delete(&message.receipt_handle).await {
                            warn!(post_id = %post_id, error = %err, "failed to delete queue message");
                        }
                    }
                }
                continue;
            }

            info!(course_id = %course_id, post_count = post_ids.len(), "processing incremental updates");
            let mut extractor = BlobExtractor::new(self.forum.clone(), course_id.clone());

            for post_id in post_ids {
                match self.process_one(&mut extractor, &course_id, &post_id).await {
                    Ok(()) => {
                        // Only successful processing consumes the message;
                        // failures leave it for redelivery.
                        if let Some(message) = by_post.get(&post_id) {
                            if let Err(err) = self.queue.delete(&message.receipt_handle).await {
                                warn!(post_id = %post_id, error = %err, "failed to delete queue message");
                            }
                        }
                        report.posts_processed += 1;
                    }
                    Err(err) => {
                        report.posts_failed += 1;
                        warn!(course_id = %course_id, post_id = %post_id, error = %err, "failed processing post");
                    }
                }
            }
        }

        report.chunks_upserted = self.chunk_manager.finalize().await?;
        info!(
            posts = report.posts_processed,
            failures = report.posts_failed,
            chunks = report.chunks_upserted,
            "incremental scrape complete"
        );
        Ok(report)
    }

    async fn process_one(
        &mut self,
        extractor: &mut BlobExtractor,
        course_id: &str,
        post_id: &str,
    ) -> Result<(), PlatformError> {
        let post = self.forum.fetch_post(course_id, post_id).await?;

        let blobs = extractor.extract_post_blobs(&post).await;
        let post_chunks = ChunkManager::derive_post_chunks(&blobs, course_id);
        self.chunk_manager.process_post_chunks(post_chunks).await?;

        self.post_manager.process_post(course_id, &post).await?;
        Ok(())
    }

    async fn drain_queue(&self) -> Result<Vec<QueueMessage>, PlatformError> {
        let mut all = Vec::new();
        loop {
            let batch = self
                .queue
                .receive(QUEUE_RECEIVE_BATCH, QUEUE_RECEIVE_WAIT)
                .await?;
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
        }
        Ok(all)
    }
}

/// Groups drained messages by course and maps post id → message for later
/// deletion. A later message for the same post wins.
fn group_messages_by_course(
    messages: Vec<QueueMessage>,
) -> (Vec<(String, Vec<String>)>, FxHashMap<String, QueueMessage>) {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    let mut by_post = FxHashMap::default();

    for message in messages {
        let course_id = message.body.course_id.clone();
        let post_id = message.body.post_id.clone();

        match grouped.iter_mut().find(|(course, _)| *course == course_id) {
            Some((_, posts)) => {
                if !posts.contains(&post_id) {
                    posts.push(post_id.clone());
                }
            }
            None => grouped.push((course_id, vec![post_id.clone()])),
        }
        by_post.insert(post_id, message);
    }

    (grouped, by_post)
}
