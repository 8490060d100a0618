//! Shared fixtures: an in-memory platform with scripted collaborators.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use gp_ta::config::{CourseRegistry, Settings};
use gp_ta::email::RecordingEmailSender;
use gp_ta::error::{ForumError, LlmError};
use gp_ta::forum::{ChangeEvent, EndorsementTag, ForumClient, ForumPost, HistoryEntry, PostFlags};
use gp_ta::ingest::{ChunkManager, FullScraper, IncrementalScraper};
use gp_ta::llm::{CompletionRequest, Embedder, IntentPredictor, LanguageModel, TokenStream};
use gp_ta::notify::NotificationEngine;
use gp_ta::params::EnvParameterStore;
use gp_ta::posts::PostManager;
use gp_ta::queue::InMemoryQueue;
use gp_ta::services::Services;
use gp_ta::stores::{MemoryStore, MemoryVectorIndex};
use gp_ta::summarize::Summarizer;
use gp_ta::transport::RecordingTransport;
use gp_ta::types::{Intent, NotificationConfig};

pub const COURSE_ID: &str = "net1";
pub const COURSE_NAME: &str = "CPSC 110";
pub const IGNORED_COURSE_ID: &str = "net-ignored";
pub const OPS_EMAIL: &str = "ops@example.com";

/// Embeds by substring rule so tests can dial in exact similarity scores.
pub struct RuleEmbedder {
    rules: Vec<(&'static str, Vec<f32>)>,
    fallback: Vec<f32>,
}

impl RuleEmbedder {
    pub fn new(rules: Vec<(&'static str, Vec<f32>)>) -> Self {
        RuleEmbedder {
            rules,
            fallback: vec![0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[async_trait]
impl Embedder for RuleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        for (needle, vector) in &self.rules {
            if text.contains(needle) {
                return Ok(vector.clone());
            }
        }
        Ok(self.fallback.clone())
    }

    fn model_name(&self) -> &str {
        "rule-embedder-test"
    }
}

/// One scripted completion: streamed text, optionally failing mid-stream.
pub enum ScriptedResponse {
    Text(String),
    FailAfter(String),
}

/// Pops one scripted response per completion call and records the requests.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .push_back(ScriptedResponse::Text(text.into()));
    }

    pub fn push_failure_after(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .push_back(ScriptedResponse::FailAfter(text.into()));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

fn split_deltas(text: &str) -> Vec<Result<String, LlmError>> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(7)
        .map(|piece| Ok(piece.iter().collect::<String>()))
        .collect()
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<TokenStream, LlmError> {
        self.requests.lock().push(request);
        let scripted = self.responses.lock().pop_front();

        let items = match scripted {
            Some(ScriptedResponse::Text(text)) => split_deltas(&text),
            Some(ScriptedResponse::FailAfter(text)) => {
                let mut items = split_deltas(&text);
                items.push(Err(LlmError::Stream("connection reset".to_string())));
                items
            }
            None => Vec::new(),
        };

        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

/// Always predicts the configured intent.
pub struct FixedIntent(pub Intent);

impl IntentPredictor for FixedIntent {
    fn predict(&self, _embedding: &[f32]) -> Intent {
        self.0
    }
}

/// In-memory forum: posts registered per course, user names resolvable.
#[derive(Default)]
pub struct FixtureForum {
    posts: Mutex<Vec<((String, String), ForumPost)>>,
    users: Mutex<Vec<(String, String)>>,
}

impl FixtureForum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_post(&self, course_id: &str, post: ForumPost) {
        let key = (course_id.to_string(), post.id.clone());
        let mut posts = self.posts.lock();
        posts.retain(|(existing, _)| *existing != key);
        posts.push((key, post));
    }

    pub fn put_user(&self, user_id: &str, name: &str) {
        self.users
            .lock()
            .push((user_id.to_string(), name.to_string()));
    }
}

#[async_trait]
impl ForumClient for FixtureForum {
    async fn list_post_ids(&self, course_id: &str) -> Result<Vec<String>, ForumError> {
        Ok(self
            .posts
            .lock()
            .iter()
            .filter(|((course, _), _)| course == course_id)
            .map(|((_, post_id), _)| post_id.clone())
            .collect())
    }

    async fn fetch_post(&self, course_id: &str, post_id: &str) -> Result<ForumPost, ForumError> {
        self.posts
            .lock()
            .iter()
            .find(|((course, id), _)| course == course_id && id == post_id)
            .map(|(_, post)| post.clone())
            .ok_or_else(|| ForumError::Network(format!("post {post_id} not found")))
    }

    async fn user_name(
        &self,
        _course_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, ForumError> {
        Ok(self
            .users
            .lock()
            .iter()
            .find(|(id, _)| id == user_id)
            .map(|(_, name)| name.clone()))
    }
}

/// The full in-memory platform, with concrete handles kept around for
/// assertions.
pub struct TestPlatform {
    pub services: Services,
    pub store: Arc<MemoryStore>,
    pub vector: Arc<MemoryVectorIndex>,
    pub forum: Arc<FixtureForum>,
    pub llm: Arc<ScriptedLlm>,
    pub email: Arc<RecordingEmailSender>,
    pub transport: Arc<RecordingTransport>,
    pub queue: Arc<InMemoryQueue>,
    pub courses: CourseRegistry,
}

impl TestPlatform {
    pub fn new(intent: Intent, embedder_rules: Vec<(&'static str, Vec<f32>)>) -> Self {
        let store = MemoryStore::new();
        let embedder: Arc<RuleEmbedder> = Arc::new(RuleEmbedder::new(embedder_rules));
        let vector = MemoryVectorIndex::new(embedder.clone());
        let forum = Arc::new(FixtureForum::new());
        let llm = Arc::new(ScriptedLlm::new());
        let email = Arc::new(RecordingEmailSender::new());
        let transport = Arc::new(RecordingTransport::new());
        let queue = Arc::new(InMemoryQueue::new());

        let courses = CourseRegistry::new()
            .with_course(COURSE_ID, "cpsc110", COURSE_NAME)
            .with_course("net2", "cpsc121", "CPSC 121")
            .with_ignored(IGNORED_COURSE_ID);

        let settings = Settings {
            default_recipient_email: OPS_EMAIL.to_string(),
            default_gpt_model: "gpt-5".to_string(),
            scrape_pause: Duration::ZERO,
        };

        let services = Services {
            chunks: store.clone(),
            posts: store.clone(),
            diffs: store.clone(),
            standing_queries: store.clone(),
            sent_notifications: store.clone(),
            users: store.clone(),
            query_log: store.clone(),
            vector: vector.clone(),
            llm: llm.clone(),
            embedder: embedder.clone(),
            intent: Arc::new(FixedIntent(intent)),
            email: email.clone(),
            queue: queue.clone(),
            forum: forum.clone(),
            transport: transport.clone(),
            params: Arc::new(EnvParameterStore::default()),
            courses: courses.clone(),
            settings,
        };

        TestPlatform {
            services,
            store,
            vector,
            forum,
            llm,
            email,
            transport,
            queue,
            courses,
        }
    }

    pub fn chunk_manager(&self) -> ChunkManager {
        ChunkManager::new(self.store.clone(), self.vector.clone())
    }

    pub fn post_manager(&self) -> PostManager {
        PostManager::new(
            self.store.clone(),
            self.store.clone(),
            self.email.clone(),
            self.courses.clone(),
            NotificationConfig {
                recipient_email: OPS_EMAIL.to_string(),
            },
        )
    }

    pub fn full_scraper(&self) -> FullScraper {
        FullScraper::new(
            self.forum.clone(),
            self.chunk_manager(),
            self.courses.clone(),
            Duration::ZERO,
        )
    }

    pub fn incremental_scraper(&self) -> IncrementalScraper {
        IncrementalScraper::new(
            self.forum.clone(),
            self.queue.clone(),
            self.chunk_manager(),
            self.post_manager(),
            self.courses.clone(),
        )
    }

    pub fn notification_engine(&self) -> NotificationEngine {
        NotificationEngine::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.vector.clone(),
            self.email.clone(),
            OPS_EMAIL,
        )
    }

    pub fn summarizer(&self) -> Summarizer {
        Summarizer::new(self.store.clone(), self.store.clone(), self.llm.clone(), "gpt-5-mini")
    }
}

/// A root question post with one revision and a create entry in the change
/// log.
pub fn question_post(id: &str, nr: u64, title: &str, body_html: &str, created: &str) -> ForumPost {
    ForumPost {
        id: id.to_string(),
        nr: Some(nr),
        kind: "question".to_string(),
        history: vec![HistoryEntry {
            subject: title.to_string(),
            content: Some(body_html.to_string()),
            created: created.to_string(),
            uid: Some("u-author".to_string()),
        }],
        children: vec![],
        change_log: vec![ChangeEvent {
            kind: "create".to_string(),
            cid: None,
            when: Some(created.to_string()),
        }],
        tag_endorse: vec![],
        subject: None,
        created: Some(created.to_string()),
        config: PostFlags {
            is_announcement: false,
        },
    }
}

/// Attaches an instructor answer and logs the change.
pub fn with_instructor_answer(mut post: ForumPost, child_id: &str, body_html: &str) -> ForumPost {
    post.children.push(ForumPost {
        id: child_id.to_string(),
        kind: "i_answer".to_string(),
        history: vec![HistoryEntry {
            subject: String::new(),
            content: Some(body_html.to_string()),
            created: "2025-06-01T10:30:00Z".to_string(),
            uid: Some("u-instructor".to_string()),
        }],
        ..Default::default()
    });
    post.change_log.push(ChangeEvent {
        kind: "i_answer".to_string(),
        cid: Some(child_id.to_string()),
        when: None,
    });
    post
}

/// Attaches a student answer and logs the change.
pub fn with_student_answer(
    mut post: ForumPost,
    child_id: &str,
    body_html: &str,
    endorsed: bool,
) -> ForumPost {
    post.children.push(ForumPost {
        id: child_id.to_string(),
        kind: "s_answer".to_string(),
        history: vec![HistoryEntry {
            subject: String::new(),
            content: Some(body_html.to_string()),
            created: "2025-06-01T11:00:00Z".to_string(),
            uid: Some("u-student".to_string()),
        }],
        tag_endorse: if endorsed {
            vec![EndorsementTag {
                admin: true,
                id: None,
            }]
        } else {
            vec![]
        },
        ..Default::default()
    });
    post.change_log.push(ChangeEvent {
        kind: "s_answer".to_string(),
        cid: Some(child_id.to_string()),
        when: None,
    });
    post
}
