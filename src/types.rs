//! Core domain types shared across the ingestion, chat, and notification
//! pipelines.
//!
//! The key-value tables are the system of record for everything here; the
//! vector index only ever holds a rebuildable projection of [`Chunk`]s.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of logical unit a post decomposes into.
///
/// Wire values match the forum's `type` field (`question`, `i_answer`,
/// `s_answer`, `followup`, `feedback`); anything else is carried through
/// verbatim so unrecognized content still lands in the fallback context path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlobKind {
    Question,
    InstructorAnswer,
    StudentAnswer,
    Followup,
    Feedback,
    Other(String),
}

impl BlobKind {
    pub fn as_str(&self) -> &str {
        match self {
            BlobKind::Question => "question",
            BlobKind::InstructorAnswer => "i_answer",
            BlobKind::StudentAnswer => "s_answer",
            BlobKind::Followup => "followup",
            BlobKind::Feedback => "feedback",
            BlobKind::Other(s) => s,
        }
    }

    /// True for any answer variant, including the legacy bare `answer` type.
    pub fn is_answer(&self) -> bool {
        matches!(
            self,
            BlobKind::InstructorAnswer | BlobKind::StudentAnswer
        ) || self.as_str() == "answer"
    }

    /// True for discussion-flavored content (followups, feedback, replies).
    pub fn is_discussion(&self) -> bool {
        matches!(self, BlobKind::Followup | BlobKind::Feedback) || self.as_str() == "discussion"
    }
}

impl From<String> for BlobKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "question" => BlobKind::Question,
            "i_answer" => BlobKind::InstructorAnswer,
            "s_answer" => BlobKind::StudentAnswer,
            "followup" => BlobKind::Followup,
            "feedback" => BlobKind::Feedback,
            _ => BlobKind::Other(s),
        }
    }
}

impl From<&str> for BlobKind {
    fn from(s: &str) -> Self {
        BlobKind::from(s.to_string())
    }
}

impl From<BlobKind> for String {
    fn from(kind: BlobKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for BlobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instructor-endorsement state. Only student answers can be `yes` or `no`;
/// everything else is `n/a`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endorsement {
    #[serde(rename = "yes")]
    Yes,
    #[serde(rename = "no")]
    No,
    #[serde(rename = "n/a")]
    NotApplicable,
}

impl Endorsement {
    pub fn is_endorsed(self) -> bool {
        self == Endorsement::Yes
    }
}

/// A typed logical piece of a forum post, produced by the blob extractor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Blob {
    pub id: String,
    pub parent_id: String,
    pub root_id: String,
    pub root_post_num: Option<u64>,
    pub kind: BlobKind,
    /// Root question title. The root `question` blob keeps its own subject;
    /// every child inherits the root's title so its chunks stay retrievable.
    pub title: String,
    /// ISO-8601 UTC when parseable, otherwise the raw forum value.
    pub date: String,
    pub author_id: String,
    pub author_name: String,
    pub endorsement: Endorsement,
    /// Plain text, HTML already stripped.
    pub content: String,
}

/// A bounded-size text unit derived from a blob; the unit of retrieval and of
/// hash-based dedup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    /// `{blob_id}#{chunk_index}`; unique under `parent_id`.
    pub id: String,
    pub course_id: String,
    pub blob_id: String,
    pub chunk_index: usize,
    pub root_id: String,
    pub parent_id: String,
    pub root_post_num: Option<u64>,
    pub kind: BlobKind,
    pub title: String,
    pub date: String,
    pub author_id: String,
    pub author_name: String,
    pub endorsement: Endorsement,
    /// 64-hex SHA-256 of `chunk_text`; equality here means "unchanged".
    pub content_hash: String,
    pub chunk_text: String,
}

impl Chunk {
    /// Builds the chunk record for `chunk_text` at `chunk_index` of `blob`.
    pub fn from_blob(blob: &Blob, chunk_index: usize, chunk_text: String, course_id: &str) -> Self {
        Chunk {
            id: format!("{}#{}", blob.id, chunk_index),
            course_id: course_id.to_string(),
            blob_id: blob.id.clone(),
            chunk_index,
            root_id: blob.root_id.clone(),
            parent_id: blob.parent_id.clone(),
            root_post_num: blob.root_post_num,
            kind: blob.kind.clone(),
            title: blob.title.clone(),
            date: blob.date.clone(),
            author_id: blob.author_id.clone(),
            author_name: blob.author_name.clone(),
            endorsement: blob.endorsement,
            content_hash: crate::text::hash(&chunk_text),
            chunk_text,
        }
    }
}

/// One observed change to a post, as reported in the forum's change log.
///
/// Wire values: `create`, `update`, `i_answer`, `i_answer_update`,
/// `s_answer`, `s_answer_update`, `followup`, `feedback`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    #[serde(rename = "create")]
    NewQuestion,
    #[serde(rename = "update")]
    QuestionUpdate,
    #[serde(rename = "i_answer")]
    InstructorAnswer,
    #[serde(rename = "i_answer_update")]
    InstructorAnswerUpdate,
    #[serde(rename = "s_answer")]
    StudentAnswer,
    #[serde(rename = "s_answer_update")]
    StudentAnswerUpdate,
    #[serde(rename = "followup")]
    Followup,
    #[serde(rename = "feedback")]
    Feedback,
}

impl UpdateType {
    pub fn parse(wire: &str) -> Option<Self> {
        Some(match wire {
            "create" => UpdateType::NewQuestion,
            "update" => UpdateType::QuestionUpdate,
            "i_answer" => UpdateType::InstructorAnswer,
            "i_answer_update" => UpdateType::InstructorAnswerUpdate,
            "s_answer" => UpdateType::StudentAnswer,
            "s_answer_update" => UpdateType::StudentAnswerUpdate,
            "followup" => UpdateType::Followup,
            "feedback" => UpdateType::Feedback,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpdateType::NewQuestion => "create",
            UpdateType::QuestionUpdate => "update",
            UpdateType::InstructorAnswer => "i_answer",
            UpdateType::InstructorAnswerUpdate => "i_answer_update",
            UpdateType::StudentAnswer => "s_answer",
            UpdateType::StudentAnswerUpdate => "s_answer_update",
            UpdateType::Followup => "followup",
            UpdateType::Feedback => "feedback",
        }
    }

    /// Major updates are the ones that move `last_major_update` and drive
    /// summarization: a new question, a new instructor answer, or a new
    /// student answer.
    pub fn is_major(self) -> bool {
        matches!(
            self,
            UpdateType::NewQuestion | UpdateType::InstructorAnswer | UpdateType::StudentAnswer
        )
    }

    /// Which per-pass dedup bucket this change falls into.
    pub fn family(self) -> UpdateFamily {
        match self {
            UpdateType::NewQuestion | UpdateType::QuestionUpdate => UpdateFamily::Question,
            UpdateType::InstructorAnswer | UpdateType::InstructorAnswerUpdate => {
                UpdateFamily::InstructorAnswer
            }
            UpdateType::StudentAnswer | UpdateType::StudentAnswerUpdate => {
                UpdateFamily::StudentAnswer
            }
            UpdateType::Followup | UpdateType::Feedback => UpdateFamily::Discussion,
        }
    }
}

/// Dedup buckets for a single processing pass: at most one question change,
/// one instructor-answer change, and one student-answer change are recorded
/// per pass; discussion changes are recorded one-per.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateFamily {
    Question,
    InstructorAnswer,
    StudentAnswer,
    Discussion,
}

/// Durable per-post state backing the summarization loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostRecord {
    pub course_id: String,
    pub post_id: String,
    pub post_title: String,
    /// Forum creation time, normalized to UTC when parseable.
    pub created: String,
    pub is_announcement: bool,
    pub current_summary: Option<String>,
    /// `None` means "never summarized"; compares as the epoch.
    pub summary_last_updated: Option<String>,
    pub last_updated: String,
    pub last_major_update: String,
    pub num_changes: usize,
    pub needs_new_summary: bool,
}

impl PostRecord {
    /// Watermark used when querying the diff log: the last summary time, or
    /// the epoch when the post has never been summarized.
    pub fn summary_watermark(&self) -> &str {
        self.summary_last_updated
            .as_deref()
            .unwrap_or(crate::config::EPOCH_TIMESTAMP)
    }

    /// True when new major activity postdates the last summary.
    pub fn needs_summarization(&self) -> bool {
        self.last_major_update.as_str() > self.summary_watermark()
    }
}

/// Append-only record describing one observed change to a post.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiffRecord {
    pub course_id: String,
    pub post_id: String,
    /// `{timestamp}#{seq}`; lexicographic order is chronological, with `seq`
    /// disambiguating diffs written in the same pass.
    pub sort_key: String,
    pub kind: UpdateType,
    pub subject: String,
    pub content: String,
}

impl DiffRecord {
    /// Partition key of the diff log: `{course_id}#{post_id}`.
    pub fn partition_key(&self) -> String {
        diff_partition_key(&self.course_id, &self.post_id)
    }

    /// Timestamp half of the sort key.
    pub fn timestamp(&self) -> &str {
        self.sort_key.split('#').next().unwrap_or(&self.sort_key)
    }
}

pub fn diff_partition_key(course_id: &str, post_id: &str) -> String {
    format!("{course_id}#{post_id}")
}

/// A user-registered query that produces emails when new matching chunks
/// arrive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandingQuery {
    pub user_id: String,
    pub course_id: String,
    pub query: String,
    pub course_display_name: String,
    /// Top-1 similarity observed at registration time.
    pub closest_score: f32,
    /// Matches below this never notify. Always within
    /// [`MIN_NOTIFICATION_THRESHOLD`, `MAX_NOTIFICATION_THRESHOLD`].
    ///
    /// [`MIN_NOTIFICATION_THRESHOLD`]: crate::config::MIN_NOTIFICATION_THRESHOLD
    /// [`MAX_NOTIFICATION_THRESHOLD`]: crate::config::MAX_NOTIFICATION_THRESHOLD
    pub notification_threshold: f32,
    /// Monotone counter of notifications successfully sent; doubles as the
    /// vector-search width on the next engine run.
    pub max_notifications: u32,
}

impl StandingQuery {
    /// Sort key under the user partition: `{course_id}#{query}`.
    pub fn sort_key(&self) -> String {
        standing_query_sort_key(&self.course_id, &self.query)
    }

    /// Partition key of the sent-notification log for this query.
    pub fn sent_scope(&self) -> String {
        sent_notification_scope(&self.user_id, &self.course_id, &self.query)
    }
}

pub fn standing_query_sort_key(course_id: &str, query: &str) -> String {
    format!("{course_id}#{query}")
}

pub fn sent_notification_scope(user_id: &str, course_id: &str, query: &str) -> String {
    format!("{user_id}#{course_id}#{query}")
}

/// Existence of this row means "this chunk already produced an email for this
/// standing query".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SentNotification {
    /// `{user_id}#{course_id}#{query}`.
    pub scope: String,
    pub chunk_id: String,
}

/// Minimal projection of a registered user; only consulted to find the
/// destination address for notifications.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Chat intents resolved by the externally-provided predictor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    General,
    Summarize,
    Overview,
    Unknown,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::General => "general",
            Intent::Summarize => "summarize",
            Intent::Overview => "overview",
            Intent::Unknown => "unknown",
        }
    }
}

/// A citation surfaced to the client and referenced inline as
/// `@<post_number>` by the generated answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_number: Option<u64>,
}

/// Payload describing an announcement post for operator email fan-out.
#[derive(Clone, Debug)]
pub struct AnnouncementPost {
    pub course_id: String,
    pub course_name: String,
    pub post_id: String,
    pub post_number: Option<u64>,
    pub post_subject: String,
    /// Raw HTML from the forum; the email renderer sanitizes it.
    pub post_content: String,
}

/// Operator-configured destination for announcement email.
#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub recipient_email: String,
}

/// Analytics row persisted (best-effort) after every chat interaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StudentQueryRecord {
    pub course_id: String,
    pub query_id: String,
    pub user_id: String,
    pub raw_query: String,
    pub normalized_query: String,
    /// Embedding components stored as arbitrary-precision decimals so they
    /// round-trip through JSON without float loss.
    pub embedding: Vec<serde_json::Number>,
    pub embedding_model: String,
    pub intent: Intent,
    pub gpt_model: String,
    pub connection_id: String,
    pub created_at: String,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prioritize_instructor: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_more_context: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_chunks_retrieved: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_chunk_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_chunk_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_chunk_scores: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_citations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_post_numbers: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_summaries_processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_days: Option<u32>,
}

/// Converts an embedding into decimal-exact JSON numbers for persistence.
///
/// Components are formatted through their shortest round-trip representation
/// and re-parsed as arbitrary-precision decimals, never stored as binary
/// floats.
pub fn embedding_decimals(embedding: &[f32]) -> Vec<serde_json::Number> {
    embedding
        .iter()
        .filter_map(|component| serde_json::Number::from_str(&component.to_string()).ok())
        .collect()
}
