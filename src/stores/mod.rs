//! Storage contracts for the platform.
//!
//! The key-value tables are the system of record; the vector index is a
//! derived, rebuildable projection of chunks. If the two diverge the KV side
//! wins and a re-upsert restores the index.
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │  typed table traits  │
//!                 │ (async, object-safe) │
//!                 └──────────┬───────────┘
//!                            │
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!      ┌──────────────┐          ┌──────────────────┐
//!      │ MemoryStore  │          │ managed KV engine │
//!      │ (tests/local)│          │ (out of scope)    │
//!      └──────────────┘          └──────────────────┘
//!
//!      VectorIndex ──► SqliteVectorIndex (sqlite-vec)
//!                  └─► MemoryVectorIndex (tests)
//! ```

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{
    Chunk, DiffRecord, PostRecord, SentNotification, StandingQuery, StudentQueryRecord,
    UserRecord,
};

pub use memory::{MemoryStore, MemoryVectorIndex};
pub use sqlite::SqliteVectorIndex;

/// One page of a scan. A `None` token means the scan is complete; anything
/// else is passed back verbatim to continue.
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn done(items: Vec<T>) -> Self {
        Page { items, next: None }
    }
}

/// Composite key of the chunk table: partition `parent_id`, sort `id`
/// (`{blob_id}#{index}`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub parent_id: String,
    pub id: String,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Fetches existing records for the given keys; missing keys are simply
    /// absent from the result.
    async fn batch_get(&self, keys: &[ChunkKey]) -> Result<Vec<Chunk>, StoreError>;

    async fn batch_put(&self, chunks: Vec<Chunk>) -> Result<(), StoreError>;

    async fn get(&self, parent_id: &str, id: &str) -> Result<Option<Chunk>, StoreError>;

    /// Every chunk whose partition key is `parent_id`, sort-key order.
    async fn query_by_parent(&self, parent_id: &str) -> Result<Vec<Chunk>, StoreError>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn get(&self, course_id: &str, post_id: &str)
    -> Result<Option<PostRecord>, StoreError>;

    async fn put(&self, post: PostRecord) -> Result<(), StoreError>;

    /// Pages through every post record.
    async fn scan(&self, start: Option<String>) -> Result<Page<PostRecord>, StoreError>;

    /// Writes a fresh summary, stamps `summary_last_updated`, and clears
    /// `needs_new_summary` in one update.
    async fn write_summary(
        &self,
        course_id: &str,
        post_id: &str,
        summary: &str,
        updated_at: &str,
    ) -> Result<(), StoreError>;

    async fn set_needs_new_summary(
        &self,
        course_id: &str,
        post_id: &str,
        value: bool,
    ) -> Result<(), StoreError>;

    /// Secondary-index query: posts of a course with
    /// `summary_last_updated > cutoff`.
    async fn summarized_since(
        &self,
        course_id: &str,
        cutoff: &str,
    ) -> Result<Vec<PostRecord>, StoreError>;
}

#[async_trait]
pub trait DiffStore: Send + Sync {
    async fn append(&self, diff: DiffRecord) -> Result<(), StoreError>;

    /// Diffs of a post with sort key strictly greater than `after`, in sort
    /// order.
    async fn query_after(
        &self,
        course_id: &str,
        post_id: &str,
        after: &str,
    ) -> Result<Vec<DiffRecord>, StoreError>;
}

#[async_trait]
pub trait StandingQueryStore: Send + Sync {
    async fn get(
        &self,
        user_id: &str,
        sort_key: &str,
    ) -> Result<Option<StandingQuery>, StoreError>;

    async fn put(&self, query: StandingQuery) -> Result<(), StoreError>;

    async fn delete(&self, user_id: &str, sort_key: &str) -> Result<(), StoreError>;

    /// Pages through every standing query across users.
    async fn scan(&self, start: Option<String>) -> Result<Page<StandingQuery>, StoreError>;

    /// Adds `count` to the query's monotone sent counter.
    async fn add_notifications_sent(
        &self,
        user_id: &str,
        sort_key: &str,
        count: u32,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SentNotificationStore: Send + Sync {
    /// Chunk ids that already produced an email for the scope
    /// (`{user}#{course}#{query}`).
    async fn sent_chunk_ids(&self, scope: &str) -> Result<HashSet<String>, StoreError>;

    async fn batch_put(&self, rows: Vec<SentNotification>) -> Result<(), StoreError>;

    /// Cascade helper for standing-query deletion; returns rows removed.
    async fn delete_scope(&self, scope: &str) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError>;
}

#[async_trait]
pub trait QueryLogStore: Send + Sync {
    async fn put(&self, record: StudentQueryRecord) -> Result<(), StoreError>;
}

/// Typed metadata stored with every vector and returned on every hit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkFields {
    pub course_id: String,
    pub blob_id: String,
    pub parent_id: String,
    pub root_id: String,
    pub root_post_num: Option<u64>,
    pub kind: crate::types::BlobKind,
    pub title: String,
    pub date: String,
}

impl From<&Chunk> for ChunkFields {
    fn from(chunk: &Chunk) -> Self {
        ChunkFields {
            course_id: chunk.course_id.clone(),
            blob_id: chunk.blob_id.clone(),
            parent_id: chunk.parent_id.clone(),
            root_id: chunk.root_id.clone(),
            root_post_num: chunk.root_post_num,
            kind: chunk.kind.clone(),
            title: chunk.title.clone(),
            date: chunk.date.clone(),
        }
    }
}

/// A record to upsert: the implementation embeds `text` server-side.
#[derive(Clone, Debug)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub fields: ChunkFields,
}

impl From<&Chunk> for VectorRecord {
    fn from(chunk: &Chunk) -> Self {
        VectorRecord {
            id: chunk.id.clone(),
            text: chunk.chunk_text.clone(),
            fields: ChunkFields::from(chunk),
        }
    }
}

/// A search request; the query text is embedded by the implementation.
#[derive(Clone, Debug)]
pub struct VectorQuery {
    pub text: String,
    pub top_k: usize,
    /// Restricts hits to one course when set.
    pub course_id: Option<String>,
}

/// One search hit, score-descending within a result set.
#[derive(Clone, Debug)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub fields: ChunkFields,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upserts records by id; re-upserting an id overwrites it.
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError>;

    async fn search(
        &self,
        namespace: &str,
        query: VectorQuery,
    ) -> Result<Vec<VectorHit>, StoreError>;
}
