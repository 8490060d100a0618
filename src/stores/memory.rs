//! In-memory store implementations.
//!
//! These back the test suite and local development. They honor the same
//! ordering and pagination contracts as a managed KV engine would, and they
//! count writes so idempotence properties stay observable.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::llm::{Embedder, cosine_similarity};
use crate::types::{
    Chunk, DiffRecord, PostRecord, SentNotification, StandingQuery, StudentQueryRecord,
    UserRecord,
};

use super::{
    ChunkKey, ChunkStore, DiffStore, Page, PostStore, QueryLogStore, SentNotificationStore,
    StandingQueryStore, UserStore, VectorHit, VectorIndex, VectorQuery, VectorRecord,
};

const SCAN_PAGE_SIZE: usize = 100;

type CompositeKey = (String, String);

fn encode_token(key: &CompositeKey) -> Result<String, StoreError> {
    Ok(serde_json::to_string(key)?)
}

fn decode_token(token: &str) -> Result<CompositeKey, StoreError> {
    serde_json::from_str(token).map_err(|err| StoreError::BadToken(err.to_string()))
}

fn scan_page<V: Clone>(
    map: &BTreeMap<CompositeKey, V>,
    start: Option<String>,
) -> Result<Page<V>, StoreError> {
    let mut range: Box<dyn Iterator<Item = (&CompositeKey, &V)> + '_> = match start {
        Some(token) => {
            let from = decode_token(&token)?;
            Box::new(
                map.range((std::ops::Bound::Excluded(from), std::ops::Bound::Unbounded)),
            )
        }
        None => Box::new(map.iter()),
    };

    let mut items = Vec::new();
    let mut last_key = None;
    for (key, value) in range.by_ref().take(SCAN_PAGE_SIZE) {
        items.push(value.clone());
        last_key = Some(key.clone());
    }

    let next = if range.next().is_some() {
        match last_key {
            Some(key) => Some(encode_token(&key)?),
            None => None,
        }
    } else {
        None
    };

    Ok(Page { items, next })
}

/// One in-memory struct implements every KV table trait.
#[derive(Default)]
pub struct MemoryStore {
    chunks: RwLock<BTreeMap<CompositeKey, Chunk>>,
    posts: RwLock<BTreeMap<CompositeKey, PostRecord>>,
    diffs: RwLock<BTreeMap<CompositeKey, DiffRecord>>,
    standing: RwLock<BTreeMap<CompositeKey, StandingQuery>>,
    sent: RwLock<BTreeMap<CompositeKey, SentNotification>>,
    users: RwLock<BTreeMap<String, UserRecord>>,
    query_log: RwLock<Vec<StudentQueryRecord>>,
    chunk_puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total chunk records written so far (dedup skips don't count).
    pub fn chunk_put_count(&self) -> usize {
        self.chunk_puts.load(Ordering::Relaxed)
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.users.write().insert(user.user_id.clone(), user);
    }

    pub fn all_diffs(&self) -> Vec<DiffRecord> {
        self.diffs.read().values().cloned().collect()
    }

    pub fn query_log(&self) -> Vec<StudentQueryRecord> {
        self.query_log.read().clone()
    }

    pub fn sent_rows(&self) -> Vec<SentNotification> {
        self.sent.read().values().cloned().collect()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn batch_get(&self, keys: &[ChunkKey]) -> Result<Vec<Chunk>, StoreError> {
        let map = self.chunks.read();
        Ok(keys
            .iter()
            .filter_map(|key| map.get(&(key.parent_id.clone(), key.id.clone())).cloned())
            .collect())
    }

    async fn batch_put(&self, chunks: Vec<Chunk>) -> Result<(), StoreError> {
        let mut map = self.chunks.write();
        let count = chunks.len();
        for chunk in chunks {
            map.insert((chunk.parent_id.clone(), chunk.id.clone()), chunk);
        }
        self.chunk_puts.fetch_add(count, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, parent_id: &str, id: &str) -> Result<Option<Chunk>, StoreError> {
        Ok(self
            .chunks
            .read()
            .get(&(parent_id.to_string(), id.to_string()))
            .cloned())
    }

    async fn query_by_parent(&self, parent_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let map = self.chunks.read();
        Ok(map
            .range((parent_id.to_string(), String::new())..)
            .take_while(|((pk, _), _)| pk == parent_id)
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn get(
        &self,
        course_id: &str,
        post_id: &str,
    ) -> Result<Option<PostRecord>, StoreError> {
        Ok(self
            .posts
            .read()
            .get(&(course_id.to_string(), post_id.to_string()))
            .cloned())
    }

    async fn put(&self, post: PostRecord) -> Result<(), StoreError> {
        self.posts
            .write()
            .insert((post.course_id.clone(), post.post_id.clone()), post);
        Ok(())
    }

    async fn scan(&self, start: Option<String>) -> Result<Page<PostRecord>, StoreError> {
        scan_page(&self.posts.read(), start)
    }

    async fn write_summary(
        &self,
        course_id: &str,
        post_id: &str,
        summary: &str,
        updated_at: &str,
    ) -> Result<(), StoreError> {
        let mut map = self.posts.write();
        let Some(post) = map.get_mut(&(course_id.to_string(), post_id.to_string())) else {
            return Err(StoreError::Backend(format!(
                "post {course_id}#{post_id} does not exist"
            )));
        };
        post.current_summary = Some(summary.to_string());
        post.summary_last_updated = Some(updated_at.to_string());
        post.needs_new_summary = false;
        Ok(())
    }

    async fn set_needs_new_summary(
        &self,
        course_id: &str,
        post_id: &str,
        value: bool,
    ) -> Result<(), StoreError> {
        let mut map = self.posts.write();
        if let Some(post) = map.get_mut(&(course_id.to_string(), post_id.to_string())) {
            post.needs_new_summary = value;
        }
        Ok(())
    }

    async fn summarized_since(
        &self,
        course_id: &str,
        cutoff: &str,
    ) -> Result<Vec<PostRecord>, StoreError> {
        let map = self.posts.read();
        Ok(map
            .values()
            .filter(|post| post.course_id == course_id)
            .filter(|post| {
                post.summary_last_updated
                    .as_deref()
                    .is_some_and(|updated| updated > cutoff)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DiffStore for MemoryStore {
    async fn append(&self, diff: DiffRecord) -> Result<(), StoreError> {
        self.diffs
            .write()
            .insert((diff.partition_key(), diff.sort_key.clone()), diff);
        Ok(())
    }

    async fn query_after(
        &self,
        course_id: &str,
        post_id: &str,
        after: &str,
    ) -> Result<Vec<DiffRecord>, StoreError> {
        let pk = crate::types::diff_partition_key(course_id, post_id);
        let map = self.diffs.read();
        Ok(map
            .range((pk.clone(), String::new())..)
            .take_while(|((partition, _), _)| *partition == pk)
            .filter(|((_, sort_key), _)| sort_key.as_str() > after)
            .map(|(_, diff)| diff.clone())
            .collect())
    }
}

#[async_trait]
impl StandingQueryStore for MemoryStore {
    async fn get(
        &self,
        user_id: &str,
        sort_key: &str,
    ) -> Result<Option<StandingQuery>, StoreError> {
        Ok(self
            .standing
            .read()
            .get(&(user_id.to_string(), sort_key.to_string()))
            .cloned())
    }

    async fn put(&self, query: StandingQuery) -> Result<(), StoreError> {
        self.standing
            .write()
            .insert((query.user_id.clone(), query.sort_key()), query);
        Ok(())
    }

    async fn delete(&self, user_id: &str, sort_key: &str) -> Result<(), StoreError> {
        self.standing
            .write()
            .remove(&(user_id.to_string(), sort_key.to_string()));
        Ok(())
    }

    async fn scan(&self, start: Option<String>) -> Result<Page<StandingQuery>, StoreError> {
        scan_page(&self.standing.read(), start)
    }

    async fn add_notifications_sent(
        &self,
        user_id: &str,
        sort_key: &str,
        count: u32,
    ) -> Result<(), StoreError> {
        let mut map = self.standing.write();
        let Some(query) = map.get_mut(&(user_id.to_string(), sort_key.to_string())) else {
            return Err(StoreError::Backend(format!(
                "standing query {user_id}/{sort_key} does not exist"
            )));
        };
        query.max_notifications += count;
        Ok(())
    }
}

#[async_trait]
impl SentNotificationStore for MemoryStore {
    async fn sent_chunk_ids(&self, scope: &str) -> Result<HashSet<String>, StoreError> {
        let map = self.sent.read();
        Ok(map
            .range((scope.to_string(), String::new())..)
            .take_while(|((pk, _), _)| pk == scope)
            .map(|((_, chunk_id), _)| chunk_id.clone())
            .collect())
    }

    async fn batch_put(&self, rows: Vec<SentNotification>) -> Result<(), StoreError> {
        let mut map = self.sent.write();
        for row in rows {
            map.insert((row.scope.clone(), row.chunk_id.clone()), row);
        }
        Ok(())
    }

    async fn delete_scope(&self, scope: &str) -> Result<usize, StoreError> {
        let mut map = self.sent.write();
        let keys: Vec<CompositeKey> = map
            .range((scope.to_string(), String::new())..)
            .take_while(|((pk, _), _)| pk == scope)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            map.remove(key);
        }
        Ok(keys.len())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().get(user_id).cloned())
    }
}

#[async_trait]
impl QueryLogStore for MemoryStore {
    async fn put(&self, record: StudentQueryRecord) -> Result<(), StoreError> {
        self.query_log.write().push(record);
        Ok(())
    }
}

struct StoredVector {
    id: String,
    embedding: Vec<f32>,
    fields: super::ChunkFields,
}

/// Embeds on write and searches by cosine similarity. Test double for the
/// managed vector index.
pub struct MemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    namespaces: RwLock<BTreeMap<String, Vec<StoredVector>>>,
    upserts: AtomicUsize,
}

impl MemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Arc<Self> {
        Arc::new(MemoryVectorIndex {
            embedder,
            namespaces: RwLock::new(BTreeMap::new()),
            upserts: AtomicUsize::new(0),
        })
    }

    /// Total records upserted so far; overwrites count.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        let mut prepared = Vec::with_capacity(records.len());
        for record in records {
            let embedding = self
                .embedder
                .embed(&record.text)
                .await
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            prepared.push(StoredVector {
                id: record.id,
                embedding,
                fields: record.fields,
            });
        }

        let count = prepared.len();
        let mut namespaces = self.namespaces.write();
        let entries = namespaces.entry(namespace.to_string()).or_default();
        for vector in prepared {
            entries.retain(|existing| existing.id != vector.id);
            entries.push(vector);
        }
        self.upserts.fetch_add(count, Ordering::Relaxed);
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        query: VectorQuery,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let query_embedding = self
            .embedder
            .embed(&query.text)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let namespaces = self.namespaces.read();
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorHit> = entries
            .iter()
            .filter(|vector| {
                query
                    .course_id
                    .as_deref()
                    .is_none_or(|course| vector.fields.course_id == course)
            })
            .map(|vector| VectorHit {
                id: vector.id.clone(),
                score: cosine_similarity(&query_embedding, &vector.embedding),
                fields: vector.fields.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(query.top_k);
        Ok(hits)
    }
}
