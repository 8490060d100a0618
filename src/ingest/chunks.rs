//! Dedup-aware dual-write of chunks into the KV table and the vector index.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{KV_BATCH_GET_SIZE, VECTOR_BATCH_SIZE, VECTOR_NAMESPACE};
use crate::error::StoreError;
use crate::stores::{ChunkKey, ChunkStore, VectorIndex, VectorRecord};
use crate::text;
use crate::types::{Blob, Chunk};

/// Batches chunk writes for one scrape pass.
///
/// Dedup is content-addressed: a chunk whose stored `content_hash` matches
/// the derived one is skipped entirely, so re-running ingestion over
/// unchanged posts performs no writes. The KV put always precedes the vector
/// enqueue, keeping the KV table the system of record.
pub struct ChunkManager {
    chunks: Arc<dyn ChunkStore>,
    vector: Arc<dyn VectorIndex>,
    namespace: String,
    vector_batch: Vec<VectorRecord>,
    upserted: usize,
}

impl ChunkManager {
    pub fn new(chunks: Arc<dyn ChunkStore>, vector: Arc<dyn VectorIndex>) -> Self {
        ChunkManager {
            chunks,
            vector,
            namespace: VECTOR_NAMESPACE.to_string(),
            vector_batch: Vec::new(),
            upserted: 0,
        }
    }

    /// Derives the full chunk set of one post from its blobs.
    pub fn derive_post_chunks(blobs: &[Blob], course_id: &str) -> Vec<Chunk> {
        let mut post_chunks = Vec::new();
        for blob in blobs {
            for (index, chunk_text) in text::chunk(blob).into_iter().enumerate() {
                post_chunks.push(Chunk::from_blob(blob, index, chunk_text, course_id));
            }
        }
        post_chunks
    }

    /// Upserts one post's chunks, skipping those whose content is unchanged.
    pub async fn process_post_chunks(&mut self, post_chunks: Vec<Chunk>) -> Result<(), StoreError> {
        for batch in post_chunks.chunks(KV_BATCH_GET_SIZE) {
            let keys: Vec<ChunkKey> = batch
                .iter()
                .map(|chunk| ChunkKey {
                    parent_id: chunk.parent_id.clone(),
                    id: chunk.id.clone(),
                })
                .collect();

            let existing = self.chunks.batch_get(&keys).await?;

            let mut to_insert = Vec::new();
            for chunk in batch {
                let unchanged = existing
                    .iter()
                    .any(|old| old.id == chunk.id && old.content_hash == chunk.content_hash);
                if unchanged {
                    debug!(chunk_id = %chunk.id, "skipped duplicate chunk");
                    continue;
                }
                to_insert.push(chunk.clone());
            }

            if to_insert.is_empty() {
                continue;
            }

            self.chunks.batch_put(to_insert.clone()).await?;

            for chunk in &to_insert {
                self.vector_batch.push(VectorRecord::from(chunk));
                self.upserted += 1;
            }
            while self.vector_batch.len() >= VECTOR_BATCH_SIZE {
                self.flush_vector_batch().await?;
            }
        }
        Ok(())
    }

    async fn flush_vector_batch(&mut self) -> Result<(), StoreError> {
        if self.vector_batch.is_empty() {
            return Ok(());
        }
        let batch: Vec<VectorRecord> = self
            .vector_batch
            .drain(..self.vector_batch.len().min(VECTOR_BATCH_SIZE))
            .collect();
        let count = batch.len();
        self.vector.upsert(&self.namespace, batch).await?;
        info!(chunk_count = count, "upserted chunks to vector index");
        Ok(())
    }

    /// Flushes any residual vector batch and returns the number of chunks
    /// written this pass.
    pub async fn finalize(&mut self) -> Result<usize, StoreError> {
        while !self.vector_batch.is_empty() {
            self.flush_vector_batch().await?;
        }
        Ok(self.upserted)
    }
}
