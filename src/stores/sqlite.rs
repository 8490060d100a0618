//! SQLite-backed vector index using the `sqlite-vec` extension.
//!
//! This is the self-hosted implementation of [`VectorIndex`]: chunk metadata
//! lives in a plain table, embeddings in a sibling table as float32 blobs,
//! and search runs a cosine-distance scan through `vec_distance_cosine`.

use std::os::raw::c_char;
use std::path::Path;
use std::sync::Arc;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, ffi};

use crate::error::StoreError;
use crate::llm::Embedder;
use crate::types::BlobKind;

use super::{ChunkFields, VectorHit, VectorIndex, VectorQuery, VectorRecord};

pub struct SqliteVectorIndex {
    conn: Connection,
    embedder: Arc<dyn Embedder>,
}

impl SqliteVectorIndex {
    /// Opens (or creates) the index at `path` and verifies the `sqlite-vec`
    /// extension is live.
    pub async fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                ?;

            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chunk_index (
                     id TEXT PRIMARY KEY,
                     namespace TEXT NOT NULL,
                     course_id TEXT NOT NULL,
                     blob_id TEXT NOT NULL,
                     parent_id TEXT NOT NULL,
                     root_id TEXT NOT NULL,
                     root_post_num INTEGER,
                     kind TEXT NOT NULL,
                     title TEXT NOT NULL,
                     date TEXT NOT NULL,
                     content TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_chunk_course
                     ON chunk_index (namespace, course_id);
                 CREATE TABLE IF NOT EXISTS chunk_vectors (
                     id TEXT PRIMARY KEY,
                     embedding BLOB NOT NULL
                 );",
            )
            ?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| StoreError::Backend(err.to_string()))?;

        Ok(SqliteVectorIndex { conn, embedder })
    }
}

fn register_sqlite_vec() -> Result<(), StoreError> {
    use std::sync::Mutex;

    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                std::mem::transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!(
                    "failed to register sqlite-vec extension (code {rc})"
                ))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(StoreError::Backend)
}

fn embedding_json(embedding: &[f32]) -> Result<String, StoreError> {
    serde_json::to_string(embedding).map_err(StoreError::from)
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let embedding = self
                .embedder
                .embed(&record.text)
                .await
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            rows.push((record, embedding_json(&embedding)?));
        }

        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (record, embedding) in &rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO chunk_index
                         (id, namespace, course_id, blob_id, parent_id, root_id,
                          root_post_num, kind, title, date, content)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                        (
                            &record.id,
                            &namespace,
                            &record.fields.course_id,
                            &record.fields.blob_id,
                            &record.fields.parent_id,
                            &record.fields.root_id,
                            &record.fields.root_post_num.map(|n| n as i64),
                            record.fields.kind.as_str(),
                            &record.fields.title,
                            &record.fields.date,
                            &record.text,
                        ),
                    )
                    ?;
                    tx.execute(
                        "INSERT OR REPLACE INTO chunk_vectors (id, embedding)
                         VALUES (?1, vec_f32(?2))",
                        (&record.id, embedding),
                    )
                    ?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| StoreError::Backend(err.to_string()))
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
        let embedding = embedding_json(&query_embedding)?;

        let namespace = namespace.to_string();
        let course_filter = query.course_id.clone();
        let top_k = query.top_k;

        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT c.id, c.course_id, c.blob_id, c.parent_id, c.root_id,
                            c.root_post_num, c.kind, c.title, c.date,
                            vec_distance_cosine(v.embedding, vec_f32(?1)) AS distance
                     FROM chunk_index c
                     JOIN chunk_vectors v ON c.id = v.id
                     WHERE c.namespace = ?2
                       AND (?3 IS NULL OR c.course_id = ?3)
                     ORDER BY distance ASC
                     LIMIT {top_k}"
                );

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map((&embedding, &namespace, &course_filter), |row| {
                        let distance: f32 = row.get(9)?;
                        Ok(VectorHit {
                            id: row.get(0)?,
                            // Cosine distance to similarity.
                            score: 1.0 - distance,
                            fields: ChunkFields {
                                course_id: row.get(1)?,
                                blob_id: row.get(2)?,
                                parent_id: row.get(3)?,
                                root_id: row.get(4)?,
                                root_post_num: row.get::<_, Option<i64>>(5)?.map(|n| n as u64),
                                kind: BlobKind::from(row.get::<_, String>(6)?),
                                title: row.get(7)?,
                                date: row.get(8)?,
                            },
                        })
                    })
                    ?;

                let mut hits = Vec::new();
                for hit in rows {
                    hits.push(hit?);
                }
                Ok(hits)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| StoreError::Backend(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use tempfile::tempdir;

    /// Maps a few known topics onto fixed unit vectors.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            let lower = text.to_lowercase();
            Ok(if lower.contains("midterm") {
                vec![1.0, 0.0, 0.0]
            } else if lower.contains("project") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            })
        }

        fn model_name(&self) -> &str {
            "keyword-test"
        }
    }

    fn record(id: &str, course: &str, text: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            text: text.to_string(),
            fields: ChunkFields {
                course_id: course.to_string(),
                blob_id: id.to_string(),
                parent_id: "root".to_string(),
                root_id: "root".to_string(),
                root_post_num: Some(1),
                kind: BlobKind::Question,
                title: "t".to_string(),
                date: "2025-01-01T00:00:00Z".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_search_and_course_filter() {
        let dir = tempdir().unwrap();
        let index = SqliteVectorIndex::open(dir.path().join("vec.db"), Arc::new(KeywordEmbedder))
            .await
            .unwrap();

        index
            .upsert(
                "piazza",
                vec![
                    record("a#0", "course1", "midterm schedule"),
                    record("b#0", "course1", "project rubric"),
                    record("c#0", "course2", "midterm location"),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search(
                "piazza",
                VectorQuery {
                    text: "when is the midterm".to_string(),
                    top_k: 5,
                    course_id: Some("course1".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.first().map(|h| h.id.as_str()), Some("a#0"));
        assert!(hits.iter().all(|h| h.fields.course_id == "course1"));
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn reupserting_an_id_overwrites() {
        let dir = tempdir().unwrap();
        let index = SqliteVectorIndex::open(dir.path().join("vec.db"), Arc::new(KeywordEmbedder))
            .await
            .unwrap();

        index
            .upsert("piazza", vec![record("a#0", "course1", "project rubric")])
            .await
            .unwrap();
        index
            .upsert("piazza", vec![record("a#0", "course1", "midterm schedule")])
            .await
            .unwrap();

        let hits = index
            .search(
                "piazza",
                VectorQuery {
                    text: "midterm".to_string(),
                    top_k: 5,
                    course_id: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a#0");
    }
}
