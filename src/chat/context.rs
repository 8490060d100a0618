//! Retrieval and type-aware context hydration for the general-query path.
//!
//! The vector index finds the chunks; the KV chunk table then supplies the
//! text that is actually useful to generate from. A question chunk, for
//! example, pulls in the answers under it rather than the question text
//! itself.

use std::sync::Arc;

use crate::config::{CHUNKS_TO_USE, CLOSENESS_THRESHOLD, VECTOR_NAMESPACE};
use crate::error::StoreError;
use crate::stores::{ChunkStore, VectorHit, VectorIndex, VectorQuery};
use crate::types::{BlobKind, Citation, Endorsement};

const DISCUSSION_SEPARATOR: &str = "\n\n(--- discussion reply ---)\n\n";
pub const NO_CONTEXT_SENTINEL: &str =
    "There is no relevant context on Piazza which helps answer this question.";

/// One hydrated context item, tagged with where it came from.
#[derive(Clone, Debug)]
pub struct ContextChunk {
    pub date: String,
    pub text: String,
    pub root_id: String,
    /// Index of the `top_chunks` hit this context was derived from.
    pub source_rank: usize,
}

pub struct ContextAssembler {
    chunks: Arc<dyn ChunkStore>,
    vector: Arc<dyn VectorIndex>,
}

impl ContextAssembler {
    pub fn new(chunks: Arc<dyn ChunkStore>, vector: Arc<dyn VectorIndex>) -> Self {
        ContextAssembler { chunks, vector }
    }

    /// Searches the course namespace and keeps only hits clearing the
    /// closeness threshold, score-descending.
    pub async fn top_chunks(
        &self,
        query: &str,
        course_id: &str,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let hits = self
            .vector
            .search(
                VECTOR_NAMESPACE,
                VectorQuery {
                    text: query.to_string(),
                    top_k: CHUNKS_TO_USE,
                    course_id: Some(course_id.to_string()),
                },
            )
            .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.score >= CLOSENESS_THRESHOLD)
            .collect())
    }

    /// Hydrates each hit through the builder matching its blob type.
    pub async fn hydrate(
        &self,
        top_chunks: &[VectorHit],
        prioritize_instructor: bool,
    ) -> Result<Vec<ContextChunk>, StoreError> {
        let mut all_context = Vec::new();

        for (source_rank, hit) in top_chunks.iter().enumerate() {
            let fields = &hit.fields;
            let mut push = |text: String| {
                all_context.push(ContextChunk {
                    date: fields.date.clone(),
                    text,
                    root_id: fields.root_id.clone(),
                    source_rank,
                });
            };

            if fields.kind.is_answer() {
                for text in self.answer_context(&fields.parent_id, &hit.id).await? {
                    push(text);
                }
            } else if fields.kind == BlobKind::Question {
                push(
                    self.question_context(&fields.blob_id, prioritize_instructor)
                        .await?,
                );
            } else if fields.kind.is_discussion() {
                push(
                    self.discussion_context(&fields.parent_id, &fields.blob_id, &hit.id)
                        .await?,
                );
            } else {
                for text in self.fallback_context(&fields.parent_id, &hit.id).await? {
                    push(text);
                }
            }
        }

        Ok(all_context)
    }

    /// An answer chunk is already the context: exact lookup.
    async fn answer_context(
        &self,
        parent_id: &str,
        chunk_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .chunks
            .get(parent_id, chunk_id)
            .await?
            .map(|chunk| vec![chunk.chunk_text])
            .unwrap_or_default())
    }

    /// A question chunk pulls in the whole answer set under the question.
    async fn question_context(
        &self,
        blob_id: &str,
        prioritize_instructor: bool,
    ) -> Result<String, StoreError> {
        let items = self.chunks.query_by_parent(blob_id).await?;

        let question_title = items
            .iter()
            .find(|item| item.kind == BlobKind::Question)
            .map(|item| item.title.clone())
            .unwrap_or_else(|| "Unknown title".to_string());
        let question_text = items
            .iter()
            .find(|item| item.kind == BlobKind::Question)
            .map(|item| item.chunk_text.clone())
            .unwrap_or_default();

        let mut instructor_chunks = Vec::new();
        let mut student_chunks = Vec::new();
        let mut instructor_name = None;
        let mut student_is_endorsed = false;

        for item in &items {
            match item.kind {
                BlobKind::InstructorAnswer => {
                    instructor_chunks.push(item.chunk_text.clone());
                    if instructor_name.is_none() {
                        instructor_name = Some(item.author_name.clone());
                    }
                }
                BlobKind::StudentAnswer => {
                    if item.endorsement == Endorsement::Yes {
                        student_is_endorsed = true;
                    }
                    student_chunks.push(item.chunk_text.clone());
                }
                _ => {}
            }
        }

        Ok(format_question_context(
            &question_title,
            &instructor_chunks,
            &student_chunks,
            instructor_name.as_deref(),
            student_is_endorsed,
            prioritize_instructor,
            &question_text,
        ))
    }

    /// A discussion chunk plus every reply under its blob.
    async fn discussion_context(
        &self,
        parent_id: &str,
        blob_id: &str,
        chunk_id: &str,
    ) -> Result<String, StoreError> {
        let mut context_chunks = Vec::new();

        if let Some(chunk) = self.chunks.get(parent_id, chunk_id).await? {
            context_chunks.push(chunk.chunk_text);
        }
        for reply in self.chunks.query_by_parent(blob_id).await? {
            context_chunks.push(reply.chunk_text);
        }

        Ok(context_chunks.join(DISCUSSION_SEPARATOR))
    }

    async fn fallback_context(
        &self,
        parent_id: &str,
        chunk_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.answer_context(parent_id, chunk_id).await
    }
}

/// Formats the answer set of a question into generator-ready prose.
///
/// Instructor answers lead. A student answer is included only when there is
/// no instructor answer, or it is endorsed, or instructor prioritization is
/// off. With no answers at all, the question text stands in with an explicit
/// "no answers yet" preamble.
pub fn format_question_context(
    question_title: &str,
    instructor_chunks: &[String],
    student_chunks: &[String],
    instructor_name: Option<&str>,
    student_is_endorsed: bool,
    prioritize_instructor: bool,
    question_text: &str,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    let instructor_answer = (!instructor_chunks.is_empty()).then(|| instructor_chunks.join(" "));
    let student_answer = (!student_chunks.is_empty()).then(|| student_chunks.join(" "));

    if let Some(instructor_answer) = &instructor_answer {
        let name = instructor_name.unwrap_or("<unknown instructor name>");
        parts.push(format!(
            "Instructor's (name={name}) answer to question with title: \"{question_title}\":"
        ));
        parts.push(String::new());
        parts.push(instructor_answer.clone());
        parts.push(String::new());
    }

    let include_student = student_answer.is_some()
        && (instructor_answer.is_none() || !prioritize_instructor || student_is_endorsed);

    if include_student {
        if let Some(student_answer) = &student_answer {
            let endorsement_text = if student_is_endorsed {
                "instructor-endorsed "
            } else {
                ""
            };
            parts.push(format!(
                "Peer student's {endorsement_text}answer to question with title: \"{question_title}\":"
            ));
            parts.push(String::new());
            parts.push(student_answer.clone());
            parts.push(String::new());
        }
    } else if instructor_answer.is_none() {
        parts.push("Someone asked the following question but there are no answers yet:".to_string());
        parts.push(String::new());
        parts.push(question_text.to_string());
        parts.push(String::new());
    }

    parts.join("\n").trim().to_string()
}

/// Renders the final context block handed to the generator.
pub fn format_context(
    context_chunks: &[ContextChunk],
    citation_map: &std::collections::BTreeMap<String, Citation>,
    post_to_post_number: &rustc_hash::FxHashMap<String, String>,
) -> String {
    let mut formatted = vec!["===== CONTEXT START =====".to_string()];

    if !citation_map.is_empty() {
        let mut available: Vec<&String> = citation_map.keys().collect();
        available.sort_by_key(|number| number.parse::<u64>().unwrap_or(0));
        let citation_list = available
            .iter()
            .map(|number| format!("@{number}"))
            .collect::<Vec<_>>()
            .join(", ");
        formatted.push(format!("Available citations: {citation_list}"));
        formatted.push(String::new());
    }

    let total = context_chunks.len();
    for (i, chunk) in context_chunks.iter().enumerate() {
        let citation_info = post_to_post_number
            .get(&chunk.root_id)
            .and_then(|number| citation_map.get(number).map(|citation| (number, citation)))
            .map(|(number, citation)| {
                format!(" [From Post @{number}: \"{}\"]", citation.title)
            })
            .unwrap_or_default();

        formatted.push(format!(
            "[Relevance Rank: {}/{}] [Updated date: {}]{}",
            i + 1,
            total,
            chunk.date,
            citation_info
        ));
        formatted.push(format!("---\n{}\n---", chunk.text));
    }

    if context_chunks.is_empty() {
        formatted.push(NO_CONTEXT_SENTINEL.to_string());
    }

    formatted.push("===== CONTEXT END =====".to_string());
    formatted.join("\n")
}
