//! Decomposes a forum post tree into typed blobs with stable identities.
//!
//! Order is root first, then a pre-order walk of the children, which fixes
//! the order chunks (and therefore diff output) appear in downstream.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::forum::{ForumClient, ForumPost};
use crate::text;
use crate::timefmt::normalize_timestamp;
use crate::types::{Blob, BlobKind, Endorsement};

/// Per-course blob extractor with an author-name cache.
///
/// The cache lives for the extractor's lifetime, which in practice is one
/// scrape pass over one course.
pub struct BlobExtractor {
    forum: Arc<dyn ForumClient>,
    course_id: String,
    name_cache: FxHashMap<String, String>,
}

impl BlobExtractor {
    pub fn new(forum: Arc<dyn ForumClient>, course_id: impl Into<String>) -> Self {
        BlobExtractor {
            forum,
            course_id: course_id.into(),
            name_cache: FxHashMap::default(),
        }
    }

    /// Extracts every blob of a post: the root question followed by all
    /// descendants depth-first.
    pub async fn extract_post_blobs(&mut self, post: &ForumPost) -> Vec<Blob> {
        let root_history = post.current_history();
        let root_title = root_history
            .map(|entry| entry.subject.clone())
            .unwrap_or_default();
        let root_uid = root_history.and_then(|entry| entry.uid.clone());
        let root_date = root_history
            .map(|entry| entry.created.clone())
            .filter(|created| !created.is_empty())
            .or_else(|| post.created.clone())
            .unwrap_or_default();

        let root_blob = Blob {
            id: post.id.clone(),
            parent_id: post.id.clone(),
            root_id: post.id.clone(),
            root_post_num: post.nr,
            kind: BlobKind::from(post.kind.as_str()),
            title: root_title.clone(),
            date: normalize_timestamp(&root_date),
            author_id: root_uid.clone().unwrap_or_else(|| "anonymous".to_string()),
            author_name: self.author_name(root_uid.as_deref().unwrap_or("")).await,
            endorsement: Endorsement::NotApplicable,
            content: text::clean(
                root_history
                    .and_then(|entry| entry.content.as_deref())
                    .unwrap_or(""),
            ),
        };

        let mut blobs = vec![root_blob];

        let mut seeds = Vec::new();
        collect_children(&post.children, &post.id, &mut seeds);

        for seed in seeds {
            blobs.push(self.child_blob(seed, post, &root_title).await);
        }

        blobs
    }

    async fn child_blob(&mut self, seed: ChildSeed<'_>, root: &ForumPost, root_title: &str) -> Blob {
        let node = seed.node;
        let history = node.current_history();
        let kind = BlobKind::from(node.kind.as_str());

        // Discussion replies carry their text in `subject` rather than in a
        // history revision.
        let content = match history.and_then(|entry| entry.content.as_deref()) {
            Some(content) => text::clean(content),
            None => text::clean(node.subject.as_deref().unwrap_or("")),
        };

        let date = history
            .map(|entry| entry.created.clone())
            .filter(|created| !created.is_empty())
            .or_else(|| node.created.clone())
            .unwrap_or_default();

        let uid = history.and_then(|entry| entry.uid.clone());

        let endorsement = if kind == BlobKind::StudentAnswer {
            if node.is_instructor_endorsed() {
                Endorsement::Yes
            } else {
                Endorsement::No
            }
        } else {
            Endorsement::NotApplicable
        };

        Blob {
            id: node.id.clone(),
            parent_id: seed.parent_id.to_string(),
            root_id: root.id.clone(),
            root_post_num: root.nr,
            kind,
            title: root_title.to_string(),
            date: normalize_timestamp(&date),
            author_id: uid.clone().unwrap_or_else(|| "anonymous".to_string()),
            author_name: self.author_name(uid.as_deref().unwrap_or("")).await,
            endorsement,
            content,
        }
    }

    /// Resolves a display name for an opaque user id.
    ///
    /// Empty ids are anonymous posters; lookups that fail or come back empty
    /// degrade to "Unknown User" rather than failing the post.
    pub async fn author_name(&mut self, user_id: &str) -> String {
        if user_id.is_empty() {
            return "Anonymous".to_string();
        }
        if let Some(name) = self.name_cache.get(user_id) {
            return name.clone();
        }
        match self.forum.user_name(&self.course_id, user_id).await {
            Ok(Some(name)) => {
                self.name_cache.insert(user_id.to_string(), name.clone());
                name
            }
            Ok(None) => "Unknown User".to_string(),
            Err(err) => {
                warn!(course_id = %self.course_id, user_id, error = %err, "author lookup failed");
                "Unknown User".to_string()
            }
        }
    }
}

struct ChildSeed<'a> {
    node: &'a ForumPost,
    parent_id: &'a str,
}

fn collect_children<'a>(children: &'a [ForumPost], parent_id: &'a str, out: &mut Vec<ChildSeed<'a>>) {
    for child in children {
        out.push(ChildSeed {
            node: child,
            parent_id,
        });
        collect_children(&child.children, &child.id, out);
    }
}
