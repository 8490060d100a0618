//! Contract for the external course-forum API.
//!
//! Only the operations the core pipelines consume are modelled; the wire
//! types tolerate missing fields because the forum guarantees no bit-level
//! format. Production implementations live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ForumError;

/// One revision of a post or child; index 0 is the current revision.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub subject: String,
    /// Absent for discussion replies, which stash their text in the parent
    /// node's `subject` field instead.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub uid: Option<String>,
}

/// One entry of the forum's per-post change log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Id of the child node the change refers to, when applicable.
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
}

/// An endorsement tag attached to a node; `admin` marks instructor
/// endorsement.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EndorsementTag {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PostFlags {
    #[serde(default)]
    pub is_announcement: bool,
}

/// A post tree node: the root question with nested children (answers,
/// followups, replies). Children reuse the same shape with root-only fields
/// left empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ForumPost {
    #[serde(default)]
    pub id: String,
    /// Root post number within the course; absent on children.
    #[serde(default)]
    pub nr: Option<u64>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub children: Vec<ForumPost>,
    #[serde(default)]
    pub change_log: Vec<ChangeEvent>,
    #[serde(default)]
    pub tag_endorse: Vec<EndorsementTag>,
    /// Discussion replies carry their text here instead of in `history`.
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub config: PostFlags,
}

impl ForumPost {
    /// The current revision, if any.
    pub fn current_history(&self) -> Option<&HistoryEntry> {
        self.history.first()
    }

    /// Depth-first search for the node with the given id, the root included.
    pub fn find_node(&self, id: &str) -> Option<&ForumPost> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_node(id))
    }

    /// First direct child of the given wire type. Questions have at most one
    /// `i_answer` and at most one `s_answer` direct child.
    pub fn direct_child_of_kind(&self, kind: &str) -> Option<&ForumPost> {
        self.children.iter().find(|child| child.kind == kind)
    }

    /// True when any endorsement tag on this node is instructor-made.
    pub fn is_instructor_endorsed(&self) -> bool {
        self.tag_endorse.iter().any(|tag| tag.admin)
    }
}

/// Operations the scrapers require from the forum.
///
/// Implementations are not assumed thread-safe; scrapers drive them one
/// request at a time with a polite pause.
#[async_trait]
pub trait ForumClient: Send + Sync {
    /// Ids of every post in a course, oldest first.
    async fn list_post_ids(&self, course_id: &str) -> Result<Vec<String>, ForumError>;

    /// Fetches the full post tree.
    async fn fetch_post(&self, course_id: &str, post_id: &str) -> Result<ForumPost, ForumError>;

    /// Resolves an opaque user id to a display name, `None` when unknown.
    async fn user_name(&self, course_id: &str, user_id: &str)
    -> Result<Option<String>, ForumError>;
}
