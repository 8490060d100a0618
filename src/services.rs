//! The explicit dependency bundle.
//!
//! Every component takes its collaborators from here instead of reaching for
//! process-wide singletons, which keeps concurrent tests isolated and makes
//! the wiring visible at startup.

use std::sync::Arc;

use crate::config::{CourseRegistry, Settings};
use crate::email::EmailSender;
use crate::forum::ForumClient;
use crate::llm::{Embedder, IntentPredictor, LanguageModel};
use crate::params::ParameterStore;
use crate::queue::UpdateQueue;
use crate::stores::{
    ChunkStore, DiffStore, PostStore, QueryLogStore, SentNotificationStore, StandingQueryStore,
    UserStore, VectorIndex,
};
use crate::transport::ClientTransport;

/// Handles to every external collaborator, built once at process startup.
#[derive(Clone)]
pub struct Services {
    pub chunks: Arc<dyn ChunkStore>,
    pub posts: Arc<dyn PostStore>,
    pub diffs: Arc<dyn DiffStore>,
    pub standing_queries: Arc<dyn StandingQueryStore>,
    pub sent_notifications: Arc<dyn SentNotificationStore>,
    pub users: Arc<dyn UserStore>,
    pub query_log: Arc<dyn QueryLogStore>,
    pub vector: Arc<dyn VectorIndex>,
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub intent: Arc<dyn IntentPredictor>,
    pub email: Arc<dyn EmailSender>,
    pub queue: Arc<dyn UpdateQueue>,
    pub forum: Arc<dyn ForumClient>,
    pub transport: Arc<dyn ClientTransport>,
    pub params: Arc<dyn ParameterStore>,
    pub courses: CourseRegistry,
    pub settings: Settings,
}
