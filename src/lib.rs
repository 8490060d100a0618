//! Retrieval-augmented question answering and notifications for a
//! university course-discussion forum.
//!
//! ```text
//! Forum ──► scrapers ─┬─► extract (blobs) ──► chunks ─┬─► KV chunk table
//!                     │                               └─► vector index
//!                     └─► posts (diff log, announcements)
//!                                   │
//!                                   ▼
//!                             summarize (LLM worker pool)
//!
//! Student query ──► chat (intent router)
//!                     ├─► context assembly + citations
//!                     └─► framed streaming answer over the websocket
//!
//! Standing queries ──► notify (threshold-gated, at-most-once email)
//! ```
//!
//! The key-value tables are the system of record; the vector index is a
//! derived projection of chunks and can always be rebuilt by a full scrape.
//! External engines (forum API, vector/KV stores, email, queue, LLM,
//! websocket transport) sit behind the traits in their respective modules,
//! wired together through [`services::Services`].

pub mod chat;
pub mod config;
pub mod email;
pub mod error;
pub mod extract;
pub mod forum;
pub mod ingest;
pub mod llm;
pub mod notify;
pub mod params;
pub mod posts;
pub mod queue;
pub mod services;
pub mod stores;
pub mod summarize;
pub mod text;
pub mod timefmt;
pub mod transport;
pub mod types;

pub use error::PlatformError;
pub use services::Services;
