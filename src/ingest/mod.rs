//! Ingestion pipeline: blob chunking with dedup-aware dual writes, plus the
//! full and incremental scrapers that drive it.
//!
//! ```text
//! forum post ──► extract::BlobExtractor ──► blobs
//!                                             │
//!                                             ▼
//!                               chunks::ChunkManager
//!                                   │            │
//!                        (content-hash dedup)    │
//!                                   ▼            ▼
//!                               KV chunk      vector
//!                               table         index
//! ```

pub mod chunks;
pub mod scrape;

pub use chunks::ChunkManager;
pub use scrape::{FullScraper, IncrementalScraper, ScrapeReport};
