//! Feature constants, environment-backed settings, and the course registry.

use std::collections::HashSet;
use std::time::Duration;

use rustc_hash::FxHashMap;

/// Target chunk size in words for sentence-overlap chunking.
pub const CHUNK_SIZE_WORDS: usize = 100;

/// Maximum number of keys per batched key-value lookup.
pub const KV_BATCH_GET_SIZE: usize = 100;

/// Vector upserts are flushed whenever the rolling batch reaches this size.
pub const VECTOR_BATCH_SIZE: usize = 25;

/// Namespace all chunk vectors live under.
pub const VECTOR_NAMESPACE: &str = "piazza";

/// How many chunks retrieval asks the vector index for.
pub const CHUNKS_TO_USE: usize = 9;

/// Hits scoring below this are dropped before context assembly.
pub const CLOSENESS_THRESHOLD: f32 = 0.35;

/// A chunk only yields a visible citation when its score is at least this
/// fraction of the top hit's score.
pub const CITATION_THRESHOLD_MULTIPLIER: f32 = 0.7;

/// Added to the registration-time top-1 score to form a standing query's
/// notification threshold.
pub const THRESHOLD_ADDER: f32 = 0.1;
pub const MIN_NOTIFICATION_THRESHOLD: f32 = 0.38;
pub const MAX_NOTIFICATION_THRESHOLD: f32 = 0.45;

/// Initial value of a standing query's `max_notifications` counter, which is
/// also the vector-search width on the first engine run.
pub const MAX_NOTIFICATIONS: u32 = 3;

/// New announcement posts older than this window do not fan out email.
pub const ANNOUNCEMENT_WINDOW_HOURS: i64 = 48;

/// The summarize intent digests posts summarized within this many days.
pub const SUMMARY_LOOKBACK_DAYS: i64 = 2;

/// A post summarized longer ago than this gets a fresh summary instead of a
/// running-log merge.
pub const FRESH_SUMMARY_GAP_DAYS: i64 = 2;

/// Concurrent posts the summarizer works on at once.
pub const SUMMARIZER_MAX_WORKERS: usize = 10;

/// Summaries stamped at or before this are treated as "never summarized".
pub const NO_SUMMARY_SENTINEL: &str = "2000-01-01T00:00:00Z";

/// Default watermark for posts that have never been summarized.
pub const EPOCH_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

/// Characters held back while streaming so a control marker split across
/// deltas is never forwarded to the client.
pub const STREAM_LOOKAHEAD_CHARS: usize = 15;

/// Polite pause between consecutive post fetches during a full scrape.
pub const SCRAPE_PAUSE: Duration = Duration::from_secs(1);

/// Queue receive batch size and long-poll wait.
pub const QUEUE_RECEIVE_BATCH: usize = 10;
pub const QUEUE_RECEIVE_WAIT: Duration = Duration::from_secs(1);

/// Diff content is truncated to this many characters in summarizer prompts.
pub const DIFF_CONTENT_PREVIEW_CHARS: usize = 500;

/// From-header used for outbound mail.
pub const EMAIL_SOURCE: &str = "GP-TA <noreply@gp-ta.ca>";

/// A course the platform serves.
#[derive(Clone, Debug)]
pub struct CourseInfo {
    /// Forum network id, e.g. `mjxdv7l3glb5ri`.
    pub course_id: String,
    /// Lowercased, space-free lookup key, e.g. `cpsc110`.
    pub key: String,
    /// Human display name, e.g. `CPSC 110`.
    pub display_name: String,
}

/// Registry of active courses plus the ignored-course set.
#[derive(Clone, Debug, Default)]
pub struct CourseRegistry {
    by_key: FxHashMap<String, CourseInfo>,
    by_id: FxHashMap<String, CourseInfo>,
    ignored: HashSet<String>,
}

impl CourseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_course(
        mut self,
        course_id: impl Into<String>,
        key: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let info = CourseInfo {
            course_id: course_id.into(),
            key: key.into(),
            display_name: display_name.into(),
        };
        self.by_key.insert(info.key.clone(), info.clone());
        self.by_id.insert(info.course_id.clone(), info);
        self
    }

    pub fn with_ignored(mut self, course_id: impl Into<String>) -> Self {
        self.ignored.insert(course_id.into());
        self
    }

    /// Looks a course up by user-facing name; `"CPSC 110"` and `"cpsc110"`
    /// both resolve.
    pub fn resolve(&self, course_name: &str) -> Option<&CourseInfo> {
        self.by_key.get(&normalize_course_key(course_name))
    }

    pub fn by_id(&self, course_id: &str) -> Option<&CourseInfo> {
        self.by_id.get(course_id)
    }

    /// Display name for a course id, falling back to the id itself.
    pub fn display_name(&self, course_id: &str) -> String {
        self.by_id
            .get(course_id)
            .map(|info| info.display_name.clone())
            .unwrap_or_else(|| course_id.to_string())
    }

    pub fn is_ignored(&self, course_id: &str) -> bool {
        self.ignored.contains(course_id)
    }

    pub fn course_ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }
}

/// Lowercases and strips spaces so display names double as lookup keys.
pub fn normalize_course_key(name: &str) -> String {
    name.to_lowercase().replace(' ', "")
}

/// Process-level settings resolved once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Fallback recipient for notification email (`SES_RECP_EMAIL`).
    pub default_recipient_email: String,
    /// Default generation model when the client does not pick one.
    pub default_gpt_model: String,
    /// Pause between post fetches; tests shrink this to zero.
    pub scrape_pause: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_recipient_email: String::new(),
            default_gpt_model: "gpt-5".to_string(),
            scrape_pause: SCRAPE_PAUSE,
        }
    }
}

impl Settings {
    /// Reads settings from the environment, loading `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Settings {
            default_recipient_email: std::env::var("SES_RECP_EMAIL").unwrap_or_default(),
            default_gpt_model: std::env::var("GPT_MODEL").unwrap_or_else(|_| "gpt-5".to_string()),
            scrape_pause: SCRAPE_PAUSE,
        }
    }
}

/// Installs a `tracing` subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_display_names_and_keys() {
        let registry = CourseRegistry::new()
            .with_course("net1", "cpsc110", "CPSC 110")
            .with_ignored("net9");

        assert_eq!(registry.resolve("CPSC 110").unwrap().course_id, "net1");
        assert_eq!(registry.resolve("cpsc110").unwrap().course_id, "net1");
        assert!(registry.resolve("cpsc999").is_none());
        assert_eq!(registry.display_name("net1"), "CPSC 110");
        assert_eq!(registry.display_name("net2"), "net2");
        assert!(registry.is_ignored("net9"));
        assert!(!registry.is_ignored("net1"));
    }

    #[test]
    fn threshold_bounds_are_ordered() {
        assert!(MIN_NOTIFICATION_THRESHOLD < MAX_NOTIFICATION_THRESHOLD);
        assert!(CLOSENESS_THRESHOLD < MIN_NOTIFICATION_THRESHOLD);
    }
}
