//! Citation mapping: stable post numbers for inline `@<n>` references and
//! the deduplicated citation list shown to the client.

use std::collections::BTreeMap;
use std::collections::HashSet;

use rustc_hash::FxHashMap;

use crate::config::CITATION_THRESHOLD_MULTIPLIER;
use crate::notify::email::post_url;
use crate::stores::VectorHit;
use crate::types::Citation;

/// The forum seeds every course with this post; citing it helps no one.
const WELCOME_POST_TITLE: &str = "Welcome to Piazza!";

/// Builds the post-number → citation map and the root-id → post-number map
/// feeding the context prelude. Posts without a post number are uncitable
/// and skipped.
pub fn create_citation_map(
    top_chunks: &[VectorHit],
    course_id: &str,
) -> (BTreeMap<String, Citation>, FxHashMap<String, String>) {
    let mut citation_map = BTreeMap::new();
    let mut post_to_post_number = FxHashMap::default();
    let mut seen_root_ids = HashSet::new();

    for hit in top_chunks {
        let fields = &hit.fields;
        if fields.root_id.is_empty() || !seen_root_ids.insert(fields.root_id.clone()) {
            continue;
        }

        let Some(post_number) = fields.root_post_num else {
            continue;
        };
        if fields.title == WELCOME_POST_TITLE {
            continue;
        }

        let number_key = post_number.to_string();
        let citation = Citation {
            title: fields.title.clone(),
            url: post_url(course_id, &fields.root_id),
            post_number: Some(post_number),
        };

        post_to_post_number.insert(fields.root_id.clone(), number_key.clone());
        citation_map.insert(number_key, citation);
    }

    (citation_map, post_to_post_number)
}

/// The citation list emitted to the client: ordered by first relevant
/// appearance, gated against the top score, deduplicated by (url, title).
///
/// A later chunk carrying a post number that the first appearance lacked
/// upgrades the existing entry rather than duplicating it.
pub fn format_citations(top_chunks: &[VectorHit], course_id: &str) -> Vec<Citation> {
    let Some(top) = top_chunks.first() else {
        return Vec::new();
    };
    let top_score = top.score;

    let mut citations: Vec<Citation> = Vec::new();
    let mut seen_keys: HashSet<(String, String)> = HashSet::new();

    for hit in top_chunks {
        let fields = &hit.fields;
        if fields.title == WELCOME_POST_TITLE {
            continue;
        }
        if hit.score < CITATION_THRESHOLD_MULTIPLIER * top_score {
            continue;
        }

        let url = post_url(course_id, &fields.root_id);
        let key = (url.clone(), fields.title.clone());

        if seen_keys.contains(&key) {
            if let Some(post_number) = fields.root_post_num {
                if let Some(existing) = citations
                    .iter_mut()
                    .find(|c| c.url == key.0 && c.title == key.1 && c.post_number.is_none())
                {
                    existing.post_number = Some(post_number);
                }
            }
            continue;
        }

        citations.push(Citation {
            title: fields.title.clone(),
            url,
            post_number: fields.root_post_num,
        });
        seen_keys.insert(key);
    }

    citations
}
