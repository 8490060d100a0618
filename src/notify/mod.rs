//! Standing-query registration and the scheduled notification engine.
//!
//! A standing query emails its owner when newly-ingested chunks score above
//! the query's threshold. Delivery is at-most-once per
//! `(user, course, query, chunk)`: the sent-notification log is the dedup
//! set, and a failed send simply leaves the row unwritten so a later run
//! retries.

pub mod email;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{
    CourseRegistry, MAX_NOTIFICATION_THRESHOLD, MAX_NOTIFICATIONS, MIN_NOTIFICATION_THRESHOLD,
    THRESHOLD_ADDER, VECTOR_NAMESPACE,
};
use crate::email::EmailSender;
use crate::error::PlatformError;
use crate::stores::{
    SentNotificationStore, StandingQueryStore, UserStore, VectorIndex, VectorQuery,
};
use crate::types::{SentNotification, StandingQuery, standing_query_sort_key};

/// Threshold for a newly-registered query: a notch above its best current
/// match, clamped to keep vacuous and ubiquitous queries sane.
pub fn notification_threshold(closest_score: f32) -> f32 {
    (closest_score + THRESHOLD_ADDER).clamp(MIN_NOTIFICATION_THRESHOLD, MAX_NOTIFICATION_THRESHOLD)
}

/// Result of a registration attempt. Duplicate registrations are idempotent
/// successes, not errors.
#[derive(Clone, Debug)]
pub enum RegistrationOutcome {
    Created(StandingQuery),
    AlreadyExists,
}

/// Registers a standing query for a user against a course.
pub async fn register_standing_query(
    standing: &dyn StandingQueryStore,
    vector: &dyn VectorIndex,
    courses: &CourseRegistry,
    user_id: &str,
    user_query: &str,
    course_display_name: &str,
) -> Result<RegistrationOutcome, PlatformError> {
    if user_query.is_empty() || course_display_name.is_empty() {
        return Err(PlatformError::invalid(
            "user_query and course_display_name are required",
        ));
    }

    let Some(course) = courses.resolve(course_display_name) else {
        return Err(PlatformError::invalid(format!(
            "course \"{course_display_name}\" not found"
        )));
    };

    let sort_key = standing_query_sort_key(&course.course_id, user_query);
    if standing.get(user_id, &sort_key).await?.is_some() {
        info!(user_id, course_id = %course.course_id, query = user_query, "standing query already exists");
        return Ok(RegistrationOutcome::AlreadyExists);
    }

    let hits = vector
        .search(
            VECTOR_NAMESPACE,
            VectorQuery {
                text: user_query.to_string(),
                top_k: 1,
                course_id: Some(course.course_id.clone()),
            },
        )
        .await?;
    let closest_score = hits.first().map(|hit| hit.score).unwrap_or(0.0);
    let threshold = notification_threshold(closest_score);

    let query = StandingQuery {
        user_id: user_id.to_string(),
        course_id: course.course_id.clone(),
        query: user_query.to_string(),
        course_display_name: course.display_name.clone(),
        closest_score,
        notification_threshold: threshold,
        max_notifications: MAX_NOTIFICATIONS,
    };
    standing.put(query.clone()).await?;

    info!(
        user_id,
        course_id = %course.course_id,
        query = user_query,
        closest_score,
        threshold,
        "registered standing query"
    );
    Ok(RegistrationOutcome::Created(query))
}

/// Deletes a standing query and cascades its sent-notification rows.
/// Returns the number of sent rows removed.
pub async fn delete_standing_query(
    standing: &dyn StandingQueryStore,
    sent: &dyn SentNotificationStore,
    user_id: &str,
    course_id: &str,
    query: &str,
) -> Result<usize, PlatformError> {
    let sort_key = standing_query_sort_key(course_id, query);
    standing.delete(user_id, &sort_key).await?;
    let removed = sent
        .delete_scope(&crate::types::sent_notification_scope(
            user_id, course_id, query,
        ))
        .await?;
    info!(user_id, course_id, query, removed, "deleted standing query");
    Ok(removed)
}

/// Totals for one engine run.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotificationRunReport {
    pub queries_processed: usize,
    pub queries_failed: usize,
    pub emails_sent: usize,
}

/// Scheduled worker that walks every standing query and emails fresh
/// matches. Runs are singletons; queries within a run are sequential.
pub struct NotificationEngine {
    standing: Arc<dyn StandingQueryStore>,
    sent: Arc<dyn SentNotificationStore>,
    users: Arc<dyn UserStore>,
    vector: Arc<dyn VectorIndex>,
    email: Arc<dyn EmailSender>,
    default_recipient: String,
}

impl NotificationEngine {
    pub fn new(
        standing: Arc<dyn StandingQueryStore>,
        sent: Arc<dyn SentNotificationStore>,
        users: Arc<dyn UserStore>,
        vector: Arc<dyn VectorIndex>,
        email: Arc<dyn EmailSender>,
        default_recipient: impl Into<String>,
    ) -> Self {
        NotificationEngine {
            standing,
            sent,
            users,
            vector,
            email,
            default_recipient: default_recipient.into(),
        }
    }

    pub async fn run(&self) -> Result<NotificationRunReport, PlatformError> {
        let mut report = NotificationRunReport::default();
        let mut page_token = None;

        loop {
            let page = self.standing.scan(page_token.take()).await?;
            for query in &page.items {
                report.queries_processed += 1;
                match self.process_query(query).await {
                    Ok(sent) => report.emails_sent += sent,
                    Err(err) => {
                        report.queries_failed += 1;
                        warn!(
                            user_id = %query.user_id,
                            course_id = %query.course_id,
                            query = %query.query,
                            error = %err,
                            "standing query processing failed"
                        );
                    }
                }
            }
            match page.next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(
            queries_processed = report.queries_processed,
            emails_sent = report.emails_sent,
            "notification run complete"
        );
        Ok(report)
    }

    async fn process_query(&self, query: &StandingQuery) -> Result<usize, PlatformError> {
        let recipient = self.resolve_recipient(&query.user_id).await?;
        let Some(recipient) = recipient else {
            warn!(user_id = %query.user_id, "no destination email for standing query");
            return Ok(0);
        };

        // The counter doubles as the search width: a query that has fired N
        // times considers up to N more hits next run, still threshold-gated.
        let hits = self
            .vector
            .search(
                VECTOR_NAMESPACE,
                VectorQuery {
                    text: query.query.clone(),
                    top_k: query.max_notifications as usize,
                    course_id: Some(query.course_id.clone()),
                },
            )
            .await?;

        let already_sent = self.sent.sent_chunk_ids(&query.sent_scope()).await?;

        let mut sent_this_run = Vec::new();
        for hit in hits {
            if hit.score < query.notification_threshold {
                debug!(
                    chunk_id = %hit.id,
                    score = hit.score,
                    threshold = query.notification_threshold,
                    "hit below threshold"
                );
                continue;
            }
            if already_sent.contains(&hit.id) {
                debug!(chunk_id = %hit.id, "already notified for chunk");
                continue;
            }

            let outbound = email::render_standing_query_alert(
                &recipient,
                &query.query,
                &query.course_display_name,
                &query.course_id,
                &hit.fields.title,
                &hit.fields.root_id,
            );
            match self.email.send(outbound).await {
                Ok(()) => {
                    info!(chunk_id = %hit.id, user_id = %query.user_id, "sent standing-query email");
                    sent_this_run.push(SentNotification {
                        scope: query.sent_scope(),
                        chunk_id: hit.id,
                    });
                }
                Err(err) => {
                    // No sent row gets written, so a later run retries.
                    warn!(chunk_id = %hit.id, error = %err, "standing-query email failed");
                }
            }
        }

        if sent_this_run.is_empty() {
            return Ok(0);
        }

        let count = sent_this_run.len();
        self.sent.batch_put(sent_this_run).await?;
        self.standing
            .add_notifications_sent(&query.user_id, &query.sort_key(), count as u32)
            .await?;
        Ok(count)
    }

    async fn resolve_recipient(&self, user_id: &str) -> Result<Option<String>, PlatformError> {
        let from_user = self
            .users
            .get(user_id)
            .await?
            .and_then(|user| user.email)
            .filter(|email| !email.is_empty());

        Ok(from_user.or_else(|| {
            (!self.default_recipient.is_empty()).then(|| self.default_recipient.clone())
        }))
    }
}
