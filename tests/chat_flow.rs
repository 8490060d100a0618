//! End-to-end chat flows: framed streaming, citations, error paths, and the
//! summarize digest.

mod common;

use common::*;
use gp_ta::chat::{IncomingChatMessage, handle_message};
use gp_ta::error::PlatformError;
use gp_ta::queue::UpdateMessage;
use gp_ta::transport::WsMessage;
use gp_ta::types::Intent;

fn general_platform() -> TestPlatform {
    // Answer-body rules first: every chunk carries the title as a prefix.
    let tp = TestPlatform::new(
        Intent::General,
        vec![
            ("2pm on Friday", vec![1.0, 0.0, 0.0, 0.0]),
            ("midterm 1 time", vec![1.0, 0.0, 0.0, 0.0]),
            ("What time is Midterm 1", vec![0.6, 0.8, 0.0, 0.0]),
        ],
    );
    tp.forum.put_user("u-author", "Avery");
    tp.forum.put_user("u-instructor", "Instructor Ida");
    tp
}

async fn seed_indexed_post(tp: &TestPlatform) {
    let post = question_post(
        "p1",
        5,
        "What time is Midterm 1?",
        "<p>What time is Midterm 1?</p>",
        "2025-06-01T10:00:00Z",
    );
    let post = with_instructor_answer(post, "ians1", "<p>Midterm 1 is at 2pm on Friday</p>");
    tp.forum.put_post(COURSE_ID, post);
    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "p1".into(),
    });
    tp.incremental_scraper().run().await.unwrap();
}

fn incoming(message: &str) -> IncomingChatMessage {
    IncomingChatMessage {
        connection_id: "conn-1".to_string(),
        message: message.to_string(),
        course_name: COURSE_NAME.to_string(),
        model: None,
        prioritize_instructor: true,
        user_id: Some("u-alice".to_string()),
    }
}

#[tokio::test]
async fn general_query_streams_the_framed_body_and_cites() {
    let tp = general_platform();
    seed_indexed_post(&tp).await;

    tp.llm.push_response(
        "BODY_START\n\n2pm Friday @5\n\nBODY_END\n\nNOT_ENOUGH_CONTEXT=false",
    );

    handle_message(&tp.services, incoming("midterm 1 time"))
        .await
        .unwrap();

    // The client saw exactly the body, never the framing.
    assert_eq!(tp.transport.body_text("conn-1"), "2pm Friday @5");
    let messages = tp.transport.messages_for("conn-1");
    assert!(matches!(messages.first(), Some(WsMessage::Start { .. })));

    let citations = messages.iter().find_map(|m| match m {
        WsMessage::Citations {
            citations,
            citation_map,
        } => Some((citations.clone(), citation_map.clone())),
        _ => None,
    });
    let (citations, citation_map) = citations.expect("citations frame");
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].post_number, Some(5));
    assert!(citation_map.contains_key("5"));

    match messages.last() {
        Some(WsMessage::Done {
            needs_more_context, ..
        }) => assert_eq!(*needs_more_context, Some(false)),
        other => panic!("expected terminal done frame, got {other:?}"),
    }

    // The prompt carried the instructor-first context and the citation
    // prelude.
    let requests = tp.llm.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].input.contains("Available citations: @5"));
    assert!(
        requests[0]
            .input
            .contains("Instructor's (name=Instructor Ida) answer")
    );
    assert!(requests[0].input.contains("User's Question: midterm 1 time"));
    assert!(requests[0].instructions.contains("BODY_START"));

    // Analytics row landed with the general-intent fields.
    let log = tp.store.query_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].intent, Intent::General);
    assert_eq!(log[0].needs_more_context, Some(false));
    assert_eq!(log[0].num_citations, Some(1));
    assert!(log[0].num_chunks_retrieved.unwrap() >= 1);
    assert!(!log[0].embedding.is_empty());
}

#[tokio::test]
async fn queries_are_normalized_before_retrieval() {
    let tp = general_platform();
    seed_indexed_post(&tp).await;
    tp.llm
        .push_response("BODY_START\n\nSee above @5\n\nBODY_END\n\nNOT_ENOUGH_CONTEXT=false");

    handle_message(&tp.services, incoming("when is mt 1"))
        .await
        .unwrap();

    let requests = tp.llm.requests();
    assert!(requests[0].input.contains("User's Question: when is midterm 1"));
    let log = tp.store.query_log();
    assert_eq!(log[0].raw_query, "when is mt 1");
    assert_eq!(log[0].normalized_query, "when is midterm 1");
}

#[tokio::test]
async fn no_relevant_context_uses_the_sentinel_and_flags_it() {
    let tp = general_platform();
    seed_indexed_post(&tp).await;

    tp.llm.push_response(
        "BODY_START\n\nThere is not enough information on Piazza to answer that.\n\nBODY_END\n\nNOT_ENOUGH_CONTEXT=true",
    );

    // The fallback embedding is orthogonal to everything indexed.
    handle_message(&tp.services, incoming("how do I bake sourdough"))
        .await
        .unwrap();

    let requests = tp.llm.requests();
    assert!(requests[0].input.contains(
        "There is no relevant context on Piazza which helps answer this question."
    ));

    let messages = tp.transport.messages_for("conn-1");
    match messages.last() {
        Some(WsMessage::Done {
            needs_more_context, ..
        }) => assert_eq!(*needs_more_context, Some(true)),
        other => panic!("expected done frame, got {other:?}"),
    }

    let citations = messages.iter().find_map(|m| match m {
        WsMessage::Citations { citations, .. } => Some(citations.clone()),
        _ => None,
    });
    assert_eq!(citations.expect("citations frame").len(), 0);
}

#[tokio::test]
async fn llm_failure_still_closes_the_stream_and_persists() {
    let tp = general_platform();
    seed_indexed_post(&tp).await;

    tp.llm
        .push_failure_after("BODY_START\n\npartial answer that never finis");

    let result = handle_message(&tp.services, incoming("midterm 1 time")).await;
    // The failure is reported in-band; the caller sees a handled request.
    assert!(result.is_ok());

    let messages = tp.transport.messages_for("conn-1");
    // A user-visible error chunk went out...
    assert!(messages.iter().any(|m| matches!(
        m,
        WsMessage::Chunk { message } if message.contains("An error occurred")
    )));
    // ...and the stream still terminated cleanly.
    assert!(matches!(
        messages.last(),
        Some(WsMessage::Done {
            needs_more_context: Some(false),
            ..
        })
    ));

    let log = tp.store.query_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].needs_more_context, Some(false));
}

#[tokio::test]
async fn unauthenticated_messages_get_a_clean_close() {
    let tp = general_platform();

    let mut message = incoming("midterm 1 time");
    message.user_id = None;
    let result = handle_message(&tp.services, message).await;

    assert!(matches!(result, Err(PlatformError::Unauthorized(_))));
    let messages = tp.transport.messages_for("conn-1");
    assert!(messages.iter().any(|m| matches!(
        m,
        WsMessage::Chunk { message } if message.contains("Authentication required")
    )));
    assert!(matches!(messages.last(), Some(WsMessage::Done { .. })));
    // Nothing reached the model.
    assert!(tp.llm.requests().is_empty());
}

#[tokio::test]
async fn unknown_course_is_an_error_with_a_clean_close() {
    let tp = general_platform();

    let mut message = incoming("midterm 1 time");
    message.course_name = "BASKET 101".to_string();
    let result = handle_message(&tp.services, message).await;
    assert!(result.is_ok(), "handler reports errors in-band");

    let messages = tp.transport.messages_for("conn-1");
    assert!(messages.iter().any(|m| matches!(
        m,
        WsMessage::Chunk { message } if message.contains("An error occurred")
    )));
    assert!(matches!(messages.last(), Some(WsMessage::Done { .. })));
    // No course resolved, so no analytics row.
    assert!(tp.store.query_log().is_empty());
}

mod summarize_intent {
    use super::*;
    use chrono::{Duration, SecondsFormat, Utc};
    use gp_ta::stores::PostStore;
    use gp_ta::types::PostRecord;

    fn summarized_post(post_id: &str, title: &str, summary: &str, updated_ago_hours: i64) -> PostRecord {
        let updated = (Utc::now() - Duration::hours(updated_ago_hours))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        PostRecord {
            course_id: COURSE_ID.to_string(),
            post_id: post_id.to_string(),
            post_title: title.to_string(),
            created: "2025-06-01T00:00:00Z".to_string(),
            is_announcement: false,
            current_summary: Some(summary.to_string()),
            summary_last_updated: Some(updated.clone()),
            last_updated: updated.clone(),
            last_major_update: updated,
            num_changes: 1,
            needs_new_summary: false,
        }
    }

    #[tokio::test]
    async fn caught_up_message_streams_when_nothing_is_recent() {
        let tp = TestPlatform::new(Intent::Summarize, vec![]);

        handle_message(&tp.services, incoming("what did I miss"))
            .await
            .unwrap();

        let body = tp.transport.body_text("conn-1");
        assert_eq!(
            body,
            "You're all caught up! There have been no updates in the last 2 days."
        );
        assert!(matches!(
            tp.transport.messages_for("conn-1").last(),
            Some(WsMessage::Done { .. })
        ));
        // No model call for the empty case.
        assert!(tp.llm.requests().is_empty());

        let log = tp.store.query_log();
        assert_eq!(log[0].summary_days, Some(2));
        assert_eq!(log[0].num_summaries_processed, None);
    }

    #[tokio::test]
    async fn digest_streams_and_marks_summaries_as_read() {
        let tp = TestPlatform::new(Intent::Summarize, vec![]);
        PostStore::put(
            tp.store.as_ref(),
            summarized_post("p1", "Lab 3", "Instructor confirmed the deadline.", 10),
        )
        .await
        .unwrap();
        PostStore::put(
            tp.store.as_ref(),
            summarized_post("p2", "Midterm", "Rooms posted.", 5),
        )
        .await
        .unwrap();
        // Outside the two-day window.
        PostStore::put(
            tp.store.as_ref(),
            summarized_post("p3", "Old thread", "Stale.", 100),
        )
        .await
        .unwrap();

        tp.llm
            .push_response("## Lab 3 (1 post)\n\nDeadline confirmed.");

        handle_message(&tp.services, incoming("catch me up"))
            .await
            .unwrap();

        let body = tp.transport.body_text("conn-1");
        assert_eq!(body, "## Lab 3 (1 post)\n\nDeadline confirmed.");

        // The digest prompt listed both recent summaries, newest first.
        let requests = tp.llm.requests();
        assert!(requests[0].input.contains("summaries of 2 Piazza posts"));
        let midterm_at = requests[0].input.find("**Midterm**").unwrap();
        let lab_at = requests[0].input.find("**Lab 3**").unwrap();
        assert!(midterm_at < lab_at);
        assert!(!requests[0].input.contains("Old thread"));

        // Viewing flags the summarized posts for a fresh start next time.
        for post_id in ["p1", "p2"] {
            let record = PostStore::get(tp.store.as_ref(), COURSE_ID, post_id)
                .await
                .unwrap()
                .unwrap();
            assert!(record.needs_new_summary);
        }
        let untouched = PostStore::get(tp.store.as_ref(), COURSE_ID, "p3")
            .await
            .unwrap()
            .unwrap();
        assert!(!untouched.needs_new_summary);

        let log = tp.store.query_log();
        assert_eq!(log[0].num_summaries_processed, Some(2));
    }
}

mod overview_intent {
    use super::*;

    #[tokio::test]
    async fn overview_streams_the_placeholder() {
        let tp = TestPlatform::new(Intent::Overview, vec![]);

        handle_message(&tp.services, incoming("overview of hw4"))
            .await
            .unwrap();

        let body = tp.transport.body_text("conn-1");
        assert!(body.contains("unable to answer questions about assignment overviews"));
        assert!(matches!(
            tp.transport.messages_for("conn-1").last(),
            Some(WsMessage::Done { .. })
        ));
        assert!(tp.llm.requests().is_empty());
        assert_eq!(tp.store.query_log().len(), 1);
    }
}

mod unknown_intent {
    use super::*;

    #[tokio::test]
    async fn unknown_intent_is_a_quiet_success() {
        let tp = TestPlatform::new(Intent::Unknown, vec![]);

        handle_message(&tp.services, incoming("???"))
            .await
            .unwrap();

        assert!(tp.transport.messages_for("conn-1").is_empty());
        assert!(tp.store.query_log().is_empty());
    }
}
