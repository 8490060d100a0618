//! Incremental scraping: queue-driven updates, diff tracking, announcement
//! fan-out, and failure isolation.

mod common;

use chrono::{Duration, SecondsFormat, Utc};
use common::*;
use gp_ta::forum::PostFlags;
use gp_ta::queue::UpdateMessage;
use gp_ta::stores::PostStore;
use gp_ta::types::{Intent, UpdateType};

fn platform() -> TestPlatform {
    // Answer-body rules first: every chunk carries the title as a prefix.
    let tp = TestPlatform::new(
        Intent::General,
        vec![
            ("2pm on Friday", vec![1.0, 0.0, 0.0, 0.0]),
            ("I think it is at 2", vec![0.5, 0.0, 0.866, 0.0]),
            ("What time is Midterm 1", vec![0.6, 0.8, 0.0, 0.0]),
        ],
    );
    tp.forum.put_user("u-author", "Avery");
    tp.forum.put_user("u-instructor", "Instructor Ida");
    tp.forum.put_user("u-student", "Sam");
    tp
}

fn base_post() -> gp_ta::forum::ForumPost {
    let post = question_post(
        "p1",
        5,
        "What time is Midterm 1?",
        "<p>What time is Midterm 1?</p>",
        "2025-06-01T10:00:00Z",
    );
    with_instructor_answer(post, "ians1", "<p>Midterm 1 is at 2pm on Friday</p>")
}

#[tokio::test]
async fn incremental_update_appends_one_student_answer_diff() {
    let tp = platform();
    tp.forum.put_post(COURSE_ID, base_post());

    // First incremental pass establishes the post row.
    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "p1".into(),
    });
    let report = tp.incremental_scraper().run().await.unwrap();
    assert_eq!(report.posts_processed, 1);

    let record = PostStore::get(tp.store.as_ref(), COURSE_ID, "p1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.num_changes, 2);
    let diffs_before = tp.store.all_diffs().len();

    // The post gains a student answer; the queue hears about it.
    let updated = with_student_answer(base_post(), "sans1", "<p>I think it is at 2</p>", false);
    tp.forum.put_post(COURSE_ID, updated);
    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "p1".into(),
    });
    tp.incremental_scraper().run().await.unwrap();

    let diffs = tp.store.all_diffs();
    assert_eq!(diffs.len(), diffs_before + 1);
    let newest = diffs
        .iter()
        .find(|d| d.kind == UpdateType::StudentAnswer)
        .expect("student answer diff");
    assert_eq!(newest.content, "I think it is at 2");

    let record = PostStore::get(tp.store.as_ref(), COURSE_ID, "p1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.num_changes, 3);
    // A new student answer is a major update.
    assert_eq!(record.last_major_update, record.last_updated);

    // Successful processing consumed the queue.
    assert_eq!(tp.queue.ready_count(), 0);
    assert_eq!(tp.queue.in_flight_count(), 0);
}

#[tokio::test]
async fn redelivered_messages_are_idempotent() {
    let tp = platform();
    tp.forum.put_post(COURSE_ID, base_post());

    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "p1".into(),
    });
    tp.incremental_scraper().run().await.unwrap();
    let puts = tp.store.chunk_put_count();
    let diffs = tp.store.all_diffs().len();

    // Same post delivered again with no content change: chunk dedup skips
    // every write and the diff log gains nothing.
    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "p1".into(),
    });
    tp.incremental_scraper().run().await.unwrap();

    assert_eq!(tp.store.chunk_put_count(), puts);
    assert_eq!(tp.store.all_diffs().len(), diffs);
}

#[tokio::test]
async fn fresh_announcements_email_and_stale_ones_do_not() {
    let tp = platform();

    let recent = (Utc::now() - Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut post_a = question_post(
        "a1",
        7,
        "Exam rooms posted",
        "<p>Rooms are up on the course page.</p>",
        &recent,
    );
    post_a.config = PostFlags {
        is_announcement: true,
    };
    tp.forum.put_post(COURSE_ID, post_a);
    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "a1".into(),
    });
    tp.incremental_scraper().run().await.unwrap();

    assert_eq!(tp.email.sent_count(), 1);
    let sent = tp.email.sent();
    assert_eq!(sent[0].to, OPS_EMAIL);
    assert!(sent[0].subject.contains("CPSC 110"));

    let stale = (Utc::now() - Duration::hours(72)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut post_b = question_post(
        "b1",
        8,
        "Old announcement",
        "<p>From last week.</p>",
        &stale,
    );
    post_b.config = PostFlags {
        is_announcement: true,
    };
    tp.forum.put_post(COURSE_ID, post_b);
    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "b1".into(),
    });
    tp.incremental_scraper().run().await.unwrap();

    assert_eq!(tp.email.sent_count(), 1);
}

#[tokio::test]
async fn ignored_course_messages_are_deleted_unprocessed() {
    let tp = platform();
    tp.queue.push(UpdateMessage {
        course_id: IGNORED_COURSE_ID.into(),
        post_id: "px".into(),
    });

    let report = tp.incremental_scraper().run().await.unwrap();
    assert_eq!(report.posts_processed, 0);
    assert_eq!(report.posts_failed, 0);
    assert_eq!(tp.queue.ready_count(), 0);
    assert_eq!(tp.queue.in_flight_count(), 0);
    assert_eq!(tp.store.chunk_put_count(), 0);
}

#[tokio::test]
async fn failed_posts_keep_their_message_for_redelivery() {
    let tp = platform();
    tp.forum.put_post(COURSE_ID, base_post());

    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "p1".into(),
    });
    tp.queue.push(UpdateMessage {
        course_id: COURSE_ID.into(),
        post_id: "missing".into(),
    });

    let report = tp.incremental_scraper().run().await.unwrap();
    assert_eq!(report.posts_processed, 1);
    assert_eq!(report.posts_failed, 1);

    // The failed post's message was not deleted; redelivery retries it.
    assert_eq!(tp.queue.in_flight_count(), 1);
    tp.queue.redeliver();
    assert_eq!(tp.queue.ready_count(), 1);
}
