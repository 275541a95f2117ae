//! End-to-end tests for publication fan-out and the retrying mail queue.

mod common;

use archive_jobs::clock::Clock;
use archive_jobs::engine::LockManager;
use archive_jobs::mail::{DISPATCH_JOB, SWEEP_LOCK};
use chrono::Duration as ChronoDuration;
use common::{seed_story_with_subscribers, ScriptedTransport, TestHarness};
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
[mail]
chunk_size = 50
chunk_delay_secs = 60
max_attempts = 3
backoff_base_secs = 1800
"#;

fn harness() -> (TestHarness, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    (TestHarness::new(CONFIG, transport.clone()), transport)
}

#[test]
fn test_publication_fans_out_in_delayed_chunks() {
    let (h, transport) = harness();
    let story = seed_story_with_subscribers(&h.content, 130);
    let start = h.clock.now();

    let summary = h.jobs.notify_publication(story, Some(7)).unwrap();

    assert_eq!(summary.recipients, 130);
    assert_eq!(summary.chunks, 3);
    let offsets: Vec<i64> = h
        .scheduler
        .pending()
        .unwrap()
        .iter()
        .filter(|w| w.job_name == DISPATCH_JOB)
        .map(|w| (w.fire_at - start).num_seconds())
        .collect();
    assert_eq!(offsets, vec![0, 60, 120]);

    assert_eq!(h.fire_due(), 1);
    assert_eq!(transport.sent_count(), 50);

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.fire_due(), 1);
    assert_eq!(transport.sent_count(), 100);

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.fire_due(), 1);
    assert_eq!(transport.sent_count(), 130);

    assert!(h.jobs.queue().is_empty().unwrap());
    assert!(h.scheduler.pending().unwrap().is_empty());
}

#[test]
fn test_failing_recipient_does_not_block_chunk() {
    let (h, transport) = harness();
    let story = seed_story_with_subscribers(&h.content, 3);
    transport.fail_transient("reader1@example.com", 1);

    h.jobs.notify_publication(story, None).unwrap();
    h.fire_due();

    assert_eq!(
        transport.sent(),
        vec!["reader0@example.com", "reader2@example.com"]
    );
    let entries = h.jobs.queue().entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].recipient.address, "reader1@example.com");
    assert_eq!(entries[0].attempts, 1);
}

#[test]
fn test_transient_failures_back_off_geometrically() {
    let (h, transport) = harness();
    let story = seed_story_with_subscribers(&h.content, 1);
    transport.fail_transient("reader0@example.com", 2);
    let start = h.clock.now();

    h.jobs.notify_publication(story, None).unwrap();
    h.fire_due();
    let entry = h.jobs.queue().entries().unwrap().remove(0);
    assert_eq!(entry.next_attempt_at, start + ChronoDuration::minutes(60));

    // Not due yet
    let early = h.jobs.sweep().unwrap();
    assert_eq!(early.due, 0);
    assert_eq!(early.remaining, 1);

    h.clock.advance(Duration::from_secs(3600));
    let second = h.jobs.sweep().unwrap();
    assert_eq!(second.retried, 1);
    let entry = h.jobs.queue().entries().unwrap().remove(0);
    assert_eq!(entry.attempts, 2);
    assert_eq!(
        entry.next_attempt_at,
        start + ChronoDuration::minutes(60 + 120)
    );

    h.clock.advance(Duration::from_secs(7200));
    let third = h.jobs.sweep().unwrap();
    assert_eq!(third.sent, 1);
    assert_eq!(third.remaining, 0);
    assert_eq!(transport.sent(), vec!["reader0@example.com"]);
    assert!(h.jobs.queue().failed().unwrap().is_empty());
}

#[test]
fn test_exhausted_retries_are_abandoned_and_logged() {
    let (h, transport) = harness();
    let story = seed_story_with_subscribers(&h.content, 1);
    transport.fail_transient("reader0@example.com", 10);

    h.jobs.notify_publication(story, None).unwrap();
    h.fire_due();
    h.clock.advance(Duration::from_secs(3600));
    assert_eq!(h.jobs.sweep().unwrap().retried, 1);
    h.clock.advance(Duration::from_secs(7200));
    let last = h.jobs.sweep().unwrap();

    assert_eq!(last.abandoned, 1);
    assert!(h.jobs.queue().is_empty().unwrap());
    let failed = h.jobs.queue().failed().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].address, "reader0@example.com");
    assert_eq!(failed[0].attempts, 3);

    // Terminal: nothing further happens
    h.clock.advance(Duration::from_secs(86400));
    assert_eq!(h.jobs.sweep().unwrap().due, 0);
    assert_eq!(transport.sent_count(), 0);
}

#[test]
fn test_permanent_rejection_is_abandoned_immediately() {
    let (h, transport) = harness();
    let story = seed_story_with_subscribers(&h.content, 2);
    transport.reject("reader0@example.com");

    h.jobs.notify_publication(story, None).unwrap();
    h.fire_due();

    assert!(h.jobs.queue().is_empty().unwrap());
    let failed = h.jobs.queue().failed().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 1);
    assert_eq!(transport.sent(), vec!["reader1@example.com"]);
}

#[test]
fn test_queue_survives_restart() {
    let (h, transport) = harness();
    let story = seed_story_with_subscribers(&h.content, 1);
    transport.fail_transient("reader0@example.com", 1);
    h.jobs.notify_publication(story, None).unwrap();
    h.fire_due();

    let h = h.restart();
    assert_eq!(h.jobs.queue().len().unwrap(), 1);

    h.clock.advance(Duration::from_secs(3600));
    let summary = h.jobs.sweep().unwrap();

    assert_eq!(summary.sent, 1);
    assert_eq!(transport.sent(), vec!["reader0@example.com"]);
}

#[test]
fn test_sweep_skips_while_another_holds_lock() {
    let (h, transport) = harness();
    let story = seed_story_with_subscribers(&h.content, 1);
    transport.fail_transient("reader0@example.com", 1);
    h.jobs.notify_publication(story, None).unwrap();
    h.fire_due();
    h.clock.advance(Duration::from_secs(3600));

    let other_host = LockManager::new(h.state_store.clone(), h.clock.clone());
    assert!(other_host
        .acquire(SWEEP_LOCK, Duration::from_secs(600))
        .unwrap());

    let summary = h.jobs.sweep().unwrap();
    assert!(summary.skipped_locked);
    assert_eq!(h.jobs.queue().len().unwrap(), 1);

    other_host.release(SWEEP_LOCK).unwrap();
    assert_eq!(h.jobs.sweep().unwrap().sent, 1);
}
