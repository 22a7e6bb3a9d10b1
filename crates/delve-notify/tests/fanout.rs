//! Notifier fan-out behavior

use delve_core::{JobEvent, JobId, JobStatus};
use delve_notify::Notifier;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn every_subscriber_gets_exactly_one_copy() {
    let notifier = Notifier::default();
    let j1 = JobId::new();
    let j2 = JobId::new();
    let mut first = notifier.subscribe(j1);
    let mut second = notifier.subscribe(j1);

    assert_eq!(notifier.publish_progress(j1, 50, "executing code"), 2);
    assert_eq!(notifier.publish_progress(j2, 70, "elsewhere"), 0);

    let expected = JobEvent::progress(50, "executing code");
    assert_eq!(first.drain(), vec![expected.clone()]);
    assert_eq!(second.drain(), vec![expected]);
}

#[tokio::test]
async fn events_arrive_in_publish_order() {
    let notifier = Notifier::default();
    let job = JobId::new();
    let mut sub = notifier.subscribe(job);

    notifier.publish_progress(job, 10, "analyzing problem");
    notifier.publish_progress(job, 30, "generating code");
    notifier.publish_status(job, JobStatus::Completed, None);

    assert_eq!(
        sub.drain(),
        vec![
            JobEvent::progress(10, "analyzing problem"),
            JobEvent::progress(30, "generating code"),
            JobEvent::status(JobStatus::Completed, None),
        ]
    );
}

#[tokio::test]
async fn departed_subscriber_is_pruned_without_affecting_others() {
    let notifier = Notifier::default();
    let job = JobId::new();
    let gone = notifier.subscribe(job);
    let mut stays = notifier.subscribe(job);
    drop(gone);

    assert_eq!(notifier.publish_error(job, "boom"), 1);
    assert_eq!(notifier.subscriber_count(job), 1);
    assert_eq!(stays.try_recv(), Some(JobEvent::error("boom")));
}

#[tokio::test]
async fn lagging_subscriber_is_evicted() {
    let notifier = Notifier::with_buffer(2);
    let job = JobId::new();
    let mut slow = notifier.subscribe(job);

    assert_eq!(notifier.publish_progress(job, 10, "a"), 1);
    assert_eq!(notifier.publish_progress(job, 30, "b"), 1);
    assert_eq!(notifier.publish_progress(job, 60, "c"), 0);
    assert_eq!(notifier.subscriber_count(job), 0);

    // Buffered events are still readable, then the stream ends.
    assert_eq!(slow.recv().await, Some(JobEvent::progress(10, "a")));
    assert_eq!(slow.recv().await, Some(JobEvent::progress(30, "b")));
    assert_eq!(slow.recv().await, None);
}

#[tokio::test]
async fn registry_drops_jobs_nobody_watches() {
    let notifier = Notifier::default();
    let job = JobId::new();
    let sub = notifier.subscribe(job);
    assert_eq!(notifier.watched_jobs(), 1);

    drop(sub);
    notifier.publish_progress(job, 10, "analyzing problem");
    assert_eq!(notifier.watched_jobs(), 0);
}

#[tokio::test]
async fn unsubscribed_observer_receives_nothing_further() {
    let notifier = Notifier::default();
    let job = JobId::new();
    let mut leaving = notifier.subscribe(job);
    let mut staying = notifier.subscribe(job);

    assert!(notifier.unsubscribe(job, leaving.id()));
    notifier.publish_progress(job, 10, "analyzing problem");

    assert_eq!(leaving.recv().await, None);
    assert_eq!(staying.drain().len(), 1);
}

#[tokio::test]
async fn close_job_ends_streams() {
    let notifier = Notifier::default();
    let job = JobId::new();
    let sub = notifier.subscribe(job);

    notifier.publish_status(job, JobStatus::Cancelled, None);
    assert_eq!(notifier.close_job(job), 1);

    let events: Vec<JobEvent> = sub.collect().await;
    assert_eq!(events, vec![JobEvent::status(JobStatus::Cancelled, None)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_jobs_do_not_interfere() {
    let notifier = Arc::new(Notifier::with_buffer(1024));
    let jobs: Vec<JobId> = (0..8).map(|_| JobId::new()).collect();
    let mut subs: Vec<_> = jobs.iter().map(|job| notifier.subscribe(*job)).collect();

    let mut handles = Vec::new();
    for job in jobs.clone() {
        let notifier = Arc::clone(&notifier);
        handles.push(tokio::spawn(async move {
            for percent in 0..=100u8 {
                notifier.publish_progress(job, percent, "tick");
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for (sub, job) in subs.iter_mut().zip(&jobs) {
        assert_eq!(sub.job_id(), *job);
        let percents: Vec<u8> = sub
            .drain()
            .into_iter()
            .map(|event| match event {
                JobEvent::Progress { percent, .. } => percent,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(percents, (0..=100).collect::<Vec<u8>>());
    }
}
