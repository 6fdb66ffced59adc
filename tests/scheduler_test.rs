use chrono::{Duration, NaiveTime, TimeZone, Utc};
use feed_publisher::clock::FixedClock;
use feed_publisher::config::{JobIntervals, PostingConfig};
use feed_publisher::fetcher::StaticFeedSource;
use feed_publisher::generator::MockGenerator;
use feed_publisher::pipeline::IngestionPipeline;
use feed_publisher::publish::PublishLoop;
use feed_publisher::publisher::MockPublisher;
use feed_publisher::refresher::CredentialRefresher;
use feed_publisher::scheduler::Scheduler;
use feed_publisher::store::Store;
use feed_publisher::types::*;
use std::sync::Arc;

// 2020-01-06 was a Monday.
fn monday_morning() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 6, 9, 0, 0).unwrap()
}

fn posting_config() -> PostingConfig {
    PostingConfig {
        days: vec![2, 5],
        time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
        max_post_length: 3000,
        include_images: false,
    }
}

struct Harness {
    store: Arc<Store>,
    publisher: Arc<MockPublisher>,
    scheduler: Scheduler,
}

async fn harness(items: Vec<RawFeedItem>) -> Harness {
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let clock = Arc::new(FixedClock::new(monday_morning()));
    let publisher = Arc::new(MockPublisher::new());

    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        Arc::new(StaticFeedSource::new(items)),
        Arc::new(MockGenerator::new()),
        posting_config(),
        clock.clone(),
    ));
    let publish_loop = Arc::new(
        PublishLoop::new(store.clone(), publisher.clone(), clock.clone(), false)
            .with_delay(std::time::Duration::ZERO),
    );
    let refresher = Arc::new(CredentialRefresher::new(
        store.clone(),
        publisher.clone(),
        clock.clone(),
    ));

    let scheduler = Scheduler::new(
        store.clone(),
        pipeline,
        publish_loop,
        refresher,
        posting_config(),
        JobIntervals::default(),
        clock,
    );

    Harness {
        store,
        publisher,
        scheduler,
    }
}

#[tokio::test]
async fn start_and_stop_lifecycle() {
    let h = harness(Vec::new()).await;

    let status = h.scheduler.status();
    assert!(!status.running);
    assert!(status.jobs.is_empty());

    h.scheduler.start();
    let status = h.scheduler.status();
    assert!(status.running);
    assert_eq!(status.jobs.len(), 4);
    assert!(status.jobs.iter().any(|j| j == "post-publish"));

    // Stopping is safe even right after starting, and is idempotent.
    h.scheduler.stop().await;
    h.scheduler.stop().await;
    assert!(!h.scheduler.status().running);
}

#[tokio::test]
async fn manual_triggers_run_out_of_band() {
    let now = monday_morning();
    let item = RawFeedItem {
        guid: Some("abc".to_string()),
        title: "Fresh article".to_string(),
        link: Some("https://example.com/abc".to_string()),
        description: Some("Something worth reading about engineering.".to_string()),
        published_at: Some(now - Duration::days(1)),
        ..Default::default()
    };
    let h = harness(vec![item]).await;

    let report = h.scheduler.trigger_ingest().await.unwrap();
    assert_eq!(report.posts_created, 1);

    // Nothing is due yet (the slot is Tuesday), so a publish run is empty.
    assert_eq!(h.scheduler.trigger_publish().await.unwrap(), 0);
}

#[tokio::test]
async fn schedule_immediately_makes_a_post_due() {
    let now = monday_morning();
    let h = harness(Vec::new()).await;

    h.store
        .store_credential(&Credential {
            access_token: "valid-token".to_string(),
            refresh_token: None,
            expires_at: now + Duration::days(60),
            scope: None,
            created_at: now,
        })
        .await
        .unwrap();

    let draft = h
        .store
        .create_post(NewPost {
            title: "Manual draft".to_string(),
            body: "Hand-written post".to_string(),
            source_url: None,
            image_url: None,
            category: Category::General,
            origin: PostOrigin::Manual,
            scheduled_at: None,
        })
        .await
        .unwrap();
    assert_eq!(draft.status, PostStatus::Draft);

    let scheduled = h.scheduler.schedule_immediately(draft.id).await.unwrap();
    assert_eq!(scheduled.status, PostStatus::Scheduled);
    assert_eq!(scheduled.scheduled_at, Some(now));

    assert_eq!(h.scheduler.trigger_publish().await.unwrap(), 1);
    assert_eq!(h.publisher.published(), vec!["Hand-written post".to_string()]);

    let published = h.store.get_post(draft.id).await.unwrap();
    assert_eq!(published.status, PostStatus::Published);
}

#[tokio::test]
async fn next_schedule_lists_upcoming_slots() {
    let h = harness(Vec::new()).await;

    let slots = h.scheduler.next_schedule(4);
    assert_eq!(
        slots,
        vec![
            Utc.with_ymd_and_hms(2020, 1, 7, 10, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 10, 10, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 14, 10, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 17, 10, 30, 0).unwrap(),
        ]
    );
}

#[tokio::test]
async fn unknown_post_cannot_be_scheduled_immediately() {
    let h = harness(Vec::new()).await;
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        h.scheduler.schedule_immediately(missing).await,
        Err(PublisherError::PostNotFound(id)) if id == missing
    ));
}
