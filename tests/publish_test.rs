use chrono::{Duration, TimeZone, Utc};
use feed_publisher::clock::FixedClock;
use feed_publisher::publish::PublishLoop;
use feed_publisher::publisher::MockPublisher;
use feed_publisher::refresher::CredentialRefresher;
use feed_publisher::store::Store;
use feed_publisher::types::*;
use std::sync::Arc;

fn test_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 6, 9, 0, 0).unwrap()
}

fn due_post(title: &str, slot: chrono::DateTime<Utc>) -> NewPost {
    NewPost {
        title: title.to_string(),
        body: format!("Body of {title}"),
        source_url: None,
        image_url: None,
        category: Category::General,
        origin: PostOrigin::Feed,
        scheduled_at: Some(slot),
    }
}

fn valid_credential(now: chrono::DateTime<Utc>) -> Credential {
    Credential {
        access_token: "valid-token".to_string(),
        refresh_token: Some("refresh-token".to_string()),
        expires_at: now + Duration::days(60),
        scope: None,
        created_at: now,
    }
}

fn publish_loop(
    store: Arc<Store>,
    publisher: Arc<MockPublisher>,
    clock: Arc<FixedClock>,
) -> PublishLoop {
    PublishLoop::new(store, publisher, clock, false).with_delay(std::time::Duration::ZERO)
}

#[tokio::test]
async fn publishes_due_posts_and_records_outcome() {
    let now = test_now();
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let publisher = Arc::new(MockPublisher::new());
    let clock = Arc::new(FixedClock::new(now));

    store.store_credential(&valid_credential(now)).await.unwrap();
    let post = store
        .create_post(due_post("Due", now - Duration::hours(1)))
        .await
        .unwrap();

    let published = publish_loop(store.clone(), publisher.clone(), clock)
        .run()
        .await
        .unwrap();
    assert_eq!(published, 1);

    let post = store.get_post(post.id).await.unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert!(post.external_id.is_some());
    assert_eq!(post.published_at, Some(now));

    let logs = store.recent_logs(10).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.status == LogStatus::Success && l.post_id == Some(post.id)));
    assert_eq!(publisher.published().len(), 1);
}

#[tokio::test]
async fn one_failed_post_does_not_stop_the_run() {
    let now = test_now();
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    // First publish call throws, the second succeeds.
    let publisher = Arc::new(MockPublisher::failing_publishes(1));
    let clock = Arc::new(FixedClock::new(now));

    store.store_credential(&valid_credential(now)).await.unwrap();
    let first = store
        .create_post(due_post("First", now - Duration::hours(2)))
        .await
        .unwrap();
    let second = store
        .create_post(due_post("Second", now - Duration::hours(1)))
        .await
        .unwrap();

    let published = publish_loop(store.clone(), publisher.clone(), clock)
        .run()
        .await
        .unwrap();
    assert_eq!(published, 1);

    // The earlier slot was attempted first and failed terminally.
    let first = store.get_post(first.id).await.unwrap();
    assert_eq!(first.status, PostStatus::Failed);
    assert!(first.external_id.is_none());

    let second = store.get_post(second.id).await.unwrap();
    assert_eq!(second.status, PostStatus::Published);

    let logs = store.recent_logs(10).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.status == LogStatus::Error && l.post_id == Some(first.id)));
}

#[tokio::test]
async fn missing_credential_skips_posts_but_keeps_them_scheduled() {
    let now = test_now();
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let publisher = Arc::new(MockPublisher::new());
    let clock = Arc::new(FixedClock::new(now));

    let post = store
        .create_post(due_post("Waiting", now - Duration::hours(1)))
        .await
        .unwrap();

    let published = publish_loop(store.clone(), publisher.clone(), clock)
        .run()
        .await
        .unwrap();
    assert_eq!(published, 0);
    assert!(publisher.published().is_empty());

    // Still scheduled: eligible for retry on the next run.
    let post = store.get_post(post.id).await.unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);

    let logs = store.recent_logs(10).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.status == LogStatus::Error && l.post_id == Some(post.id)));
}

#[tokio::test]
async fn expired_credential_counts_as_missing() {
    let now = test_now();
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let publisher = Arc::new(MockPublisher::new());
    let clock = Arc::new(FixedClock::new(now));

    let mut credential = valid_credential(now);
    credential.expires_at = now - Duration::minutes(5);
    store.store_credential(&credential).await.unwrap();

    let post = store
        .create_post(due_post("Waiting", now - Duration::hours(1)))
        .await
        .unwrap();

    let published = publish_loop(store.clone(), publisher, clock).run().await.unwrap();
    assert_eq!(published, 0);
    assert_eq!(
        store.get_post(post.id).await.unwrap().status,
        PostStatus::Scheduled
    );
}

// Credential refresher scenarios.

#[tokio::test]
async fn refreshes_credential_inside_window() {
    let now = test_now();
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let publisher = Arc::new(MockPublisher::new());
    let clock = Arc::new(FixedClock::new(now));

    let mut credential = valid_credential(now);
    credential.expires_at = now + Duration::minutes(10);
    store.store_credential(&credential).await.unwrap();

    let refresher = CredentialRefresher::new(store.clone(), publisher.clone(), clock);
    assert!(refresher.run().await.unwrap());
    assert_eq!(publisher.refresh_calls(), 1);
    assert_eq!(publisher.last_refresh_token().as_deref(), Some("refresh-token"));

    let latest = store.latest_credential().await.unwrap().unwrap();
    assert_eq!(latest.access_token, "refreshed-token");
    // The exchange returned no refresh token, so the old one is kept.
    assert_eq!(latest.refresh_token.as_deref(), Some("refresh-token"));
}

#[tokio::test]
async fn does_not_refresh_outside_window() {
    let now = test_now();
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let publisher = Arc::new(MockPublisher::new());
    let clock = Arc::new(FixedClock::new(now));

    let mut credential = valid_credential(now);
    credential.expires_at = now + Duration::minutes(45);
    store.store_credential(&credential).await.unwrap();

    let refresher = CredentialRefresher::new(store.clone(), publisher.clone(), clock);
    assert!(!refresher.run().await.unwrap());
    assert_eq!(publisher.refresh_calls(), 0);
}

#[tokio::test]
async fn no_stored_credential_is_a_noop() {
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let publisher = Arc::new(MockPublisher::new());
    let clock = Arc::new(FixedClock::new(test_now()));

    let refresher = CredentialRefresher::new(store, publisher.clone(), clock);
    assert!(!refresher.run().await.unwrap());
    assert_eq!(publisher.refresh_calls(), 0);
}

#[tokio::test]
async fn missing_refresh_token_is_a_noop() {
    let now = test_now();
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let publisher = Arc::new(MockPublisher::new());
    let clock = Arc::new(FixedClock::new(now));

    let mut credential = valid_credential(now);
    credential.expires_at = now + Duration::minutes(10);
    credential.refresh_token = None;
    store.store_credential(&credential).await.unwrap();

    let refresher = CredentialRefresher::new(store, publisher.clone(), clock);
    assert!(!refresher.run().await.unwrap());
    assert_eq!(publisher.refresh_calls(), 0);
}

#[tokio::test]
async fn rotated_refresh_token_replaces_the_old_one() {
    let now = test_now();
    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let publisher =
        Arc::new(MockPublisher::new().with_rotating_refresh_token("next-refresh-token"));
    let clock = Arc::new(FixedClock::new(now));

    let mut credential = valid_credential(now);
    credential.expires_at = now + Duration::minutes(10);
    store.store_credential(&credential).await.unwrap();

    let refresher = CredentialRefresher::new(store.clone(), publisher, clock);
    assert!(refresher.run().await.unwrap());

    let latest = store.latest_credential().await.unwrap().unwrap();
    assert_eq!(latest.refresh_token.as_deref(), Some("next-refresh-token"));
}
