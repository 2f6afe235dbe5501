use chrono::{Duration, TimeZone, Utc};
use lenslab::error::AppError;
use lenslab::subscription::store::testing::InMemoryAccountStore;
use lenslab::subscription::{SubscriptionService, UsageAccount};

fn service() -> SubscriptionService<InMemoryAccountStore> {
    SubscriptionService::new(InMemoryAccountStore::default())
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn missing_users_read_as_free_tier() {
    let service = service();
    let status = service.status(404, t0()).await.unwrap();
    assert_eq!(status.plan_id, "free");
    assert_eq!(status.status_code, "F");
    assert_eq!(status.image_quota, Some(15));
    assert_eq!(status.used_images, 0);
    assert_eq!(status.remaining_images, Some(15));
    assert!(!status.expired);
    assert!(!status.quota_exceeded);
    assert!(!service.quota_alert_pending(404).await.unwrap());
}

#[tokio::test]
async fn purchase_of_unknown_plan_is_rejected() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let err = service.purchase(1, "platinum", t0()).await.unwrap_err();
    assert!(matches!(err, AppError::UnknownPlan(id) if id == "platinum"));
}

#[tokio::test]
async fn purchase_opens_a_fresh_window() {
    let service = service();
    let mut account = UsageAccount::free_tier(1);
    account.used_images = 9;
    account.quota_alerted = true;
    service.store().insert(account).await;

    let now = t0();
    let status = service.purchase(1, "day25", now).await.unwrap();
    assert_eq!(status.plan_id, "day25");
    assert_eq!(status.status_code, "FD");
    assert_eq!(status.purchased_at, Some(now));
    assert_eq!(status.expires_at, Some(now + Duration::days(1)));
    assert_eq!(status.used_images, 0);
    assert_eq!(status.image_quota, Some(25));
    assert_eq!(status.remaining_images, Some(25));
    assert!(!status.expired);
    assert!(!status.quota_exceeded);
    assert!(!service.quota_alert_pending(1).await.unwrap());
}

#[tokio::test]
async fn purchase_of_never_expiring_plan_carries_no_expiry() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let status = service.purchase(1, "god_mode", t0()).await.unwrap();
    assert_eq!(status.expires_at, None);
    assert_eq!(status.duration_days, None);
}

#[tokio::test]
async fn usage_increments_by_exactly_one_per_call() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let now = t0();
    service.purchase(1, "day25", now).await.unwrap();

    for expected in 1..=5 {
        let status = service.record_usage(1, now).await.unwrap();
        assert_eq!(status.used_images, expected);
        assert_eq!(status.remaining_images, Some(25 - expected));
    }
}

#[tokio::test]
async fn unlimited_plans_never_report_exceeded() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let now = t0();
    service.purchase(1, "year_unlimited", now).await.unwrap();

    let mut status = service.status(1, now).await.unwrap();
    for _ in 0..200 {
        status = service.record_usage(1, now).await.unwrap();
    }
    assert_eq!(status.used_images, 200);
    assert_eq!(status.remaining_images, None);
    assert!(!status.quota_exceeded);
    assert!(!service.quota_alert_pending(1).await.unwrap());
}

#[tokio::test]
async fn quota_alert_fires_once_per_window() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let now = t0();
    service.purchase(1, "day25", now).await.unwrap();

    for _ in 0..24 {
        service.record_usage(1, now).await.unwrap();
        assert!(!service.quota_alert_pending(1).await.unwrap());
    }

    // 25th usage reaches the quota and raises the one-shot alert.
    let status = service.record_usage(1, now).await.unwrap();
    assert_eq!(status.used_images, 25);
    assert!(status.quota_exceeded);
    assert_eq!(status.remaining_images, Some(0));
    assert!(service.quota_alert_pending(1).await.unwrap());

    // Further calls are silent no-ops, not errors, and do not re-fire.
    let status = service.record_usage(1, now).await.unwrap();
    assert_eq!(status.used_images, 25);
    assert!(service.quota_alert_pending(1).await.unwrap());

    service.clear_quota_alert(1).await.unwrap();
    assert!(!service.quota_alert_pending(1).await.unwrap());
    // Counter is still exhausted, so clearing does not permit more usage.
    let status = service.record_usage(1, now).await.unwrap();
    assert_eq!(status.used_images, 25);
}

#[tokio::test]
async fn usage_recording_is_a_noop_past_quota() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let now = t0();
    service.purchase(1, "day25", now).await.unwrap();
    for _ in 0..25 {
        service.record_usage(1, now).await.unwrap();
    }

    for _ in 0..3 {
        let status = service.record_usage(1, now).await.unwrap();
        assert_eq!(status.used_images, 25);
        assert!(status.quota_exceeded);
    }
    let account = service.store().get(1).await.unwrap();
    assert_eq!(account.used_images, 25);
}

#[tokio::test]
async fn expired_window_renews_on_next_usage_and_counts_that_usage() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let purchase_time = t0();
    service.purchase(1, "day25", purchase_time).await.unwrap();
    for _ in 0..25 {
        service.record_usage(1, purchase_time).await.unwrap();
    }
    assert!(service.quota_alert_pending(1).await.unwrap());

    // Past expiry the projection reports expired without any write.
    let later = purchase_time + Duration::days(1) + Duration::hours(2);
    let stale = service.status(1, later).await.unwrap();
    assert!(stale.expired);
    assert_eq!(stale.used_images, 25);

    // One usage call rolls the window over and records exactly one use.
    let renewed = service.record_usage(1, later).await.unwrap();
    assert_eq!(renewed.used_images, 1);
    assert_eq!(renewed.purchased_at, Some(later));
    assert_eq!(renewed.expires_at, Some(later + Duration::days(1)));
    assert!(!renewed.expired);
    assert!(!renewed.quota_exceeded);
    assert!(!service.quota_alert_pending(1).await.unwrap());
}

#[tokio::test]
async fn renewal_keeps_the_purchased_plan() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let purchase_time = t0();
    service.purchase(1, "week100", purchase_time).await.unwrap();

    let later = purchase_time + Duration::days(8);
    let renewed = service.record_usage(1, later).await.unwrap();
    assert_eq!(renewed.plan_id, "week100");
    assert_eq!(renewed.status_code, "FW");
    assert_eq!(renewed.image_quota, Some(100));
    assert_eq!(renewed.used_images, 1);
}

#[tokio::test]
async fn free_tier_never_expires_and_never_renews() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;

    let now = t0();
    for _ in 0..15 {
        service.record_usage(1, now).await.unwrap();
    }
    let exhausted = service.record_usage(1, now).await.unwrap();
    assert_eq!(exhausted.used_images, 15);
    assert!(exhausted.quota_exceeded);

    // Years later the free window is still the same window.
    let much_later = now + Duration::days(900);
    let status = service.record_usage(1, much_later).await.unwrap();
    assert!(!status.expired);
    assert_eq!(status.used_images, 15);
    assert!(status.quota_exceeded);
}

#[tokio::test]
async fn status_is_a_pure_projection() {
    let service = service();
    service.store().insert(UsageAccount::free_tier(1)).await;
    let purchase_time = t0();
    service.purchase(1, "day25", purchase_time).await.unwrap();

    let later = purchase_time + Duration::days(2);
    for _ in 0..5 {
        let status = service.status(1, later).await.unwrap();
        assert!(status.expired);
    }
    // Repeated expired reads never touched the stored window.
    let account = service.store().get(1).await.unwrap();
    assert_eq!(account.purchased_at, Some(purchase_time));
    assert_eq!(account.used_images, 0);
}
