use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Subscription columns carried on the `users` row. One rolling window per
/// user; a renewal overwrites the previous window in place.
#[derive(Debug, Clone, FromRow)]
pub struct UsageAccount {
    pub user_id: i32,
    pub plan_id: String,
    pub status_code: String,
    pub purchased_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_images: i64,
    pub quota_alerted: bool,
}

impl UsageAccount {
    /// View used for users with no persisted row. Missing accounts read as
    /// fresh free-tier accounts, never as errors.
    pub fn free_tier(user_id: i32) -> Self {
        Self {
            user_id,
            plan_id: "free".to_string(),
            status_code: "F".to_string(),
            purchased_at: None,
            expires_at: None,
            used_images: 0,
            quota_alerted: false,
        }
    }
}

/// Snapshot returned to clients. Every field is always present in the JSON
/// encoding; `null` carries meaning (unlimited quota, no expiry).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionStatus {
    pub user_id: i32,
    pub plan_id: String,
    pub status_code: String,
    pub purchased_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_images: i64,
    pub image_quota: Option<i64>,
    pub duration_days: Option<i64>,
    pub expired: bool,
    pub remaining_images: Option<i64>,
    pub quota_exceeded: bool,
}
