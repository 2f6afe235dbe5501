use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::models::{SubscriptionStatus, UsageAccount};
use super::store::{AccountStore, WindowReset};
use crate::error::{AppError, AppResult};
use crate::plans::{self, Plan};

/// Rolling-window usage accounting over an [`AccountStore`].
///
/// Fixed-duration plans renew lazily: the first `record_usage` after the
/// window lapses resets the counters in place. Nothing runs in the
/// background, so a lapsed window stays stale until the account is touched,
/// and `status` reports it as `expired` in the meantime.
///
/// Every operation takes `now` explicitly so window arithmetic is
/// deterministic under test.
pub struct SubscriptionService<S> {
    store: S,
}

impl<S: AccountStore> SubscriptionService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Activates `plan_id` for the user, opening a fresh window. Overwrites
    /// any in-progress window without proration; counters and the alert flag
    /// reset unconditionally.
    pub async fn purchase(
        &self,
        user_id: i32,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionStatus> {
        let plan = plans::plan(plan_id).ok_or_else(|| AppError::UnknownPlan(plan_id.to_string()))?;
        self.store
            .reset_window(
                user_id,
                WindowReset {
                    plan_id: Some(plan.id.to_string()),
                    status_code: Some(plan.status_code.to_string()),
                    purchased_at: now,
                    expires_at: expiry(plan, now),
                },
            )
            .await?;
        debug!(%user_id, plan_id, "subscription window opened");
        self.status(user_id, now).await
    }

    /// Pure projection of the stored account against the clock; never writes.
    pub async fn status(&self, user_id: i32, now: DateTime<Utc>) -> AppResult<SubscriptionStatus> {
        let account = self
            .store
            .find(user_id)
            .await?
            .unwrap_or_else(|| UsageAccount::free_tier(user_id));
        Ok(project(&account, now))
    }

    /// Counts one processed image against the current window.
    ///
    /// Expired finite-duration windows roll over first (usage and alert flag
    /// reset, window advanced to `now`). An account that is still expired or
    /// over quota afterwards absorbs the call silently; quota exhaustion is
    /// a state, not an error.
    pub async fn record_usage(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionStatus> {
        let mut status = self.status(user_id, now).await?;

        if status.expired {
            if let Some(days) = status.duration_days {
                self.store
                    .reset_window(
                        user_id,
                        WindowReset {
                            plan_id: None,
                            status_code: None,
                            purchased_at: now,
                            expires_at: Some(now + Duration::days(days)),
                        },
                    )
                    .await?;
                debug!(%user_id, plan_id = %status.plan_id, "subscription window auto-renewed");
                status = self.status(user_id, now).await?;
            }
        }

        if status.expired || status.quota_exceeded {
            return Ok(status);
        }

        // The status read and this increment are not transactional: two
        // concurrent calls for one user can both pass the quota check and
        // admit one extra image. The increment itself is atomic, so the
        // counter never corrupts.
        self.store.increment_used_images(user_id, 1).await?;

        let updated = self.status(user_id, now).await?;
        if updated.quota_exceeded {
            if let Some(account) = self.store.find(user_id).await? {
                if !account.quota_alerted {
                    self.store.set_quota_alerted(user_id, true).await?;
                }
            }
        }
        Ok(updated)
    }

    /// Whether the one-shot quota alert is raised for the user's current
    /// window. Missing accounts read as no alert.
    pub async fn quota_alert_pending(&self, user_id: i32) -> AppResult<bool> {
        let account = self.store.find(user_id).await?;
        Ok(account.map(|a| a.quota_alerted).unwrap_or(false))
    }

    pub async fn clear_quota_alert(&self, user_id: i32) -> AppResult<()> {
        self.store.set_quota_alerted(user_id, false).await?;
        Ok(())
    }
}

fn expiry(plan: &Plan, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    plan.duration_days.map(|days| now + Duration::days(days))
}

fn project(account: &UsageAccount, now: DateTime<Utc>) -> SubscriptionStatus {
    let plan = plans::plan_or_free(&account.plan_id);
    let expired = matches!(account.expires_at, Some(expires_at) if now > expires_at);
    let remaining_images = plan
        .image_quota
        .map(|quota| (quota - account.used_images).max(0));
    let quota_exceeded = plan
        .image_quota
        .map(|quota| account.used_images >= quota)
        .unwrap_or(false);

    SubscriptionStatus {
        user_id: account.user_id,
        plan_id: account.plan_id.clone(),
        status_code: account.status_code.clone(),
        purchased_at: account.purchased_at,
        expires_at: account.expires_at,
        used_images: account.used_images,
        image_quota: plan.image_quota,
        duration_days: plan.duration_days,
        expired,
        remaining_images,
        quota_exceeded,
    }
}
