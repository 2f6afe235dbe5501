use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::UsageAccount;

/// Field set applied when a window opens (purchase) or rolls over
/// (auto-renewal). `plan_id`/`status_code` of `None` keep the current plan.
/// Usage and the alert flag always reset with the window.
#[derive(Debug, Clone)]
pub struct WindowReset {
    pub plan_id: Option<String>,
    pub status_code: Option<String>,
    pub purchased_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Persistence seam for subscription accounting. Each mutation must be atomic
/// per account row; `increment_used_images` in particular is a relative
/// increment, not a read-modify-write.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find(&self, user_id: i32) -> Result<Option<UsageAccount>>;

    async fn reset_window(&self, user_id: i32, reset: WindowReset) -> Result<()>;

    async fn increment_used_images(&self, user_id: i32, delta: i64) -> Result<()>;

    async fn set_quota_alerted(&self, user_id: i32, alerted: bool) -> Result<()>;
}

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find(&self, user_id: i32) -> Result<Option<UsageAccount>> {
        let account = sqlx::query_as::<_, UsageAccount>(
            r#"
            SELECT
                id AS user_id,
                subscription_plan_id AS plan_id,
                subscription_status_code AS status_code,
                subscription_purchased_at AS purchased_at,
                subscription_expires_at AS expires_at,
                subscription_used_images AS used_images,
                quota_alerted
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn reset_window(&self, user_id: i32, reset: WindowReset) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                subscription_plan_id = COALESCE($2, subscription_plan_id),
                subscription_status_code = COALESCE($3, subscription_status_code),
                subscription_purchased_at = $4,
                subscription_expires_at = $5,
                subscription_used_images = 0,
                quota_alerted = FALSE,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(reset.plan_id)
        .bind(reset.status_code)
        .bind(reset.purchased_at)
        .bind(reset.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_used_images(&self, user_id: i32, delta: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                subscription_used_images = subscription_used_images + $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_quota_alerted(&self, user_id: i32, alerted: bool) -> Result<()> {
        sqlx::query("UPDATE users SET quota_alerted = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(alerted)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub mod testing {
    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::*;

    /// Map-backed store for exercising the accounting engine without a
    /// database. Mutations on absent users are no-ops, matching the SQL
    /// store's `UPDATE .. WHERE id = $1` behavior.
    #[derive(Default)]
    pub struct InMemoryAccountStore {
        accounts: Mutex<HashMap<i32, UsageAccount>>,
    }

    impl InMemoryAccountStore {
        pub async fn insert(&self, account: UsageAccount) {
            let mut guard = self.accounts.lock().await;
            guard.insert(account.user_id, account);
        }

        pub async fn get(&self, user_id: i32) -> Option<UsageAccount> {
            let guard = self.accounts.lock().await;
            guard.get(&user_id).cloned()
        }
    }

    #[async_trait]
    impl AccountStore for InMemoryAccountStore {
        async fn find(&self, user_id: i32) -> Result<Option<UsageAccount>> {
            let guard = self.accounts.lock().await;
            Ok(guard.get(&user_id).cloned())
        }

        async fn reset_window(&self, user_id: i32, reset: WindowReset) -> Result<()> {
            let mut guard = self.accounts.lock().await;
            if let Some(account) = guard.get_mut(&user_id) {
                if let Some(plan_id) = reset.plan_id {
                    account.plan_id = plan_id;
                }
                if let Some(status_code) = reset.status_code {
                    account.status_code = status_code;
                }
                account.purchased_at = Some(reset.purchased_at);
                account.expires_at = reset.expires_at;
                account.used_images = 0;
                account.quota_alerted = false;
            }
            Ok(())
        }

        async fn increment_used_images(&self, user_id: i32, delta: i64) -> Result<()> {
            let mut guard = self.accounts.lock().await;
            if let Some(account) = guard.get_mut(&user_id) {
                account.used_images += delta;
            }
            Ok(())
        }

        async fn set_quota_alerted(&self, user_id: i32, alerted: bool) -> Result<()> {
            let mut guard = self.accounts.lock().await;
            if let Some(account) = guard.get_mut(&user_id) {
                account.quota_alerted = alerted;
            }
            Ok(())
        }
    }
}
