use axum::{
    extract::{Extension, Query},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppResult;
use crate::extractor::AuthUser;
use crate::plans;

/// One ledger row per purchase attempt, across every payment platform.
/// Plan metadata and window dates are denormalized in at creation time so
/// rows stay meaningful after catalog changes or account deletion.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TransactionRecord {
    pub transaction_id: Uuid,
    pub user_id: i32,
    pub user_email: Option<String>,
    pub plan_id: String,
    pub plan_name: String,
    pub product_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub amount_usd: f64,
    pub payment_method: String,
    pub purchase_token: Option<String>,
    pub order_id: Option<String>,
    pub session_id: Option<String>,
    pub subscription_start_date: DateTime<Utc>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub duration_days: Option<i64>,
    pub image_quota: Option<i64>,
    pub status: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub device_platform: Option<String>,
    pub app_version: Option<String>,
    pub country_code: Option<String>,
    pub notes: Option<String>,
}

/// Creation payload. Rows always start `pending` and unverified; the
/// payment flow finalizes them via [`TransactionLedger::update_status`].
#[derive(Debug, Default)]
pub struct NewTransaction {
    pub user_id: i32,
    pub plan_id: String,
    pub amount: f64,
    pub currency: String,
    pub amount_usd: f64,
    pub payment_method: String,
    pub product_id: Option<String>,
    pub purchase_token: Option<String>,
    pub order_id: Option<String>,
    pub session_id: Option<String>,
    pub device_platform: Option<String>,
    pub app_version: Option<String>,
    pub country_code: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RevenueStats {
    pub total_transactions: i64,
    pub total_revenue_usd: f64,
    pub avg_transaction_usd: f64,
    pub currencies: Vec<String>,
    pub payment_methods: Vec<String>,
}

pub struct TransactionLedger {
    pool: PgPool,
}

impl TransactionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewTransaction, now: DateTime<Utc>) -> AppResult<Uuid> {
        // Unknown plan ids are recorded as-is; callers validate the plan
        // before money moves, so this only happens for historical replays.
        let (plan_name, duration_days, image_quota) = match plans::plan(&new.plan_id) {
            Some(plan) => (plan.name.to_string(), plan.duration_days, plan.image_quota),
            None => (new.plan_id.clone(), None, None),
        };
        let transaction_id = Uuid::new_v4();
        let end_date = duration_days.map(|days| now + Duration::days(days));

        let user_email =
            sqlx::query_scalar::<_, Option<String>>("SELECT email FROM users WHERE id = $1")
                .bind(new.user_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();

        sqlx::query(
            r#"INSERT INTO transactions (
                   transaction_id, user_id, user_email, plan_id, plan_name, product_id,
                   amount, currency, amount_usd, payment_method,
                   purchase_token, order_id, session_id,
                   subscription_start_date, subscription_end_date, duration_days, image_quota,
                   created_at, updated_at,
                   device_platform, app_version, country_code, notes
               ) VALUES (
                   $1, $2, $3, $4, $5, $6,
                   $7, $8, $9, $10,
                   $11, $12, $13,
                   $14, $15, $16, $17,
                   $18, $19,
                   $20, $21, $22, $23
               )"#,
        )
        .bind(transaction_id)
        .bind(new.user_id)
        .bind(user_email)
        .bind(&new.plan_id)
        .bind(plan_name)
        .bind(&new.product_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(new.amount_usd)
        .bind(&new.payment_method)
        .bind(&new.purchase_token)
        .bind(&new.order_id)
        .bind(&new.session_id)
        .bind(now)
        .bind(end_date)
        .bind(duration_days)
        .bind(image_quota)
        .bind(now)
        .bind(now)
        .bind(&new.device_platform)
        .bind(&new.app_version)
        .bind(&new.country_code)
        .bind(&new.notes)
        .execute(&self.pool)
        .await?;

        Ok(transaction_id)
    }

    /// Moves a row to `status`. `completed_at` and the verified flag are
    /// written only when completing with an explicit verification verdict,
    /// so partial updates cannot mark a row paid by accident.
    pub async fn update_status(
        &self,
        transaction_id: Uuid,
        status: &str,
        verified: Option<bool>,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"UPDATE transactions
               SET status = $2,
                   updated_at = $3,
                   verified = CASE WHEN $2 = 'completed' AND $4 IS NOT NULL
                                   THEN $4 ELSE verified END,
                   completed_at = CASE WHEN $2 = 'completed' AND $4 IS NOT NULL
                                       THEN $3 ELSE completed_at END,
                   notes = COALESCE($5, notes)
               WHERE transaction_id = $1"#,
        )
        .bind(transaction_id)
        .bind(status)
        .bind(now)
        .bind(verified)
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find(&self, transaction_id: Uuid) -> AppResult<Option<TransactionRecord>> {
        let record = sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn find_by_session(&self, session_id: &str) -> AppResult<Option<TransactionRecord>> {
        let record = sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_for_user(
        &self,
        user_id: i32,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<TransactionRecord>> {
        let records = sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Aggregates over completed rows, optionally bounded by completion
    /// time.
    pub async fn revenue_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> AppResult<RevenueStats> {
        let stats = sqlx::query_as::<_, RevenueStats>(
            r#"SELECT
                   COUNT(*) AS total_transactions,
                   COALESCE(SUM(amount_usd), 0) AS total_revenue_usd,
                   COALESCE(AVG(amount_usd), 0) AS avg_transaction_usd,
                   COALESCE(ARRAY_AGG(DISTINCT currency)
                            FILTER (WHERE currency IS NOT NULL), '{}') AS currencies,
                   COALESCE(ARRAY_AGG(DISTINCT payment_method)
                            FILTER (WHERE payment_method IS NOT NULL), '{}') AS payment_methods
               FROM transactions
               WHERE status = 'completed'
                 AND ($1::timestamptz IS NULL OR completed_at >= $1)
                 AND ($2::timestamptz IS NULL OR completed_at <= $2)"#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionListParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list_my_transactions(
    user: AuthUser,
    Extension(pool): Extension<PgPool>,
    Query(params): Query<TransactionListParams>,
) -> AppResult<Json<Vec<TransactionRecord>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);
    let records = TransactionLedger::new(pool)
        .list_for_user(user.user_id, limit, offset)
        .await?;
    Ok(Json(records))
}
