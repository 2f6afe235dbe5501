use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{PgAccountStore, SubscriptionService, SubscriptionStatus};
use crate::error::AppResult;

fn service(pool: PgPool) -> SubscriptionService<PgAccountStore> {
    SubscriptionService::new(PgAccountStore::new(pool))
}

pub async fn subscription_status(
    Extension(pool): Extension<PgPool>,
    Path(user_id): Path<i32>,
) -> AppResult<Json<SubscriptionStatus>> {
    let status = service(pool).status(user_id, Utc::now()).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: i32,
    pub plan_id: String,
}

pub async fn purchase_plan(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<PurchaseRequest>,
) -> AppResult<Json<SubscriptionStatus>> {
    let status = service(pool)
        .purchase(payload.user_id, &payload.plan_id, Utc::now())
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    pub user_id: i32,
}

pub async fn record_usage(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<RecordUsageRequest>,
) -> AppResult<Json<SubscriptionStatus>> {
    let status = service(pool)
        .record_usage(payload.user_id, Utc::now())
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Serialize)]
pub struct QuotaAlertResponse {
    pub user_id: i32,
    pub quota_exhausted: bool,
    pub remaining_images: Option<i64>,
    pub image_quota: Option<i64>,
    pub used_images: i64,
}

/// Read side of the one-shot exhaustion alert. `quota_exhausted` is the
/// stored flag, not a live recomputation, so it stays raised until cleared.
pub async fn quota_alert(
    Extension(pool): Extension<PgPool>,
    Path(user_id): Path<i32>,
) -> AppResult<Json<QuotaAlertResponse>> {
    let service = service(pool);
    let status = service.status(user_id, Utc::now()).await?;
    let quota_exhausted = service.quota_alert_pending(user_id).await?;
    Ok(Json(QuotaAlertResponse {
        user_id,
        quota_exhausted,
        remaining_images: status.remaining_images,
        image_quota: status.image_quota,
        used_images: status.used_images,
    }))
}

#[derive(Debug, Serialize)]
pub struct QuotaAlertCleared {
    pub user_id: i32,
    pub cleared: bool,
}

pub async fn clear_quota_alert(
    Extension(pool): Extension<PgPool>,
    Path(user_id): Path<i32>,
) -> AppResult<Json<QuotaAlertCleared>> {
    service(pool).clear_quota_alert(user_id).await?;
    Ok(Json(QuotaAlertCleared {
        user_id,
        cleared: true,
    }))
}
