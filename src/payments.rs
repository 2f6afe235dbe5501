use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{extract::Extension, http::HeaderMap, Json};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::plans::{self, Plan};
use crate::subscription::{PgAccountStore, SubscriptionService, SubscriptionStatus};
use crate::transactions::{NewTransaction, TransactionLedger};

/// ISO 3166-1 alpha-2 country to checkout currency. Unlisted countries
/// charge in USD.
fn currency_for_country(country_code: &str) -> &'static str {
    match country_code.to_ascii_uppercase().as_str() {
        "US" => "usd",
        "GB" => "gbp",
        "EU" => "eur",
        "CA" => "cad",
        "AU" => "aud",
        "IN" => "inr",
        "JP" => "jpy",
        "CN" => "cny",
        "SG" => "sgd",
        "HK" => "hkd",
        "NZ" => "nzd",
        "CH" => "chf",
        "SE" => "sek",
        "NO" => "nok",
        "DK" => "dkk",
        "MX" => "mxn",
        "BR" => "brl",
        "ZA" => "zar",
        "AE" => "aed",
        "SA" => "sar",
        "KR" => "krw",
        "TH" => "thb",
        "MY" => "myr",
        "PH" => "php",
        "ID" => "idr",
        _ => "usd",
    }
}

/// Fixed USD conversion rates, refreshed by hand when prices are reviewed.
fn conversion_rate(currency: &str) -> f64 {
    match currency {
        "usd" => 1.0,
        "eur" => 0.92,
        "gbp" => 0.79,
        "cad" => 1.36,
        "aud" => 1.52,
        "inr" => 83.0,
        "jpy" => 149.0,
        "cny" => 7.24,
        "sgd" => 1.34,
        "hkd" => 7.83,
        "nzd" => 1.65,
        "chf" => 0.88,
        "sek" => 10.45,
        "nok" => 10.75,
        "dkk" => 6.88,
        "mxn" => 17.0,
        "brl" => 4.97,
        "zar" => 18.5,
        "aed" => 3.67,
        "sar" => 3.75,
        "krw" => 1315.0,
        "thb" => 35.5,
        "myr" => 4.68,
        "php" => 56.0,
        "idr" => 15600.0,
        _ => 1.0,
    }
}

/// Currencies Stripe treats as zero-decimal: amounts are whole units, never
/// multiplied by 100.
const ZERO_DECIMAL_CURRENCIES: [&str; 6] = ["jpy", "krw", "idr", "clp", "pyg", "vnd"];

/// USD price converted to the smallest unit of `currency`, as Stripe's
/// `unit_amount` expects.
pub fn convert_price(base_price_usd: f64, currency: &str) -> i64 {
    let currency = currency.to_ascii_lowercase();
    let converted = base_price_usd * conversion_rate(&currency);
    if ZERO_DECIMAL_CURRENCIES.contains(&currency.as_str()) {
        converted as i64
    } else {
        (converted * 100.0) as i64
    }
}

fn converted_amount(base_price_usd: f64, currency: &str) -> f64 {
    base_price_usd * conversion_rate(&currency.to_ascii_lowercase())
}

/// Stripe checkout over plain form posts against the REST API. Built only
/// when `STRIPE_SECRET_KEY` is present; the payment handlers answer 503
/// otherwise.
#[derive(Clone)]
pub struct PaymentService {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: Option<String>,
    success_url: String,
    cancel_url: String,
}

impl PaymentService {
    pub fn from_env() -> Option<Self> {
        let secret_key = dotenvy::var("STRIPE_SECRET_KEY").ok()?;
        let api_base = dotenvy::var("STRIPE_API_BASE")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string());
        let webhook_secret = dotenvy::var("STRIPE_WEBHOOK_SECRET").ok();
        let success_url = dotenvy::var("STRIPE_SUCCESS_URL")
            .unwrap_or_else(|_| "https://lenslab.app/payment/success".to_string());
        let cancel_url = dotenvy::var("STRIPE_CANCEL_URL")
            .unwrap_or_else(|_| "https://lenslab.app/payment/cancel".to_string());

        Some(Self {
            client: reqwest::Client::new(),
            api_base,
            secret_key,
            webhook_secret,
            success_url,
            cancel_url,
        })
    }

    async fn create_checkout_session(
        &self,
        user_id: i32,
        plan: &Plan,
        currency: &str,
        unit_amount: i64,
    ) -> anyhow::Result<StripeCheckoutSession> {
        let mut form = Vec::new();
        form.push(("mode".to_string(), "payment".to_string()));
        form.push((
            "success_url".to_string(),
            self.success_url_with_session_placeholder(),
        ));
        form.push(("cancel_url".to_string(), self.cancel_url.clone()));
        form.push((
            "line_items[0][price_data][currency]".to_string(),
            currency.to_string(),
        ));
        form.push((
            "line_items[0][price_data][product_data][name]".to_string(),
            format!("LensLab - {}", plan.name),
        ));
        form.push((
            "line_items[0][price_data][product_data][description]".to_string(),
            format!("Subscription to {} plan", plan.name),
        ));
        form.push((
            "line_items[0][price_data][unit_amount]".to_string(),
            unit_amount.to_string(),
        ));
        form.push(("line_items[0][quantity]".to_string(), "1".to_string()));
        form.push(("client_reference_id".to_string(), user_id.to_string()));
        form.push(("metadata[user_id]".to_string(), user_id.to_string()));
        form.push(("metadata[plan_id]".to_string(), plan.id.to_string()));

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.secret_key),
            )
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("stripe_error: {}", text));
        }

        Ok(response.json().await?)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> anyhow::Result<StripeSessionDetails> {
        let url = format!("{}/v1/checkout/sessions/{}", self.api_base, session_id);
        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.secret_key),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("stripe_error: {}", text));
        }

        Ok(response.json().await?)
    }

    fn success_url_with_session_placeholder(&self) -> String {
        if self.success_url.contains("{CHECKOUT_SESSION_ID}") {
            return self.success_url.clone();
        }
        if self.success_url.contains('?') {
            format!("{}&session_id={{CHECKOUT_SESSION_ID}}", self.success_url)
        } else {
            format!("{}?session_id={{CHECKOUT_SESSION_ID}}", self.success_url)
        }
    }

    /// Checks a `Stripe-Signature` header (`t=<ts>,v1=<hex>,...`) against
    /// the webhook secret. The signed payload is `<ts>.<raw body>`.
    fn verify_webhook_signature(&self, payload: &[u8], header: &str) -> AppResult<()> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or(AppError::PaymentsNotConfigured)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let part = part.trim();
            if let Some(value) = part.strip_prefix("t=") {
                timestamp = Some(value);
            } else if let Some(value) = part.strip_prefix("v1=") {
                signatures.push(value);
            }
        }
        let timestamp =
            timestamp.ok_or(AppError::BadRequest("Missing signature timestamp".into()))?;
        if signatures.is_empty() {
            return Err(AppError::BadRequest("Missing v1 signature".into()));
        }

        let expected = {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .expect("HMAC can use any key length");
            mac.update(timestamp.as_bytes());
            mac.update(b".");
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        };
        if !signatures.iter().any(|signature| *signature == expected) {
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct StripeCheckoutSession {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct StripeSessionDetails {
    status: Option<String>,
    payment_status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn session_is_paid(session: &StripeSessionDetails) -> bool {
    matches!(
        session.status.as_deref(),
        Some("complete" | "complete_async")
    ) || matches!(session.payment_status.as_deref(), Some("paid"))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan_id: String,
    #[serde(default)]
    pub country_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub checkout_url: String,
    /// Smallest-unit amount actually charged, alongside its currency.
    pub amount: i64,
    pub currency: String,
}

pub async fn create_checkout_session(
    user: AuthUser,
    Extension(pool): Extension<PgPool>,
    Extension(payments): Extension<Option<Arc<PaymentService>>>,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<CheckoutSessionResponse>> {
    let payments = payments.ok_or(AppError::PaymentsNotConfigured)?;
    let plan = plans::plan(&payload.plan_id)
        .ok_or_else(|| AppError::UnknownPlan(payload.plan_id.clone()))?;
    if plan.price_usd <= 0.0 {
        return Err(AppError::BadRequest(format!(
            "plan '{}' is not purchasable",
            plan.id
        )));
    }

    let currency = payload
        .country_code
        .as_deref()
        .map(currency_for_country)
        .unwrap_or("usd");
    let unit_amount = convert_price(plan.price_usd, currency);

    let session = payments
        .create_checkout_session(user.user_id, plan, currency, unit_amount)
        .await
        .map_err(|err| AppError::PaymentGateway(format!("{err:#}")))?;
    let checkout_url = session
        .url
        .ok_or_else(|| AppError::PaymentGateway("checkout session carried no URL".to_string()))?;

    TransactionLedger::new(pool)
        .create(
            NewTransaction {
                user_id: user.user_id,
                plan_id: plan.id.to_string(),
                amount: converted_amount(plan.price_usd, currency),
                currency: currency.to_string(),
                amount_usd: plan.price_usd,
                payment_method: "stripe".to_string(),
                session_id: Some(session.id.clone()),
                country_code: payload.country_code.clone(),
                ..Default::default()
            },
            Utc::now(),
        )
        .await?;
    info!(user_id = user.user_id, session_id = %session.id, "created checkout session");

    Ok(Json(CheckoutSessionResponse {
        session_id: session.id,
        checkout_url,
        amount: unit_amount,
        currency: currency.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub session_id: String,
}

/// Client-driven completion for platforms where the webhook cannot reach
/// us. Verifies payment state with Stripe before activating anything.
pub async fn activate_checkout_session(
    user: AuthUser,
    Extension(pool): Extension<PgPool>,
    Extension(payments): Extension<Option<Arc<PaymentService>>>,
    Json(payload): Json<ActivateRequest>,
) -> AppResult<Json<SubscriptionStatus>> {
    let payments = payments.ok_or(AppError::PaymentsNotConfigured)?;
    if payload.session_id.trim().is_empty() {
        return Err(AppError::BadRequest("session_id is required".to_string()));
    }

    let session = payments
        .retrieve_checkout_session(&payload.session_id)
        .await
        .map_err(|err| AppError::PaymentGateway(format!("{err:#}")))?;

    let owner = session
        .metadata
        .get("user_id")
        .and_then(|value| value.parse::<i32>().ok())
        .ok_or_else(|| AppError::BadRequest("session carries no owner".to_string()))?;
    if owner != user.user_id {
        return Err(AppError::Forbidden);
    }
    if !session_is_paid(&session) {
        return Err(AppError::BadRequest("session is not paid".to_string()));
    }

    let plan_id = session
        .metadata
        .get("plan_id")
        .cloned()
        .ok_or_else(|| AppError::BadRequest("session carries no plan".to_string()))?;

    let now = Utc::now();
    let service = SubscriptionService::new(PgAccountStore::new(pool.clone()));
    let status = service.purchase(user.user_id, &plan_id, now).await?;

    let ledger = TransactionLedger::new(pool);
    if let Some(record) = ledger.find_by_session(&payload.session_id).await? {
        ledger
            .update_status(
                record.transaction_id,
                "completed",
                Some(true),
                Some("Purchase verified and subscription activated"),
                now,
            )
            .await?;
    }

    Ok(Json(status))
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub event_type: String,
}

#[derive(Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    kind: String,
    data: StripeEventData,
}

#[derive(Deserialize)]
struct StripeEventData {
    object: Value,
}

impl StripeEvent {
    fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(Value::as_str)
    }
}

pub async fn stripe_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(payments): Extension<Option<Arc<PaymentService>>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let payments = payments.ok_or(AppError::PaymentsNotConfigured)?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::BadRequest("Missing Stripe-Signature header".into()))?;
    payments.verify_webhook_signature(&body, signature)?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("unparseable webhook payload: {err}")))?;

    let ledger = TransactionLedger::new(pool);
    let now = Utc::now();
    match event.kind.as_str() {
        "checkout.session.completed" => {
            if let Some(session_id) = event.object_id() {
                match ledger.find_by_session(session_id).await? {
                    Some(record) => {
                        ledger
                            .update_status(record.transaction_id, "completed", Some(true), None, now)
                            .await?;
                        info!(session_id, "checkout session completed");
                    }
                    None => warn!(session_id, "completed session has no ledger row"),
                }
            }
        }
        "checkout.session.expired" => {
            if let Some(session_id) = event.object_id() {
                if let Some(record) = ledger.find_by_session(session_id).await? {
                    ledger
                        .update_status(record.transaction_id, "expired", None, None, now)
                        .await?;
                    info!(session_id, "checkout session expired");
                }
            }
        }
        "payment_intent.payment_failed" => {
            // Intents are not correlated back to sessions here, so there is
            // no ledger row to move; the session itself will expire.
            warn!(intent = event.object_id().unwrap_or("unknown"), "payment failed");
        }
        other => debug!(event_type = other, "ignoring webhook event"),
    }

    Ok(Json(WebhookAck {
        status: "success",
        event_type: event.kind,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GooglePlayVerifyRequest {
    pub product_id: String,
    pub purchase_token: String,
}

#[derive(Debug, Serialize)]
pub struct GooglePlayVerifyResponse {
    pub success: bool,
    pub message: String,
    pub transaction_id: Uuid,
}

/// Record first, then activate, then finalize, so a crash between steps
/// leaves an auditable pending row rather than an unexplained activation.
pub async fn google_play_verify(
    user: AuthUser,
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<GooglePlayVerifyRequest>,
) -> AppResult<Json<GooglePlayVerifyResponse>> {
    let plan_id = match payload.product_id.as_str() {
        "lenslab_day25" => "day25",
        "lenslab_week100" => "week100",
        "lenslab_month1000" => "month1000",
        "lenslab_year_unlimited" => "year_unlimited",
        other => {
            return Err(AppError::BadRequest(format!("Unknown product ID: {other}")));
        }
    };
    let plan = plans::plan(plan_id).ok_or_else(|| AppError::UnknownPlan(plan_id.to_string()))?;

    let now = Utc::now();
    let ledger = TransactionLedger::new(pool.clone());
    // TODO: verify purchase_token against the Google Play Developer API
    // before trusting it.
    let transaction_id = ledger
        .create(
            NewTransaction {
                user_id: user.user_id,
                plan_id: plan.id.to_string(),
                amount: plan.price_usd,
                currency: "USD".to_string(),
                amount_usd: plan.price_usd,
                payment_method: "google_play".to_string(),
                product_id: Some(payload.product_id.clone()),
                purchase_token: Some(payload.purchase_token.clone()),
                device_platform: Some("android".to_string()),
                ..Default::default()
            },
            now,
        )
        .await?;

    let service = SubscriptionService::new(PgAccountStore::new(pool));
    match service.purchase(user.user_id, plan.id, now).await {
        Ok(_) => {
            ledger
                .update_status(
                    transaction_id,
                    "completed",
                    Some(true),
                    Some("Purchase verified and subscription activated"),
                    now,
                )
                .await?;
            Ok(Json(GooglePlayVerifyResponse {
                success: true,
                message: format!("Subscription {} activated successfully", plan.id),
                transaction_id,
            }))
        }
        Err(err) => {
            ledger
                .update_status(
                    transaction_id,
                    "failed",
                    Some(false),
                    Some(&format!("Failed to activate subscription: {err}")),
                    now,
                )
                .await?;
            Err(err)
        }
    }
}
