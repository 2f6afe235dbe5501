use axum::{
    routing::{get, post},
    Router,
};

use crate::{auth, payments, processing, subscription, tools, transactions};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/tools", get(tools::list_tools))
        .route("/api/debug/settings", get(processing::api::debug_settings))
        // processing endpoints: generic + per-tool aliases the mobile
        // clients were shipped with
        .route("/api/process", post(processing::api::process_image))
        .route("/api/enhance", post(processing::api::enhance))
        .route("/api/remove_bg", post(processing::api::remove_bg))
        .route("/api/face_retouch", post(processing::api::face_retouch))
        .route("/api/erase_object", post(processing::api::erase_object))
        .route("/api/sky_replace", post(processing::api::sky_replace))
        .route("/api/super_res", post(processing::api::super_res))
        .route("/api/style_transfer", post(processing::api::style_transfer))
        .route("/api/register", post(auth::register_user))
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/auth/google", post(auth::oauth_google))
        .route("/api/auth/facebook", post(auth::oauth_facebook))
        .route(
            "/api/me",
            get(auth::current_user).delete(auth::delete_current_user),
        )
        .route(
            "/api/subscription/status/:user_id",
            get(subscription::api::subscription_status),
        )
        .route(
            "/api/subscription/purchase",
            post(subscription::api::purchase_plan),
        )
        .route(
            "/api/subscription/record_usage",
            post(subscription::api::record_usage),
        )
        .route(
            "/api/subscription/quota_alert/:user_id",
            get(subscription::api::quota_alert),
        )
        .route(
            "/api/subscription/quota_alert/clear/:user_id",
            post(subscription::api::clear_quota_alert),
        )
        .route(
            "/api/subscription/google_play/verify",
            post(payments::google_play_verify),
        )
        .route(
            "/api/payment/checkout_session",
            post(payments::create_checkout_session),
        )
        .route(
            "/api/payment/activate",
            post(payments::activate_checkout_session),
        )
        .route("/api/payment/webhook", post(payments::stripe_webhook))
        .route("/api/transactions", get(transactions::list_my_transactions))
}
