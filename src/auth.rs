use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use once_cell::sync::Lazy;
use rand_core::OsRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::error;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static MOBILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("valid mobile regex"));

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub password: String,
}

#[derive(Deserialize)]
pub struct OAuthRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user_id: i32,
}

#[derive(Serialize)]
struct Claims {
    sub: i32,
    exp: usize,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub oauth_provider: Option<String>,
    pub plan_id: String,
    pub plan_expires_at: Option<chrono::DateTime<Utc>>,
    pub plan_active: bool,
    pub quota_alerted: bool,
}

fn issue_token(user_id: i32) -> AppResult<String> {
    let exp = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;
    let claims = Claims { sub: user_id, exp };
    let secret = crate::config::JWT_SECRET.as_str();
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })
}

fn auth_cookie(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        format!("auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
            .parse()
            .expect("valid header value"),
    );
    headers
}

fn clear_cookie() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        "auth_token=deleted; HttpOnly; Path=/; Max-Age=0"
            .parse()
            .expect("valid header value"),
    );
    headers
}

fn hash_password(raw: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(raw.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Signup with email or mobile plus a password. Either identifier works;
/// both may be given.
pub async fn register_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, HeaderMap, Json<AuthResponse>)> {
    let email = normalize(payload.email);
    let mobile = normalize(payload.mobile);
    if email.is_none() && mobile.is_none() {
        return Err(AppError::BadRequest("Provide email or mobile".into()));
    }
    if let Some(email) = &email {
        if !EMAIL_RE.is_match(email) {
            return Err(AppError::BadRequest("Invalid email address".into()));
        }
    }
    if let Some(mobile) = &mobile {
        if !MOBILE_RE.is_match(mobile) {
            return Err(AppError::BadRequest("Invalid mobile number".into()));
        }
    }
    if payload.password.len() < 8 {
        return Err(AppError::BadRequest("Password too short".into()));
    }

    let hash = hash_password(&payload.password)?;
    let result = sqlx::query(
        "INSERT INTO users (email, mobile, password_hash) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(&email)
    .bind(&mobile)
    .bind(hash)
    .fetch_one(&pool)
    .await;
    let user_id: i32 = match result {
        Ok(row) => row.get("id"),
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                match db_err.constraint() {
                    Some("users_email_key") => {
                        return Err(AppError::Conflict("Email already registered".into()))
                    }
                    Some("users_mobile_key") => {
                        return Err(AppError::Conflict("Mobile already registered".into()))
                    }
                    _ => {}
                }
            }
            return Err(AppError::Db(e));
        }
    };

    let token = issue_token(user_id)?;
    Ok((
        StatusCode::CREATED,
        auth_cookie(&token),
        Json(AuthResponse {
            access_token: token,
            user_id,
        }),
    ))
}

pub async fn login_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<AuthResponse>)> {
    let email = normalize(payload.email);
    let mobile = normalize(payload.mobile);
    let rec = if let Some(email) = &email {
        sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&pool)
            .await
    } else if let Some(mobile) = &mobile {
        sqlx::query("SELECT id, password_hash FROM users WHERE mobile = $1")
            .bind(mobile)
            .fetch_optional(&pool)
            .await
    } else {
        return Err(AppError::BadRequest("Provide email or mobile".into()));
    }
    .map_err(|e| {
        error!(?e, "DB error while fetching user");
        AppError::Db(e)
    })?;

    let rec = rec.ok_or(AppError::Unauthorized)?;
    let user_id: i32 = rec.get("id");
    // OAuth-only accounts carry no hash and cannot log in with a password.
    let pass_hash: Option<String> = rec.get("password_hash");
    let pass_hash = pass_hash.ok_or(AppError::Unauthorized)?;
    let parsed = PasswordHash::new(&pass_hash).map_err(|e| {
        error!(?e, "Hash parse error");
        AppError::Message(format!("Hash error: {}", e))
    })?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed)
        .is_err()
    {
        return Err(AppError::Unauthorized);
    }

    let token = issue_token(user_id)?;
    Ok((
        auth_cookie(&token),
        Json(AuthResponse {
            access_token: token,
            user_id,
        }),
    ))
}

pub async fn logout_user() -> (HeaderMap, &'static str) {
    (clear_cookie(), "Logged out")
}

/// Placeholder Google sign-in: the token is shape-checked only and its
/// prefix becomes the stable subject. Real tokeninfo validation is out of
/// scope.
pub async fn oauth_google(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<OAuthRequest>,
) -> AppResult<(HeaderMap, Json<AuthResponse>)> {
    oauth_login(pool, "google", &payload.token).await
}

/// Placeholder Facebook sign-in, same contract as [`oauth_google`].
pub async fn oauth_facebook(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<OAuthRequest>,
) -> AppResult<(HeaderMap, Json<AuthResponse>)> {
    oauth_login(pool, "facebook", &payload.token).await
}

async fn oauth_login(
    pool: PgPool,
    provider: &str,
    token: &str,
) -> AppResult<(HeaderMap, Json<AuthResponse>)> {
    let token = token.trim();
    if token.len() < 10 {
        return Err(AppError::BadRequest(format!("Invalid {provider} token")));
    }
    let prefix: String = token.chars().take(8).collect();
    let subject = format!("{provider}-{prefix}");

    let existing =
        sqlx::query("SELECT id FROM users WHERE oauth_provider = $1 AND oauth_subject = $2")
            .bind(provider)
            .bind(&subject)
            .fetch_optional(&pool)
            .await?;
    let user_id: i32 = match existing {
        Some(row) => row.get("id"),
        None => sqlx::query(
            "INSERT INTO users (oauth_provider, oauth_subject) VALUES ($1, $2) RETURNING id",
        )
        .bind(provider)
        .bind(&subject)
        .fetch_one(&pool)
        .await?
        .get("id"),
    };

    let jwt = issue_token(user_id)?;
    Ok((
        auth_cookie(&jwt),
        Json(AuthResponse {
            access_token: jwt,
            user_id,
        }),
    ))
}

pub async fn current_user(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id }: AuthUser,
) -> AppResult<Json<UserInfo>> {
    let rec = sqlx::query(
        "SELECT email, mobile, oauth_provider, subscription_plan_id, \
         subscription_expires_at, quota_alerted FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error while fetching user");
        AppError::Db(e)
    })?;
    let Some(row) = rec else {
        return Err(AppError::NotFound);
    };

    let expires_at: Option<chrono::DateTime<Utc>> = row.get("subscription_expires_at");
    let plan_active = match expires_at {
        Some(expires_at) => Utc::now() <= expires_at,
        None => true,
    };

    Ok(Json(UserInfo {
        id: user_id,
        email: row.get("email"),
        mobile: row.get("mobile"),
        oauth_provider: row.get("oauth_provider"),
        plan_id: row.get("subscription_plan_id"),
        plan_expires_at: expires_at,
        plan_active,
        quota_alerted: row.get("quota_alerted"),
    }))
}

/// Whole-account deletion. Transaction ledger rows survive on purpose; they
/// carry no foreign key and stay auditable.
pub async fn delete_current_user(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id }: AuthUser,
) -> AppResult<(HeaderMap, &'static str)> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok((clear_cookie(), "Account deleted"))
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
