use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::models::{TokenScope, User};
use crate::database::AccountStore;
use crate::error::AppError;
use crate::tokens;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Slow salted password hashing. Holds a throwaway hash so that a lookup for
/// an unknown email costs the same bcrypt comparison as a wrong password.
#[derive(Clone)]
pub struct Credentials {
    cost: u32,
    dummy_hash: Arc<str>,
}

impl Credentials {
    pub fn new(cost: u32) -> Result<Self, bcrypt::BcryptError> {
        let dummy_hash = bcrypt::hash("placeholder-password-never-issued", cost)?;
        Ok(Self {
            cost,
            dummy_hash: dummy_hash.into(),
        })
    }

    /// Hashes with a fresh random salt every time.
    pub async fn hash_password(&self, password: String) -> Result<String, AppError> {
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .map_err(|e| AppError::Internal(e.to_string()))
    }

    async fn verify(&self, password: String, hash: Arc<str>) -> Result<bool, AppError> {
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
            .map_err(|e| {
                error!("Stored password hash could not be read: {e}");
                AppError::Internal(e.to_string())
            })
    }
}

/// Checks an email/password pair and returns the user id. Unknown emails and
/// wrong passwords take the same path and fail with the same error.
pub async fn authenticate<S>(
    store: &S,
    credentials: &Credentials,
    email: &str,
    password: &str,
) -> Result<i32, AppError>
where
    S: AccountStore + ?Sized,
{
    let email = email.trim().to_lowercase();
    let found = store.credentials_by_email(email).await?;

    let (user_id, hash) = match found {
        Some(row) => (Some(row.id), Arc::from(row.password_hash)),
        None => (None, credentials.dummy_hash.clone()),
    };

    let matches = credentials.verify(password.to_string(), hash).await?;
    match (user_id, matches) {
        (Some(id), true) => Ok(id),
        _ => Err(AppError::Auth),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("link is malformed")]
    Malformed,
    #[error("link signature does not match")]
    BadSignature,
    #[error("link has expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResetQuery {
    email: String,
    expires: i64,
}

/// Signs and checks password-reset links with HMAC-SHA256.
#[derive(Clone)]
pub struct LinkSigner {
    keyed: HmacSha256,
}

impl LinkSigner {
    pub fn new(secret: &str) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            keyed: HmacSha256::new_from_slice(secret.as_bytes())?,
        })
    }

    fn mac(&self) -> HmacSha256 {
        self.keyed.clone()
    }

    pub fn reset_link(&self, frontend: &str, email: &str, expires: DateTime<Utc>) -> String {
        let query = serde_urlencoded::to_string(ResetQuery {
            email: email.to_string(),
            expires: expires.timestamp(),
        })
        .unwrap_or_default();
        let unsigned = format!("{}/reset-password?{query}", frontend.trim_end_matches('/'));
        self.sign(&unsigned)
    }

    pub fn sign(&self, url: &str) -> String {
        let mut mac = self.mac();
        mac.update(url.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        format!("{url}&hash={signature}")
    }

    /// Returns the email carried by a genuine, unexpired reset link.
    pub fn verify_reset_link(
        &self,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<String, SignatureError> {
        let (unsigned, signature) = link.rsplit_once("&hash=").ok_or(SignatureError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;

        let mut mac = self.mac();
        mac.update(unsigned.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SignatureError::BadSignature)?;

        let (_, query) = unsigned.split_once('?').ok_or(SignatureError::Malformed)?;
        let query: ResetQuery =
            serde_urlencoded::from_str(query).map_err(|_| SignatureError::Malformed)?;
        if query.expires <= now.timestamp() {
            return Err(SignatureError::Expired);
        }
        Ok(query.email)
    }
}

/// The user a bearer token resolved to, placed in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Auth)?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if token.len() == tokens::TOKEN_TEXT_LEN => {
            Ok(token.to_string())
        }
        _ => Err(AppError::Auth),
    }
}

/// Middleware for routes that need an authenticated administrator.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())?;
    let user = tokens::resolve(
        state.repository.as_ref(),
        &token,
        TokenScope::Authentication,
    )
    .await?;
    req.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
pub struct CredentialsPayload {
    pub email: String,
    pub password: String,
}

/// POST /api/authenticate issues a bearer token for valid credentials.
#[tracing::instrument(skip_all)]
pub async fn create_auth_token(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsPayload>,
) -> Result<Json<Value>, AppError> {
    let repository = state.repository.as_ref();
    let user_id = authenticate(repository, &state.credentials, &payload.email, &payload.password)
        .await?;
    let user = repository.user(user_id).await?.ok_or(AppError::Auth)?;

    let token = tokens::issue(
        repository,
        &user,
        state.config.token_ttl,
        TokenScope::Authentication,
    )
    .await?;
    info!("Issued authentication token for user {}", user.id);

    Ok(Json(json!({
        "error": false,
        "message": format!("token for {} created", user.email),
        "authentication_token": token,
    })))
}

/// POST /api/is-authenticated, behind `require_auth`.
pub async fn check_authenticated(
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Json<Value> {
    Json(json!({
        "error": false,
        "message": format!("authenticated user {}", user.email),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordPayload {
    pub email: String,
}

pub const RESET_LINK_SENT: &str = "If the address is registered, a reset link has been sent";

/// POST /api/forgot-password mails a signed reset link. The response does not
/// reveal whether the email is registered.
#[tracing::instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordPayload>,
) -> Result<Json<Value>, AppError> {
    let email = payload.email.trim().to_lowercase();
    match state.repository.user_by_email(email.clone()).await? {
        Some(user) => {
            let expires = Utc::now() + state.config.reset_link_ttl;
            let link = state
                .link_signer
                .reset_link(&state.config.frontend_url, &user.email, expires);
            state.mailer.send_password_reset(&user.email, &link).await?;
        }
        None => warn!("Password reset requested for unknown email"),
    }

    Ok(Json(json!({ "error": false, "message": RESET_LINK_SENT })))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordPayload {
    pub link: String,
    pub password: String,
}

/// POST /api/reset-password stores a new password for the owner of a valid
/// reset link.
#[tracing::instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordPayload>,
) -> Result<Json<Value>, AppError> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let email = state
        .link_signer
        .verify_reset_link(&payload.link, Utc::now())
        .map_err(|e| {
            warn!("Rejected password reset link: {e}");
            AppError::Auth
        })?;

    let user = state
        .repository
        .user_by_email(email)
        .await?
        .ok_or(AppError::Auth)?;
    let hash = state.credentials.hash_password(payload.password).await?;
    state.repository.update_password(user.id, hash).await?;
    info!("Password reset for user {}", user.id);

    Ok(Json(json!({ "error": false, "message": "password changed" })))
}
