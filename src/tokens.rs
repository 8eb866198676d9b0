//! Opaque bearer tokens: random plaintext handed out once, SHA-256 hash kept
//! server side.

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::database::models::{NewTokenRow, TokenScope, User};
use crate::database::TokenStore;
use crate::error::AppError;

/// Bytes of entropy in every token.
pub const TOKEN_BYTES: usize = 16;
/// Length of the unpadded base-32 plaintext of a token.
pub const TOKEN_TEXT_LEN: usize = 26;

#[derive(Debug, Error)]
#[error("entropy source failed: {0}")]
pub struct TokenError(#[from] rand::Error);

#[derive(Debug, Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plain_text: String,
    #[serde(skip)]
    pub user_id: i32,
    #[serde(skip)]
    pub hash: Vec<u8>,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: TokenScope,
}

impl Token {
    pub fn generate(user_id: i32, ttl: Duration, scope: TokenScope) -> Result<Self, TokenError> {
        let mut random_bytes = [0u8; TOKEN_BYTES];
        OsRng.try_fill_bytes(&mut random_bytes)?;

        let plain_text = BASE32_NOPAD.encode(&random_bytes);
        let hash = hash_token(&plain_text);

        Ok(Token {
            plain_text,
            user_id,
            hash,
            expiry: Utc::now() + ttl,
            scope,
        })
    }
}

pub fn hash_token(plain_text: &str) -> Vec<u8> {
    Sha256::digest(plain_text.as_bytes()).to_vec()
}

/// Generates a token for `user` and stores it, replacing whatever token the
/// user held before.
pub async fn issue<S>(
    store: &S,
    user: &User,
    ttl: Duration,
    scope: TokenScope,
) -> Result<Token, AppError>
where
    S: TokenStore + ?Sized,
{
    let token =
        Token::generate(user.id, ttl, scope).map_err(|e| AppError::Internal(e.to_string()))?;

    store
        .replace_token(NewTokenRow {
            user_id: user.id,
            name: user.last_name.clone(),
            email: user.email.clone(),
            token_hash: token.hash.clone(),
            scope,
            expiry: token.expiry,
        })
        .await?;

    Ok(token)
}

/// Owner of a live token. Unknown, expired and out-of-scope tokens all fail
/// the same way.
pub async fn resolve<S>(store: &S, plain_text: &str, scope: TokenScope) -> Result<User, AppError>
where
    S: TokenStore + ?Sized,
{
    if plain_text.len() != TOKEN_TEXT_LEN {
        return Err(AppError::NotFoundOrExpired);
    }

    store
        .user_for_token(hash_token(plain_text), scope, Utc::now())
        .await?
        .ok_or(AppError::NotFoundOrExpired)
}
