//! Per-session, read-once handoff of a settlement summary from the POST that
//! recorded it to the receipt view the client is redirected to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

/// What the buyer sees on the receipt page. Card data comes from the gateway,
/// never from the submitted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub first_name: String,
    pub last_name: String,
    pub cardholder: String,
    pub email: String,
    pub payment_intent: String,
    pub payment_method: String,
    pub amount: i32,
    pub currency: String,
    pub last_four: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    pub bank_return_code: String,
}

/// Receipts older than the ttl are never handed out and are purged on the
/// next `put`, so sessions that never visit the receipt page do not pile up.
#[derive(Clone)]
pub struct ReceiptStore {
    slots: Arc<Mutex<HashMap<SessionId, (Instant, Receipt)>>>,
    ttl: Duration,
}

impl ReceiptStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Arc::default(),
            ttl,
        }
    }

    /// Replaces whatever receipt the session had not yet read.
    pub async fn put(&self, session: SessionId, receipt: Receipt) {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, (stored_at, _)| now.duration_since(*stored_at) < self.ttl);
        if slots.len() < before {
            debug!("Purged {} unread receipts", before - slots.len());
        }
        slots.insert(session, (now, receipt));
    }

    /// Removes and returns the session's receipt if it has not expired.
    pub async fn take(&self, session: SessionId) -> Option<Receipt> {
        let (stored_at, receipt) = self.slots.lock().await.remove(&session)?;
        (stored_at.elapsed() < self.ttl).then_some(receipt)
    }

    /// Receipts held and not yet taken, including expired ones awaiting a purge.
    pub async fn pending(&self) -> usize {
        self.slots.lock().await.len()
    }
}

fn session_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
        .map(SessionId)
}

/// Attaches a `SessionId` to every request, issuing the cookie when the
/// client did not send a valid one.
pub async fn session_layer(mut req: Request, next: Next) -> Response {
    let existing = session_from_headers(req.headers());
    let session = existing.unwrap_or_else(|| SessionId(Uuid::new_v4()));
    req.extensions_mut().insert(session);

    let mut response = next.run(req).await;
    if existing.is_none() {
        let cookie = Cookie::build((SESSION_COOKIE, session.0.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}
