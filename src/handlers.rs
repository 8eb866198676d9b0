use axum::extract::{Path, State};
use axum::response::Redirect;
use axum::{Extension, Form, Json};
use serde_json::{json, Value};
use tracing::info;

use crate::database::models::Widget;
use crate::error::AppError;
use crate::receipt::{Receipt, SessionId};
use crate::settlement::{self, PaymentForm};
use crate::AppState;

/// POST /payment-succeeded records a storefront sale and sends the buyer to
/// the receipt.
#[tracing::instrument(skip_all)]
pub async fn payment_succeeded(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Form(form): Form<PaymentForm>,
) -> Result<Redirect, AppError> {
    let (receipt, ids) =
        settlement::settle_checkout(state.repository.as_ref(), state.gateway.as_ref(), &form)
            .await?;
    info!("Order {} settled", ids.order_id);

    state.receipts.put(session, receipt).await;
    Ok(Redirect::to("/receipt"))
}

/// POST /virtual-terminal-payment-succeeded records a card charged by an
/// administrator.
#[tracing::instrument(skip_all)]
pub async fn virtual_terminal_payment_succeeded(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Form(form): Form<PaymentForm>,
) -> Result<Redirect, AppError> {
    let (receipt, transaction_id) = settlement::settle_virtual_terminal(
        state.repository.as_ref(),
        state.gateway.as_ref(),
        &form,
    )
    .await?;
    info!("Virtual terminal transaction {transaction_id} settled");

    state.receipts.put(session, receipt).await;
    Ok(Redirect::to("/virtual-terminal-receipt"))
}

async fn take_receipt(state: &AppState, session: SessionId) -> Result<Json<Receipt>, AppError> {
    state
        .receipts
        .take(session)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("receipt"))
}

/// GET /receipt
pub async fn receipt(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Result<Json<Receipt>, AppError> {
    take_receipt(&state, session).await
}

/// GET /virtual-terminal-receipt
pub async fn virtual_terminal_receipt(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Result<Json<Receipt>, AppError> {
    take_receipt(&state, session).await
}

/// GET /api/widget/{id}
#[tracing::instrument(skip(state))]
pub async fn get_widget(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Widget>, AppError> {
    state
        .repository
        .widget(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("widget"))
}

/// GET /api/stripe-key returns the publishable key for client-side payment
/// forms.
pub async fn stripe_key(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "publishable_key": state.config.stripe_keys.publishable_key }))
}
