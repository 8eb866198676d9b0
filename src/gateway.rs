//! Read-only view of the payment gateway used to reconcile a checkout.

use std::time::Duration;

use async_trait::async_trait;
use stripe::{
    Client, PaymentIntent, PaymentIntentId, PaymentIntentStatus, PaymentMethod, PaymentMethodId,
    StripeError,
};
use thiserror::Error;
use tracing::trace;

use crate::config::StripeKeys;

/// Authoritative state of a payment intent.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentState {
    pub id: String,
    /// Id of the charge that settled the intent.
    pub return_code: String,
    pub amount: i64,
    pub currency: String,
    pub succeeded: bool,
}

/// Card metadata of a payment method.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentMethodState {
    pub id: String,
    pub last_four: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} is not a valid gateway identifier")]
    InvalidId(String),
    #[error("{kind} {id} was not found at the gateway")]
    NotFound { kind: &'static str, id: String },
    #[error("payment intent {0} has no charge")]
    NoCharge(String),
    #[error("payment intent {0} has not succeeded")]
    NotSucceeded(String),
    #[error("payment method {0} is not a card")]
    NotACard(String),
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
    #[error("gateway request failed: {0}")]
    Stripe(StripeError),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn payment_intent(&self, intent_id: &str) -> Result<PaymentIntentState, GatewayError>;
    async fn payment_method(&self, method_id: &str) -> Result<PaymentMethodState, GatewayError>;
}

pub struct StripeGateway {
    client: Client,
    timeout: Duration,
}

impl StripeGateway {
    pub fn new(keys: &StripeKeys, timeout: Duration) -> Self {
        Self {
            client: Client::new(keys.secret_key.clone()),
            timeout,
        }
    }
}

fn classify(error: StripeError, kind: &'static str, id: &str) -> GatewayError {
    match error {
        StripeError::Stripe(ref request) if request.http_status == 404 => GatewayError::NotFound {
            kind,
            id: id.to_string(),
        },
        other => GatewayError::Stripe(other),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[tracing::instrument(skip(self))]
    async fn payment_intent(&self, intent_id: &str) -> Result<PaymentIntentState, GatewayError> {
        let id: PaymentIntentId = intent_id
            .parse()
            .map_err(|_| GatewayError::InvalidId(intent_id.to_string()))?;

        let intent = tokio::time::timeout(
            self.timeout,
            PaymentIntent::retrieve(&self.client, &id, &[]),
        )
        .await
        .map_err(|_| GatewayError::Timeout(self.timeout))?
        .map_err(|e| classify(e, "payment intent", intent_id))?;
        trace!("Retrieved payment intent {}", intent.id);

        let return_code = intent
            .latest_charge
            .as_ref()
            .map(|charge| charge.id().to_string())
            .ok_or_else(|| GatewayError::NoCharge(intent_id.to_string()))?;

        Ok(PaymentIntentState {
            id: intent.id.to_string(),
            return_code,
            amount: intent.amount,
            currency: intent.currency.to_string(),
            succeeded: intent.status == PaymentIntentStatus::Succeeded,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn payment_method(&self, method_id: &str) -> Result<PaymentMethodState, GatewayError> {
        let id: PaymentMethodId = method_id
            .parse()
            .map_err(|_| GatewayError::InvalidId(method_id.to_string()))?;

        let method = tokio::time::timeout(
            self.timeout,
            PaymentMethod::retrieve(&self.client, &id, &[]),
        )
        .await
        .map_err(|_| GatewayError::Timeout(self.timeout))?
        .map_err(|e| classify(e, "payment method", method_id))?;
        trace!("Retrieved payment method {}", method.id);

        let card = method
            .card
            .ok_or_else(|| GatewayError::NotACard(method_id.to_string()))?;

        Ok(PaymentMethodState {
            id: method.id.to_string(),
            last_four: card.last4,
            expiry_month: card.exp_month as i32,
            expiry_year: card.exp_year as i32,
        })
    }
}
