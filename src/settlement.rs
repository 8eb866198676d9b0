//! Turns a client-confirmed payment into durable records. Card details, the
//! settlement code and the charge outcome are always taken from the gateway;
//! the form only supplies identifiers, the buyer's identity and the claimed
//! amount. Only intents the gateway reports as succeeded are recorded.

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::database::models::{
    NewCustomer, NewTransaction, OrderLine, OrderStatus, SaleIds, TransactionStatus,
};
use crate::database::{CatalogStore, SettlementStore, StoreError};
use crate::error::AppError;
use crate::gateway::{GatewayError, PaymentGateway};
use crate::receipt::Receipt;

/// Form fields posted after the client confirmed a card payment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaymentForm {
    pub first_name: String,
    pub last_name: String,
    pub cardholder_name: String,
    pub cardholder_email: String,
    pub payment_intent: String,
    pub payment_method: String,
    pub payment_amount: String,
    pub payment_currency: String,
    pub product_id: Option<String>,
}

/// Amount in minor currency units.
pub fn parse_amount(raw: &str) -> Result<i32, AppError> {
    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|amount| *amount >= 0)
        .ok_or_else(|| AppError::Validation(format!("invalid payment amount: {raw:?}")))
}

fn parse_currency(raw: &str) -> Result<String, AppError> {
    let currency = raw.trim().to_ascii_lowercase();
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(currency)
    } else {
        Err(AppError::Validation(format!("invalid currency code: {raw:?}")))
    }
}

fn parse_product_id(raw: Option<&str>) -> Result<i32, AppError> {
    raw.and_then(|id| id.trim().parse::<i32>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::Validation("missing or invalid product id".to_string()))
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.is_empty() {
        Err(AppError::Validation(format!("{field} is required")))
    } else {
        Ok(value)
    }
}

/// Validates the form and reconciles it with the gateway. Nothing is written.
pub async fn transaction_data<G>(gateway: &G, form: &PaymentForm) -> Result<Receipt, AppError>
where
    G: PaymentGateway + ?Sized,
{
    let amount = parse_amount(&form.payment_amount)?;
    let currency = parse_currency(&form.payment_currency)?;
    let intent_id = required(&form.payment_intent, "payment_intent")?;
    let method_id = required(&form.payment_method, "payment_method")?;

    let intent = gateway.payment_intent(intent_id).await.map_err(|e| {
        warn!("Could not resolve payment intent {intent_id}: {e}");
        AppError::Gateway(e)
    })?;
    let method = gateway.payment_method(method_id).await.map_err(|e| {
        warn!("Could not resolve payment method {method_id}: {e}");
        AppError::Gateway(e)
    })?;

    if intent.amount != i64::from(amount) || !intent.currency.eq_ignore_ascii_case(&currency) {
        warn!(
            payment_intent = %intent.id,
            claimed_amount = amount,
            gateway_amount = intent.amount,
            "Submitted amount or currency differs from the gateway charge"
        );
    }
    if !intent.succeeded {
        warn!(payment_intent = %intent.id, "Payment intent is not in a succeeded state");
        return Err(AppError::Gateway(GatewayError::NotSucceeded(intent.id)));
    }

    Ok(Receipt {
        first_name: form.first_name.trim().to_string(),
        last_name: form.last_name.trim().to_string(),
        cardholder: form.cardholder_name.trim().to_string(),
        email: form.cardholder_email.trim().to_string(),
        payment_intent: intent.id,
        payment_method: method.id,
        amount,
        currency,
        last_four: method.last_four,
        expiry_month: method.expiry_month,
        expiry_year: method.expiry_year,
        bank_return_code: intent.return_code,
    })
}

fn new_transaction(data: &Receipt) -> NewTransaction {
    NewTransaction {
        amount: data.amount,
        currency: data.currency.clone(),
        last_four: data.last_four.clone(),
        bank_return_code: data.bank_return_code.clone(),
        expiry_month: data.expiry_month,
        expiry_year: data.expiry_year,
        payment_intent: data.payment_intent.clone(),
        payment_method: data.payment_method.clone(),
        transaction_status_id: TransactionStatus::Succeeded.id(),
    }
}

/// The gateway has already taken the money when this runs, so a failed write
/// is logged with everything needed to reconcile it by hand.
fn record_failure(err: StoreError, data: &Receipt) -> AppError {
    match err {
        StoreError::DuplicateIntent(intent) => {
            warn!(
                payment_intent = %intent,
                "Ignoring repeated settlement of an already recorded charge"
            );
            AppError::DuplicateSubmission
        }
        other => {
            error!(
                payment_intent = %data.payment_intent,
                amount = data.amount,
                currency = %data.currency,
                email = %data.email,
                "Charge succeeded at the gateway but could not be recorded: {other}"
            );
            AppError::Persistence(other)
        }
    }
}

/// Storefront checkout: records customer, transaction and order together.
pub async fn settle_checkout<S, G>(
    store: &S,
    gateway: &G,
    form: &PaymentForm,
) -> Result<(Receipt, SaleIds), AppError>
where
    S: SettlementStore + CatalogStore + ?Sized,
    G: PaymentGateway + ?Sized,
{
    let widget_id = parse_product_id(form.product_id.as_deref())?;
    if store.widget(widget_id).await?.is_none() {
        return Err(AppError::Validation(format!("unknown product {widget_id}")));
    }

    let data = transaction_data(gateway, form).await?;
    let customer = NewCustomer {
        first_name: data.first_name.clone(),
        last_name: data.last_name.clone(),
        email: data.email.clone(),
    };
    let line = OrderLine {
        widget_id,
        quantity: 1,
        amount: data.amount,
        status: OrderStatus::Cleared,
    };

    match store
        .record_sale(customer, new_transaction(&data), line)
        .await
    {
        Ok(ids) => {
            info!(
                payment_intent = %data.payment_intent,
                order_id = ids.order_id,
                "Recorded storefront sale"
            );
            Ok((data, ids))
        }
        Err(e) => Err(record_failure(e, &data)),
    }
}

/// Virtual terminal: an administrator charged a card directly, so only the
/// transaction is recorded.
pub async fn settle_virtual_terminal<S, G>(
    store: &S,
    gateway: &G,
    form: &PaymentForm,
) -> Result<(Receipt, i32), AppError>
where
    S: SettlementStore + ?Sized,
    G: PaymentGateway + ?Sized,
{
    let data = transaction_data(gateway, form).await?;

    match store.record_transaction(new_transaction(&data)).await {
        Ok(transaction_id) => {
            info!(
                payment_intent = %data.payment_intent,
                transaction_id,
                "Recorded virtual terminal transaction"
            );
            Ok((data, transaction_id))
        }
        Err(e) => Err(record_failure(e, &data)),
    }
}
