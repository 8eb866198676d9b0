use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod admin;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod mailer;
pub mod notifications;
pub mod receipt;
pub mod settlement;
pub mod tokens;
pub mod websocket_handler;

use auth::{Credentials, LinkSigner};
use config::Config;
use database::Repository;
use gateway::PaymentGateway;
use mailer::Mailer;
use notifications::NotificationHub;
use receipt::ReceiptStore;

/// Shared by every handler. Collaborators sit behind traits so tests can swap
/// in in-memory versions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repository: Arc<dyn Repository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub credentials: Credentials,
    pub link_signer: LinkSigner,
    pub mailer: Arc<dyn Mailer>,
    pub receipts: ReceiptStore,
    pub notifications: NotificationHub,
}

pub fn app(state: AppState) -> Router {
    let admin = Router::new()
        .route("/all-sales", post(admin::all_sales))
        .route("/all-subscriptions", post(admin::all_subscriptions))
        .route("/get-sale/{id}", get(admin::get_sale))
        .route("/all-users", get(admin::all_users))
        .route("/all-users/{id}", get(admin::one_user))
        .route("/all-users/edit/{id}", post(admin::edit_user))
        .route("/all-users/delete/{id}", post(admin::delete_user));

    let protected = Router::new()
        .route("/api/is-authenticated", post(auth::check_authenticated))
        .route(
            "/virtual-terminal-payment-succeeded",
            post(handlers::virtual_terminal_payment_succeeded),
        )
        .nest("/api/admin", admin)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/payment-succeeded", post(handlers::payment_succeeded))
        .route("/receipt", get(handlers::receipt))
        .route("/virtual-terminal-receipt", get(handlers::virtual_terminal_receipt))
        .route("/api/widget/{id}", get(handlers::get_widget))
        .route("/api/stripe-key", get(handlers::stripe_key))
        .route("/api/authenticate", post(auth::create_auth_token))
        .route("/api/forgot-password", post(auth::forgot_password))
        .route("/api/reset-password", post(auth::reset_password))
        .route("/ws", get(websocket_handler::notifications_ws_handler))
        .merge(protected)
        .layer(middleware::from_fn(receipt::session_layer))
        .with_state(state)
}
