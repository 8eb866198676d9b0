//! Persistence contracts consumed by the settlement pipeline, the token
//! service and the admin API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::database::models::{
    NewCustomer, NewTokenRow, NewTransaction, NewUser, OrderDetail, OrderLine, OrderPage, SaleIds,
    TokenScope, User, UserChanges, UserCredentials, Widget,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool unavailable: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),
    /// The gateway payment intent already has a transaction row.
    #[error("payment intent {0} has already been settled")]
    DuplicateIntent(String),
    #[error("email {0} is already in use")]
    DuplicateEmail(String),
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Writes the customer, the transaction and the order linking them as a
    /// single unit: either all three rows exist afterwards or none do.
    async fn record_sale(
        &self,
        customer: NewCustomer,
        transaction: NewTransaction,
        line: OrderLine,
    ) -> Result<SaleIds, StoreError>;

    async fn record_transaction(&self, transaction: NewTransaction) -> Result<i32, StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Stores `row` as the user's only token, overwriting any earlier one.
    async fn replace_token(&self, row: NewTokenRow) -> Result<(), StoreError>;

    /// Owner of the token with this hash and scope, if it expires after `now`.
    async fn user_for_token(
        &self,
        token_hash: Vec<u8>,
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Emails are stored lowercased and matched case-insensitively.
    async fn credentials_by_email(&self, email: String)
        -> Result<Option<UserCredentials>, StoreError>;
    async fn user_by_email(&self, email: String) -> Result<Option<User>, StoreError>;
    async fn user(&self, id: i32) -> Result<Option<User>, StoreError>;
    async fn users(&self) -> Result<Vec<User>, StoreError>;
    async fn add_user(&self, user: NewUser) -> Result<i32, StoreError>;
    /// Applies the profile changes and, when given, the new password hash as
    /// one write. A password change also revokes the user's token. Returns
    /// false when no user has this id.
    async fn edit_user(
        &self,
        id: i32,
        changes: UserChanges,
        password_hash: Option<String>,
    ) -> Result<bool, StoreError>;
    /// Stores the new hash and revokes the user's token together.
    async fn update_password(&self, id: i32, password_hash: String) -> Result<(), StoreError>;
    /// Deletes the user and all of their tokens together. Returns false when
    /// no user has this id.
    async fn delete_user(&self, id: i32) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn widget(&self, id: i32) -> Result<Option<Widget>, StoreError>;
    /// One page of orders whose widget has `is_recurring == recurring`,
    /// newest first. `page` starts at 1.
    async fn orders_page(
        &self,
        recurring: bool,
        page_size: i64,
        page: i64,
    ) -> Result<OrderPage, StoreError>;
    async fn order(&self, id: i32) -> Result<Option<OrderDetail>, StoreError>;
}

/// Everything the HTTP layer needs from persistence.
pub trait Repository: SettlementStore + TokenStore + AccountStore + CatalogStore {}

impl<T> Repository for T where T: SettlementStore + TokenStore + AccountStore + CatalogStore {}

/// Number of the last page for `total` records, at least 1.
pub fn last_page(total: i64, page_size: i64) -> i64 {
    if total <= 0 || page_size <= 0 {
        return 1;
    }
    (total + page_size - 1) / page_size
}
