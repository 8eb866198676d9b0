use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

use crate::database::schema::{customers, orders, tokens, transactions, users, widgets};

/// A purchasable product or recurring plan.
#[derive(Queryable, Selectable, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[diesel(table_name = widgets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Widget {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub inventory_level: i32,
    pub price: i32,
    pub image: Option<String>,
    pub is_recurring: bool,
    pub plan_id: Option<String>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize, PartialEq)]
#[diesel(table_name = customers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Customer {
    pub id: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = customers)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Lifecycle of a gateway charge as recorded locally. Values match the
/// `transaction_statuses` lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum TransactionStatus {
    Pending = 1,
    Succeeded = 2,
    Declined = 3,
    Refunded = 4,
    PartiallyRefunded = 5,
}

impl TransactionStatus {
    pub fn id(self) -> i32 {
        self as i32
    }
}

/// Values match the `statuses` lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum OrderStatus {
    Cleared = 1,
    Refunded = 2,
    Cancelled = 3,
}

impl OrderStatus {
    pub fn id(self) -> i32 {
        self as i32
    }
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize, PartialEq)]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Transaction {
    pub id: i32,
    pub amount: i32,
    pub currency: String,
    pub last_four: String,
    pub bank_return_code: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    pub payment_intent: String,
    pub payment_method: String,
    pub transaction_status_id: i32,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = transactions)]
pub struct NewTransaction {
    pub amount: i32,
    pub currency: String,
    pub last_four: String,
    pub bank_return_code: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    pub payment_intent: String,
    pub payment_method: String,
    pub transaction_status_id: i32,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize, PartialEq)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: i32,
    pub widget_id: i32,
    pub transaction_id: i32,
    pub customer_id: i32,
    pub status_id: i32,
    pub quantity: i32,
    pub amount: i32,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = orders)]
pub struct NewOrder {
    pub widget_id: i32,
    pub transaction_id: i32,
    pub customer_id: i32,
    pub status_id: i32,
    pub quantity: i32,
    pub amount: i32,
}

/// The order line of a storefront sale; foreign keys are filled in by the
/// store once the customer and transaction rows exist.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub widget_id: i32,
    pub quantity: i32,
    pub amount: i32,
    pub status: OrderStatus,
}

/// Ids assigned while recording a storefront sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaleIds {
    pub customer_id: i32,
    pub transaction_id: i32,
    pub order_id: i32,
}

#[derive(Queryable, Debug, Clone, Serialize, PartialEq)]
pub struct WidgetSummary {
    pub id: i32,
    pub name: String,
}

/// An order joined with everything the admin console shows for it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub widget: WidgetSummary,
    pub transaction: Transaction,
    pub customer: Customer,
}

impl From<(Order, WidgetSummary, Transaction, Customer)> for OrderDetail {
    fn from(
        (order, widget, transaction, customer): (Order, WidgetSummary, Transaction, Customer),
    ) -> Self {
        OrderDetail {
            order,
            widget,
            transaction,
            customer,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderPage {
    pub orders: Vec<OrderDetail>,
    pub current_page: i64,
    pub page_size: i64,
    pub last_page: i64,
    pub total_records: i64,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize, PartialEq)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

/// Profile fields an administrator may change; the password is handled
/// separately so an edit never touches the stored hash by accident.
#[derive(AsChangeset, Debug, Clone, Deserialize)]
#[diesel(table_name = users)]
pub struct UserChanges {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Queryable, Debug, Clone)]
pub struct UserCredentials {
    pub id: i32,
    pub password_hash: String,
}

/// Purpose of an issued token. Tokens never authenticate outside their scope.
#[derive(DbEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[ExistingTypePath = "crate::database::schema::sql_types::TokenScope"]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    Authentication,
    PasswordReset,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = tokens)]
pub struct NewTokenRow {
    pub user_id: i32,
    pub name: String,
    pub email: String,
    pub token_hash: Vec<u8>,
    pub scope: TokenScope,
    pub expiry: DateTime<Utc>,
}
