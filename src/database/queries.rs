use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::QueryFragment;
use diesel::query_dsl::methods::ExecuteDsl;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::database::models::{
    Customer, NewCustomer, NewOrder, NewTokenRow, NewTransaction, NewUser, Order, OrderDetail,
    OrderLine, OrderPage, SaleIds, TokenScope, Transaction, User, UserChanges, UserCredentials,
    Widget, WidgetSummary,
};
use crate::database::schema::{customers, orders, tokens, transactions, users, widgets};
use crate::database::store::{
    last_page, AccountStore, CatalogStore, SettlementStore, StoreError, TokenStore,
};
use crate::database::DatabaseClient;

fn is_unique_violation(e: &DieselError) -> bool {
    matches!(
        e,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

/// Single statement so concurrent logins for one user cannot both insert;
/// `tokens.user_id` is unique.
fn upsert_token(
    row: NewTokenRow,
) -> impl ExecuteDsl<PgConnection> + QueryFragment<Pg> + RunQueryDsl<PgConnection> {
    diesel::insert_into(tokens::table)
        .values(row.clone())
        .on_conflict(tokens::user_id)
        .do_update()
        .set(row)
}

fn revoke_tokens(conn: &mut PgConnection, user_id: i32) -> Result<usize, StoreError> {
    Ok(diesel::delete(tokens::table.filter(tokens::user_id.eq(user_id))).execute(conn)?)
}

fn insert_transaction(
    conn: &mut PgConnection,
    transaction: &NewTransaction,
) -> Result<i32, StoreError> {
    diesel::insert_into(transactions::table)
        .values(transaction)
        .returning(transactions::id)
        .get_result(conn)
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateIntent(transaction.payment_intent.clone())
            } else {
                StoreError::Query(e)
            }
        })
}

#[async_trait]
impl SettlementStore for DatabaseClient {
    async fn record_sale(
        &self,
        customer: NewCustomer,
        transaction: NewTransaction,
        line: OrderLine,
    ) -> Result<SaleIds, StoreError> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let customer_id = diesel::insert_into(customers::table)
                    .values(&customer)
                    .returning(customers::id)
                    .get_result::<i32>(conn)?;

                let transaction_id = insert_transaction(conn, &transaction)?;

                let order_id = diesel::insert_into(orders::table)
                    .values(&NewOrder {
                        widget_id: line.widget_id,
                        transaction_id,
                        customer_id,
                        status_id: line.status.id(),
                        quantity: line.quantity,
                        amount: line.amount,
                    })
                    .returning(orders::id)
                    .get_result::<i32>(conn)?;

                Ok(SaleIds {
                    customer_id,
                    transaction_id,
                    order_id,
                })
            })
        })
        .await
    }

    async fn record_transaction(&self, transaction: NewTransaction) -> Result<i32, StoreError> {
        self.run(move |conn| insert_transaction(conn, &transaction))
            .await
    }
}

#[async_trait]
impl TokenStore for DatabaseClient {
    async fn replace_token(&self, row: NewTokenRow) -> Result<(), StoreError> {
        self.run(move |conn| {
            upsert_token(row).execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn user_for_token(
        &self,
        token_hash: Vec<u8>,
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        self.run(move |conn| {
            Ok(users::table
                .inner_join(tokens::table)
                .filter(tokens::token_hash.eq(token_hash))
                .filter(tokens::scope.eq(scope))
                .filter(tokens::expiry.gt(now))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl AccountStore for DatabaseClient {
    async fn credentials_by_email(
        &self,
        email: String,
    ) -> Result<Option<UserCredentials>, StoreError> {
        self.run(move |conn| {
            Ok(users::table
                .filter(users::email.eq(email.to_lowercase()))
                .select((users::id, users::password))
                .first::<UserCredentials>(conn)
                .optional()?)
        })
        .await
    }

    async fn user_by_email(&self, email: String) -> Result<Option<User>, StoreError> {
        self.run(move |conn| {
            Ok(users::table
                .filter(users::email.eq(email.to_lowercase()))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn user(&self, id: i32) -> Result<Option<User>, StoreError> {
        self.run(move |conn| {
            Ok(users::table
                .find(id)
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        self.run(|conn| {
            Ok(users::table
                .order((users::last_name.asc(), users::first_name.asc()))
                .select(User::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn add_user(&self, mut user: NewUser) -> Result<i32, StoreError> {
        user.email = user.email.to_lowercase();
        self.run(move |conn| {
            diesel::insert_into(users::table)
                .values(&user)
                .returning(users::id)
                .get_result(conn)
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::DuplicateEmail(user.email.clone())
                    } else {
                        StoreError::Query(e)
                    }
                })
        })
        .await
    }

    async fn edit_user(
        &self,
        id: i32,
        mut changes: UserChanges,
        password_hash: Option<String>,
    ) -> Result<bool, StoreError> {
        changes.email = changes.email.to_lowercase();
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let updated = diesel::update(users::table.find(id))
                    .set((&changes, users::updated_at.eq(Utc::now())))
                    .execute(conn)
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            StoreError::DuplicateEmail(changes.email.clone())
                        } else {
                            StoreError::Query(e)
                        }
                    })?;
                if updated == 0 {
                    return Ok(false);
                }

                if let Some(password_hash) = password_hash {
                    diesel::update(users::table.find(id))
                        .set(users::password.eq(password_hash))
                        .execute(conn)?;
                    revoke_tokens(conn, id)?;
                }
                Ok(true)
            })
        })
        .await
    }

    async fn update_password(&self, id: i32, password_hash: String) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                diesel::update(users::table.find(id))
                    .set((
                        users::password.eq(password_hash),
                        users::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
                revoke_tokens(conn, id)?;
                Ok(())
            })
        })
        .await
    }

    async fn delete_user(&self, id: i32) -> Result<bool, StoreError> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                revoke_tokens(conn, id)?;
                let deleted = diesel::delete(users::table.find(id)).execute(conn)?;
                Ok(deleted > 0)
            })
        })
        .await
    }
}

#[async_trait]
impl CatalogStore for DatabaseClient {
    async fn widget(&self, id: i32) -> Result<Option<Widget>, StoreError> {
        self.run(move |conn| {
            Ok(widgets::table
                .find(id)
                .select(Widget::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn orders_page(
        &self,
        recurring: bool,
        page_size: i64,
        page: i64,
    ) -> Result<OrderPage, StoreError> {
        self.run(move |conn| {
            let offset = (page - 1) * page_size;

            let rows = orders::table
                .inner_join(widgets::table)
                .inner_join(transactions::table)
                .inner_join(customers::table)
                .filter(widgets::is_recurring.eq(recurring))
                .order(orders::created_at.desc())
                .limit(page_size)
                .offset(offset)
                .select((
                    Order::as_select(),
                    (widgets::id, widgets::name),
                    Transaction::as_select(),
                    Customer::as_select(),
                ))
                .load::<(Order, WidgetSummary, Transaction, Customer)>(conn)?;

            let total_records = orders::table
                .inner_join(widgets::table)
                .filter(widgets::is_recurring.eq(recurring))
                .count()
                .get_result::<i64>(conn)?;

            Ok(OrderPage {
                orders: rows.into_iter().map(OrderDetail::from).collect(),
                current_page: page,
                page_size,
                last_page: last_page(total_records, page_size),
                total_records,
            })
        })
        .await
    }

    async fn order(&self, id: i32) -> Result<Option<OrderDetail>, StoreError> {
        self.run(move |conn| {
            Ok(orders::table
                .inner_join(widgets::table)
                .inner_join(transactions::table)
                .inner_join(customers::table)
                .filter(orders::id.eq(id))
                .select((
                    Order::as_select(),
                    (widgets::id, widgets::name),
                    Transaction::as_select(),
                    Customer::as_select(),
                ))
                .first::<(Order, WidgetSummary, Transaction, Customer)>(conn)
                .optional()?
                .map(OrderDetail::from))
        })
        .await
    }
}
