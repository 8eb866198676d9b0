#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tower::ServiceExt;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use widget_checkout::auth::{Credentials, LinkSigner};
use widget_checkout::config::{Config, StripeKeys};
use widget_checkout::database::models::{
    Customer, NewCustomer, NewTokenRow, NewTransaction, NewUser, Order, OrderDetail, OrderLine,
    OrderPage, SaleIds, TokenScope, Transaction, User, UserChanges, UserCredentials, Widget,
    WidgetSummary,
};
use widget_checkout::database::store::last_page;
use widget_checkout::database::{
    AccountStore, CatalogStore, SettlementStore, StoreError, TokenStore,
};
use widget_checkout::gateway::{
    GatewayError, PaymentGateway, PaymentIntentState, PaymentMethodState,
};
use widget_checkout::mailer::Mailer;
use widget_checkout::notifications::NotificationHub;
use widget_checkout::receipt::ReceiptStore;
use widget_checkout::error::AppError;
use widget_checkout::AppState;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "correct-horse";

#[derive(Default, Clone)]
struct Tables {
    widgets: Vec<Widget>,
    customers: Vec<Customer>,
    transactions: Vec<Transaction>,
    orders: Vec<Order>,
    users: Vec<(User, String)>,
    tokens: Vec<NewTokenRow>,
    next_id: i32,
}

impl Tables {
    fn id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Where a settlement write breaks down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteFailure {
    #[default]
    None,
    /// The database is unreachable before anything is written.
    BeforeWrites,
    /// The transaction and customer inserts succeed, the order insert fails.
    OrderInsert,
}

/// In-memory stand-in for Postgres with the same constraints: unique payment
/// intents, unique emails, one token per user, tokens removed with their user.
/// A sale is staged on a copy of the tables and only committed when every
/// insert succeeded.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    pub fail_writes: Mutex<WriteFailure>,
}

impl MemoryStore {
    pub fn add_widget(&self, name: &str, price: i32, is_recurring: bool) -> i32 {
        let mut t = self.tables.lock().unwrap();
        let id = t.id();
        let now = Utc::now();
        t.widgets.push(Widget {
            id,
            name: name.to_string(),
            description: format!("{name} description"),
            inventory_level: 10,
            price,
            image: None,
            is_recurring,
            plan_id: None,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.tables.lock().unwrap().customers.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.tables.lock().unwrap().transactions.clone()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.tables.lock().unwrap().orders.clone()
    }

    pub fn token_count(&self, user_id: i32) -> usize {
        let t = self.tables.lock().unwrap();
        t.tokens.iter().filter(|row| row.user_id == user_id).count()
    }

    pub fn password_hash(&self, user_id: i32) -> Option<String> {
        let t = self.tables.lock().unwrap();
        t.users
            .iter()
            .find(|(user, _)| user.id == user_id)
            .map(|(_, hash)| hash.clone())
    }

    pub fn fail_writes(&self, failure: WriteFailure) {
        *self.fail_writes.lock().unwrap() = failure;
    }

    fn failure(&self) -> WriteFailure {
        *self.fail_writes.lock().unwrap()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.failure() == WriteFailure::BeforeWrites {
            return Err(broken());
        }
        Ok(())
    }

    fn detail(t: &Tables, order: &Order) -> Option<OrderDetail> {
        let widget = t.widgets.iter().find(|w| w.id == order.widget_id)?;
        let transaction = t.transactions.iter().find(|tx| tx.id == order.transaction_id)?;
        let customer = t.customers.iter().find(|c| c.id == order.customer_id)?;
        Some(OrderDetail::from((
            order.clone(),
            WidgetSummary {
                id: widget.id,
                name: widget.name.clone(),
            },
            transaction.clone(),
            customer.clone(),
        )))
    }
}

fn broken() -> StoreError {
    StoreError::Query(diesel::result::Error::BrokenTransactionManager)
}

fn insert_transaction(t: &mut Tables, row: NewTransaction) -> Result<i32, StoreError> {
    if t
        .transactions
        .iter()
        .any(|tx| tx.payment_intent == row.payment_intent)
    {
        return Err(StoreError::DuplicateIntent(row.payment_intent));
    }
    let id = t.id();
    let now = Utc::now();
    t.transactions.push(Transaction {
        id,
        amount: row.amount,
        currency: row.currency,
        last_four: row.last_four,
        bank_return_code: row.bank_return_code,
        expiry_month: row.expiry_month,
        expiry_year: row.expiry_year,
        payment_intent: row.payment_intent,
        payment_method: row.payment_method,
        transaction_status_id: row.transaction_status_id,
        created_at: now,
        updated_at: now,
    });
    Ok(id)
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn record_sale(
        &self,
        customer: NewCustomer,
        transaction: NewTransaction,
        line: OrderLine,
    ) -> Result<SaleIds, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().unwrap();
        let mut t = tables.clone();
        let transaction_id = insert_transaction(&mut t, transaction)?;

        let now = Utc::now();
        let customer_id = t.id();
        t.customers.push(Customer {
            id: customer_id,
            first_name: customer.first_name,
            last_name: customer.last_name,
            email: customer.email,
            created_at: now,
            updated_at: now,
        });
        if self.failure() == WriteFailure::OrderInsert {
            return Err(broken());
        }
        let order_id = t.id();
        t.orders.push(Order {
            id: order_id,
            widget_id: line.widget_id,
            transaction_id,
            customer_id,
            status_id: line.status.id(),
            quantity: line.quantity,
            amount: line.amount,
            created_at: now,
            updated_at: now,
        });
        *tables = t;
        Ok(SaleIds {
            customer_id,
            transaction_id,
            order_id,
        })
    }

    async fn record_transaction(&self, transaction: NewTransaction) -> Result<i32, StoreError> {
        self.check_writable()?;
        let mut t = self.tables.lock().unwrap();
        insert_transaction(&mut t, transaction)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn replace_token(&self, row: NewTokenRow) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        t.tokens.retain(|existing| existing.user_id != row.user_id);
        t.tokens.push(row);
        Ok(())
    }

    async fn user_for_token(
        &self,
        token_hash: Vec<u8>,
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let t = self.tables.lock().unwrap();
        let owner = t
            .tokens
            .iter()
            .find(|row| row.token_hash == token_hash && row.scope == scope && row.expiry > now)
            .map(|row| row.user_id);
        Ok(owner.and_then(|id| {
            t.users
                .iter()
                .find(|(user, _)| user.id == id)
                .map(|(user, _)| user.clone())
        }))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn credentials_by_email(
        &self,
        email: String,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let email = email.to_lowercase();
        let t = self.tables.lock().unwrap();
        Ok(t
            .users
            .iter()
            .find(|(user, _)| user.email == email)
            .map(|(user, hash)| UserCredentials {
                id: user.id,
                password_hash: hash.clone(),
            }))
    }

    async fn user_by_email(&self, email: String) -> Result<Option<User>, StoreError> {
        let email = email.to_lowercase();
        let t = self.tables.lock().unwrap();
        Ok(t
            .users
            .iter()
            .find(|(user, _)| user.email == email)
            .map(|(user, _)| user.clone()))
    }

    async fn user(&self, id: i32) -> Result<Option<User>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(t
            .users
            .iter()
            .find(|(user, _)| user.id == id)
            .map(|(user, _)| user.clone()))
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.iter().map(|(user, _)| user.clone()).collect())
    }

    async fn add_user(&self, user: NewUser) -> Result<i32, StoreError> {
        let email = user.email.to_lowercase();
        let mut t = self.tables.lock().unwrap();
        if t.users.iter().any(|(existing, _)| existing.email == email) {
            return Err(StoreError::DuplicateEmail(email));
        }
        let id = t.id();
        let now = Utc::now();
        t.users.push((
            User {
                id,
                first_name: user.first_name,
                last_name: user.last_name,
                email,
                created_at: now,
                updated_at: now,
            },
            user.password,
        ));
        Ok(id)
    }

    async fn edit_user(
        &self,
        id: i32,
        changes: UserChanges,
        password_hash: Option<String>,
    ) -> Result<bool, StoreError> {
        let email = changes.email.to_lowercase();
        let mut t = self.tables.lock().unwrap();
        if t
            .users
            .iter()
            .any(|(existing, _)| existing.email == email && existing.id != id)
        {
            return Err(StoreError::DuplicateEmail(email));
        }
        let Some((user, hash)) = t.users.iter_mut().find(|(user, _)| user.id == id) else {
            return Ok(false);
        };
        user.first_name = changes.first_name;
        user.last_name = changes.last_name;
        user.email = email;
        user.updated_at = Utc::now();
        if let Some(password_hash) = password_hash {
            *hash = password_hash;
            t.tokens.retain(|row| row.user_id != id);
        }
        Ok(true)
    }

    async fn update_password(&self, id: i32, password_hash: String) -> Result<(), StoreError> {
        let mut t = self.tables.lock().unwrap();
        if let Some((_, hash)) = t.users.iter_mut().find(|(user, _)| user.id == id) {
            *hash = password_hash;
        }
        t.tokens.retain(|row| row.user_id != id);
        Ok(())
    }

    async fn delete_user(&self, id: i32) -> Result<bool, StoreError> {
        let mut t = self.tables.lock().unwrap();
        let before = t.users.len();
        t.users.retain(|(user, _)| user.id != id);
        if t.users.len() == before {
            return Ok(false);
        }
        t.tokens.retain(|row| row.user_id != id);
        Ok(true)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn widget(&self, id: i32) -> Result<Option<Widget>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(t.widgets.iter().find(|w| w.id == id).cloned())
    }

    async fn orders_page(
        &self,
        recurring: bool,
        page_size: i64,
        page: i64,
    ) -> Result<OrderPage, StoreError> {
        let t = self.tables.lock().unwrap();
        let mut matching: Vec<OrderDetail> = t
            .orders
            .iter()
            .filter_map(|order| MemoryStore::detail(&t, order))
            .filter(|detail| {
                t.widgets
                    .iter()
                    .any(|w| w.id == detail.widget.id && w.is_recurring == recurring)
            })
            .collect();
        matching.sort_by(|a, b| b.order.id.cmp(&a.order.id));

        let total_records = matching.len() as i64;
        let orders = matching
            .into_iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .collect();
        Ok(OrderPage {
            orders,
            current_page: page,
            page_size,
            last_page: last_page(total_records, page_size),
            total_records,
        })
    }

    async fn order(&self, id: i32) -> Result<Option<OrderDetail>, StoreError> {
        let t = self.tables.lock().unwrap();
        Ok(t
            .orders
            .iter()
            .find(|order| order.id == id)
            .and_then(|order| MemoryStore::detail(&t, order)))
    }
}

/// Gateway answering from fixed tables; unknown ids are not found.
#[derive(Default)]
pub struct FakeGateway {
    pub intents: HashMap<String, PaymentIntentState>,
    pub methods: HashMap<String, PaymentMethodState>,
}

impl FakeGateway {
    /// Knows intent `pi_123` (5000 usd, charge `ch_789`) and card `pm_456`
    /// ending 4242, expiring 12/2030.
    pub fn with_scenario() -> Self {
        let mut gateway = FakeGateway::default();
        gateway.add_intent("pi_123", 5000, "ch_789");
        gateway.methods.insert(
            "pm_456".to_string(),
            PaymentMethodState {
                id: "pm_456".to_string(),
                last_four: "4242".to_string(),
                expiry_month: 12,
                expiry_year: 2030,
            },
        );
        gateway
    }

    /// An intent the buyer abandoned or the card issuer declined.
    pub fn add_unsettled_intent(&mut self, id: &str, amount: i64) {
        self.add_intent(id, amount, "");
        if let Some(intent) = self.intents.get_mut(id) {
            intent.succeeded = false;
        }
    }

    pub fn add_intent(&mut self, id: &str, amount: i64, charge: &str) {
        self.intents.insert(
            id.to_string(),
            PaymentIntentState {
                id: id.to_string(),
                return_code: charge.to_string(),
                amount,
                currency: "usd".to_string(),
                succeeded: true,
            },
        );
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn payment_intent(&self, intent_id: &str) -> Result<PaymentIntentState, GatewayError> {
        self.intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                kind: "payment intent",
                id: intent_id.to_string(),
            })
    }

    async fn payment_method(&self, method_id: &str) -> Result<PaymentMethodState, GatewayError> {
        self.methods
            .get(method_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                kind: "payment method",
                id: method_id.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: HashMap<String, String>,
}

/// Layer recording every event with its fields rendered as text.
#[derive(Clone, Default)]
pub struct CapturedEvents(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedEvents {
    /// Captures events on the current thread until the guard is dropped.
    pub fn install() -> (Self, DefaultGuard) {
        let events = CapturedEvents::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        (events, tracing::subscriber::set_default(subscriber))
    }

    pub fn at(&self, level: Level) -> Vec<CapturedEvent> {
        let events = self.0.lock().unwrap();
        events.iter().filter(|e| e.level == level).cloned().collect()
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields,
        });
    }
}

/// Collects reset links instead of mailing them.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_password_reset(&self, to: &str, link: &str) -> Result<(), AppError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), link.to_string()));
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        env: "test".to_string(),
        database_url: "postgres://unused".to_string(),
        db_max_connections: 1,
        stripe_keys: StripeKeys {
            publishable_key: "pk_test_checkout".to_string(),
            secret_key: "sk_test_checkout".to_string(),
        },
        secret_key: "integration-test-secret".to_string(),
        frontend_url: "http://localhost:4000".to_string(),
        call_timeout: Duration::from_secs(3),
        token_ttl: chrono::Duration::hours(24),
        reset_link_ttl: chrono::Duration::minutes(60),
        receipt_ttl: Duration::from_secs(60),
        bcrypt_cost: 4,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
    pub admin_id: i32,
}

impl TestApp {
    /// State backed by the in-memory store with one seeded administrator.
    pub async fn new(gateway: FakeGateway) -> Self {
        let config = test_config();
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let credentials = Credentials::new(config.bcrypt_cost).unwrap();
        let (notifications, _dispatcher) = NotificationHub::start();

        let hash = credentials
            .hash_password(ADMIN_PASSWORD.to_string())
            .await
            .unwrap();
        let admin_id = store
            .add_user(NewUser {
                first_name: "Admin".to_string(),
                last_name: "User".to_string(),
                email: ADMIN_EMAIL.to_string(),
                password: hash,
            })
            .await
            .unwrap();

        let receipts = ReceiptStore::new(config.receipt_ttl);
        let state = AppState {
            link_signer: LinkSigner::new(&config.secret_key).unwrap(),
            config: Arc::new(config),
            repository: store.clone(),
            gateway: Arc::new(gateway),
            credentials,
            mailer: mailer.clone(),
            receipts,
            notifications,
        };

        TestApp {
            state,
            store,
            mailer,
            admin_id,
        }
    }

    pub fn router(&self) -> Router {
        widget_checkout::app(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }

    /// Logs in as the seeded administrator and returns the bearer token.
    pub async fn login(&self) -> String {
        let (status, _, body) = self
            .send(json_request(
                "POST",
                "/api/authenticate",
                &serde_json::json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["authentication_token"]["token"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn form_request(uri: &str, fields: &[(&str, &str)], cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(serde_urlencoded::to_string(fields).unwrap()))
        .unwrap()
}

pub fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

/// `name=value` of the session cookie set on a response.
pub fn session_cookie(headers: &axum::http::HeaderMap) -> String {
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

pub fn checkout_form<'a>(
    intent: &'a str,
    method: &'a str,
    product_id: &'a str,
) -> Vec<(&'a str, &'a str)> {
    vec![
        ("first_name", "Ada"),
        ("last_name", "Lovelace"),
        ("cardholder_name", "Ada Lovelace"),
        ("cardholder_email", "ada@example.com"),
        ("payment_intent", intent),
        ("payment_method", method),
        ("payment_amount", "5000"),
        ("payment_currency", "usd"),
        ("product_id", product_id),
    ]
}
