use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::RunQueryDsl;
use tracing::{error, info};

use crate::config::Config;

pub mod models;
mod queries;
pub mod schema;
pub mod store;

pub use store::{AccountStore, CatalogStore, Repository, SettlementStore, StoreError, TokenStore};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Gives every pooled connection the same deadline the rest of the system
/// uses, so a stuck statement fails instead of hanging its caller.
#[derive(Debug)]
struct StatementTimeout(Duration);

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query(format!("SET statement_timeout = {}", self.0.as_millis()))
            .execute(conn)
            .map(|_| ())
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn create_db_pool(config: &Config) -> Result<PgPool, StoreError> {
    info!("Connecting to database");

    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .max_size(config.db_max_connections)
        .connection_timeout(config.call_timeout)
        .connection_customizer(Box::new(StatementTimeout(config.call_timeout)))
        .build(manager)
        .map_err(|e| {
            error!("Failed to create database connection pool: {}", e);
            StoreError::Pool(e)
        })?;

    // Verify connection works
    let _conn = get_conn(&pool)?;

    info!("Successfully connected to database");
    Ok(pool)
}

pub fn get_conn(pool: &PgPool) -> Result<PgPooledConnection, StoreError> {
    pool.get().map_err(|e| {
        error!("Failed to get database connection from pool: {}", e);
        StoreError::Pool(e)
    })
}

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct DatabaseClient {
    pub pool: PgPool,
}

impl DatabaseClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs a synchronous diesel call on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            f(&mut conn)
        })
        .await?
    }
}
