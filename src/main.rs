use std::sync::Arc;

use lambda_http::run;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use widget_checkout::auth::{Credentials, LinkSigner};
use widget_checkout::config::Config;
use widget_checkout::database::{create_db_pool, DatabaseClient};
use widget_checkout::gateway::StripeGateway;
use widget_checkout::mailer::LogMailer;
use widget_checkout::notifications::NotificationHub;
use widget_checkout::receipt::ReceiptStore;
use widget_checkout::{app, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let stdout_layer = fmt::layer()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_writer(std::io::stdout);
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .init();

    info!("Starting checkout service");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return Err(e.into());
        }
    };

    // Initialize database connection
    let database_client = match create_db_pool(&config) {
        Ok(pool) => {
            info!("Database connection pool created successfully");
            DatabaseClient::new(pool)
        }
        Err(e) => {
            error!("Failed to create database connection pool: {}", e);
            return Err(e.into());
        }
    };

    let credentials = Credentials::new(config.bcrypt_cost)?;
    let link_signer = LinkSigner::new(&config.secret_key)
        .map_err(|e| format!("SECRET_KEY cannot be used as a signing key: {e}"))?;
    let gateway = StripeGateway::new(&config.stripe_keys, config.call_timeout);
    let (notifications, _dispatcher) = NotificationHub::start();

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        repository: Arc::new(database_client),
        gateway: Arc::new(gateway),
        credentials,
        link_signer,
        mailer: Arc::new(LogMailer),
        receipts: ReceiptStore::new(config.receipt_ttl),
        notifications,
    };
    let app = app(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        match run(app).await {
            Ok(()) => info!("Lambda executed successfully"),
            Err(e) => error!("Lambda execution error: {e}"),
        }
        return Ok(());
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
