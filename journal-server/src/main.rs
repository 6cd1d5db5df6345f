use std::sync::Arc;

use clap::Parser;
use journal_core::{
    ChatService, ChatSessionTracker, JournalConfig, JournalService, PgEntryStore,
    WebhookGatewayClient,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use journal_server::health::CheckOutcome;
use journal_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "journal.toml")]
    config: String,

    /// Check database connectivity and schema, then exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Configuration problems are fatal before anything touches the network.
    let config = match JournalConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let pool = match journal_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if config.database.run_migrations {
        journal_core::db::run_migrations(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    if args.health {
        let connected = match journal_core::db::health_check(&pool).await {
            Ok(v) => CheckOutcome::Passed(format!("PostgreSQL connected: {}", v)),
            Err(e) => CheckOutcome::Failed(format!("PostgreSQL connection failed: {}", e)),
        };
        if connected.report() {
            std::process::exit(1);
        }

        let schema = match journal_core::db::missing_tables(&pool).await {
            Ok(missing) if missing.is_empty() => {
                CheckOutcome::Passed("Journal tables present".to_string())
            }
            Ok(missing) => CheckOutcome::Failed(format!("Missing tables: {}", missing.join(", "))),
            Err(e) => CheckOutcome::Failed(format!("Schema check failed: {}", e)),
        };
        if schema.report() {
            std::process::exit(1);
        }

        CheckOutcome::Passed("Journal DB health check passed".to_string()).report();
        return Ok(());
    }

    let gateway = Arc::new(WebhookGatewayClient::new(&config.gateway)?);
    tracing::info!(
        max_retries = gateway.retry_policy().max_retries,
        timeout_seconds = config.gateway.timeout_seconds,
        "Webhook gateway configured"
    );

    let journal = JournalService::new(Arc::new(PgEntryStore::new(pool)), gateway.clone());
    let chat = ChatService::new(Arc::new(ChatSessionTracker::new()), gateway);
    let state = Arc::new(HttpState {
        journal,
        chat,
        config,
    });

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, tx.subscribe()).await
}
