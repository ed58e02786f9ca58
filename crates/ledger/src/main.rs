mod cli;
mod server;

use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr;

use ledger_core::kv::{InMemoryKeyValueStore, KeyValueStore};
use ledger_core::store::{AtomicScope, BlockStore, UnspentOutputIndex};
use ledger_core::{seed_genesis, Genesis, Ledger, MemoryLedger, SqliteLedger};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let genesis = Genesis {
        address: args.genesis_address.clone(),
        amount: args.genesis_amount,
    };
    // The rollback lock lives in process memory, so one service instance
    // owns a ledger at a time.
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());

    let ledger = match &args.database {
        Some(path) => {
            let store = SqliteLedger::open(path)
                .with_context(|| format!("open ledger database {}", path.display()))?;
            if args.reset {
                store.reset().context("reset ledger tables")?;
                tracing::warn!(path = %path.display(), "ledger tables dropped by --reset");
            }
            tracing::info!(path = %path.display(), "using sqlite ledger");
            open_ledger(Arc::new(store), &genesis, kv).await?
        }
        None => {
            if args.reset {
                tracing::warn!("--reset has no effect without --database");
            }
            tracing::info!("using in-memory ledger; state is lost on exit");
            open_ledger(Arc::new(MemoryLedger::new()), &genesis, kv).await?
        }
    };

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let router = server::build_router(server::AppState {
        ledger: Arc::new(ledger),
    });

    if args.bind == "0.0.0.0" {
        tracing::warn!("server is bound to 0.0.0.0 and accessible from the network");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("bind TCP listener")?;

    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("run HTTP server")?;

    Ok(())
}

/// Seed genesis if the store is empty and wrap it in a [`Ledger`].
async fn open_ledger<S>(
    store: Arc<S>,
    genesis: &Genesis,
    kv: Arc<dyn KeyValueStore>,
) -> eyre::Result<Ledger>
where
    S: BlockStore + UnspentOutputIndex + AtomicScope + 'static,
{
    seed_genesis(&*store, genesis)
        .await
        .context("seed genesis block")?;

    let ledger = Ledger::new(store, kv);
    let height = ledger
        .current_height()
        .await
        .context("read ledger height")?;
    tracing::info!(height = %height, "ledger ready");
    Ok(ledger)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
