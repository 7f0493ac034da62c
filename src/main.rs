use sequencer::{
    api::Server,
    config::{Config, LedgerBackend},
    feed::BlockFeed,
    ledger::{Ledger, MemoryLedger, SqliteLedger},
    BatchCoordinator,
};
use std::sync::Arc;
use tracing::{error, info};

/// The main entry point for the sequencer application.
///
/// Initializes logging, loads the configuration, opens the ledger, starts a
/// block observer and the API server, and exits with an error if the batch
/// coordinator halts.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.toml".to_string());
    let config = Config::load(&path)?;
    info!("Sequencer starting with config: {:?}", config);

    let ledger: Arc<dyn Ledger> = match config.ledger.backend {
        LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
        LedgerBackend::Sqlite => {
            let url = config.ledger.url.as_deref().unwrap_or_default();
            Arc::new(SqliteLedger::connect(url).await?)
        }
    };

    let feed = Arc::new(BlockFeed::new());
    let coordinator = BatchCoordinator::new(ledger, feed.clone(), config.batch.clone());

    // Observer that logs every committed block
    let mut reader = feed.new_reader();
    tokio::spawn(async move {
        while let Some(block) = reader.recv().await {
            info!(
                height = block.height(),
                id = ?block.id(),
                txs = block.transactions.len(),
                "observed committed block"
            );
        }
    });

    let server = Server::new(config.api.clone(), coordinator.clone());
    tokio::select! {
        result = server.start() => result,
        reason = coordinator.halted() => {
            error!("Batch coordinator halted: {}", reason);
            anyhow::bail!("sequencer halted: {reason}")
        }
    }
}
