//! cmdq node binary
//!
//! Hosts the command executor: seeds permanent commands, replays unfinished ones and runs until Ctrl-C.

use cmdq::base::CommandStore;
use cmdq::commands::{CommandsCleanerCommand, OperationIdCleanerCommand};
use cmdq::config::ExecutorConfig;
use cmdq::executor::CommandExecutor;
use cmdq::memdb::MemoryCommandStore;
use cmdq::operation::MemoryOperationTracker;
use cmdq::resolver::CommandResolver;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialize logging
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(
      EnvFilter::from_default_env()
        .add_directive("cmdq=info".parse()?)
        .add_directive("cmdq_node=info".parse()?),
    )
    .init();

  let config = ExecutorConfig::from_env()?;
  info!(
    "Starting cmdq-node {} with parallelism {}",
    cmdq::base::constants::VERSION,
    config.parallelism
  );

  let store = open_store().await?;

  let mut resolver = CommandResolver::new();
  resolver.register(Arc::new(CommandsCleanerCommand::new()));
  resolver.register(Arc::new(OperationIdCleanerCommand::new()));
  info!("Registered commands: {:?}", resolver.names());

  let executor = CommandExecutor::new(config, store, Arc::new(resolver))?;
  executor.set_operation_tracker(Arc::new(MemoryOperationTracker::new()))?;
  executor.add_default_commands().await?;
  executor.replay_old_commands().await?;
  executor.start()?;

  tokio::signal::ctrl_c().await?;
  info!("Received Ctrl-C, shutting down");
  executor.shutdown().await;

  Ok(())
}

/// 有数据库地址且启用 postgres 特性时使用 PostgresSQL，否则使用内存存储
/// PostgresSQL when a database URL is set and the postgres feature is on, in-memory otherwise
async fn open_store() -> anyhow::Result<Arc<dyn CommandStore>> {
  match std::env::var("CMDQ_DATABASE_URL") {
    #[cfg(feature = "postgres")]
    Ok(url) => {
      info!("Using PostgresSQL command store");
      Ok(Arc::new(cmdq::pgdb::PostgresCommandStore::new(&url).await?))
    }
    #[cfg(not(feature = "postgres"))]
    Ok(_) => {
      tracing::warn!("CMDQ_DATABASE_URL is set but the postgres feature is disabled, using the in-memory store");
      Ok(Arc::new(MemoryCommandStore::new()))
    }
    Err(_) => {
      info!("Using in-memory command store");
      Ok(Arc::new(MemoryCommandStore::new()))
    }
  }
}
