//! # cmdq
//!
//! Durable command scheduler
//!
//! cmdq 将工作流拆分为可独立调度的命令，持久化其生命周期，并在进程重启后重放未完成的命令。
//! cmdq splits workflows into independently schedulable commands, persists their lifecycle and replays unfinished ones after a restart.
//!
//! ## 特性
//! ## Features
//!
//! - 有界并发的工作池
//!   - Bounded-concurrency worker pool
//! - 任意长度的延迟，超过定时器上限时分段等待
//!   - Arbitrarily long delays, chunked past the timer limit
//! - 重试预算、周期性重复与耗尽后的恢复
//!   - Retry budget, periodic repeat and recovery once exhausted
//! - 事务性命令：子命令与状态更新原子写入
//!   - Transactional commands: children and status written atomically
//! - 工作流序列，逐个弹出下一步
//!   - Workflow sequences popped one step at a time
//! - 内存存储与 PostgresSQL 存储（`postgres` 特性）
//!   - In-memory store and PostgresSQL store (`postgres` feature)
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use cmdq::command::{Command, Outcome};
//! use cmdq::config::ExecutorConfig;
//! use cmdq::error::Result;
//! use cmdq::executor::CommandExecutor;
//! use cmdq::handler::{CommandContext, CommandHandler};
//! use cmdq::memdb::MemoryCommandStore;
//! use cmdq::resolver::CommandResolver;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct PublishCommand;
//!
//! #[async_trait]
//! impl CommandHandler for PublishCommand {
//!   fn defaults(&self) -> Command {
//!     Command::new("publishCommand").with_retries(3)
//!   }
//!
//!   async fn execute(&self, command: &mut Command, ctx: &CommandContext<'_>) -> Result<Outcome> {
//!     let sequence = command.sequence.clone();
//!     ctx.continue_sequence(command.data.clone(), Some(&sequence), None)
//!   }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let mut resolver = CommandResolver::new();
//!   resolver.register(Arc::new(PublishCommand));
//!
//!   let executor = CommandExecutor::new(
//!     ExecutorConfig::default(),
//!     Arc::new(MemoryCommandStore::new()),
//!     Arc::new(resolver),
//!   )?;
//!   executor.start()?;
//!   executor
//!     .add(Command::new("publishCommand"), Duration::ZERO, true)
//!     .await?;
//!   executor.shutdown().await;
//!   Ok(())
//! }
//! ```

pub mod base;
pub mod command;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod memdb;
pub mod operation;
#[cfg(feature = "postgres")]
pub mod pgdb;
pub mod resolver;

pub use command::{Command, CommandStatus, Outcome, Sequence};
pub use error::{Error, Result};
pub use executor::CommandExecutor;
pub use handler::{CommandContext, CommandHandler};
