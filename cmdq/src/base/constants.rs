use std::time::Duration;

/// 单个定时器可表示的最大延迟（10 天）
pub const MAX_COMMAND_DELAY: Duration = Duration::from_secs(14_400 * 60);

/// 默认重复间隔
pub const DEFAULT_COMMAND_REPEAT_INTERVAL: Duration = Duration::from_millis(5_000);
/// 永久命令的默认延迟
pub const DEFAULT_COMMAND_DELAY: Duration = Duration::from_secs(60);

/// 默认并行度
pub const DEFAULT_PARALLELISM: usize = 4;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(8);

/// 已完成命令的保留时间
pub const FINALIZED_COMMAND_CLEANUP_TIME: Duration = Duration::from_secs(24 * 60 * 60);
pub const FINALIZED_COMMAND_CLEANUP_BATCH: usize = 1000;

/// 操作 ID 的保留时间
pub const OPERATION_IDS_CLEANUP_TIME: Duration = Duration::from_secs(24 * 60 * 60);
pub const OPERATION_IDS_CLEANUP_BATCH: usize = 1000;

pub const COMMANDS_CLEANER_COMMAND: &str = "commandsCleanerCommand";
pub const OPERATION_ID_CLEANER_COMMAND: &str = "operationIdCleanerCommand";
/// 永久命令集合
pub const PERMANENT_COMMANDS: &[&str] = &[
  COMMANDS_CLEANER_COMMAND,
  OPERATION_ID_CLEANER_COMMAND,
];

/// 版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
