//! 配置模块
//! Configuration module
//!
//! 定义了命令执行器的配置选项
//! Defines configuration options for the command executor

use std::str::FromStr;
use std::time::Duration;

use crate::base::constants::{
  DEFAULT_COMMAND_DELAY, DEFAULT_COMMAND_REPEAT_INTERVAL, DEFAULT_PARALLELISM,
  DEFAULT_SHUTDOWN_TIMEOUT, MAX_COMMAND_DELAY, PERMANENT_COMMANDS,
};
use crate::error::{Error, Result};

/// 执行器配置
/// Executor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
  /// 并发工作者数量
  /// Number of concurrent workers
  pub parallelism: usize,
  /// 单个定时器的最大延迟，更长的延迟会被分段
  /// Longest single timer; longer delays are chunked
  pub max_timer_delay: Duration,
  /// 未设置 period 时的重复间隔
  /// Repeat interval for commands without a period
  pub default_repeat_interval: Duration,
  /// 永久命令的初始延迟
  /// Initial delay of permanent commands
  pub default_command_delay: Duration,
  /// 永久命令名称
  /// Permanent command names
  pub permanent_commands: Vec<String>,
  /// 是否记录每个命令的生命周期事件
  /// Whether to log every command lifecycle event
  pub verbose_logging: bool,
  /// 调度器故障时是否退出进程
  /// Whether a scheduler fault exits the process
  pub exit_on_fault: bool,
  /// 关闭超时时间
  /// Shutdown timeout
  pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      parallelism: DEFAULT_PARALLELISM,
      max_timer_delay: MAX_COMMAND_DELAY,
      default_repeat_interval: DEFAULT_COMMAND_REPEAT_INTERVAL,
      default_command_delay: DEFAULT_COMMAND_DELAY,
      permanent_commands: PERMANENT_COMMANDS.iter().map(|s| s.to_string()).collect(),
      verbose_logging: false,
      exit_on_fault: true,
      shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
    }
  }
}

impl ExecutorConfig {
  /// 创建新的执行器配置
  /// Create a new executor configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// 设置并发数
  /// Set the number of concurrent workers
  pub fn parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  /// 设置单个定时器的最大延迟
  /// Set the longest single timer
  pub fn max_timer_delay(mut self, delay: Duration) -> Self {
    self.max_timer_delay = delay;
    self
  }

  /// 设置默认重复间隔
  /// Set the default repeat interval
  pub fn default_repeat_interval(mut self, interval: Duration) -> Self {
    self.default_repeat_interval = interval;
    self
  }

  /// 设置永久命令的初始延迟
  /// Set the initial delay of permanent commands
  pub fn default_command_delay(mut self, delay: Duration) -> Self {
    self.default_command_delay = delay;
    self
  }

  /// 设置永久命令名称
  /// Set the permanent command names
  pub fn permanent_commands<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.permanent_commands = names.into_iter().map(Into::into).collect();
    self
  }

  pub fn verbose_logging(mut self, enabled: bool) -> Self {
    self.verbose_logging = enabled;
    self
  }

  pub fn exit_on_fault(mut self, exit: bool) -> Self {
    self.exit_on_fault = exit;
    self
  }

  /// 设置关闭超时时间
  /// Set the shutdown timeout
  pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
    self.shutdown_timeout = timeout;
    self
  }

  /// 从环境变量加载配置
  /// Load the configuration from environment variables
  ///
  /// - `CMDQ_PARALLELISM`
  /// - `CMDQ_MAX_TIMER_DELAY_MS`
  /// - `CMDQ_DEFAULT_REPEAT_INTERVAL_MS`
  /// - `CMDQ_DEFAULT_COMMAND_DELAY_MS`
  /// - `CMDQ_PERMANENT_COMMANDS` (comma separated)
  /// - `CMDQ_VERBOSE_LOGGING`
  /// - `CMDQ_EXIT_ON_FAULT`
  /// - `CMDQ_SHUTDOWN_TIMEOUT_MS`
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// 使用自定义查找函数加载配置
  /// Load the configuration through a custom lookup function
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();
    if let Some(v) = parse_var::<usize, _>(&lookup, "CMDQ_PARALLELISM")? {
      config = config.parallelism(v);
    }
    if let Some(v) = parse_var::<u64, _>(&lookup, "CMDQ_MAX_TIMER_DELAY_MS")? {
      config.max_timer_delay = Duration::from_millis(v);
    }
    if let Some(v) = parse_var::<u64, _>(&lookup, "CMDQ_DEFAULT_REPEAT_INTERVAL_MS")? {
      config.default_repeat_interval = Duration::from_millis(v);
    }
    if let Some(v) = parse_var::<u64, _>(&lookup, "CMDQ_DEFAULT_COMMAND_DELAY_MS")? {
      config.default_command_delay = Duration::from_millis(v);
    }
    if let Some(v) = lookup("CMDQ_PERMANENT_COMMANDS") {
      config.permanent_commands = v
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    }
    if let Some(v) = parse_var::<bool, _>(&lookup, "CMDQ_VERBOSE_LOGGING")? {
      config.verbose_logging = v;
    }
    if let Some(v) = parse_var::<bool, _>(&lookup, "CMDQ_EXIT_ON_FAULT")? {
      config.exit_on_fault = v;
    }
    if let Some(v) = parse_var::<u64, _>(&lookup, "CMDQ_SHUTDOWN_TIMEOUT_MS")? {
      config.shutdown_timeout = Duration::from_millis(v);
    }
    config.validate()?;
    Ok(config)
  }

  /// 验证配置
  /// Validate the configuration
  pub fn validate(&self) -> Result<()> {
    if self.parallelism == 0 {
      return Err(Error::config("Parallelism must be greater than 0"));
    }

    if self.max_timer_delay.is_zero() {
      return Err(Error::config("Max timer delay must be greater than 0"));
    }

    if self.default_repeat_interval.is_zero() {
      return Err(Error::config(
        "Default repeat interval must be greater than 0",
      ));
    }

    if self.permanent_commands.iter().any(|n| n.trim().is_empty()) {
      return Err(Error::config("Permanent command names cannot be empty"));
    }

    Ok(())
  }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
  T: FromStr,
  T::Err: std::fmt::Display,
  F: Fn(&str) -> Option<String>,
{
  match lookup(key) {
    None => Ok(None),
    Some(raw) => raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|e| Error::config(format!("{key}={raw}: {e}"))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn test_default_config() {
    let config = ExecutorConfig::default();
    assert_eq!(config.parallelism, 4);
    assert_eq!(config.max_timer_delay, Duration::from_secs(10 * 24 * 60 * 60));
    assert_eq!(config.default_repeat_interval, Duration::from_secs(5));
    assert_eq!(
      config.permanent_commands,
      vec!["commandsCleanerCommand", "operationIdCleanerCommand"]
    );
    assert!(config.exit_on_fault);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_builder() {
    let config = ExecutorConfig::new()
      .parallelism(0)
      .max_timer_delay(Duration::from_millis(100))
      .permanent_commands(["a", "b"])
      .exit_on_fault(false);
    assert_eq!(config.parallelism, 1);
    assert_eq!(config.max_timer_delay, Duration::from_millis(100));
    assert_eq!(config.permanent_commands.len(), 2);
    assert!(!config.exit_on_fault);
  }

  #[test]
  fn test_validate_rejects_zero_timer() {
    let config = ExecutorConfig::new().max_timer_delay(Duration::ZERO);
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_from_lookup() {
    let vars: HashMap<&str, &str> = [
      ("CMDQ_PARALLELISM", "8"),
      ("CMDQ_DEFAULT_REPEAT_INTERVAL_MS", "250"),
      ("CMDQ_PERMANENT_COMMANDS", "commandsCleanerCommand, blockchainEventListenerCommand,"),
      ("CMDQ_EXIT_ON_FAULT", "false"),
    ]
    .into_iter()
    .collect();
    let config = ExecutorConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
    assert_eq!(config.parallelism, 8);
    assert_eq!(config.default_repeat_interval, Duration::from_millis(250));
    assert_eq!(
      config.permanent_commands,
      vec!["commandsCleanerCommand", "blockchainEventListenerCommand"]
    );
    assert!(!config.exit_on_fault);

    let err = ExecutorConfig::from_lookup(|k| {
      (k == "CMDQ_PARALLELISM").then(|| "many".to_string())
    })
    .unwrap_err();
    assert!(err.to_string().contains("CMDQ_PARALLELISM"));
  }
}
