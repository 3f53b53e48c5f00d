//! 命令解析器
//! Command resolver
//!
//! 将命令名称映射到处理器实例的显式注册表
//! Explicit registry mapping a command name to its handler instance
//!
//! ## Examples / 示例
//!
//! ```rust,no_run
//! use cmdq::commands::CommandsCleanerCommand;
//! use cmdq::resolver::CommandResolver;
//! use std::sync::Arc;
//!
//! let mut resolver = CommandResolver::new();
//! resolver.register(Arc::new(CommandsCleanerCommand::new()));
//! assert!(resolver.resolve("commandsCleanerCommand").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handler::CommandHandler;

/// 命令解析器
/// Command resolver
#[derive(Default, Clone)]
pub struct CommandResolver {
  handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandResolver {
  /// 创建新的解析器
  /// Create a new resolver
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册处理器，名称取自其默认命令；同名处理器会被替换
  /// Register a handler under the name of its default command; a handler with the same name is replaced
  pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> &mut Self {
    let name = handler.defaults().name;
    self.handlers.insert(name, handler);
    self
  }

  /// 以指定名称注册处理器
  /// Register a handler under an explicit name
  pub fn register_as<S: Into<String>>(
    &mut self,
    name: S,
    handler: Arc<dyn CommandHandler>,
  ) -> &mut Self {
    self.handlers.insert(name.into(), handler);
    self
  }

  /// 解析处理器
  /// Resolve a handler
  pub fn resolve(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
    self.handlers.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.handlers.contains_key(name)
  }

  /// 已注册的名称
  /// Registered names
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.handlers.keys().cloned().collect();
    names.sort();
    names
  }

  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }
}

impl fmt::Debug for CommandResolver {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CommandResolver")
      .field("handlers", &self.names())
      .finish()
  }
}
