//! 内置命令
//! Built-in commands

pub mod cleaner;
pub mod operation_cleaner;

pub use cleaner::{CleanerData, CommandsCleanerCommand};
pub use operation_cleaner::OperationIdCleanerCommand;
