//! 内存存储模块
//! Memory store module
//!
//! 定义了基于内存的命令存储，不依赖任何外部服务
//! Defines the in-memory command store without any external service dependencies

pub mod memory_store;
mod store;

pub use memory_store::{MemoryCommandStore, MemoryTransaction};
