//! PostgresSQL 存储模块
//! PostgresSQL store module
//!
//! 基于 SeaORM 的命令存储
//! Command store backed by SeaORM

pub mod entity;
pub mod postgres_store;

pub use entity::*;
pub use postgres_store::{PostgresCommandStore, PostgresTransaction};
