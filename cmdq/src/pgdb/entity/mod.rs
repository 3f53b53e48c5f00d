//! SeaORM 实体模块
//! SeaORM entity module
//!
//! 定义了与 PostgresSQL 表对应的实体模型
//! Defines entity models corresponding to PostgresSQL tables

pub mod commands;

pub use commands::Entity as Commands;
