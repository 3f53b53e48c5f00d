//! PostgresSQL 命令存储实现
//! PostgresSQL command store implementation
//!
//! 使用 SeaORM 实现基于 PostgresSQL 的命令持久化
//! Implements command persistence on PostgresSQL using SeaORM

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
  ColumnTrait, Condition, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
  DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
  TransactionTrait,
};
use std::any::Any;
use uuid::Uuid;

use crate::base::{CommandStore, StoreTransaction};
use crate::command::{Command, CommandStatus, CommandUpdate};
use crate::error::{Error, Result};
use crate::pgdb::entity::{commands, Commands};

/// PostgresSQL 事务
/// PostgresSQL transaction
pub struct PostgresTransaction {
  id: String,
  txn: DatabaseTransaction,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
  fn id(&self) -> &str {
    &self.id
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  async fn commit(self: Box<Self>) -> Result<()> {
    let PostgresTransaction { id, txn } = *self;
    txn
      .commit()
      .await
      .map_err(|e| Error::transaction(format!("commit {id} failed: {e}")))
  }

  async fn rollback(self: Box<Self>) -> Result<()> {
    self.txn.rollback().await?;
    Ok(())
  }
}

/// PostgresSQL 命令存储
/// PostgresSQL command store
pub struct PostgresCommandStore {
  db: DatabaseConnection,
}

impl PostgresCommandStore {
  /// 从连接字符串创建新的存储实例并初始化表结构
  /// Create a new store from a connection string and initialize the schema
  pub async fn new(database_url: &str) -> Result<Self> {
    let opt = ConnectOptions::new(database_url)
      .max_connections(10)
      .sqlx_logging(false)
      .to_owned();
    let db = Database::connect(opt).await?;
    let store = Self { db };
    store.init_schema().await?;
    Ok(store)
  }

  /// 从现有数据库连接创建存储实例
  /// Create a store instance from an existing database connection
  pub fn from_connection(db: DatabaseConnection) -> Self {
    Self { db }
  }

  pub fn db(&self) -> &DatabaseConnection {
    &self.db
  }

  /// 初始化数据库表结构
  /// Initialize the database schema
  pub async fn init_schema(&self) -> Result<()> {
    let backend = self.db.get_database_backend();
    let schema = Schema::new(backend);

    let mut stmt = schema.create_table_from_entity(Commands);
    stmt.if_not_exists();
    self.db.execute(backend.build(&stmt)).await?;

    let index_sql = r#"
      CREATE INDEX IF NOT EXISTS idx_commands_status ON commands(status);
      CREATE INDEX IF NOT EXISTS idx_commands_name ON commands(name);
      CREATE INDEX IF NOT EXISTS idx_commands_parent_id ON commands(parent_id) WHERE parent_id IS NOT NULL;
    "#;
    self
      .db
      .execute(sea_orm::Statement::from_string(backend, index_sql))
      .await?;
    Ok(())
  }

  fn own_transaction<'a>(&self, tx: &'a dyn StoreTransaction) -> Result<&'a PostgresTransaction> {
    tx.as_any()
      .downcast_ref::<PostgresTransaction>()
      .ok_or_else(|| Error::transaction(format!("transaction {} belongs to another store", tx.id())))
  }

  async fn create_in<C: ConnectionTrait>(conn: &C, id: &str, command: &Command) -> Result<()> {
    if Commands::find_by_id(id.to_string()).one(conn).await?.is_some() {
      return Err(Error::CommandIdConflict { id: id.to_string() });
    }
    let model = commands::new_active_model(id, command, Utc::now())?;
    Commands::insert(model).exec_without_returning(conn).await?;
    Ok(())
  }

  async fn update_in<C: ConnectionTrait>(conn: &C, id: &str, update: &CommandUpdate) -> Result<()> {
    let mut query = Commands::update_many().col_expr(commands::Column::UpdatedAt, Expr::value(Utc::now()));
    if let Some(status) = update.status {
      query = query.col_expr(commands::Column::Status, Expr::value(status.as_str()));
    }
    if let Some(started_at) = update.started_at {
      query = query.col_expr(commands::Column::StartedAt, Expr::value(started_at));
    }
    if let Some(data) = &update.data {
      query = query.col_expr(commands::Column::Data, Expr::value(data.clone()));
    }
    if let Some(retries) = update.retries {
      let retries = i32::try_from(retries).unwrap_or(i32::MAX);
      query = query.col_expr(commands::Column::Retries, Expr::value(retries));
    }
    if let Some(message) = &update.message {
      query = query.col_expr(commands::Column::Message, Expr::value(message.clone()));
    }
    if let Some(ready_at) = update.ready_at {
      query = query.col_expr(commands::Column::ReadyAt, Expr::value(ready_at));
    }
    let result = query
      .filter(commands::Column::Id.eq(id))
      .exec(conn)
      .await?;
    if result.rows_affected == 0 {
      return Err(Error::CommandNotFound { id: id.to_string() });
    }
    Ok(())
  }
}

#[async_trait]
impl CommandStore for PostgresCommandStore {
  async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
    let txn = self.db.begin().await?;
    Ok(Box::new(PostgresTransaction {
      id: Uuid::new_v4().to_string(),
      txn,
    }))
  }

  async fn create_command(
    &self,
    command: &Command,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<String> {
    let id = command
      .id
      .clone()
      .unwrap_or_else(|| Uuid::new_v4().to_string());
    match tx {
      Some(tx) => Self::create_in(&self.own_transaction(tx)?.txn, &id, command).await?,
      None => Self::create_in(&self.db, &id, command).await?,
    }
    Ok(id)
  }

  async fn update_command(
    &self,
    id: &str,
    update: &CommandUpdate,
    tx: Option<&dyn StoreTransaction>,
  ) -> Result<()> {
    match tx {
      Some(tx) => Self::update_in(&self.own_transaction(tx)?.txn, id, update).await,
      None => Self::update_in(&self.db, id, update).await,
    }
  }

  async fn destroy_command(&self, name: &str) -> Result<u64> {
    let result = Commands::delete_many()
      .filter(commands::Column::Name.eq(name))
      .exec(&self.db)
      .await?;
    Ok(result.rows_affected)
  }

  async fn get_commands_with_status(
    &self,
    statuses: &[CommandStatus],
    excluded_names: &[String],
  ) -> Result<Vec<Command>> {
    let mut query = Commands::find()
      .filter(commands::Column::Status.is_in(statuses.iter().map(|s| s.as_str())));
    if !excluded_names.is_empty() {
      query = query.filter(commands::Column::Name.is_not_in(excluded_names.iter().cloned()));
    }
    query
      .order_by_asc(commands::Column::CreatedAt)
      .all(&self.db)
      .await?
      .into_iter()
      .map(Command::try_from)
      .collect()
  }

  async fn get_command_with_id(&self, id: &str) -> Result<Option<Command>> {
    Commands::find_by_id(id.to_string())
      .one(&self.db)
      .await?
      .map(Command::try_from)
      .transpose()
  }

  async fn remove_finalized_commands(&self, before: i64, limit: usize) -> Result<u64> {
    let finalized = CommandStatus::FINALIZED.iter().map(|s| s.as_str());
    let older = Condition::any()
      .add(commands::Column::StartedAt.lt(before))
      .add(
        Condition::all()
          .add(commands::Column::StartedAt.is_null())
          .add(commands::Column::ReadyAt.lt(before)),
      );
    let ids: Vec<String> = Commands::find()
      .select_only()
      .column(commands::Column::Id)
      .filter(commands::Column::Status.is_in(finalized))
      .filter(older)
      .order_by_asc(commands::Column::CreatedAt)
      .limit(limit as u64)
      .into_tuple()
      .all(&self.db)
      .await?;
    if ids.is_empty() {
      return Ok(0);
    }
    let result = Commands::delete_many()
      .filter(commands::Column::Id.is_in(ids))
      .exec(&self.db)
      .await?;
    Ok(result.rows_affected)
  }
}
