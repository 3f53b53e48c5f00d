//! 命令实体
//! Commands entity

use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::Deserialize;

use crate::command::{Command, CommandStatus, Sequence};
use crate::error::{Error, Result};

/// 命令实体模型
/// Commands entity model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize)]
#[sea_orm(table_name = "commands")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: String,
  pub name: String,
  /// 持久化形式的数据
  /// Payload in its persisted form
  pub data: Json,
  /// 剩余工作流步骤
  /// Remaining workflow steps
  pub sequence: Json,
  pub ready_at: i64,
  pub delay: i64,
  pub started_at: Option<i64>,
  pub deadline_at: Option<i64>,
  pub period: Option<i64>,
  pub status: String,
  #[sea_orm(column_type = "Text", nullable)]
  pub message: Option<String>,
  pub parent_id: Option<String>,
  pub retries: i32,
  pub transactional: bool,
  pub created_at: DateTimeUtc,
  pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Command {
  type Error = Error;

  fn try_from(model: Model) -> Result<Self> {
    let sequence: Sequence = if model.sequence.is_null() {
      Sequence::new()
    } else {
      serde_json::from_value(model.sequence)?
    };
    Ok(Command {
      id: Some(model.id),
      name: model.name,
      data: model.data,
      status: model.status.parse::<CommandStatus>()?,
      ready_at: Some(model.ready_at),
      delay: model.delay.max(0) as u64,
      started_at: model.started_at,
      deadline_at: model.deadline_at,
      period: model.period.map(|p| p.max(0) as u64),
      retries: model.retries.max(0) as u32,
      message: model.message,
      parent_id: model.parent_id,
      transactional: model.transactional,
      sequence,
    })
  }
}

/// 由命令构建待插入的模型
/// Build the model to insert for a command
pub fn new_active_model(id: &str, command: &Command, now: DateTimeUtc) -> Result<ActiveModel> {
  Ok(ActiveModel {
    id: Set(id.to_string()),
    name: Set(command.name.clone()),
    data: Set(command.data.clone()),
    sequence: Set(serde_json::to_value(&command.sequence)?),
    ready_at: Set(command.ready_at.unwrap_or_else(|| now.timestamp_millis())),
    delay: Set(i64::try_from(command.delay).unwrap_or(i64::MAX)),
    started_at: Set(command.started_at),
    deadline_at: Set(command.deadline_at),
    period: Set(command.period.map(|p| i64::try_from(p).unwrap_or(i64::MAX))),
    status: Set(command.status.as_str().to_string()),
    message: Set(command.message.clone()),
    parent_id: Set(command.parent_id.clone()),
    retries: Set(i32::try_from(command.retries).unwrap_or(i32::MAX)),
    transactional: Set(command.transactional),
    created_at: Set(now),
    updated_at: Set(now),
  })
}
