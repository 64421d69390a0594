// ==========================================
// 牛奶冷链物流系统 - 引擎层错误
// ==========================================

use crate::domain::types::{BatchEvent, BatchStatus};
use crate::repository::RepositoryError;
use thiserror::Error;

/// 引擎层错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("非法状态迁移: 状态 {from} 不接受事件 {event}")]
    InvalidTransition { from: BatchStatus, event: BatchEvent },

    #[error("校验失败: {0}")]
    Validation(String),

    #[error("{entity} 不存在: {id}")]
    NotFound { entity: String, id: String },

    #[error("并发冲突: {0}")]
    Conflict(String),

    #[error("外部服务失败: {0}")]
    Provider(String),

    #[error("通知发送失败: {0}")]
    Notify(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// 仓储 NotFound 上浮为引擎 NotFound, 其余原样透传
    pub fn from_repo(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Repository(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
