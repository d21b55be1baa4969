use thiserror::Error;

#[cfg(test)]
mod tests;

/// 统一错误类型
#[derive(Debug, Error)]
pub enum KeelError {
    #[error("持久化失败: {0}")]
    Persistence(String),
    #[error("未知的任务名称: {name}")]
    UnknownJobName { name: String },
    #[error("任务已在运行: {name}")]
    AlreadyRunning { name: String },
    #[error("未找到运行中的任务: {name}")]
    ScheduleNotFound { name: String },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("用户 {user_id} 的角色列表不能为空")]
    EmptyRoleSet { user_id: i64 },
    #[error("资源不存在: {0}")]
    NotFound(String),
    #[error("无效的输入: {0}")]
    InvalidInput(String),
    #[error("操作已取消")]
    Cancelled,
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type KeelResult<T> = Result<T, KeelError>;

/// 面向调用方的错误分类，供传输层映射状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    PersistenceFailed,
    Cancelled,
    Internal,
}

impl KeelError {
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }
    pub fn unknown_job<S: Into<String>>(name: S) -> Self {
        Self::UnknownJobName { name: name.into() }
    }
    pub fn already_running<S: Into<String>>(name: S) -> Self {
        Self::AlreadyRunning { name: name.into() }
    }
    pub fn schedule_not_found<S: Into<String>>(name: S) -> Self {
        Self::ScheduleNotFound { name: name.into() }
    }
    pub fn invalid_cron<E: Into<String>, M: Into<String>>(expr: E, message: M) -> Self {
        Self::InvalidCron {
            expr: expr.into(),
            message: message.into(),
        }
    }
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KeelError::ScheduleNotFound { .. } | KeelError::NotFound(_) => ErrorKind::NotFound,
            KeelError::AlreadyRunning { .. } => ErrorKind::AlreadyExists,
            KeelError::UnknownJobName { .. }
            | KeelError::InvalidCron { .. }
            | KeelError::EmptyRoleSet { .. }
            | KeelError::InvalidInput(_) => ErrorKind::InvalidInput,
            KeelError::Persistence(_) => ErrorKind::PersistenceFailed,
            KeelError::Cancelled => ErrorKind::Cancelled,
            KeelError::Configuration(_) | KeelError::Serialization(_) | KeelError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<sqlx::Error> for KeelError {
    fn from(err: sqlx::Error) -> Self {
        KeelError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for KeelError {
    fn from(err: serde_json::Error) -> Self {
        KeelError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for KeelError {
    fn from(err: anyhow::Error) -> Self {
        KeelError::Internal(err.to_string())
    }
}
