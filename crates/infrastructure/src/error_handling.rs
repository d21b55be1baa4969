//! Error helpers for repository operations
//!
//! Converts sqlx errors into `KeelError` with operation context and logs them
//! with structured fields before they leave the repository layer.

use chrono::{DateTime, Utc};
use keel_errors::KeelError;
use sqlx::Error as SqlxError;
use std::fmt;
use tracing::{debug, error};

/// Operation context for repository operations
#[derive(Debug, Clone, Copy)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Replace,
    Migrate,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "查询"),
            RepositoryOperation::Replace => write!(f, "替换"),
            RepositoryOperation::Migrate => write!(f, "迁移"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: RepositoryOperation,
    pub table: &'static str,
    pub subject: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(operation: RepositoryOperation, table: &'static str) -> Self {
        Self {
            operation,
            table,
            subject: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn entity_description(&self) -> String {
        match &self.subject {
            Some(subject) => format!("{} [{}]", self.table, subject),
            None => self.table.to_string(),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    pub fn database_error(context: &OperationContext, error: SqlxError) -> KeelError {
        let entity_desc = context.entity_description();
        let error_msg = match &error {
            SqlxError::Database(db_error) => match db_error.constraint() {
                Some(constraint) => format!(
                    "{}{}时发生数据库约束冲突: {}",
                    context.operation, entity_desc, constraint
                ),
                None => format!("{}{}时发生数据库错误: {}", context.operation, entity_desc, db_error),
            },
            SqlxError::PoolClosed => {
                format!("{}{}时数据库连接池已关闭", context.operation, entity_desc)
            }
            SqlxError::PoolTimedOut => {
                format!("{}{}时数据库连接池超时", context.operation, entity_desc)
            }
            other => format!("{}{}时发生数据库错误: {}", context.operation, entity_desc, other),
        };

        error!(
            error = %error,
            operation = %context.operation,
            table = context.table,
            subject = ?context.subject,
            "{}", error_msg
        );
        KeelError::persistence(error_msg)
    }

    pub fn log_operation_success(context: &OperationContext, detail: Option<&str>) {
        match detail {
            Some(detail) => debug!(
                operation = %context.operation,
                table = context.table,
                "{}{}成功: {}",
                context.operation,
                context.entity_description(),
                detail
            ),
            None => debug!(
                operation = %context.operation,
                table = context.table,
                "{}{}成功",
                context.operation,
                context.entity_description()
            ),
        }
    }

    pub fn is_unique_violation(error: &SqlxError) -> bool {
        matches!(error, SqlxError::Database(db_error) if db_error.is_unique_violation())
    }
}

#[macro_export]
macro_rules! schedule_context {
    ($operation:expr) => {
        $crate::error_handling::OperationContext::new($operation, "schedulers")
    };
    ($operation:expr, $subject:expr) => {
        $crate::error_handling::OperationContext::new($operation, "schedulers")
            .with_subject($subject.to_string())
    };
}

#[macro_export]
macro_rules! pool_context {
    ($operation:expr) => {
        $crate::error_handling::OperationContext::new($operation, "pools")
    };
    ($operation:expr, $subject:expr) => {
        $crate::error_handling::OperationContext::new($operation, "pools")
            .with_subject($subject.to_string())
    };
}

#[macro_export]
macro_rules! reference_context {
    ($operation:expr) => {
        $crate::error_handling::OperationContext::new($operation, "mix_values")
    };
    ($operation:expr, $subject:expr) => {
        $crate::error_handling::OperationContext::new($operation, "mix_values")
            .with_subject($subject.to_string())
    };
}
