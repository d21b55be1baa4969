use std::future::Future;

use keel_errors::{KeelError, KeelResult};
use tokio_util::sync::CancellationToken;

/// 在取消信号触发时立即放弃 `fut` 并返回 `Cancelled`
///
/// 被放弃的future会被drop，未提交的事务随之回滚。
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> KeelResult<T>
where
    F: Future<Output = KeelResult<T>>,
{
    if token.is_cancelled() {
        return Err(KeelError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(KeelError::Cancelled),
        result = fut => result,
    }
}
