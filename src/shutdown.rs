use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 优雅关闭管理器
///
/// 订阅者拿到的是根令牌的子令牌，关闭时统一取消。
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发系统关闭");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 在超时时间内等待 `fut` 完成，返回是否按时完成
    pub async fn drain<F>(&self, fut: F, limit: Duration) -> bool
    where
        F: Future<Output = ()>,
    {
        match timeout(limit, fut).await {
            Ok(()) => true,
            Err(_) => {
                warn!(timeout_seconds = limit.as_secs(), "等待组件关闭超时");
                false
            }
        }
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_observe_shutdown() {
        let manager = ShutdownManager::new();
        let first = manager.subscribe();
        let second = manager.clone().subscribe();
        assert!(!manager.is_shutdown());

        manager.shutdown();
        manager.shutdown();

        assert!(manager.is_shutdown());
        first.cancelled().await;
        assert!(second.is_cancelled());
        // 关闭之后订阅得到的令牌立即处于取消状态
        assert!(manager.subscribe().is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let manager = ShutdownManager::new();
        assert!(manager.drain(async {}, Duration::from_millis(50)).await);
        assert!(
            !manager
                .drain(
                    tokio::time::sleep(Duration::from_secs(5)),
                    Duration::from_millis(20)
                )
                .await
        );
    }
}
