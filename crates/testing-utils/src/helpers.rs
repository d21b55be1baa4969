//! Test helper utilities and common testing patterns

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use keel_config::DatabaseConfig;
use keel_dispatcher::{JobFn, JobRegistry};
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        Self::wait_for_with_interval(condition, timeout, Duration::from_millis(10)).await
    }

    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(poll_interval).await;
        }

        condition().await
    }

    /// Generate unique test names based on timestamp
    pub fn unique_name(prefix: &str) -> String {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        format!("{}_{}", prefix, timestamp)
    }

    /// 单连接的内存SQLite配置
    pub fn memory_database() -> DatabaseConfig {
        DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            run_migrations: true,
            ..DatabaseConfig::default()
        }
    }
}

/// 每次执行都自增计数的任务
pub fn counting_job(counter: Arc<AtomicUsize>) -> JobFn {
    Arc::new(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    })
}

/// 由计数任务组成的注册表，返回每个任务对应的计数器
pub fn counting_registry(names: &[&str]) -> (JobRegistry, Vec<Arc<AtomicUsize>>) {
    let mut builder = JobRegistry::builder();
    let mut counters = Vec::with_capacity(names.len());
    for name in names {
        let counter = Arc::new(AtomicUsize::new(0));
        builder = builder.register_fn(*name, counting_job(counter.clone()));
        counters.push(counter);
    }
    (builder.build(), counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let ok = TestEnv::wait_for(
            move || {
                let c = c.clone();
                async move { c.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let ok = TestEnv::wait_for(|| async { false }, Duration::from_millis(50)).await;
        assert!(!ok);
    }

    #[test]
    fn test_unique_name() {
        let name = TestEnv::unique_name("job");
        assert!(name.starts_with("job_"));
    }

    #[tokio::test]
    async fn test_counting_registry() {
        let (registry, counters) = counting_registry(&["a", "b"]);
        assert_eq!(registry.len(), 2);
        registry.get("b").unwrap()().await;
        assert_eq!(counters[0].load(Ordering::SeqCst), 0);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
    }
}
