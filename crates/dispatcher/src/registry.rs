use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

/// 无参数的异步任务体
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 任务名称到可执行任务的不可变映射，启动时构建后注入
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<HashMap<String, JobFn>>,
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<JobFn> {
        self.jobs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// 按字典序返回全部任务名称
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct JobRegistryBuilder {
    jobs: HashMap<String, JobFn>,
}

impl JobRegistryBuilder {
    /// 注册任务，同名任务后注册的覆盖先注册的
    pub fn register<F, Fut>(mut self, name: impl Into<String>, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: JobFn = Arc::new(move || job().boxed());
        self.jobs.insert(name.into(), job);
        self
    }

    pub fn register_fn(mut self, name: impl Into<String>, job: JobFn) -> Self {
        self.jobs.insert(name.into(), job);
        self
    }

    pub fn build(self) -> JobRegistry {
        JobRegistry {
            jobs: Arc::new(self.jobs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_registry_lookup_and_invoke() {
        let counter = Arc::new(AtomicUsize::new(0));
        let job_counter = counter.clone();
        let registry = JobRegistry::builder()
            .register("count", move || {
                let counter = job_counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .register("noop", || async {})
            .build();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("count"));
        assert!(!registry.contains("missing"));
        assert_eq!(registry.names(), vec!["count".to_string(), "noop".to_string()]);

        let job = registry.get("count").unwrap();
        job().await;
        job().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = JobRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }
}
