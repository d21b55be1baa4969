//! 定时任务调度：cron运行时、任务注册表与持久化记录的协调

pub mod cron_spec;
pub mod jobs;
pub mod observer;
pub mod reconciler;
pub mod registry;
pub mod runtime;

pub use cron_spec::CronSpec;
pub use jobs::builtin_registry;
pub use observer::{DropReason, LoggingReloadObserver, ReloadObserver};
pub use reconciler::{ReloadReport, SchedulerReconciler};
pub use registry::{JobFn, JobRegistry, JobRegistryBuilder};
pub use runtime::{CronRuntime, EntryId, EntrySnapshot, WeakCronRuntime};
