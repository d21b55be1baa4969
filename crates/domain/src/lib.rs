pub mod cancel;
pub mod entities;
pub mod repositories;

pub use cancel::cancellable;
pub use entities::*;
pub use keel_errors::{ErrorKind, KeelError, KeelResult};
pub use repositories::*;
pub use tokio_util::sync::CancellationToken;
