//! # Keel Testing Utils
//!
//! In-memory repositories with failure injection, entity builders and
//! helpers shared by the crate test suites.
//!
//! ```toml
//! [dev-dependencies]
//! keel-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
