//! Command executors
//!
//! - `LocalExecutor` - runs the command line through a shell on the host

pub mod local;
pub mod r#trait;

pub use local::{LocalExecutor, LocalExecutorConfig};
pub use r#trait::Executor;
