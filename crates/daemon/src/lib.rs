pub mod context;
pub mod lifecycle;

pub use context::{Context, ContextError};
pub use lifecycle::{Daemon, DaemonConfig, DaemonError};
