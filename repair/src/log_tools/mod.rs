// Log tools module

mod tracing;

pub use tracing::TracingLevel;
pub use tracing::default_log_dir;
