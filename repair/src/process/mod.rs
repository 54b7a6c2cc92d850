// External tool execution

mod runner;

pub use runner::CommandRunner;
pub use runner::ExitOutcome;
pub use runner::ProcessRunner;
pub use runner::ToolInvocation;
