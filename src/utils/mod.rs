pub mod fs;
pub mod process;
pub mod s3;
pub mod security;
pub mod umask_guard;

pub use process::{Invocation, StdinFeed, SystemRunner, ToolOutput, ToolRunner};
pub use umask_guard::UmaskGuard;
