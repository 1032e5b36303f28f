//! cow-exec: typed process invocation (C1), SSH passthrough (C2), the
//! wait/timeout primitive (C3), and the transactional scope stack (C4).

pub mod mock;
pub mod process;
pub mod scope;
pub mod ssh;
pub mod wait;

pub use process::{run, CapturedOutput, RunOptions};
pub use scope::{Scope, ScopeStack};
pub use ssh::{ssh, ssh_capture, SshOptions};
pub use wait::wait_for;
