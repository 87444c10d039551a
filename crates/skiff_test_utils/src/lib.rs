mod invocation_log;
mod stub_task;

pub use invocation_log::*;
pub use stub_task::*;
