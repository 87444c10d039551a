mod cancel;
mod graph;
mod result;
mod staging;
mod task;
mod version;

pub use cancel::*;
pub use graph::*;
pub use result::*;
pub use staging::*;
pub use task::*;
pub use version::*;
