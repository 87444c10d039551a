mod batch;
mod config;
mod error;
mod events;
mod node;
mod result_cache;
mod runner;
mod solver;


pub use batch::*;
pub use config::*;
pub use error::{SolverError, SolverErrorKind, SolverResult};
pub use events::*;
pub use result_cache::ResultCache;
pub use solver::*;
