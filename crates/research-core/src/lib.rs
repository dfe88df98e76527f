pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod decision;
pub mod dual_tree;
pub mod error;
pub mod generator;
pub mod io;
pub mod lock;
pub mod migration;
pub mod paths;
pub mod project;
pub mod session;
pub mod state;
pub mod template;
pub mod types;

pub use error::{ErrorKind, ResearchError, Result};
pub use project::Project;
