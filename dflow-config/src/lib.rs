//! Environment variable and file configuration for server and worker
//! processes, resolved env > file > defaults (SPEC_FULL §10.4), matching
//! the teacher's `knhk-config` crate.

pub mod config;
pub mod env;
pub mod error;
pub mod schema;

pub use config::load_config;
pub use error::{ConfigError, Result};
pub use schema::{Config, FileConfig};
