// Public modules
pub mod assemble;
pub mod config;
pub mod dictionaries;
pub mod error;
pub mod jobs;
pub mod manifest;
pub mod metadata;
pub mod module_deploy;
pub mod pipeline;
pub mod platform;
pub mod predeploy;
pub mod pull_request;
pub mod sas;
pub mod ssh;
pub mod stage;
pub mod workdir;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
