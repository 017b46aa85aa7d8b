//! Generic utility primitives with zero domain knowledge.
//!
//! - `remote_path` - POSIX path joining for remote hosts
//! - `shell` - Shell escaping and quoting

pub mod remote_path;
pub mod shell;
