/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("ssh", "[{}]$ {}", target, command);
/// log_status!("pipeline", "Stage {} skipped: {}", stage, reason);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod output;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `deploy_manager::pipeline` instead of `deploy_manager::core::pipeline`
pub use core::*;
pub use utils::*;
