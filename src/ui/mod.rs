//! Terminal output for the restore and save commands
//!
//! Spinners and colors in an interactive terminal, plain `[OK]`/`[WARN]`
//! lines when running under CI.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{key_value, key_value_status, step_info};
pub use progress::TaskSpinner;
