//! CLI command handlers. Each command is in its own file.

mod clean;
mod create;
mod list;
mod mode_status;
mod pause;
mod run;
mod start;

pub use clean::run_clean;
pub use create::run_create;
pub use list::run_list;
pub use mode_status::run_mode_status;
pub use pause::run_pause;
pub use run::run_daemon;
pub use start::run_start;
