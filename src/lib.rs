pub mod cleanup;
pub mod commands;
pub mod config;
pub mod connectivity;
pub mod environment;
pub mod errors;
pub mod exec;
pub mod frogbot_config;
pub mod logging;
pub mod scanner;
pub mod telemetry;
pub mod vcs;

pub use exec::{Executor, exec};
pub use telemetry::FROGBOT_VERSION;
