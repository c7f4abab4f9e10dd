pub mod cli;
pub use cli::Cli;

pub mod config;
pub use config::Config;

pub mod logging;
