pub mod toml_config;

#[cfg(feature = "cli")]
pub mod cli;

pub use toml_config::AppConfig;

#[cfg(feature = "cli")]
pub use cli::Cli;
