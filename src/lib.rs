pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod pages;
pub mod utils;

#[cfg(test)]
mod testing;

pub use adapters::{CrmBrowser, CrmClient, LocalStorage, SftpTransfer, SmtpMailer};
pub use config::AppConfig;
pub use domain::model::{Record, Table};
pub use domain::ports::{CrmApi, FileTransfer, Mailer};
pub use utils::error::{OpsError, Result};
