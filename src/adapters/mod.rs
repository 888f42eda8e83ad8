//! Concrete implementations of the domain ports and the external systems
//! the workflows drive.

pub mod browser;
pub mod crm;
pub mod mail;
pub mod sftp;
pub mod storage;
pub mod workbook;

pub use browser::{BrowserSession, By, CrmBrowser, LoginCredentials};
pub use crm::CrmClient;
pub use mail::SmtpMailer;
pub use sftp::SftpTransfer;
pub use storage::LocalStorage;
pub use workbook::TemplateWorkbook;
