use crate::domain::model::{Record, Table};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Query and update access to the CRM object model.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Runs a query and returns every page of results.
    async fn query_all(&self, soql: &str) -> Result<Vec<Record>>;

    /// Updates fields of a single record.
    async fn update(&self, object: &str, id: &str, fields: Map<String, Value>) -> Result<()>;

    /// Sorted field names of an object.
    async fn describe_fields(&self, object: &str) -> Result<Vec<String>>;

    /// Object API name to label.
    async fn object_reference(&self) -> Result<BTreeMap<String, String>>;

    /// Downloads a saved report as a table.
    async fn export_report(&self, report_id: &str) -> Result<Table>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()>;
}

/// Bulk file transfer against a partner host.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn put_dir(&self, local_dir: &Path, remote_dir: &str) -> Result<Vec<PathBuf>>;
    async fn get_dir(&self, remote_dir: &str, local_dir: &Path) -> Result<Vec<PathBuf>>;
}
