//! In-memory port implementations shared by the unit tests.

use crate::domain::model::{Record, Table};
use crate::domain::ports::{CrmApi, FileTransfer, Mailer};
use crate::utils::error::{OpsError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// CRM stand-in answering queries from canned records. Understands
/// `WHERE` clauses made of `Field IN (...)`, `Field = value` and
/// `Field != value` joined with `AND`.
#[derive(Clone, Default)]
pub struct MockCrm {
    objects: Arc<Mutex<HashMap<String, Vec<Map<String, Value>>>>>,
    reports: Arc<Mutex<HashMap<String, Table>>>,
    queries: Arc<Mutex<Vec<String>>>,
    updates: Arc<Mutex<Vec<(String, String, Map<String, Value>)>>>,
}

impl MockCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(self, object: &str, records: Vec<Value>) -> Self {
        let rows = records
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.objects
            .lock()
            .unwrap()
            .insert(object.to_string(), rows);
        self
    }

    pub fn with_report(self, report_id: &str, table: Table) -> Self {
        self.reports
            .lock()
            .unwrap()
            .insert(report_id.to_string(), table);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, String, Map<String, Value>)> {
        self.updates.lock().unwrap().clone()
    }
}

fn parse_literals(text: &str) -> Vec<Value> {
    let quoted = Regex::new(r"'((?:[^'\\]|\\.)*)'").unwrap();
    let found: Vec<Value> = quoted
        .captures_iter(text)
        .map(|c| Value::String(c[1].replace("\\'", "'").replace("\\\\", "\\")))
        .collect();
    if !found.is_empty() {
        return found;
    }
    match text.trim() {
        "true" | "TRUE" => vec![Value::Bool(true)],
        "false" | "FALSE" => vec![Value::Bool(false)],
        "null" => vec![Value::Null],
        other => vec![Value::String(other.to_string())],
    }
}

fn cell_matches(cell: Option<&Value>, wanted: &Value) -> bool {
    match (cell, wanted) {
        (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
        (Some(Value::String(a)), Value::String(b)) => a == b,
        (Some(a), b) => a == b,
        _ => false,
    }
}

fn row_matches(row: &Map<String, Value>, clause: &str) -> bool {
    let in_re = Regex::new(r"^([\w.]+)\s+IN\s+\((.*)\)$").unwrap();
    let cmp_re = Regex::new(r"^([\w.]+)\s*(!=|=)\s*(.+)$").unwrap();
    let normalized = clause.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.split(" AND ").all(|condition| {
        let condition = condition.trim();
        if let Some(c) = in_re.captures(condition) {
            let values = parse_literals(&c[2]);
            values.iter().any(|v| cell_matches(row.get(&c[1]), v))
        } else if let Some(c) = cmp_re.captures(condition) {
            let value = parse_literals(&c[3]).remove(0);
            let equal = cell_matches(row.get(&c[1]), &value);
            if &c[2] == "=" {
                equal
            } else {
                !equal
            }
        } else {
            true
        }
    })
}

#[async_trait]
impl CrmApi for MockCrm {
    async fn query_all(&self, soql: &str) -> Result<Vec<Record>> {
        self.queries.lock().unwrap().push(soql.to_string());
        let re = Regex::new(r"(?s)FROM\s+(\w+)(?:\s+WHERE\s+(.*))?$").unwrap();
        let caps = re
            .captures(soql.trim())
            .ok_or_else(|| OpsError::validation(format!("Unparseable query: {}", soql)))?;
        let object = caps[1].to_string();
        let clause = caps.get(2).map(|m| m.as_str().to_string());

        let objects = self.objects.lock().unwrap();
        let rows = objects.get(&object).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|row| clause.as_deref().map_or(true, |c| row_matches(row, c)))
            .map(|row| Record {
                data: row.into_iter().collect(),
            })
            .collect())
    }

    async fn update(&self, object: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((object.to_string(), id.to_string(), fields));
        Ok(())
    }

    async fn describe_fields(&self, object: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        let fields: BTreeSet<String> = objects
            .get(object)
            .into_iter()
            .flatten()
            .flat_map(|row| row.keys().cloned())
            .collect();
        if fields.is_empty() {
            return Err(OpsError::Crm {
                status: 404,
                message: format!("NOT_FOUND: {}", object),
            });
        }
        Ok(fields.into_iter().collect())
    }

    async fn object_reference(&self) -> Result<BTreeMap<String, String>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .keys()
            .map(|k| (k.clone(), k.trim_end_matches("__c").replace('_', " ")))
            .collect())
    }

    async fn export_report(&self, report_id: &str) -> Result<Table> {
        self.reports
            .lock()
            .unwrap()
            .get(report_id)
            .cloned()
            .ok_or_else(|| OpsError::Crm {
                status: 404,
                message: format!("report {} not found", report_id),
            })
    }
}

#[derive(Clone, Default)]
pub struct RecordingMailer {
    pub sent: Arc<Mutex<Vec<(Vec<String>, String, String)>>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_vec(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// File transfer backed by a local directory standing in for the remote host.
#[derive(Clone)]
pub struct LocalTransfer {
    pub remote_root: PathBuf,
}

#[async_trait]
impl FileTransfer for LocalTransfer {
    async fn put_dir(&self, local_dir: &Path, remote_dir: &str) -> Result<Vec<PathBuf>> {
        let target = self.remote_root.join(remote_dir);
        std::fs::create_dir_all(&target)?;
        let mut sent = Vec::new();
        for entry in std::fs::read_dir(local_dir)? {
            let path = entry?.path();
            if let Some(name) = path.file_name() {
                std::fs::copy(&path, target.join(name))?;
                sent.push(PathBuf::from(remote_dir).join(name));
            }
        }
        sent.sort();
        Ok(sent)
    }

    async fn get_dir(&self, remote_dir: &str, local_dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(local_dir)?;
        let mut received = Vec::new();
        for entry in std::fs::read_dir(self.remote_root.join(remote_dir))? {
            let path = entry?.path();
            if let Some(name) = path.file_name() {
                std::fs::copy(&path, local_dir.join(name))?;
                received.push(local_dir.join(name));
            }
        }
        received.sort();
        Ok(received)
    }
}
