//! New-student upload through the school-setup bulk loader, and the
//! external-id backfill that follows it.

use crate::adapters::browser::CrmBrowser;
use crate::adapters::storage::LocalStorage;
use crate::adapters::workbook;
use crate::core::batch::{BatchAction, BatchReport, BatchRunner, InterruptSignal, ItemOutcome};
use crate::core::queries::{self, ObjectQuery};
use crate::domain::model::{parse_date, Table};
use crate::domain::ports::{CrmApi, Mailer, Storage};
use crate::pages::StudentUploadPage;
use crate::utils::error::{OpsError, Result};
use crate::utils::validation::FORM_DATE_FORMAT;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

pub const INPUT_FILE: &str = "New Students for cyschoolhouse.xlsx";

const INPUT_RENAMES: [(&str, &str); 4] = [
    ("Student CPS ID", "*REQ* Local Student ID"),
    ("Student First Name", "*REQ* First Name"),
    ("Student Last Name", "*REQ* Last Name"),
    ("Student Grade Level", "*REQ* Grade"),
];

const OPTIONAL_COLUMNS: [&str; 5] = ["Date of Birth", "Gender", "Ethnicity", "Disability Flag", "ELL"];

/// Bulk-loader columns, in the order the loader expects.
pub const LOADER_COLUMNS: [&str; 13] = [
    "School",
    "*REQ* Student Id",
    "*REQ* Local Student ID",
    "*REQ* First Name",
    "*REQ* Last Name",
    "*REQ* Grade",
    "Date of Birth",
    "Gender",
    "Ethnicity",
    "Disability Flag",
    "ELL",
    "*REQ* Entry Date",
    "*REQ* Type",
];

pub const EMAIL_SUBJECT: &str = "New students now in cyschoolhouse";
pub const EMAIL_BODY: &str =
    "The students you submitted have been successfully uploaded to cyschoolhouse.";

fn loader_date(value: &Value) -> Value {
    match value {
        Value::String(s) => parse_date(s)
            .map(|d| Value::from(d.format(FORM_DATE_FORMAT).to_string()))
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

/// Reshapes the new-student sheet into bulk-loader rows. `enrollment_date`
/// (MM/DD/YYYY) fills `*REQ* Entry Date` when the sheet has none.
pub fn loader_rows(input: Table, enrollment_date: &str) -> Result<Table> {
    let entry_date = parse_date(enrollment_date).ok_or_else(|| {
        OpsError::validation(format!(
            "Enrollment date '{}' is not a MM/DD/YYYY date",
            enrollment_date
        ))
    })?;
    for column in ["School", "Student CPS ID", "Student First Name", "Student Last Name", "Student Grade Level"] {
        if !input.has_column(column) {
            return Err(OpsError::validation(format!(
                "New-student sheet has no '{}' column",
                column
            )));
        }
    }

    let has_entry_date = input.has_column("*REQ* Entry Date");
    let mut table = input
        .rename(&INPUT_RENAMES)
        .with_column("*REQ* Student Id", |r| {
            r.get("*REQ* Local Student ID").cloned().unwrap_or(Value::Null)
        })
        .with_column("*REQ* Type", |_| Value::from("Student"));
    if !has_entry_date {
        let entry_date = entry_date.format(FORM_DATE_FORMAT).to_string();
        table = table.with_column("*REQ* Entry Date", |_| Value::from(entry_date.clone()));
    }
    for column in OPTIONAL_COLUMNS {
        if !table.has_column(column) {
            table = table.with_column(column, |_| Value::Null);
        }
    }
    Ok(table
        .map_rows(|row| {
            for column in ["*REQ* Entry Date", "Date of Birth"] {
                if let Some(value) = row.get(column).cloned() {
                    row.set(column, loader_date(&value));
                }
            }
        })
        .select(&LOADER_COLUMNS))
}

pub fn import_parameters(path: &Path, enrollment_date: &str) -> Result<Table> {
    loader_rows(workbook::read_table(path, None)?, enrollment_date)
}

/// Drops rows whose local id already belongs to a CRM student.
pub fn remove_existing(rows: Table, students: &Table) -> Table {
    let existing = students.string_set("Local_Student_ID__c");
    let before = rows.len();
    let rows = rows.filter(|r| {
        r.str("*REQ* Local Student ID")
            .map_or(true, |id| !existing.contains(&id))
    });
    if rows.len() < before {
        tracing::info!("Skipping {} students already in the CRM", before - rows.len());
    }
    rows
}

/// One school's staged CSV and its setup record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolUpload {
    pub school: String,
    pub setup_id: String,
    pub csv: PathBuf,
    pub students: usize,
}

impl fmt::Display for SchoolUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} students)", self.school, self.students)
    }
}

pub fn csv_name(year: &str, school: &str) -> String {
    format!("{} New Students for CYSH - {}.csv", year, school)
}

/// Maps informal school names to CRM names and attaches each school's setup
/// id. Rows must carry `School` as the informal name.
pub fn assign_setups(rows: Table, school_reference: &Table, setups: &Table) -> Result<Table> {
    let reference = school_reference.clone().select(&["School", "Informal Name"]);
    let setups = setups.clone().select(&["Setup__c", "School"]);
    let table = rows
        .rename(&[("School", "Informal Name")])
        .left_join(&reference, "Informal Name", "Informal Name")
        .left_join(&setups, "School", "School");

    let unknown: Vec<String> = table
        .rows
        .iter()
        .filter(|r| r.is_null("Setup__c"))
        .map(|r| r.str_or_empty("Informal Name"))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if !unknown.is_empty() {
        return Err(OpsError::validation(format!(
            "No school setup found for: {}",
            unknown.join(", ")
        )));
    }
    Ok(table)
}

/// Writes one loader CSV per school (without the school column) and
/// returns the uploads to run.
pub async fn stage_uploads(
    rows: &Table,
    storage: &LocalStorage,
    year: &str,
) -> Result<Vec<SchoolUpload>> {
    let columns: Vec<&str> = LOADER_COLUMNS[1..].to_vec();
    let mut uploads = Vec::new();
    for (school, group) in rows.group_by("School") {
        let setup_id = group.rows[0].str_or_empty("Setup__c");
        let name = csv_name(year, &school);
        let csv = group.clone().select(&columns).to_csv_bytes()?;
        storage.write_file(&name, &csv).await?;
        tracing::debug!("Staged {} students for {}", group.len(), school);
        uploads.push(SchoolUpload {
            csv: storage.base_path().join(&name),
            students: group.len(),
            school,
            setup_id,
        });
    }
    Ok(uploads)
}

/// Setup records with their school name: `Setup__c`, `School`.
pub async fn setup_table(crm: &dyn CrmApi) -> Result<Table> {
    let setups = ObjectQuery::new("Setup__c")
        .fields(&["Id", "School__c"])
        .rename_id()
        .fetch(crm)
        .await?;
    let schools = queries::school_table(crm).await?;
    Ok(setups
        .left_join(&schools, "School__c", "School__c")
        .filter(|r| r.str("School").is_some()))
}

/// Batch action loading and publishing one school's CSV.
pub struct StudentLoad<'a> {
    browser: &'a mut CrmBrowser,
}

#[async_trait]
impl<'a> BatchAction<SchoolUpload> for StudentLoad<'a> {
    async fn run(&mut self, upload: &SchoolUpload) -> Result<ItemOutcome> {
        let page = StudentUploadPage::new(self.browser.session()?);
        page.open(&upload.setup_id).await?;
        page.load_file(&upload.csv).await?;
        page.insert().await?;
        page.publish(&upload.setup_id).await?;
        tracing::info!("Uploaded {} students for {}", upload.students, upload.school);
        tokio::fs::remove_file(&upload.csv).await?;
        Ok(ItemOutcome::Done)
    }

    async fn recover(&mut self) -> Result<()> {
        self.browser.return_home().await
    }

    async fn reset(&mut self) -> Result<()> {
        self.browser.restart().await
    }
}

/// Emails the impact managers of `schools`. Returns the recipients.
pub async fn notify_impact_managers(
    crm: &dyn CrmApi,
    mailer: &dyn Mailer,
    schools: &[String],
) -> Result<Vec<String>> {
    let roles = vec!["Impact Manager".to_string()];
    let managers = queries::staff_table(crm, Some(schools), Some(roles.as_slice())).await?;
    let recipients = managers.unique_strings("Email__c");
    if recipients.is_empty() {
        tracing::warn!("No impact managers to notify for {}", schools.join(", "));
        return Ok(recipients);
    }
    mailer.send(&recipients, EMAIL_SUBJECT, EMAIL_BODY).await?;
    tracing::info!("📧 Notified {} impact managers", recipients.len());
    Ok(recipients)
}

/// Where the upload reads from and stages to.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub input: PathBuf,
    pub enrollment_date: String,
    pub school_reference: PathBuf,
    pub temp_dir: PathBuf,
    pub year: String,
}

/// Validates the input sheet and stages one CSV per school. Empty when
/// every student is already in the CRM.
pub async fn prepare_uploads(
    crm: &dyn CrmApi,
    settings: &UploadSettings,
) -> Result<Vec<SchoolUpload>> {
    let rows = import_parameters(&settings.input, &settings.enrollment_date)?;
    let rows = remove_existing(rows, &queries::student_table(crm).await?);
    if rows.is_empty() {
        tracing::info!("No new students to upload");
        return Ok(Vec::new());
    }

    let reference = queries::school_reference(&settings.school_reference)?;
    let rows = assign_setups(rows, &reference, &setup_table(crm).await?)?;
    let storage = LocalStorage::new(&settings.temp_dir);
    stage_uploads(&rows, &storage, &settings.year).await
}

/// Schools whose upload ran to completion in `report`.
pub fn uploaded_schools(uploads: &[SchoolUpload], report: &BatchReport) -> Vec<String> {
    let done: HashSet<&str> = report.succeeded_labels.iter().map(String::as_str).collect();
    uploads
        .iter()
        .filter(|u| done.contains(u.to_string().as_str()))
        .map(|u| u.school.clone())
        .collect()
}

/// Loads staged uploads through the browser, then emails the impact
/// managers of the schools that went through. The report is returned
/// as is; callers decide how an early stop ends the run.
pub async fn upload_staged(
    crm: &dyn CrmApi,
    browser: &mut CrmBrowser,
    mailer: &dyn Mailer,
    uploads: &[SchoolUpload],
    runner: &BatchRunner,
    interrupt: &InterruptSignal,
) -> Result<BatchReport> {
    let mut action = StudentLoad { browser };
    let report = runner.run(uploads, &mut action, interrupt).await;

    let uploaded = uploaded_schools(uploads, &report);
    if !uploaded.is_empty() {
        notify_impact_managers(crm, mailer, &uploaded).await?;
    }
    Ok(report)
}

/// `(student id, new external id)` for students without an external id
/// whose local id has 8 characters. Refuses when local ids are duplicated.
pub fn external_id_updates(students: &Table, prefix: &str) -> Result<Vec<(String, String)>> {
    let mut seen = HashSet::new();
    let duplicates: Vec<String> = students
        .column_strings("Local_Student_ID__c")
        .into_iter()
        .filter(|id| !seen.insert(id.clone()))
        .collect();
    if !duplicates.is_empty() {
        return Err(OpsError::validation(format!(
            "Duplicate Local_Student_ID__c values: {}",
            duplicates.join(", ")
        )));
    }

    Ok(students
        .rows
        .iter()
        .filter(|r| r.is_null("External_Id__c"))
        .filter_map(|r| {
            let local = r.str("Local_Student_ID__c")?;
            if local.chars().count() != 8 {
                return None;
            }
            Some((r.str_or_empty("Student__c"), format!("{}{}", prefix, local)))
        })
        .collect())
}

/// Backfills `External_Id__c`. Returns the number of students updated.
pub async fn update_external_ids(crm: &dyn CrmApi, prefix: &str) -> Result<usize> {
    let students = queries::student_table(crm).await?;
    let updates = external_id_updates(&students, prefix)?;
    if updates.is_empty() {
        tracing::info!("No students to fix IDs for");
        return Ok(0);
    }
    for (id, external_id) in &updates {
        let mut fields = Map::new();
        fields.insert("External_Id__c".to_string(), Value::from(external_id.as_str()));
        crm.update("Student__c", id, fields).await?;
    }
    tracing::info!("Set external ids on {} students", updates.len());
    Ok(updates.len())
}
