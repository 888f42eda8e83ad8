//! Partner data share: reshapes enrollment and attendance data into the
//! partner's five-file layout and sends it over SFTP.

use crate::adapters::storage::LocalStorage;
use crate::adapters::workbook;
use crate::app::workflows::programs;
use crate::core::queries::{self, ObjectQuery};
use crate::domain::model::{Record, Table};
use crate::domain::ports::{CrmApi, FileTransfer, Storage};
use crate::utils::error::{OpsError, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const DICTIONARY_SHEET: &str = "Program Data Elements";
pub const REMOTE_DIR: &str = "./salesforce";

pub const DATA_FILES: [&str; 5] = ["PROGRAM", "ATTENDANCE", "MEMBERSHIP", "PARTICIPANT", "FACILITY"];

/// Programs shared with the partner.
pub const PARTNER_PROGRAMS: [&str; 5] = [
    programs::COACHING_ATTENDANCE,
    programs::TUTORING_MATH,
    programs::TUTORING_LITERACY,
    programs::HOMEWORK_ASSISTANCE,
    programs::SEL_CHECK_IN,
];

const CONSTANT_PREFIX: &str = "All: ";
const EXIT_REASON_LIMIT: usize = 50;

/// One row of the partner's data dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    pub data_file: String,
    pub element: String,
    pub cy_column: Option<String>,
    pub cy_values: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DataDictionary {
    elements: Vec<DataElement>,
}

impl DataDictionary {
    pub fn from_table(table: &Table) -> Result<Self> {
        for column in ["PROGRAM DATA FILE", "DATA ELEMENTS"] {
            if !table.has_column(column) {
                return Err(OpsError::validation(format!(
                    "Data dictionary has no '{}' column",
                    column
                )));
            }
        }
        let elements = table
            .rows
            .iter()
            .filter_map(|r| {
                Some(DataElement {
                    data_file: r.str("PROGRAM DATA FILE")?,
                    element: r.str("DATA ELEMENTS")?,
                    cy_column: r.str("CY COLUMN NAME"),
                    cy_values: r.str("CY COLUMN VALUES"),
                })
            })
            .collect();
        Ok(Self { elements })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_table(&workbook::read_table(path, Some(DICTIONARY_SHEET))?)
    }

    pub fn for_file<'a>(&'a self, data_file: &'a str) -> impl Iterator<Item = &'a DataElement> + 'a {
        self.elements.iter().filter(move |e| e.data_file == data_file)
    }
}

/// Renames CY columns to the partner's data elements for one data file,
/// builds membership ids and fills `All: ` constants.
pub fn convert_table(data: &Table, data_file: &str, dictionary: &DataDictionary) -> Table {
    let mapped: Vec<(&str, &str)> = dictionary
        .for_file(data_file)
        .filter_map(|e| Some((e.cy_column.as_deref()?, e.element.as_str())))
        .collect();
    let constants: Vec<(&str, &str)> = dictionary
        .for_file(data_file)
        .filter_map(|e| {
            let value = e.cy_values.as_deref()?.strip_prefix(CONSTANT_PREFIX)?;
            Some((e.element.as_str(), value))
        })
        .collect();

    let mut columns: Vec<String> = Vec::new();
    for (_, element) in &mapped {
        if !columns.iter().any(|c| c == element) {
            columns.push(element.to_string());
        }
    }
    let builds_membership = columns.iter().any(|c| c == "PROGRAM_MEMBERSHIP_SYSTEM_ID");

    let mut converted = Table::new(columns);
    for row in &data.rows {
        let mut out = Record::new();
        for (cy, element) in &mapped {
            out.set(element, row.get(cy).cloned().unwrap_or(Value::Null));
        }
        if builds_membership {
            let id = format!(
                "{}_{}",
                out.str_or_empty("PROGRAM_SYSTEM_ID"),
                out.str_or_empty("PARTICIPANT_SYSTEM_ID")
            );
            out.set("PROGRAM_MEMBERSHIP_SYSTEM_ID", id);
        }
        converted.rows.push(out);
    }
    for (element, value) in constants {
        converted = converted.with_column(element, |_| Value::from(value));
    }
    converted
}

fn whole_number(row: &Record, column: &str) -> Value {
    Value::from(row.f64(column).unwrap_or(0.0) as i64)
}

/// Per-file cleanup applied after conversion.
pub fn post_process(data_file: &str, table: Table) -> Table {
    match data_file {
        "PROGRAM" => {
            let mut table = table.distinct_by(&["PROGRAM_SYSTEM_ID"]);
            for column in ["DELIVERY_OVERALL_DURATION", "DELIVERY_WEEKS"] {
                if table.has_column(column) {
                    table = table.with_column(column, |r| whole_number(r, column));
                }
            }
            table
                .with_column("PROGRAM_INTERVENTION_LEVEL", |r| {
                    let group = r.str_or_empty("PROGRAM_GROUP");
                    Value::from(if group == programs::HOMEWORK_ASSISTANCE { "Tier1" } else { "Tier2" })
                })
                .map_rows(|r| {
                    let group = r.str_or_empty("PROGRAM_GROUP");
                    if group.contains("SEL") || group.contains("Attendance") {
                        r.set("DELIVERY_WEEKS", 8);
                    }
                })
        }
        "ATTENDANCE" => table.filter(|r| !r.is_null("ATTENDANCE_DATE")).distinct(),
        "MEMBERSHIP" => table
            .distinct_by(&["PROGRAM_MEMBERSHIP_SYSTEM_ID"])
            .map_rows(|r| {
                if let Some(reason) = r.str("MEMBERSHIP_EXIT_REASONS") {
                    let short: String = reason.chars().take(EXIT_REASON_LIMIT).collect();
                    r.set("MEMBERSHIP_EXIT_REASONS", short);
                }
            }),
        "PARTICIPANT" => table.distinct_by(&["PARTICIPANT_SYSTEM_ID"]),
        "FACILITY" => {
            let columns = table.columns.clone();
            table
                .filter(|r| columns.iter().all(|c| !r.is_null(c)))
                .distinct_by(&["FACILITY_SYSTEM_ID"])
        }
        _ => table,
    }
}

/// The five partner files, converted and cleaned.
pub fn partner_tables(omni: &Table, dictionary: &DataDictionary) -> Vec<(&'static str, Table)> {
    DATA_FILES
        .iter()
        .map(|file| (*file, post_process(file, convert_table(omni, file, dictionary))))
        .collect()
}

fn as_date(row: &mut Record, column: &str) {
    if let Some(date) = row.date(column) {
        row.set(column, date.to_string());
    }
}

/// Source tables pulled from the CRM and the school reference.
#[derive(Debug, Clone, Default)]
pub struct OmniSources {
    pub student_sections: Table,
    pub sections: Table,
    pub programs: Table,
    pub students: Table,
    pub schools: Table,
    pub reference: Table,
    pub session_results: Table,
}

/// Joins every source into one row per enrollment and session result,
/// limited to the partner programs.
pub fn omni_join(sources: OmniSources) -> Table {
    let student_sections = sources
        .student_sections
        .rename(&[("Active__c", "Student_Section_Active__c")])
        .map_rows(|r| {
            as_date(r, "Intervention_Enrollment_Start_Date__c");
            as_date(r, "Enrollment_End_Date__c");
        });
    let sections = sources
        .sections
        .rename(&[("Active__c", "Section_Active__c")])
        .map_rows(|r| {
            if r.f64("Target_Dosage_Section_Goal__c") == Some(0.0) {
                r.set("Target_Dosage_Section_Goal__c", Value::Null);
            }
        });
    let students = sources
        .students
        .map_rows(|r| as_date(r, "Date_of_Birth__c"));
    let reference = sources
        .reference
        .select(&["CYSH ID", "CPS ID", "School", "Portfolio"])
        .map_rows(|r| {
            if let Some(id) = r.f64("CPS ID") {
                r.set("CPS ID", id as i64);
            }
        });

    student_sections
        .inner_join(&sections, "Section__c", "Section__c")
        .left_join(&sources.programs, "Program__c", "Program__c")
        .left_join(&students, "Student__c", "Student__c")
        .left_join(&sources.schools, "School__c", "School__c")
        .left_join(&reference, "School", "School")
        .left_join(&sources.session_results, "Student_Section__c", "Student_Section__c")
        .filter(|r| {
            r.str("Program")
                .is_some_and(|p| PARTNER_PROGRAMS.contains(&p.as_str()))
        })
}

pub async fn omni_table(crm: &dyn CrmApi, school_reference: &Path) -> Result<Table> {
    let session_results = queries::object_table(
        crm,
        "Intervention_Session_Result__c",
        &[
            "Student_Section__c",
            "Amount_of_Time__c",
            "Intervention_Session_Date__c",
            "Primary_Skill__c",
        ],
        None,
    )
    .await?;
    let schools = queries::school_table(crm).await?;
    let students = ObjectQuery::new("Student__c")
        .fields(&[
            "Id",
            "Local_Student_ID__c",
            "Student_Id__c",
            "Date_of_Birth__c",
            "Student_First_Name__c",
            "Student_Last_Name__c",
            "Grade__c",
        ])
        .filter(format!(
            "School__c IN {}",
            crate::core::soql::in_list(schools.column_strings("School__c"))
        ))
        .rename_id()
        .fetch(crm)
        .await?;
    let student_sections = ObjectQuery::new("Student_Section__c")
        .fields(&[
            "Id",
            "Name",
            "Active__c",
            "Section__c",
            "Student__c",
            "Student_Grade__c",
            "Intervention_Enrollment_Start_Date__c",
            "Enrollment_End_Date__c",
            "Section_Exit_Reason__c",
        ])
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?;
    let program_df = queries::program_table(crm, &[])
        .await?
        .rename(&[("Program__c_Name", "Program")]);
    let sections = ObjectQuery::new("Section__c")
        .fields(&[
            "Id",
            "Name",
            "Active__c",
            "School__c",
            "Program__c",
            "Intervention_Primary_Staff__c",
            "In_After_School__c",
            "Target_Dosage_Section_Goal__c",
        ])
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?;

    Ok(omni_join(OmniSources {
        student_sections,
        sections,
        programs: program_df,
        students,
        schools,
        reference: queries::school_reference(school_reference)?,
        session_results,
    }))
}

/// Writes `<FILE>.csv` for every table into `dir`.
pub async fn write_tables(tables: &[(&str, Table)], dir: &Path) -> Result<Vec<PathBuf>> {
    let storage = LocalStorage::new(dir);
    let mut written = Vec::new();
    for (name, table) in tables {
        let file = format!("{}.csv", name);
        storage.write_file(&file, &table.to_csv_bytes()?).await?;
        tracing::info!("{}: {} rows", file, table.len());
        written.push(dir.join(file));
    }
    Ok(written)
}

pub async fn upload(transfer: &dyn FileTransfer, dir: &Path) -> Result<Vec<PathBuf>> {
    let sent = transfer.put_dir(dir, REMOTE_DIR).await?;
    tracing::info!("📤 Sent {} files to {}", sent.len(), REMOTE_DIR);
    Ok(sent)
}

pub fn export_dir(root: &Path, today: NaiveDate) -> PathBuf {
    root.join("exports").join(today.format("%Y.%m.%d").to_string())
}

/// Pulls, converts, writes and uploads the partner files for `today`.
pub async fn run(
    crm: &dyn CrmApi,
    transfer: &dyn FileTransfer,
    dictionary: &Path,
    school_reference: &Path,
    root: &Path,
    today: NaiveDate,
) -> Result<Vec<PathBuf>> {
    let dir = export_dir(root, today);
    tracing::info!("Writing partner tables to {}", dir.display());
    let dictionary = DataDictionary::load(dictionary)?;
    let omni = omni_table(crm, school_reference).await?;
    let tables = partner_tables(&omni, &dictionary);
    write_tables(&tables, &dir).await?;
    upload(transfer, &dir).await
}
