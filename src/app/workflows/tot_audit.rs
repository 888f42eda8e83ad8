//! Time-on-task audit: normalises tier labels in session comments and
//! reports data-entry errors to each school team.

use crate::adapters::workbook;
use crate::adapters::TemplateWorkbook;
use crate::app::workflows::programs;
use crate::core::queries::{self, ObjectQuery};
use crate::domain::model::{Record, Table};
use crate::domain::ports::CrmApi;
use crate::utils::error::{OpsError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const TIER_ONE: &str = r"\b(?:[Tt](?:[Ii][Ee]|[Ee][Ii])[Rr] ?|t)(?:1|[Oo]ne)\b";
const TIER_TWO: &str = r"\b(?:[Tt](?:[Ii][Ee]|[Ee][Ii])[Rr] ?|t)(?:2|[Tt]wo)\b";

pub const MISSING_TIER: &str = "Missing T1/T2 Code";
pub const BOTH_TIERS: &str = "Listed T1 and T2";
pub const TOO_SHORT: &str = "<10 Minutes";
pub const TOO_LONG: &str = ">120 Minutes";
pub const LOGGED_IN_FUTURE: &str = "Logged in Future";
pub const WRONG_SECTION: &str = "Wrong Section";

/// Programs that never take time-on-task entries.
const NON_SESSION_PROGRAMS: [&str; 3] = [
    programs::DESSA,
    programs::MATH_INVENTORY,
    programs::READING_INVENTORY,
];

/// Report columns: CRM column and the header schools see.
pub const REPORT_COLUMNS: [(&str, &str); 9] = [
    ("School_Name__c", "School"),
    ("Staff__c_Name", "ACM"),
    ("Program__c_Name", "Program"),
    ("Intervention_Session__c_Name", "Session ID"),
    ("Related_Student_s_Name__c", "Student"),
    ("CreatedDate", "Submission Date"),
    ("Intervention_Session_Date__c", "Session Date"),
    ("Amount_of_Time__c", "ToT"),
    ("Error", "Error"),
];

/// Rewrites tier typos ("tier one", "Teir2", "t1") to `T1`/`T2`.
pub struct TierLabels {
    tier_one: Regex,
    tier_two: Regex,
}

impl TierLabels {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| OpsError::processing(format!("Bad tier pattern: {}", e)))
        };
        Ok(Self {
            tier_one: compile(TIER_ONE)?,
            tier_two: compile(TIER_TWO)?,
        })
    }

    /// The fixed comment, or `None` when nothing needed fixing.
    pub fn fix(&self, comment: &str) -> Option<String> {
        if !self.tier_one.is_match(comment) && !self.tier_two.is_match(comment) {
            return None;
        }
        let fixed = self.tier_one.replace_all(comment, "T1");
        let fixed = self.tier_two.replace_all(&fixed, "T2").into_owned();
        (fixed != comment).then_some(fixed)
    }
}

/// Sessions whose comment changes: `(session id, fixed comment)`.
pub fn tier_label_fixes(sessions: &Table) -> Result<Vec<(String, String)>> {
    let labels = TierLabels::new()?;
    Ok(sessions
        .rows
        .iter()
        .filter_map(|r| {
            let fixed = labels.fix(&r.str_or_empty("Comments__c"))?;
            Some((r.str_or_empty("Intervention_Session__c"), fixed))
        })
        .collect())
}

/// Normalises tier labels on every session. Returns the number updated.
pub async fn fix_tier_labels(crm: &dyn CrmApi) -> Result<usize> {
    let sessions = ObjectQuery::new("Intervention_Session__c")
        .fields(&["Id", "Comments__c"])
        .rename_id()
        .fetch(crm)
        .await?;
    let fixes = tier_label_fixes(&sessions)?;
    tracing::info!("Found {} T1 or T2 labels that can be fixed", fixes.len());

    for (id, comment) in &fixes {
        let mut fields = Map::new();
        fields.insert("Comments__c".to_string(), Value::from(comment.as_str()));
        crm.update("Intervention_Session__c", id, fields).await?;
    }
    Ok(fixes.len())
}

/// Every error flag raised by one session result.
pub fn session_errors(row: &Record) -> Vec<&'static str> {
    let program = row.str_or_empty("Program__c_Name");
    let comment = row.str_or_empty("Comments__c");
    let tutoring = programs::is_tutoring(&program);
    let minutes = row.f64("Amount_of_Time__c");
    let has_t1 = comment.contains("T1");
    let has_t2 = comment.contains("T2");

    let mut errors = Vec::new();
    if tutoring && !has_t1 && !has_t2 {
        errors.push(MISSING_TIER);
    }
    if tutoring && has_t1 && has_t2 {
        errors.push(BOTH_TIERS);
    }
    if tutoring && minutes.is_some_and(|m| m < 10.0) {
        errors.push(TOO_SHORT);
    }
    if tutoring && minutes.is_some_and(|m| m > 120.0) {
        errors.push(TOO_LONG);
    }
    if let (Some(session), Some(created)) = (
        row.date("Intervention_Session_Date__c"),
        row.date("CreatedDate"),
    ) {
        if session > created {
            errors.push(LOGGED_IN_FUTURE);
        }
    }
    if NON_SESSION_PROGRAMS.contains(&program.as_str()) {
        errors.push(WRONG_SECTION);
    }
    errors
}

/// Flags session results, drops accepted session ids and shapes the report.
pub fn error_table(results: Table, accepted: &HashSet<String>) -> Table {
    let renames: Vec<(&str, &str)> = REPORT_COLUMNS.to_vec();
    let headers: Vec<&str> = REPORT_COLUMNS.iter().map(|(_, friendly)| *friendly).collect();

    results
        .map_rows(|row| {
            for column in ["Intervention_Session_Date__c", "CreatedDate"] {
                if let Some(date) = row.date(column) {
                    row.set(column, date.to_string());
                }
            }
        })
        .with_column("Error", |row| {
            let errors = session_errors(row);
            if errors.is_empty() {
                Value::Null
            } else {
                Value::from(errors.join(" & "))
            }
        })
        .filter(|row| {
            !row.is_null("Error")
                && !row
                    .str("Intervention_Session__c_Name")
                    .is_some_and(|id| accepted.contains(&id))
        })
        .rename(&renames)
        .select(&headers)
        .sort_by(&headers)
}

/// Session ids in the `SESSION_ID` column of the accepted-errors workbook.
pub fn accepted_session_ids(path: &Path) -> Result<HashSet<String>> {
    Ok(workbook::read_table(path, None)?.string_set("SESSION_ID"))
}

/// Session results joined with their session, section, school, staff and
/// program.
pub async fn session_results(crm: &dyn CrmApi) -> Result<Table> {
    let results = queries::object_table(
        crm,
        "Intervention_Session_Result__c",
        &[
            "Amount_of_Time__c",
            "IsDeleted",
            "Intervention_Session_Date__c",
            "Related_Student_s_Name__c",
            "Intervention_Session__c",
            "CreatedDate",
        ],
        None,
    )
    .await?;
    let sessions = ObjectQuery::new("Intervention_Session__c")
        .fields(&["Id", "Name", "Comments__c", "Section__c"])
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?;
    let sections = ObjectQuery::new("Section__c")
        .fields(&["Id", "School__c", "Intervention_Primary_Staff__c", "Program__c"])
        .rename_id()
        .fetch(crm)
        .await?;
    let schools = queries::school_table(crm)
        .await?
        .rename(&[("School", "School_Name__c")]);
    let staff = ObjectQuery::new("Staff__c")
        .fields(&["Id", "Name"])
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?;
    let program_df = queries::program_table(crm, &[]).await?;

    Ok(results
        .left_join(&sessions, "Intervention_Session__c", "Intervention_Session__c")
        .left_join(&sections, "Section__c", "Section__c")
        .left_join(&schools, "School__c", "School__c")
        .left_join(&staff, "Intervention_Primary_Staff__c", "Staff__c")
        .left_join(&program_df, "Program__c", "Program__c"))
}

pub async fn audit(crm: &dyn CrmApi, accepted_errors: Option<&Path>) -> Result<Table> {
    let accepted = match accepted_errors {
        Some(path) => accepted_session_ids(path)?,
        None => HashSet::new(),
    };
    let errors = error_table(session_results(crm).await?, &accepted);
    tracing::info!(
        "{} session errors ({} accepted ids excluded)",
        errors.len(),
        accepted.len()
    );
    Ok(errors)
}

pub fn report_path(root: &Path, year: &str, informal_name: &str) -> PathBuf {
    root.join(format!("{} Team Documents", informal_name))
        .join(format!("{} ToT Audit Errors - {}.xlsx", year, informal_name))
}

/// Writes one report per school team, replacing last run's file.
pub fn write_school_reports(
    errors: &Table,
    school_reference: &Table,
    root: &Path,
    year: &str,
) -> Result<Vec<PathBuf>> {
    let columns: Vec<&str> = REPORT_COLUMNS[1..].iter().map(|(_, h)| *h).collect();
    let mut written = Vec::new();
    for team in &school_reference.rows {
        let (Some(school), Some(informal)) = (team.str("School"), team.str("Informal Name")) else {
            continue;
        };
        let school_errors = errors
            .clone()
            .filter(|r| r.str("School").as_deref() == Some(school.as_str()))
            .select(&columns);

        let path = report_path(root, year, &informal);
        let mut book = TemplateWorkbook::blank("Sheet1")?;
        book.write_table("Sheet1", &school_errors, true)?;
        book.save(&path)?;
        tracing::debug!("{} errors for {}", school_errors.len(), informal);
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCrm;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn tier_typos_are_normalised() {
        let labels = TierLabels::new().unwrap();
        assert_eq!(labels.fix("tier one reading group").as_deref(), Some("T1 reading group"));
        assert_eq!(labels.fix("Teir 2, fractions").as_deref(), Some("T2, fractions"));
        assert_eq!(labels.fix("t1 and Tier Two").as_deref(), Some("T1 and T2"));
        assert_eq!(labels.fix("T1 already"), None);
        assert_eq!(labels.fix("worked on a stone model"), None);
        assert_eq!(labels.fix(""), None);
    }

    #[tokio::test]
    async fn fixed_comments_are_written_back() {
        let crm = MockCrm::new().with_records(
            "Intervention_Session__c",
            vec![
                json!({"Id": "is1", "Comments__c": "tier1 group"}),
                json!({"Id": "is2", "Comments__c": "T2 group"}),
                json!({"Id": "is3", "Comments__c": null}),
            ],
        );
        assert_eq!(fix_tier_labels(&crm).await.unwrap(), 1);
        let updates = crm.updates();
        assert_eq!(updates[0].1, "is1");
        assert_eq!(updates[0].2["Comments__c"], json!("T1 group"));
    }

    fn result(session: &str, program: &str, comment: &str, minutes: f64, date: &str) -> Record {
        Record::new()
            .with("School_Name__c", "Hope High School")
            .with("Staff__c_Name", "Ada Lovelace")
            .with("Program__c_Name", program)
            .with("Intervention_Session__c_Name", session)
            .with("Related_Student_s_Name__c", "Alan Turing")
            .with("Comments__c", comment)
            .with("Amount_of_Time__c", minutes)
            .with("Intervention_Session_Date__c", date)
            .with("CreatedDate", "2019-10-02T15:04:05.000+0000")
    }

    #[test]
    fn errors_are_flagged_and_joined() {
        let flagged = |row: Record| session_errors(&row);
        assert_eq!(
            flagged(result("IS-1", "Tutoring: Math", "fractions", 5.0, "2019-10-01")),
            vec![MISSING_TIER, TOO_SHORT]
        );
        assert_eq!(
            flagged(result("IS-2", "Tutoring: Literacy", "T1 T2", 130.0, "2019-10-03")),
            vec![BOTH_TIERS, TOO_LONG, LOGGED_IN_FUTURE]
        );
        assert_eq!(
            flagged(result("IS-3", "DESSA", "", 5.0, "2019-10-01")),
            vec![WRONG_SECTION]
        );
        assert!(flagged(result("IS-4", "Coaching: Attendance", "", 5.0, "2019-10-02")).is_empty());
    }

    #[test]
    fn error_table_excludes_clean_and_accepted_sessions() {
        let results = Table::from_rows(
            &[],
            vec![
                result("IS-2", "Tutoring: Math", "fractions", 30.0, "2019-10-01"),
                result("IS-1", "Tutoring: Math", "T1", 5.0, "2019-10-01"),
                result("IS-3", "Tutoring: Math", "T1", 30.0, "2019-10-01"),
                result("IS-4", "DESSA", "", 20.0, "2019-10-01"),
            ],
        );
        let accepted: HashSet<String> = ["IS-4".to_string()].into_iter().collect();
        let table = error_table(results, &accepted);

        assert_eq!(
            table.columns,
            vec!["School", "ACM", "Program", "Session ID", "Student", "Submission Date", "Session Date", "ToT", "Error"]
        );
        assert_eq!(table.column_strings("Session ID"), vec!["IS-1", "IS-2"]);
        assert_eq!(table.rows[0].str("Error").as_deref(), Some(TOO_SHORT));
        assert_eq!(table.rows[0].str("Submission Date").as_deref(), Some("2019-10-02"));
    }

    #[test]
    fn reports_are_written_per_team() {
        let dir = TempDir::new().unwrap();
        let errors = Table::from_rows(
            &["School", "ACM", "Session ID", "Error"],
            vec![Record::new()
                .with("School", "Hope High School")
                .with("ACM", "Ada Lovelace")
                .with("Session ID", "IS-1")
                .with("Error", TOO_SHORT)],
        );
        let reference = Table::from_rows(
            &["School", "Informal Name"],
            vec![
                Record::new()
                    .with("School", "Hope High School")
                    .with("Informal Name", "Hope"),
                Record::new()
                    .with("School", "Lake Elementary")
                    .with("Informal Name", "Lake"),
            ],
        );

        let written = write_school_reports(&errors, &reference, dir.path(), "SY20").unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            written[0],
            dir.path().join("Hope Team Documents").join("SY20 ToT Audit Errors - Hope.xlsx")
        );

        let hope = workbook::read_table(&written[0], None).unwrap();
        assert!(!hope.has_column("School"));
        assert_eq!(hope.column_strings("Session ID"), vec!["IS-1"]);
        let lake = workbook::read_table(&written[1], None).unwrap();
        assert!(lake.is_empty());
    }
}
