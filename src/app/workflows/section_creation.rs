//! Section creation: plans which sections are missing, creates them through
//! the section form and deactivates sections of unused programs.

use crate::adapters::browser::{BrowserSession, CrmBrowser};
use crate::adapters::workbook;
use crate::app::workflows::programs::{self, SECTION_PROGRAMS};
use crate::core::batch::{BatchAction, BatchReport, BatchRunner, InterruptSignal, ItemOutcome};
use crate::core::queries;
use crate::core::soql;
use crate::domain::model::{Record, Table};
use crate::domain::ports::CrmApi;
use crate::pages::SectionForm;
use crate::utils::error::{OpsError, Result};
use crate::utils::validation::FORM_DATE_FORMAT;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

pub const INPUT_FILE: &str = "section-creator-input.xlsx";
pub const INPUT_SHEET: &str = "Sections";

pub const SETTINGS: [&str; 3] = ["In School", "Extended Learning", "Curriculum"];

/// Columns of the section-creator worklist, in order.
pub const WORKLIST_COLUMNS: [&str; 7] = [
    "School",
    "ACM",
    "SectionName",
    "In_School_or_Extended_Learning",
    "Start_Date",
    "End_Date",
    "Target_Dosage",
];

const ACADEMIC_TARGET_DOSAGE: i64 = 900;

fn form_date(field: &str, value: &str) -> Result<String> {
    let date = NaiveDate::parse_from_str(value.trim(), FORM_DATE_FORMAT)
        .ok()
        .or_else(|| crate::domain::model::parse_date(value))
        .ok_or_else(|| {
            OpsError::validation(format!("{} '{}' is not a MM/DD/YYYY date", field, value))
        })?;
    Ok(date.format(FORM_DATE_FORMAT).to_string())
}

/// Setting and dates shared by every planned section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub setting: String,
    pub start_date: String,
    pub end_date: String,
}

impl Schedule {
    pub fn new(setting: &str, start_date: &str, end_date: &str) -> Result<Self> {
        if !SETTINGS.contains(&setting) {
            return Err(OpsError::validation(format!(
                "Setting '{}' must be one of: {}",
                setting,
                SETTINGS.join(", ")
            )));
        }
        Ok(Self {
            setting: setting.to_string(),
            start_date: form_date("start date", start_date)?,
            end_date: form_date("end date", end_date)?,
        })
    }

    fn with_setting(&self, setting: &str) -> Self {
        Self {
            setting: setting.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub school: String,
    pub staff: String,
    pub program: String,
    pub setting: String,
    pub start_date: String,
    pub end_date: String,
    pub nickname: Option<String>,
}

/// Result of a creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Creation {
    Created,
    Existing(String),
}

impl Section {
    pub fn new(
        school: &str,
        staff: &str,
        program: &str,
        setting: &str,
        start_date: &str,
        end_date: &str,
        nickname: Option<&str>,
    ) -> Result<Self> {
        if !SECTION_PROGRAMS.contains(&program) {
            return Err(OpsError::validation(format!(
                "'{}' is not a program sections can be created for",
                program
            )));
        }
        let schedule = Schedule::new(setting, start_date, end_date)?;
        Ok(Self {
            school: school.trim().to_string(),
            staff: staff.trim().to_string(),
            program: program.to_string(),
            setting: schedule.setting,
            start_date: schedule.start_date,
            end_date: schedule.end_date,
            nickname: nickname
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        })
    }

    /// Builds a section from a worklist row.
    pub fn from_record(record: &Record) -> Result<Self> {
        let required = |column: &str| {
            record
                .str(column)
                .ok_or_else(|| OpsError::validation(format!("Missing {}", column)))
        };
        Self::new(
            &required("School")?,
            &required("ACM")?,
            &required("SectionName")?,
            &required("In_School_or_Extended_Learning")?,
            &required("Start_Date")?,
            &required("End_Date")?,
            record.str("Nickname").as_deref(),
        )
    }

    pub fn exists_query(&self) -> String {
        format!(
            "SELECT Id FROM Section__c WHERE Program__r.Name = {} \
             AND Intervention_Primary_Staff__r.Name = {} AND School__r.Name = {}",
            soql::quote(&self.program),
            soql::quote(&self.staff),
            soql::quote(&self.school)
        )
    }

    /// Id of an existing section for the same program, staff member and
    /// school.
    pub async fn check_exists(&self, crm: &dyn CrmApi) -> Result<Option<String>> {
        let records = crm.query_all(&self.exists_query()).await?;
        Ok(records.first().and_then(|r| r.str("Id")))
    }

    /// Creates the section through the form unless it already exists.
    pub async fn create(&self, crm: &dyn CrmApi, browser: &BrowserSession) -> Result<Creation> {
        if let Some(id) = self.check_exists(crm).await? {
            tracing::info!(
                "{} section already exists for {}: {}",
                self.program,
                self.staff,
                id
            );
            return Ok(Creation::Existing(id));
        }

        let form = SectionForm::new(browser);
        form.open().await?;
        form.select_school(&self.school).await?;
        form.select_program(&self.program).await?;
        form.select_staff(&self.staff).await?;
        form.set_dates(&self.start_date, &self.end_date).await?;
        form.select_setting(&self.setting).await?;
        form.save().await?;
        tracing::info!("Created {} section for {}", self.program, self.staff);

        if let Some(nickname) = &self.nickname {
            form.set_nickname(nickname).await?;
        }
        Ok(Creation::Created)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} ({})", self.staff, self.program, self.school)
    }
}

pub fn read_worklist(path: &Path) -> Result<Vec<Section>> {
    let table = workbook::read_table(path, None)?;
    table
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            Section::from_record(row).map_err(|e| {
                OpsError::validation(format!("{} row {}: {}", path.display(), i + 2, e))
            })
        })
        .collect()
}

pub fn write_worklist(path: &Path, worklist: &Table) -> Result<()> {
    workbook::write_table(path, INPUT_SHEET, worklist)?;
    tracing::info!("Wrote {} planned sections to {}", worklist.len(), path.display());
    Ok(())
}

/// Renames planner columns to the worklist layout and stamps the schedule.
fn to_worklist(table: Table, schedule: &Schedule, target_dosage: i64) -> Table {
    let start = schedule.start_date.clone();
    let end = schedule.end_date.clone();
    let setting = schedule.setting.clone();
    table
        .rename(&[("Staff__c_Name", "ACM"), ("Program__c_Name", "SectionName")])
        .select(&["School", "ACM", "SectionName"])
        .with_column("In_School_or_Extended_Learning", |_| Value::from(setting.clone()))
        .with_column("Start_Date", |_| Value::from(start.clone()))
        .with_column("End_Date", |_| Value::from(end.clone()))
        .with_column("Target_Dosage", |_| Value::from(target_dosage))
        .sort_by(&["School", "ACM", "SectionName"])
}

fn section_keys(sections: &Table) -> HashSet<String> {
    sections
        .rows
        .iter()
        .map(|r| {
            format!(
                "{}_{}",
                r.str_or_empty("Intervention_Primary_Staff__c"),
                r.str_or_empty("Program__c_Name")
            )
        })
        .collect()
}

/// Tutoring sections named in the staff deployment sheet that do not exist
/// yet. `deployment` has `ACM Name (First Last)`, `Related IA (ELA/Math)`
/// and `ACM ID`.
pub fn plan_academic(
    deployment: &Table,
    sections: &Table,
    staff: &Table,
    schedule: &Schedule,
) -> Table {
    let existing = section_keys(sections);
    let mut planned = Table::new(vec![
        "Staff__c_Name".to_string(),
        "Staff__c".to_string(),
        "Program__c_Name".to_string(),
    ]);
    for row in &deployment.rows {
        let Some(name) = row.str("ACM Name (First Last)") else {
            continue;
        };
        let subjects = row.str_or_empty("Related IA (ELA/Math)").trim().to_uppercase();
        let staff_id = row.str_or_empty("ACM ID");
        for (subject, program) in [
            ("MATH", programs::TUTORING_MATH),
            ("ELA", programs::TUTORING_LITERACY),
        ] {
            if subjects.contains(subject) && !existing.contains(&format!("{}_{}", staff_id, program))
            {
                planned.push(
                    Record::new()
                        .with("Staff__c_Name", name.trim())
                        .with("Staff__c", staff_id.clone())
                        .with("Program__c_Name", program),
                );
            }
        }
    }

    let staff_schools = staff.clone().select(&["Staff__c_Name", "School"]);
    to_worklist(
        planned.inner_join(&staff_schools, "Staff__c_Name", "Staff__c_Name"),
        &schedule.with_setting("In School"),
        ACADEMIC_TARGET_DOSAGE,
    )
}

/// One attendance coaching and one SEL section for every Corps Member who
/// lacks it.
pub fn plan_non_academic(staff: &Table, sections: &Table, schedule: &Schedule) -> Table {
    let existing = section_keys(sections);
    let program_rows = Table::from_rows(
        &["Program__c_Name"],
        [programs::COACHING_ATTENDANCE, programs::SEL_CHECK_IN]
            .iter()
            .map(|p| Record::new().with("Program__c_Name", *p))
            .collect(),
    );
    let planned = staff
        .clone()
        .filter(|r| r.str_or_empty("Role__c").contains("Corps Member"))
        .cross_join(&program_rows)
        .filter(|r| {
            !existing.contains(&format!(
                "{}_{}",
                r.str_or_empty("Staff__c"),
                r.str_or_empty("Program__c_Name")
            ))
        });
    to_worklist(planned, schedule, 0)
}

/// Inventory sections for tutoring sections at high schools that do not
/// have their inventory counterpart yet.
pub fn plan_inventory(
    sections: &Table,
    staff: &Table,
    school_reference: &Table,
    schedule: &Schedule,
) -> Table {
    let existing = section_keys(sections);
    let high_schools: HashSet<String> = school_reference
        .clone()
        .filter(|r| r.str("GradeLevel").as_deref() == Some("High"))
        .string_set("School");

    let planned = sections
        .clone()
        .filter(|r| programs::is_tutoring(&r.str_or_empty("Program__c_Name")))
        .with_column("Program__c_Name", |r| {
            match r.str_or_empty("Program__c_Name").as_str() {
                programs::TUTORING_MATH => Value::from(programs::MATH_INVENTORY),
                _ => Value::from(programs::READING_INVENTORY),
            }
        })
        .filter(|r| {
            !existing.contains(&format!(
                "{}_{}",
                r.str_or_empty("Intervention_Primary_Staff__c"),
                r.str_or_empty("Program__c_Name")
            ))
        })
        .drop_columns(&["School__c"])
        .left_join(
            &staff.clone().select(&["Staff__c", "Staff__c_Name", "School"]),
            "Intervention_Primary_Staff__c",
            "Staff__c",
        )
        .filter(|r| r.str("School").is_some_and(|s| high_schools.contains(&s)));
    to_worklist(planned, schedule, 0)
}

/// Sections of `program` for staff in the given roles who do not have one.
/// Inventory programs go to staff holding the counterpart tutoring section.
pub fn plan_for_roles(
    program: &str,
    staff: &Table,
    sections: &Table,
    schools: Option<&[String]>,
    schedule: &Schedule,
) -> Table {
    let with_program = |name: &str| {
        sections
            .clone()
            .filter(|r| r.str("Program__c_Name").as_deref() == Some(name))
            .string_set("Intervention_Primary_Staff__c")
    };
    let holders = with_program(program);
    let candidates = match programs::inventory_counterpart(program) {
        Some(tutoring) => {
            let tutors = with_program(tutoring);
            staff
                .clone()
                .filter(|r| tutors.contains(&r.str_or_empty("Staff__c")))
        }
        None => staff.clone(),
    };

    let program = program.to_string();
    let planned = candidates
        .filter(|r| !holders.contains(&r.str_or_empty("Staff__c")))
        .filter(|r| match schools {
            Some(schools) => r.str("School").is_some_and(|s| schools.contains(&s)),
            None => true,
        })
        .with_column("Program__c_Name", |_| Value::from(program.clone()));
    to_worklist(planned, schedule, 0)
}

pub async fn academic_sections_to_create(
    crm: &dyn CrmApi,
    deployment_path: &Path,
    schedule: &Schedule,
) -> Result<Table> {
    let deployment = workbook::read_table(deployment_path, None)?;
    let sections =
        queries::section_table(crm, &[programs::TUTORING_LITERACY, programs::TUTORING_MATH])
            .await?;
    let staff = queries::staff_table(crm, None, None).await?;
    Ok(plan_academic(&deployment, &sections, &staff, schedule))
}

pub async fn non_academic_sections_to_create(
    crm: &dyn CrmApi,
    schedule: &Schedule,
) -> Result<Table> {
    let sections =
        queries::section_table(crm, &[programs::COACHING_ATTENDANCE, programs::SEL_CHECK_IN])
            .await?;
    let staff = queries::staff_table(crm, None, None).await?;
    Ok(plan_non_academic(&staff, &sections, schedule))
}

pub async fn inventory_sections_to_create(
    crm: &dyn CrmApi,
    school_reference_path: &Path,
    schedule: &Schedule,
) -> Result<Table> {
    let sections = queries::section_table(
        crm,
        &[
            programs::TUTORING_MATH,
            programs::TUTORING_LITERACY,
            programs::MATH_INVENTORY,
            programs::READING_INVENTORY,
        ],
    )
    .await?;
    let staff = queries::staff_table(crm, None, None).await?;
    let reference = queries::school_reference(school_reference_path)?;
    Ok(plan_inventory(&sections, &staff, &reference, schedule))
}

pub async fn sections_for_roles(
    crm: &dyn CrmApi,
    program: &str,
    roles: &[String],
    schools: Option<&[String]>,
    schedule: &Schedule,
) -> Result<Table> {
    if !SECTION_PROGRAMS.contains(&program) {
        return Err(OpsError::validation(format!(
            "'{}' is not a program sections can be created for",
            program
        )));
    }
    if roles.is_empty() {
        return Err(OpsError::validation("At least one staff role is needed to plan sections"));
    }
    let mut wanted = vec![program];
    if let Some(tutoring) = programs::inventory_counterpart(program) {
        wanted.push(tutoring);
    }
    let sections = queries::section_table(crm, &wanted).await?;
    let staff = queries::staff_table(crm, None, Some(roles)).await?;
    let planned = plan_for_roles(program, &staff, &sections, schools, schedule);
    if planned.is_empty() {
        tracing::info!("No {} sections to make", program);
    }
    Ok(planned)
}

/// Batch action creating one section per item.
pub struct SectionCreation<'a> {
    crm: &'a dyn CrmApi,
    browser: &'a mut CrmBrowser,
}

impl<'a> SectionCreation<'a> {
    pub fn new(crm: &'a dyn CrmApi, browser: &'a mut CrmBrowser) -> Self {
        Self { crm, browser }
    }
}

#[async_trait]
impl<'a> BatchAction<Section> for SectionCreation<'a> {
    async fn run(&mut self, section: &Section) -> Result<ItemOutcome> {
        match section.create(self.crm, self.browser.session()?).await? {
            Creation::Created => Ok(ItemOutcome::Done),
            Creation::Existing(_) => Ok(ItemOutcome::AlreadyExists),
        }
    }

    async fn recover(&mut self) -> Result<()> {
        self.browser.return_home().await
    }

    async fn reset(&mut self) -> Result<()> {
        self.browser.restart().await
    }
}

pub async fn create_all(
    crm: &dyn CrmApi,
    browser: &mut CrmBrowser,
    sections: &[Section],
    runner: &BatchRunner,
    interrupt: &InterruptSignal,
) -> BatchReport {
    tracing::info!("Creating {} sections", sections.len());
    let mut action = SectionCreation::new(crm, browser);
    runner.run(sections, &mut action, interrupt).await
}

/// Active sections of `program`: `Section__c` ids.
pub async fn active_sections(crm: &dyn CrmApi, program: &str) -> Result<Vec<String>> {
    let sections = queries::ObjectQuery::new("Section__c")
        .fields(&["Id", "Program__c", "Active__c"])
        .rename_id()
        .fetch(crm)
        .await?;
    let program_df = queries::program_table(crm, &[]).await?;
    Ok(sections
        .left_join(&program_df, "Program__c", "Program__c")
        .filter(|r| r.str("Program__c_Name").as_deref() == Some(program) && r.bool("Active__c"))
        .column_strings("Section__c"))
}

/// Sets `Active__c = false` on every active section of `program` once
/// `confirm` accepts the count. Returns the number of sections changed.
pub async fn deactivate_sections<F>(crm: &dyn CrmApi, program: &str, confirm: F) -> Result<usize>
where
    F: FnOnce(usize) -> Result<bool>,
{
    let ids = active_sections(crm, program).await?;
    tracing::info!("{} {} sections to deactivate", ids.len(), program);
    if ids.is_empty() || !confirm(ids.len())? {
        return Ok(0);
    }
    for id in &ids {
        let mut fields = Map::new();
        fields.insert("Active__c".to_string(), Value::Bool(false));
        crm.update("Section__c", id, fields).await?;
    }
    tracing::info!("Deactivated {} {} sections", ids.len(), program);
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCrm;
    use serde_json::json;

    fn schedule() -> Schedule {
        Schedule::new("In School", "09/03/2019", "06/12/2020").unwrap()
    }

    fn staff() -> Table {
        Table::from_rows(
            &["Staff__c", "Staff__c_Name", "School", "Role__c"],
            vec![
                Record::new()
                    .with("Staff__c", "st1")
                    .with("Staff__c_Name", "Ada Lovelace")
                    .with("School", "Hope High School")
                    .with("Role__c", "Corps Member"),
                Record::new()
                    .with("Staff__c", "st2")
                    .with("Staff__c_Name", "Alan Turing")
                    .with("School", "Lake Elementary")
                    .with("Role__c", "Senior Corps Member"),
                Record::new()
                    .with("Staff__c", "st3")
                    .with("Staff__c_Name", "Grace Hopper")
                    .with("School", "Lake Elementary")
                    .with("Role__c", "Impact Manager"),
            ],
        )
    }

    fn sections(rows: &[(&str, &str)]) -> Table {
        Table::from_rows(
            &["Section__c", "Intervention_Primary_Staff__c", "Program__c_Name", "School__c"],
            rows.iter()
                .enumerate()
                .map(|(i, (staff, program))| {
                    Record::new()
                        .with("Section__c", format!("a{}", i))
                        .with("Intervention_Primary_Staff__c", *staff)
                        .with("Program__c_Name", *program)
                        .with("School__c", "sch")
                })
                .collect(),
        )
    }

    #[test]
    fn section_validates_dates_setting_and_program() {
        assert!(Section::new("Hope", "Ada", "Tutoring: Math", "In School", "09/03/2019", "06/12/2020", None).is_ok());
        assert!(Section::new("Hope", "Ada", "Tutoring: Math", "In School", "2019-13-45", "06/12/2020", None).is_err());
        assert!(Section::new("Hope", "Ada", "Tutoring: Math", "Recess", "09/03/2019", "06/12/2020", None).is_err());
        assert!(Section::new("Hope", "Ada", "Chess Club", "In School", "09/03/2019", "06/12/2020", None).is_err());
    }

    #[test]
    fn worklist_rows_accept_workbook_dates() {
        let row = Record::new()
            .with("School", "Hope High School")
            .with("ACM", "Ada Lovelace")
            .with("SectionName", "DESSA")
            .with("In_School_or_Extended_Learning", "Extended Learning")
            .with("Start_Date", "2019-09-03")
            .with("End_Date", "06/12/2020")
            .with("Nickname", Value::Null);
        let section = Section::from_record(&row).unwrap();
        assert_eq!(section.start_date, "09/03/2019");
        assert_eq!(section.end_date, "06/12/2020");
        assert_eq!(section.nickname, None);
    }

    #[test]
    fn exists_query_escapes_names() {
        let section = Section::new(
            "St. Mary's Academy",
            "Conan O'Brien",
            "Tutoring: Math",
            "In School",
            "09/03/2019",
            "06/12/2020",
            None,
        )
        .unwrap();
        let query = section.exists_query();
        assert!(query.contains("Intervention_Primary_Staff__r.Name = 'Conan O\\'Brien'"));
        assert!(query.contains("School__r.Name = 'St. Mary\\'s Academy'"));
    }

    #[tokio::test]
    async fn check_exists_returns_the_section_id() {
        let crm = MockCrm::new().with_records(
            "Section__c",
            vec![json!({
                "Id": "a0S1",
                "Program__r.Name": "Tutoring: Math",
                "Intervention_Primary_Staff__r.Name": "Conan O'Brien",
                "School__r.Name": "Hope High School"
            })],
        );
        let section = Section::new(
            "Hope High School",
            "Conan O'Brien",
            "Tutoring: Math",
            "In School",
            "09/03/2019",
            "06/12/2020",
            None,
        )
        .unwrap();
        assert_eq!(section.check_exists(&crm).await.unwrap().as_deref(), Some("a0S1"));

        let other = Section {
            program: "DESSA".to_string(),
            ..section
        };
        assert_eq!(other.check_exists(&crm).await.unwrap(), None);
    }

    #[test]
    fn academic_plan_skips_existing_tutoring_sections() {
        let deployment = Table::from_rows(
            &["ACM Name (First Last)", "Related IA (ELA/Math)", "ACM ID"],
            vec![
                Record::new()
                    .with("ACM Name (First Last)", " Ada Lovelace ")
                    .with("Related IA (ELA/Math)", "ela/math")
                    .with("ACM ID", "st1"),
                Record::new()
                    .with("ACM Name (First Last)", Value::Null)
                    .with("Related IA (ELA/Math)", "Math")
                    .with("ACM ID", "st9"),
                Record::new()
                    .with("ACM Name (First Last)", "Unknown Person")
                    .with("Related IA (ELA/Math)", "Math")
                    .with("ACM ID", "st8"),
            ],
        );
        let existing = sections(&[("st1", "Tutoring: Math")]);

        let plan = plan_academic(&deployment, &existing, &staff(), &schedule());
        assert_eq!(plan.len(), 1);
        let row = &plan.rows[0];
        assert_eq!(row.str("ACM").as_deref(), Some("Ada Lovelace"));
        assert_eq!(row.str("SectionName").as_deref(), Some("Tutoring: Literacy"));
        assert_eq!(row.str("School").as_deref(), Some("Hope High School"));
        assert_eq!(row.f64("Target_Dosage"), Some(900.0));
        assert_eq!(plan.columns, WORKLIST_COLUMNS.to_vec());
    }

    #[test]
    fn non_academic_plan_pairs_corps_members_with_both_programs() {
        let existing = sections(&[("st2", "SEL Check In Check Out")]);
        let plan = plan_non_academic(&staff(), &existing, &schedule());
        let keys: Vec<(String, String)> = plan
            .rows
            .iter()
            .map(|r| (r.str_or_empty("ACM"), r.str_or_empty("SectionName")))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("Ada Lovelace".to_string(), "Coaching: Attendance".to_string()),
                ("Ada Lovelace".to_string(), "SEL Check In Check Out".to_string()),
                ("Alan Turing".to_string(), "Coaching: Attendance".to_string()),
            ]
        );
    }

    #[test]
    fn inventory_plan_only_covers_high_schools() {
        let existing = sections(&[
            ("st1", "Tutoring: Math"),
            ("st1", "Tutoring: Literacy"),
            ("st1", "Reading Inventory"),
            ("st2", "Tutoring: Math"),
        ]);
        let reference = Table::from_rows(
            &["School", "GradeLevel"],
            vec![
                Record::new()
                    .with("School", "Hope High School")
                    .with("GradeLevel", "High"),
                Record::new()
                    .with("School", "Lake Elementary")
                    .with("GradeLevel", "Elementary"),
            ],
        );
        let plan = plan_inventory(&existing, &staff(), &reference, &schedule());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.rows[0].str("ACM").as_deref(), Some("Ada Lovelace"));
        assert_eq!(plan.rows[0].str("SectionName").as_deref(), Some("Math Inventory"));
    }

    #[test]
    fn role_plan_pairs_inventory_with_tutoring_holders() {
        let existing = sections(&[("st1", "Tutoring: Math"), ("st2", "DESSA")]);
        let dessa = plan_for_roles("DESSA", &staff(), &existing, None, &schedule());
        assert_eq!(dessa.column_strings("ACM"), vec!["Ada Lovelace", "Grace Hopper"]);

        let schools = vec!["Lake Elementary".to_string()];
        let dessa = plan_for_roles("DESSA", &staff(), &existing, Some(schools.as_slice()), &schedule());
        assert_eq!(dessa.column_strings("ACM"), vec!["Grace Hopper"]);

        let inventory = plan_for_roles("Math Inventory", &staff(), &existing, None, &schedule());
        assert_eq!(inventory.column_strings("ACM"), vec!["Ada Lovelace"]);
    }

    #[test]
    fn planned_worklist_round_trips_through_the_input_workbook() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(INPUT_FILE);
        let plan = plan_non_academic(&staff(), &Table::default(), &schedule());
        write_worklist(&path, &plan).unwrap();

        let worklist = read_worklist(&path).unwrap();
        assert_eq!(worklist.len(), 4);
        assert_eq!(worklist[0].program, "Coaching: Attendance");
        assert_eq!(worklist[0].start_date, "09/03/2019");
    }

    #[tokio::test]
    async fn role_plans_need_at_least_one_role() {
        let crm = MockCrm::new();
        let err = sections_for_roles(&crm, "DESSA", &[], None, &schedule())
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::ValidationError { .. }));
        assert!(crm.queries().is_empty());
    }

    #[tokio::test]
    async fn deactivation_updates_only_active_sections_after_confirmation() {
        let crm = MockCrm::new()
            .with_records(
                "Program__c",
                vec![
                    json!({"Id": "p1", "Name": "50 Acts of Greatness"}),
                    json!({"Id": "p2", "Name": "DESSA"}),
                ],
            )
            .with_records(
                "Section__c",
                vec![
                    json!({"Id": "a1", "Program__c": "p1", "Active__c": true}),
                    json!({"Id": "a2", "Program__c": "p1", "Active__c": false}),
                    json!({"Id": "a3", "Program__c": "p2", "Active__c": true}),
                ],
            );

        let declined = deactivate_sections(&crm, "50 Acts of Greatness", |n| {
            assert_eq!(n, 1);
            Ok(false)
        })
        .await
        .unwrap();
        assert_eq!(declined, 0);
        assert!(crm.updates().is_empty());

        let changed = deactivate_sections(&crm, "50 Acts of Greatness", |_| Ok(true))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let updates = crm.updates();
        assert_eq!(updates[0].0, "Section__c");
        assert_eq!(updates[0].1, "a1");
        assert_eq!(updates[0].2["Active__c"], json!(false));
    }
}
