//! Excel trackers kept in each school team's shared folder: deployment from
//! yearly templates, validation-sheet refreshes and the weekly service
//! tracker.

use crate::adapters::TemplateWorkbook;
use crate::app::workflows::programs;
use crate::core::queries;
use crate::domain::model::Table;
use crate::domain::ports::CrmApi;
use crate::utils::error::{OpsError, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ACM_VALIDATION: &str = "ACM Validation";
pub const STUDENT_VALIDATION: &str = "Student Validation";
pub const ACM_TEMPLATE: &str = "ACM Template";
pub const ACM_ROLLUP: &str = "ACM Rollup";

/// Staff listed in tracker dropdowns.
pub const CORPS_ROLES: [&str; 3] = [
    "Corps Member",
    "Second Year Corps Member",
    "Senior Corps Team Leader",
];

const ROLLUP_HEADERS: [&str; 12] = [
    "Individual__c",
    "ACM",
    "Date",
    "Role",
    "Coaching Cycle",
    "Subject",
    "Focus",
    "Strategy/Skill",
    "Notes",
    "Action Steps",
    "Completed?",
    "Followed Up",
];

/// Coaching-log sheets that are not per-staff logs.
const NON_ACM_SHEETS: [&str; 7] = [
    "Dev Tracker",
    "Dev Map",
    ACM_TEMPLATE,
    ACM_VALIDATION,
    ACM_ROLLUP,
    "Calendar Validation",
    "Log Validation",
];

const ROLLUP_BLOCK: u32 = 300;
const ROLLUP_LAST_ROW: u32 = 3002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerKind {
    Attendance,
    Leadership,
    CoachingLog,
    WeeklyService,
}

impl TrackerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TrackerKind::Attendance => "Attendance Tracker",
            TrackerKind::Leadership => "Leadership Tracker",
            TrackerKind::CoachingLog => "Coaching Log",
            TrackerKind::WeeklyService => "Weekly Service Tracker",
        }
    }

    /// Team folder suffix: `<Informal Name> <folder>`.
    pub fn folder(&self) -> &'static str {
        match self {
            TrackerKind::Attendance | TrackerKind::WeeklyService => "Team Documents",
            TrackerKind::Leadership | TrackerKind::CoachingLog => "Leadership Team Documents",
        }
    }

    pub fn extension(&self) -> &'static str {
        ".xlsx"
    }

    /// Programs whose students fill the student dropdown. Empty means all.
    pub fn student_programs(&self) -> &'static [&'static str] {
        match self {
            TrackerKind::Attendance => &[programs::COACHING_ATTENDANCE],
            _ => &[],
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrackerKind {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "attendance" | "attendance tracker" => Ok(TrackerKind::Attendance),
            "leadership" | "leadership tracker" => Ok(TrackerKind::Leadership),
            "coaching-log" | "coaching log" => Ok(TrackerKind::CoachingLog),
            "service" | "weekly service tracker" => Ok(TrackerKind::WeeklyService),
            other => Err(OpsError::validation(format!("Unknown tracker kind '{}'", other))),
        }
    }
}

/// A school team from the school reference workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolTeam {
    pub school: String,
    pub informal_name: String,
}

pub fn school_teams(reference: &Table) -> Vec<SchoolTeam> {
    reference
        .rows
        .iter()
        .filter_map(|r| {
            Some(SchoolTeam {
                school: r.str("School")?,
                informal_name: r.str("Informal Name")?,
            })
        })
        .collect()
}

/// One kind of tracker across every school team.
#[derive(Debug, Clone)]
pub struct TrackerSet {
    pub kind: TrackerKind,
    pub year: String,
    pub root: PathBuf,
    pub templates_dir: PathBuf,
    pub teams: Vec<SchoolTeam>,
    /// Creates missing team folders; used when `root` is a scratch folder.
    pub create_folders: bool,
}

impl TrackerSet {
    pub fn template_path(&self) -> PathBuf {
        self.templates_dir
            .join(format!("{} {} Template.xlsx", self.year, self.kind.name()))
    }

    pub fn tracker_path(&self, team: &SchoolTeam) -> PathBuf {
        tracker_path(&self.root, self.kind, &self.year, &team.informal_name)
    }

    pub fn team(&self, informal_name: &str) -> Result<&SchoolTeam> {
        self.teams
            .iter()
            .find(|t| t.informal_name == informal_name)
            .ok_or_else(|| {
                OpsError::validation(format!("'{}' is not in the school reference", informal_name))
            })
    }

    fn ensure_folder(&self, path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) if !parent.exists() => {
                if self.create_folders {
                    std::fs::create_dir_all(parent)?;
                    Ok(())
                } else {
                    Err(OpsError::processing(format!(
                        "Team folder {} does not exist",
                        parent.display()
                    )))
                }
            }
            _ => Ok(()),
        }
    }
}

pub fn tracker_path(root: &Path, kind: TrackerKind, year: &str, informal_name: &str) -> PathBuf {
    root.join(format!("{} {}", informal_name, kind.folder())).join(format!(
        "{} {} - {}{}",
        year,
        kind.name(),
        informal_name,
        kind.extension()
    ))
}

/// Staff dropdown rows: `Individual__c`, "First L." display name, full name.
pub fn staff_validation_rows(staff: &Table) -> Table {
    staff
        .clone()
        .with_column("First_Name_Staff__c", |r| {
            let initial: String = r
                .str_or_empty("Staff_Last_Name__c")
                .chars()
                .take(1)
                .collect();
            Value::from(format!("{} {}.", r.str_or_empty("First_Name_Staff__c"), initial))
        })
        .sort_by(&["First_Name_Staff__c"])
        .select(&["Individual__c", "First_Name_Staff__c", "Staff__c_Name"])
}

/// Student dropdown rows: name and id, sorted by name.
pub fn student_validation_rows(enrollments: &Table) -> Table {
    enrollments
        .clone()
        .sort_by(&["Student_Name__c"])
        .select(&["Student_Name__c", "Student__c"])
}

/// Dropdown sources for one school's tracker.
#[derive(Debug, Clone, Default)]
pub struct ValidationData {
    pub staff: Table,
    pub students: Table,
}

pub async fn validation_data(
    crm: &dyn CrmApi,
    kind: TrackerKind,
    school: &str,
) -> Result<ValidationData> {
    let schools = vec![school.to_string()];
    let roles: Vec<String> = CORPS_ROLES.iter().map(|r| r.to_string()).collect();
    let staff = queries::staff_table(crm, Some(schools.as_slice()), Some(roles.as_slice())).await?;
    let students = queries::student_section_staff_table(
        crm,
        kind.student_programs(),
        Some(schools.as_slice()),
    )
    .await?;
    Ok(ValidationData {
        staff: staff_validation_rows(&staff),
        students: student_validation_rows(&students),
    })
}

fn needs_validation(book: &TemplateWorkbook) -> bool {
    book.has_sheet(ACM_VALIDATION) || book.has_sheet(STUDENT_VALIDATION)
}

/// Rewrites the dropdown sheets present in `book`. Coaching logs also get a
/// log sheet per new staff member and a refreshed rollup.
pub fn apply_validation(
    book: &mut TemplateWorkbook,
    kind: TrackerKind,
    data: &ValidationData,
) -> Result<()> {
    if book.has_sheet(ACM_VALIDATION) {
        book.clear_sheet(ACM_VALIDATION)?;
        book.write_table(ACM_VALIDATION, &data.staff, false)?;
        if kind == TrackerKind::CoachingLog {
            add_staff_log_sheets(book, &data.staff)?;
            fill_acm_rollup(book)?;
        }
    }
    if book.has_sheet(STUDENT_VALIDATION) {
        book.clear_sheet(STUDENT_VALIDATION)?;
        book.write_table(STUDENT_VALIDATION, &data.students, false)?;
    }
    Ok(())
}

fn add_staff_log_sheets(book: &mut TemplateWorkbook, staff: &Table) -> Result<()> {
    book.clear(ACM_TEMPLATE, "A1,A3:J300")?;
    let mut existing: HashSet<String> =
        book.sheet_names().iter().map(|n| n.to_lowercase()).collect();
    for row in &staff.rows {
        let display = row.str_or_empty("First_Name_Staff__c");
        if display.is_empty() || existing.contains(&display.to_lowercase()) {
            continue;
        }
        book.copy_sheet(ACM_TEMPLATE, &display)?;
        book.set_value(&display, "A1", &Value::from(row.str_or_empty("Staff__c_Name")))?;
        existing.insert(display.to_lowercase());
    }
    Ok(())
}

/// Staff log sheets of a coaching log, in workbook order.
pub fn acm_sheets(book: &TemplateWorkbook) -> Vec<String> {
    book.sheet_names()
        .into_iter()
        .filter(|name| !NON_ACM_SHEETS.contains(&name.as_str()))
        .filter(|name| !(1..=8).any(|i| *name == format!("Sheet{}", i)))
        .collect()
}

/// Rebuilds the rollup: one 300-row block of formulas per staff sheet.
pub fn fill_acm_rollup(book: &mut TemplateWorkbook) -> Result<()> {
    book.clear(ACM_ROLLUP, "A:N")?;
    let headers: Vec<Value> = ROLLUP_HEADERS.iter().map(|h| Value::from(*h)).collect();
    book.write_rows(ACM_ROLLUP, "A1", &[headers])?;

    for row in 2..=ROLLUP_LAST_ROW {
        book.set_formula(
            ACM_ROLLUP,
            1,
            row,
            &format!(
                "=INDEX('{v}'!$A:$A, MATCH($B{row}, '{v}'!$C:$C, 0))",
                v = ACM_VALIDATION,
                row = row
            ),
        )?;
    }

    let mut start = 2;
    for sheet in acm_sheets(book) {
        let quoted = sheet.replace('\'', "''");
        for offset in 0..ROLLUP_BLOCK {
            let row = start + offset;
            book.set_formula(ACM_ROLLUP, 2, row, &format!("='{}'!$A$1", quoted))?;
            // C..L mirror columns A..J of the staff sheet from row 3 down.
            for col in 3..=12 {
                let source = format!(
                    "{}{}",
                    crate::adapters::workbook::column_letters(col - 2),
                    3 + offset
                );
                book.set_formula(ACM_ROLLUP, col, row, &format!("='{}'!{}", quoted, source))?;
            }
        }
        start += ROLLUP_BLOCK;
    }
    Ok(())
}

fn open_template(set: &TrackerSet) -> Result<TemplateWorkbook> {
    let template = set.template_path();
    if !template.exists() {
        return Err(OpsError::processing(format!(
            "Template {} not found",
            template.display()
        )));
    }
    TemplateWorkbook::open(&template)
}

/// Deploys the tracker for one team from the template. Returns the path
/// written.
pub async fn deploy_one(crm: &dyn CrmApi, set: &TrackerSet, team: &SchoolTeam) -> Result<PathBuf> {
    if set.kind == TrackerKind::WeeklyService {
        return deploy_service_tracker(crm, set, team).await;
    }
    let path = set.tracker_path(team);
    tracing::info!("Deploying {}", path.display());

    let mut book = open_template(set)?;
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let first = book.first_sheet_name()?;
    book.clear(&first, "A1")?;
    book.set_value(&first, "A1", &Value::from(title))?;

    if needs_validation(&book) {
        let data = validation_data(crm, set.kind, &team.school).await?;
        apply_validation(&mut book, set.kind, &data)?;
    }

    set.ensure_folder(&path)?;
    book.save(&path)?;
    Ok(path)
}

/// Deploys every team's tracker once `confirm` accepts the overwrite. A
/// team that fails is logged and skipped.
pub async fn deploy_all<F>(crm: &dyn CrmApi, set: &TrackerSet, confirm: F) -> Result<Vec<PathBuf>>
where
    F: FnOnce(&str) -> Result<bool>,
{
    let prompt = format!("This will overwrite {}s. Are you sure?", set.kind.name());
    if !confirm(&prompt)? {
        tracing::info!("Deployment cancelled");
        return Ok(Vec::new());
    }
    let mut written = Vec::new();
    for team in &set.teams {
        match deploy_one(crm, set, team).await {
            Ok(path) => written.push(path),
            Err(e) if e.failure_kind().is_fatal() => return Err(e),
            Err(e) => tracing::error!("❌ {} for {} failed: {}", set.kind, team.informal_name, e),
        }
    }
    tracing::info!("Deployed {} of {} {}s", written.len(), set.teams.len(), set.kind);
    Ok(written)
}

/// Refreshes the dropdown sheets of every deployed tracker in place.
pub async fn update_validation_sheets(crm: &dyn CrmApi, set: &TrackerSet) -> Result<Vec<PathBuf>> {
    let mut updated = Vec::new();
    for team in &set.teams {
        let path = set.tracker_path(team);
        if !path.exists() {
            tracing::warn!("No {} at {}", set.kind, path.display());
            continue;
        }
        tracing::info!("Updating {}", path.display());
        let mut book = TemplateWorkbook::open(&path)?;
        if !needs_validation(&book) {
            continue;
        }
        let data = validation_data(crm, set.kind, &team.school).await?;
        apply_validation(&mut book, set.kind, &data)?;
        book.save(&path)?;
        updated.push(path);
    }
    Ok(updated)
}

/// Active enrollments shaped for the service tracker: summed dosage per
/// student program, short program names, sorted by staff.
pub fn service_rows(enrollments: &Table) -> Table {
    let dosage = enrollments.group_sum("Student_Program__c", "Dosage_to_Date__c");
    enrollments
        .clone()
        .filter(|r| r.bool("Active__c") && r.is_null("Enrollment_End_Date__c"))
        .with_column("Program__c_Name", |r| {
            let program = r.str_or_empty("Program__c_Name");
            Value::from(match program.as_str() {
                programs::TUTORING_MATH => "Math".to_string(),
                programs::TUTORING_LITERACY => "ELA".to_string(),
                _ => program,
            })
        })
        .with_column("Dosage_to_Write", |r| {
            let total = r
                .str("Student_Program__c")
                .and_then(|k| dosage.get(&k).copied())
                .unwrap_or(0.0);
            Value::from(format!("{}\r\n{}", total as i64, r.str_or_empty("Program__c_Name")))
        })
        .sort_by(&[
            "School_Reference_Id__c",
            "Staff__c_Name",
            "Program__c_Name",
            "Student_Grade__c",
            "Student_Name__c",
        ])
        .select(&[
            "School_Reference_Id__c",
            "Staff__c_Name",
            "Program__c_Name",
            "Student_Name__c",
            "Dosage_to_Write",
        ])
}

fn cells(table: &Table, columns: &[&str], skip: usize, take: usize) -> Vec<Vec<Value>> {
    table
        .rows
        .iter()
        .skip(skip)
        .take(take)
        .map(|r| columns.iter().map(|c| Value::from(r.str_or_empty(c))).collect())
        .collect()
}

/// Fills the template's input sheets for one staff member. Returns
/// warnings for caseloads that do not fit.
pub fn fill_service_sheets(
    book: &mut TemplateWorkbook,
    acm: &str,
    rows: &Table,
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    book.set_value("Header", "A1", &Value::from(acm))?;

    let course = rows.clone().filter(|r| {
        matches!(r.str("Program__c_Name").as_deref(), Some("Math") | Some("ELA"))
    });
    if course.len() > 12 {
        warnings.push(format!("More than 12 Math/ELA students for {}", acm));
    }
    book.clear("Course Performance", "B4:C15")?;
    book.write_rows(
        "Course Performance",
        "B4",
        &cells(&course, &["Student_Name__c", "Dosage_to_Write"], 0, 12),
    )?;

    let sel = rows
        .clone()
        .filter(|r| r.str_or_empty("Program__c_Name").contains("SEL"));
    if sel.len() > 6 {
        warnings.push(format!("More than 6 SEL students for {}", acm));
    }
    book.clear("SEL", "B5:B10")?;
    book.write_rows("SEL", "B5", &cells(&sel, &["Student_Name__c"], 0, 6))?;

    let attendance = rows
        .clone()
        .filter(|r| r.str_or_empty("Program__c_Name").contains("Attendance"));
    if attendance.len() > 6 {
        warnings.push(format!("More than 6 Attendance students for {}", acm));
    }
    book.clear("Attendance CICO", "B4:B6, F4:F6")?;
    book.write_rows("Attendance CICO", "B4", &cells(&attendance, &["Student_Name__c"], 0, 3))?;
    book.write_rows("Attendance CICO", "F4", &cells(&attendance, &["Student_Name__c"], 3, 3))?;

    for warning in &warnings {
        tracing::warn!("{}", warning);
    }
    Ok(warnings)
}

const SERVICE_SHEETS: [(&str, &str); 3] = [
    ("Course Performance", "CP"),
    ("SEL", "SEL"),
    ("Attendance CICO", "ATT"),
];

fn sheet_name(acm: &str, suffix: &str) -> String {
    let room = 31 - suffix.len() - 1;
    let short: String = acm.chars().take(room).collect();
    format!("{} {}", short.trim_end(), suffix)
}

/// One workbook per school: a summary sheet plus the filled input sheets
/// of every staff member.
pub fn build_service_workbook(template: &Path, rows: &Table) -> Result<TemplateWorkbook> {
    let mut filled = TemplateWorkbook::open(template)?;
    let mut school_book = TemplateWorkbook::blank("Summary")?;
    let mut summary = vec![vec![
        Value::from("ACM"),
        Value::from("Students"),
        Value::from("Warnings"),
    ]];

    for (acm, acm_rows) in rows.group_by("Staff__c_Name") {
        if acm.is_empty() {
            continue;
        }
        let warnings = fill_service_sheets(&mut filled, &acm, &acm_rows)?;
        for (sheet, suffix) in SERVICE_SHEETS {
            school_book.import_sheet(&filled, sheet, &sheet_name(&acm, suffix))?;
        }
        summary.push(vec![
            Value::from(acm.as_str()),
            Value::from(acm_rows.len()),
            Value::from(warnings.join("; ")),
        ]);
    }
    school_book.write_rows("Summary", "A1", &summary)?;
    Ok(school_book)
}

async fn deploy_service_tracker(
    crm: &dyn CrmApi,
    set: &TrackerSet,
    team: &SchoolTeam,
) -> Result<PathBuf> {
    let path = set.tracker_path(team);
    tracing::info!("Deploying {}", path.display());

    let schools = [team.school.clone()];
    let enrollments = queries::student_section_staff_table(
        crm,
        &[
            programs::COACHING_ATTENDANCE,
            programs::SEL_CHECK_IN,
            programs::TUTORING_LITERACY,
            programs::TUTORING_MATH,
        ],
        Some(&schools[..]),
    )
    .await?;
    let rows = service_rows(&enrollments);
    let template = set.template_path();
    let book = build_service_workbook(&template, &rows)?;

    set.ensure_folder(&path)?;
    book.save(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Record;
    use crate::testing::MockCrm;
    use serde_json::json;
    use tempfile::TempDir;

    fn teams() -> Vec<SchoolTeam> {
        vec![SchoolTeam {
            school: "Hope High School".to_string(),
            informal_name: "Hope".to_string(),
        }]
    }

    #[test]
    fn tracker_paths_follow_team_folders() {
        let path = tracker_path(Path::new("/z"), TrackerKind::CoachingLog, "SY20", "Hope");
        assert_eq!(
            path,
            Path::new("/z/Hope Leadership Team Documents/SY20 Coaching Log - Hope.xlsx")
        );
        assert_eq!("service".parse::<TrackerKind>().unwrap(), TrackerKind::WeeklyService);
        assert!("pdf".parse::<TrackerKind>().is_err());
    }

    #[test]
    fn staff_rows_use_first_name_and_initial() {
        let staff = Table::from_rows(
            &[],
            vec![
                Record::new()
                    .with("Individual__c", "ind2")
                    .with("First_Name_Staff__c", "Grace")
                    .with("Staff_Last_Name__c", "Hopper")
                    .with("Staff__c_Name", "Grace Hopper"),
                Record::new()
                    .with("Individual__c", "ind1")
                    .with("First_Name_Staff__c", "Ada")
                    .with("Staff_Last_Name__c", "Lovelace")
                    .with("Staff__c_Name", "Ada Lovelace"),
            ],
        );
        let rows = staff_validation_rows(&staff);
        assert_eq!(rows.column_strings("First_Name_Staff__c"), vec!["Ada L.", "Grace H."]);
        assert_eq!(rows.columns, vec!["Individual__c", "First_Name_Staff__c", "Staff__c_Name"]);
    }

    fn coaching_template(dir: &Path) -> PathBuf {
        let mut book = TemplateWorkbook::blank("Dev Tracker").unwrap();
        for sheet in [ACM_TEMPLATE, ACM_VALIDATION, ACM_ROLLUP, "Dev Map"] {
            book.add_sheet(sheet).unwrap();
        }
        book.set_value("Dev Tracker", "A1", &Value::from("template title")).unwrap();
        book.set_value(ACM_TEMPLATE, "A3", &Value::from("leftover")).unwrap();
        let path = dir.join("templates").join("SY20 Coaching Log Template.xlsx");
        book.save(&path).unwrap();
        path
    }

    fn crm() -> MockCrm {
        MockCrm::new()
            .with_records("Account", vec![json!({"Id": "sch1", "Name": "Hope High School"})])
            .with_records(
                "Staff__c",
                vec![
                    json!({"Id": "st1", "Name": "Ada Lovelace", "Individual__c": "ind1",
                           "First_Name_Staff__c": "Ada", "Staff_Last_Name__c": "Lovelace",
                           "Role__c": "Corps Member", "Organization__c": "sch1"}),
                    json!({"Id": "st2", "Name": "Grace Hopper", "Individual__c": "ind2",
                           "First_Name_Staff__c": "Grace", "Staff_Last_Name__c": "Hopper",
                           "Role__c": "Impact Manager", "Organization__c": "sch1"}),
                ],
            )
            .with_records("Program__c", vec![json!({"Id": "p1", "Name": "Tutoring: Math"})])
            .with_records("Student_Section__c", vec![])
            .with_records("Section__c", vec![])
    }

    #[tokio::test]
    async fn coaching_log_deploys_with_staff_sheets_and_rollup() {
        let dir = TempDir::new().unwrap();
        coaching_template(dir.path());
        let set = TrackerSet {
            kind: TrackerKind::CoachingLog,
            year: "SY20".to_string(),
            root: dir.path().join("shared"),
            templates_dir: dir.path().join("templates"),
            teams: teams(),
            create_folders: true,
        };

        let written = deploy_all(&crm(), &set, |_| Ok(true)).await.unwrap();
        assert_eq!(written.len(), 1);

        let book = TemplateWorkbook::open(&written[0]).unwrap();
        assert_eq!(book.value("Dev Tracker", "A1").unwrap(), "SY20 Coaching Log - Hope");
        assert_eq!(book.value(ACM_VALIDATION, "B1").unwrap(), "Ada L.");
        assert_eq!(book.value(ACM_VALIDATION, "A2").unwrap(), "");
        assert_eq!(acm_sheets(&book), vec!["Ada L."]);
        assert_eq!(book.value("Ada L.", "A1").unwrap(), "Ada Lovelace");
        assert_eq!(book.value("Ada L.", "A3").unwrap(), "");
        assert_eq!(book.value(ACM_ROLLUP, "B1").unwrap(), "ACM");
    }

    #[tokio::test]
    async fn declined_confirmation_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let set = TrackerSet {
            kind: TrackerKind::Attendance,
            year: "SY20".to_string(),
            root: dir.path().to_path_buf(),
            templates_dir: dir.path().to_path_buf(),
            teams: teams(),
            create_folders: true,
        };
        let written = deploy_all(&crm(), &set, |_| Ok(false)).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn missing_team_folder_is_an_error_outside_scratch_roots() {
        let dir = TempDir::new().unwrap();
        let mut book = TemplateWorkbook::blank("Tracker").unwrap();
        book.set_value("Tracker", "A1", &Value::from("x")).unwrap();
        book.save(&dir.path().join("SY20 Leadership Tracker Template.xlsx")).unwrap();
        let set = TrackerSet {
            kind: TrackerKind::Leadership,
            year: "SY20".to_string(),
            root: dir.path().join("shared"),
            templates_dir: dir.path().to_path_buf(),
            teams: teams(),
            create_folders: false,
        };
        assert!(deploy_one(&crm(), &set, &set.teams[0]).await.is_err());
    }

    fn enrollment(staff: &str, student: &str, program: &str, dosage: f64, active: bool) -> Record {
        Record::new()
            .with("School_Reference_Id__c", "610")
            .with("Staff__c_Name", staff)
            .with("Program__c_Name", program)
            .with("Student_Program__c", format!("{}-{}", student, program))
            .with("Student_Name__c", student)
            .with("Student_Grade__c", 9)
            .with("Dosage_to_Date__c", dosage)
            .with("Active__c", active)
            .with("Enrollment_End_Date__c", Value::Null)
    }

    #[test]
    fn service_rows_sum_dosage_and_keep_active_students() {
        let table = Table::from_rows(
            &[],
            vec![
                enrollment("Ada Lovelace", "Alan", "Tutoring: Math", 120.0, true),
                enrollment("Ada Lovelace", "Alan", "Tutoring: Math", 30.0, false),
                enrollment("Ada Lovelace", "Barbara", "SEL Check In Check Out", 0.0, true),
            ],
        );
        let rows = service_rows(&table);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[0].str("Program__c_Name").as_deref(), Some("Math"));
        assert_eq!(rows.rows[0].str("Dosage_to_Write").as_deref(), Some("150\r\nMath"));
    }

    #[test]
    fn service_workbook_splits_attendance_and_warns_on_overflow() {
        let dir = TempDir::new().unwrap();
        let mut template = TemplateWorkbook::blank("Header").unwrap();
        for sheet in ["Course Performance", "SEL", "Attendance CICO", "Service Tracker"] {
            template.add_sheet(sheet).unwrap();
        }
        let template_path = dir.path().join("service.xlsx");
        template.save(&template_path).unwrap();

        let mut students: Vec<Record> = (1..=7)
            .map(|i| enrollment("Ada Lovelace", &format!("S{}", i), "Coaching: Attendance", 0.0, true))
            .collect();
        students.push(enrollment("Grace Hopper", "T1", "Tutoring: Literacy", 45.0, true));
        let rows = service_rows(&Table::from_rows(&[], students));

        let book = build_service_workbook(&template_path, &rows).unwrap();
        assert_eq!(
            book.sheet_names(),
            vec![
                "Summary",
                "Ada Lovelace CP",
                "Ada Lovelace SEL",
                "Ada Lovelace ATT",
                "Grace Hopper CP",
                "Grace Hopper SEL",
                "Grace Hopper ATT",
            ]
        );
        assert_eq!(book.value("Ada Lovelace ATT", "B6").unwrap(), "S3");
        assert_eq!(book.value("Ada Lovelace ATT", "F4").unwrap(), "S4");
        assert_eq!(book.value("Ada Lovelace ATT", "F6").unwrap(), "S6");
        assert_eq!(book.value("Grace Hopper CP", "B4").unwrap(), "T1");
        assert_eq!(book.value("Grace Hopper CP", "C4").unwrap(), "45\r\nELA");
        // previous staff member's names are cleared
        assert_eq!(book.value("Grace Hopper ATT", "B4").unwrap(), "");
        assert!(book.value("Summary", "C2").unwrap().contains("More than 6 Attendance"));
    }
}
