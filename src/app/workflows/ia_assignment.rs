//! Indicator-area assignment: works out which students qualify for an
//! indicator area from their enrollments and assessments, then assigns them
//! through the indicator-area form.

use crate::adapters::browser::CrmBrowser;
use crate::adapters::workbook;
use crate::app::workflows::programs::{self, INDICATOR_AREAS};
use crate::core::batch::{BatchAction, BatchReport, BatchRunner, InterruptSignal, ItemOutcome};
use crate::core::queries::{self, ObjectQuery};
use crate::core::soql;
use crate::domain::model::{Record, Table};
use crate::domain::ports::CrmApi;
use crate::pages::IndicatorAreaForm;
use crate::utils::error::{OpsError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

pub const ROSTER_FILE: &str = "indicator_area_roster.xlsx";
pub const ROSTER_SHEET: &str = "Roster";
pub const ROSTER_COLUMNS: [&str; 5] = ["School", "Student ID", "Grade", "Last Name", "Indicator Area"];

const SCORE_COLUMNS: [&str; 3] = [
    "X0_to_300_Scaled_Score__c",
    "Average_Daily_Attendance__c",
    "SEL_Composite_T_Score__c",
];

/// Who qualifies for the indicator area of one program.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentRule {
    pub program: &'static str,
    pub assessment: &'static str,
    pub assessed_before: Option<NaiveDate>,
    /// Students above grade 8 qualify without the assessment.
    pub high_school_exempt: bool,
    pub min_days_active: Option<i64>,
    pub min_time: Option<f64>,
    pub require_active: bool,
}

pub fn assignment_rules(cutoff: Option<NaiveDate>) -> Vec<AssignmentRule> {
    vec![
        AssignmentRule {
            program: programs::COACHING_ATTENDANCE,
            assessment: "Reporting Period ADA Tracker - ATTENDANCE",
            assessed_before: None,
            high_school_exempt: false,
            min_days_active: Some(56),
            min_time: None,
            require_active: false,
        },
        AssignmentRule {
            program: programs::SEL_CHECK_IN,
            assessment: "DESSA 40",
            assessed_before: None,
            high_school_exempt: false,
            min_days_active: Some(56),
            min_time: None,
            require_active: false,
        },
        AssignmentRule {
            program: programs::TUTORING_MATH,
            assessment: "NWEA - MATH",
            assessed_before: cutoff,
            high_school_exempt: true,
            min_days_active: None,
            min_time: Some(1.0),
            require_active: true,
        },
        AssignmentRule {
            program: programs::TUTORING_LITERACY,
            assessment: "NWEA - ELA",
            assessed_before: cutoff,
            high_school_exempt: true,
            min_days_active: None,
            min_time: Some(1.0),
            require_active: true,
        },
    ]
}

/// Assessment cutoff for a school-year label: `SY20` gives 2019-10-01.
pub fn default_cutoff(year_label: &str) -> Option<NaiveDate> {
    let digits: String = year_label.chars().filter(|c| c.is_ascii_digit()).collect();
    let year: i32 = digits.parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year - 1, 10, 1)
}

impl AssignmentRule {
    fn qualifying_students(&self, assessments: &Table) -> HashSet<String> {
        assessments
            .rows
            .iter()
            .filter(|r| r.str("Assessment Type").as_deref() == Some(self.assessment))
            .filter(|r| match self.assessed_before {
                Some(cutoff) => r.date("Date_Administered__c").is_some_and(|d| d < cutoff),
                None => true,
            })
            .filter_map(|r| r.str("Student__c"))
            .collect()
    }

    fn applies(&self, row: &Record, assessed: &HashSet<String>) -> bool {
        if row.str("Program__c_Name").as_deref() != Some(self.program) {
            return false;
        }
        let has_assessment = row
            .str("Student__c")
            .is_some_and(|s| assessed.contains(&s));
        let exempt = self.high_school_exempt && row.f64("Grade__c").is_some_and(|g| g > 8.0);
        if !(has_assessment || exempt) {
            return false;
        }
        if let Some(min) = self.min_days_active {
            if row.f64("Days Active").map_or(true, |d| d <= min as f64) {
                return false;
            }
        }
        if let Some(min) = self.min_time {
            if row.f64("Amount_of_Time__c").unwrap_or(0.0) < min {
                return false;
            }
        }
        !self.require_active || row.bool("Active__c")
    }
}

/// Collapses enrollments per student and program: earliest start, latest
/// end (open enrollments end `today`), summed time and days active.
pub fn enrollment_details(enrollments: Table, today: NaiveDate) -> Table {
    let enrollments = enrollments.with_column("Student_Program", |r| {
        Value::from(format!(
            "{}_{}",
            r.str_or_empty("Student__c"),
            r.str_or_empty("Program__c")
        ))
    });

    let mut starts: HashMap<String, NaiveDate> = HashMap::new();
    let mut ends: HashMap<String, NaiveDate> = HashMap::new();
    for row in &enrollments.rows {
        let key = row.str_or_empty("Student_Program");
        if let Some(start) = row.date("Intervention_Enrollment_Start_Date__c") {
            starts
                .entry(key.clone())
                .and_modify(|d| *d = (*d).min(start))
                .or_insert(start);
        }
        let end = row.date("Enrollment_End_Date__c").unwrap_or(today);
        ends.entry(key).and_modify(|d| *d = (*d).max(end)).or_insert(end);
    }
    let time = enrollments.group_sum("Student_Program", "Amount_of_Time__c");

    enrollments
        .with_column("Intervention_Enrollment_Start_Date__c", |r| {
            starts
                .get(&r.str_or_empty("Student_Program"))
                .map(|d| Value::from(d.to_string()))
                .unwrap_or(Value::Null)
        })
        .with_column("Enrollment_End_Date__c", |r| {
            ends.get(&r.str_or_empty("Student_Program"))
                .map(|d| Value::from(d.to_string()))
                .unwrap_or(Value::Null)
        })
        .with_column("Amount_of_Time__c", |r| {
            Value::from(time.get(&r.str_or_empty("Student_Program")).copied().unwrap_or(0.0))
        })
        .with_column("Days Active", |r| {
            match (
                r.date("Intervention_Enrollment_Start_Date__c"),
                r.date("Enrollment_End_Date__c"),
            ) {
                (Some(start), Some(end)) => Value::from((end - start).num_days()),
                _ => Value::Null,
            }
        })
}

/// Existing assignments keyed like enrollments: `Student_Program`,
/// `Indicator_Area_Type__c` (holding the program the area belongs to).
pub fn existing_assignments(
    student_areas: &Table,
    areas: &Table,
    program_df: &Table,
) -> Table {
    let areas = areas.clone().with_column("Indicator_Area_Type__c", |r| {
        r.str("Indicator_Area_Type__c")
            .and_then(|t| programs::program_for_indicator_area(&t))
            .map(Value::from)
            .unwrap_or(Value::Null)
    });
    student_areas
        .clone()
        .left_join(&areas, "Indicator_Area__c", "Indicator_Area__c")
        .left_join(program_df, "Indicator_Area_Type__c", "Program__c_Name")
        .filter(|r| r.str("Program__c").is_some())
        .with_column("Student_Program", |r| {
            Value::from(format!(
                "{}_{}",
                r.str_or_empty("Student__c"),
                r.str_or_empty("Program__c")
            ))
        })
        .select(&["Student_Program", "Indicator_Area_Type__c"])
}

/// Assessments with a positive combined score and their type names.
pub fn scored_assessments(assessments: Table, types: &Table) -> Table {
    let types = types
        .clone()
        .rename(&[("Id", "Type__c"), ("Name", "Assessment Type")]);
    assessments
        .left_join(&types, "Type__c", "Type__c")
        .drop_columns(&["Type__c"])
        .with_column("Score", |r| {
            Value::from(SCORE_COLUMNS.iter().filter_map(|c| r.f64(c)).sum::<f64>())
        })
        .filter(|r| r.f64("Score").unwrap_or(0.0) > 0.0)
}

/// The roster of indicator areas to assign.
pub fn build_roster(
    details: Table,
    existing: &Table,
    assessments: &Table,
    rules: &[AssignmentRule],
) -> Table {
    let merged = details
        .left_join(existing, "Student_Program", "Student_Program")
        .sort_by_desc("Active__c")
        .distinct_by(&["Student_Program"]);

    let assessed: Vec<(&AssignmentRule, HashSet<String>)> = rules
        .iter()
        .map(|rule| (rule, rule.qualifying_students(assessments)))
        .collect();

    merged
        .with_column("Indicator Area", |row| {
            assessed
                .iter()
                .filter(|(rule, students)| rule.applies(row, students))
                .last()
                .and_then(|(rule, _)| programs::indicator_area_for(rule.program))
                .map(Value::from)
                .unwrap_or(Value::Null)
        })
        .filter(|r| r.is_null("Indicator_Area_Type__c") && !r.is_null("Indicator Area"))
        .rename(&[
            ("Student__c", "Student ID"),
            ("Grade__c", "Grade"),
            ("Student_Last_Name__c", "Last Name"),
        ])
        .select(&ROSTER_COLUMNS)
        .sort_by(&ROSTER_COLUMNS)
}

async fn enrollments(crm: &dyn CrmApi) -> Result<Table> {
    let names: Vec<&str> = INDICATOR_AREAS.iter().map(|(p, _)| *p).collect();
    let sections = queries::section_table(crm, &names)
        .await?
        .drop_columns(&["Program__c_Name"]);
    let program_df = queries::program_table(crm, &names).await?;

    let student_sections = ObjectQuery::new("Student_Section__c")
        .fields(&[
            "Id",
            "Active__c",
            "Section__c",
            "Student__c",
            "Amount_of_Time__c",
            "Intervention_Enrollment_Start_Date__c",
            "Enrollment_End_Date__c",
        ])
        .filter(format!(
            "Program__c IN {}",
            soql::in_list(program_df.column_strings("Program__c"))
        ))
        .rename_id()
        .fetch(crm)
        .await?;

    let schools = queries::school_table(crm).await?;
    let students = ObjectQuery::new("Student__c")
        .fields(&[
            "Id",
            "Name",
            "Student_First_Name__c",
            "Student_Last_Name__c",
            "School__c",
            "Grade__c",
        ])
        .filter(format!(
            "School__c IN {}",
            soql::in_list(schools.column_strings("School__c"))
        ))
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?
        .drop_columns(&["School__c"]);

    Ok(student_sections
        .left_join(&sections, "Section__c", "Section__c")
        .left_join(&program_df, "Program__c", "Program__c")
        .left_join(&students, "Student__c", "Student__c")
        .left_join(&schools, "School__c", "School__c"))
}

async fn assignments(crm: &dyn CrmApi) -> Result<Table> {
    let student_areas = ObjectQuery::new("Indicator_Area_Student__c")
        .fields(&["Id", "Student__c", "Indicator_Area__c"])
        .rename_id()
        .fetch(crm)
        .await?;
    let areas = ObjectQuery::new("Indicator_Area__c")
        .fields(&["Id", "Indicator_Area_Type__c"])
        .rename_id()
        .fetch(crm)
        .await?;
    let program_df = queries::program_table(crm, &[]).await?;
    Ok(existing_assignments(&student_areas, &areas, &program_df))
}

async fn assessments(crm: &dyn CrmApi) -> Result<Table> {
    let assessments = ObjectQuery::new("Assesment__c")
        .fields(&[
            "Id",
            "Type__c",
            "Date_Administered__c",
            "X0_to_300_Scaled_Score__c",
            "Student__c",
            "Average_Daily_Attendance__c",
            "SEL_Composite_T_Score__c",
        ])
        .rename_id()
        .fetch(crm)
        .await?;
    let types = queries::object_table(crm, "Picklist_Value__c", &["Id", "Name"], None).await?;
    Ok(scored_assessments(assessments, &types))
}

/// Pulls enrollments, assignments and assessments and writes the roster to
/// `roster_path`.
pub async fn indicator_areas_to_assign(
    crm: &dyn CrmApi,
    cutoff: Option<NaiveDate>,
    today: NaiveDate,
    roster_path: &Path,
) -> Result<Table> {
    let details = enrollment_details(enrollments(crm).await?, today);
    let existing = assignments(crm).await?;
    let scored = assessments(crm).await?;

    let roster = build_roster(details, &existing, &scored, &assignment_rules(cutoff));
    workbook::write_table(roster_path, ROSTER_SHEET, &roster)?;
    tracing::info!(
        "{} indicator areas to assign written to {}",
        roster.len(),
        roster_path.display()
    );
    Ok(roster)
}

/// Every indicator area one student should receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentAssignments {
    pub student_id: String,
    pub school: String,
    pub grade: String,
    pub last_name: String,
    pub areas: Vec<String>,
}

impl fmt::Display for StudentAssignments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.last_name, self.student_id)
    }
}

/// Groups roster rows by student, keeping first-seen order.
pub fn group_roster(roster: &Table) -> Vec<StudentAssignments> {
    roster
        .group_by("Student ID")
        .into_iter()
        .filter(|(id, _)| !id.is_empty())
        .map(|(student_id, rows)| {
            let first = &rows.rows[0];
            StudentAssignments {
                school: first.str_or_empty("School"),
                grade: first.str_or_empty("Grade"),
                last_name: first.str_or_empty("Last Name"),
                areas: rows.column_strings("Indicator Area"),
                student_id,
            }
        })
        .collect()
}

pub fn read_roster(path: &Path) -> Result<Vec<StudentAssignments>> {
    let roster = workbook::read_table(path, None)?;
    for column in ROSTER_COLUMNS {
        if !roster.has_column(column) {
            return Err(OpsError::validation(format!(
                "{} has no '{}' column",
                path.display(),
                column
            )));
        }
    }
    Ok(group_roster(&roster))
}

/// Batch action assigning one student's indicator areas.
pub struct IndicatorAreaEnrollment<'a> {
    browser: &'a mut CrmBrowser,
    grade_offset_schools: Vec<String>,
}

impl<'a> IndicatorAreaEnrollment<'a> {
    pub fn new(browser: &'a mut CrmBrowser, grade_offset_schools: Vec<String>) -> Self {
        Self {
            browser,
            grade_offset_schools,
        }
    }
}

#[async_trait]
impl<'a> BatchAction<StudentAssignments> for IndicatorAreaEnrollment<'a> {
    async fn run(&mut self, student: &StudentAssignments) -> Result<ItemOutcome> {
        let form = IndicatorAreaForm::new(self.browser.session()?);
        form.wait_loaded().await?;
        form.select_school(&student.school).await?;

        if self.grade_offset_schools.contains(&student.school) {
            let grade: i64 = student.grade.trim().parse().map_err(|_| {
                OpsError::validation(format!("Grade '{}' is not a number", student.grade))
            })?;
            form.select_grade(&(grade + 1).to_string()).await?;
        }
        form.select_grade(&student.grade).await?;
        form.first_page().await?;

        for area in &student.areas {
            form.select_student(&student.student_id).await?;
            form.assign(area).await?;
        }
        form.save().await?;
        tracing::info!("Assigned {} to {}", student.areas.join(", "), student);
        Ok(ItemOutcome::Done)
    }

    async fn recover(&mut self) -> Result<()> {
        let session = self.browser.session()?;
        session.return_home().await?;
        IndicatorAreaForm::new(session).open().await
    }

    async fn reset(&mut self) -> Result<()> {
        self.browser.restart().await?;
        IndicatorAreaForm::new(self.browser.session()?).open().await
    }
}

pub async fn enroll_all(
    browser: &mut CrmBrowser,
    students: &[StudentAssignments],
    grade_offset_schools: Vec<String>,
    runner: &BatchRunner,
    interrupt: &InterruptSignal,
) -> Result<BatchReport> {
    IndicatorAreaForm::new(browser.session()?).open().await?;
    let mut action = IndicatorAreaEnrollment::new(browser, grade_offset_schools);
    Ok(runner.run(students, &mut action, interrupt).await)
}
