//! Data pullers over the CRM object model. Every helper returns a [`Table`]
//! whose id and name columns are renamed after the object so tables can be
//! joined on object names.

use crate::adapters::workbook;
use crate::core::soql;
use crate::domain::model::{Record, Table};
use crate::domain::ports::CrmApi;
use crate::utils::error::Result;
use serde_json::Value;
use std::path::Path;

/// Schools listed in the reference workbook that are not real school teams.
const NON_SCHOOL_TEAMS: [&str; 2] = ["CE", "Onboarding"];

/// A single-object query.
#[derive(Debug, Clone, Default)]
pub struct ObjectQuery {
    object: String,
    fields: Option<Vec<String>>,
    where_clause: Option<String>,
    rename_id: bool,
    rename_name: bool,
}

impl ObjectQuery {
    pub fn new(object: &str) -> Self {
        Self {
            object: object.to_string(),
            ..Self::default()
        }
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(soql::fields(fields));
        self
    }

    pub fn filter(mut self, where_clause: impl Into<String>) -> Self {
        self.where_clause = Some(where_clause.into());
        self
    }

    /// Renames `Id` to the object name, e.g. `Section__c`.
    pub fn rename_id(mut self) -> Self {
        self.rename_id = true;
        self
    }

    /// Renames `Name` to `<object>_Name`.
    pub fn rename_name(mut self) -> Self {
        self.rename_name = true;
        self
    }

    pub fn to_soql(&self, fields: &[String]) -> Result<String> {
        soql::select(&self.object, fields, self.where_clause.as_deref())
    }

    /// Runs the query. Without an explicit field list every field of the
    /// object is requested.
    pub async fn fetch(&self, crm: &dyn CrmApi) -> Result<Table> {
        let fields = match &self.fields {
            Some(fields) => fields.clone(),
            None => crm.describe_fields(&self.object).await?,
        };
        let query = self.to_soql(&fields)?;
        tracing::debug!("Query: {}", query);
        let records = crm.query_all(&query).await?;
        let mut table = records_to_table(&fields, records);

        let name_column = format!("{}_Name", self.object);
        if self.rename_id {
            table = table.rename(&[("Id", self.object.as_str())]);
        }
        if self.rename_name {
            table = table.rename(&[("Name", name_column.as_str())]);
        }
        Ok(table)
    }
}

fn records_to_table(fields: &[String], records: Vec<Record>) -> Table {
    let mut table = Table::new(fields.to_vec());
    for mut record in records {
        let mut row = Record::new();
        for field in fields {
            let value = record.data.remove(field).unwrap_or(Value::Null);
            row.data.insert(field.clone(), value);
        }
        table.rows.push(row);
    }
    table
}

pub async fn object_table(
    crm: &dyn CrmApi,
    object: &str,
    fields: &[&str],
    where_clause: Option<&str>,
) -> Result<Table> {
    let mut query = ObjectQuery::new(object).fields(fields);
    if let Some(clause) = where_clause {
        query = query.filter(clause);
    }
    query.fetch(crm).await
}

/// Programs by name: `Program__c`, `Program__c_Name`.
pub async fn program_table(crm: &dyn CrmApi, programs: &[&str]) -> Result<Table> {
    let mut query = ObjectQuery::new("Program__c")
        .fields(&["Id", "Name"])
        .rename_id()
        .rename_name();
    if !programs.is_empty() {
        query = query.filter(format!("Name IN {}", soql::in_list(programs)));
    }
    query.fetch(crm).await
}

/// Schools (accounts): `School__c`, `School`.
pub async fn school_table(crm: &dyn CrmApi) -> Result<Table> {
    Ok(ObjectQuery::new("Account")
        .fields(&["Id", "Name"])
        .fetch(crm)
        .await?
        .rename(&[("Id", "School__c"), ("Name", "School")]))
}

/// Sections of the given programs with their program names.
pub async fn section_table(crm: &dyn CrmApi, programs: &[&str]) -> Result<Table> {
    let program_df = program_table(crm, programs).await?;
    let program_ids = program_df.column_strings("Program__c");

    let sections = ObjectQuery::new("Section__c")
        .fields(&[
            "Id",
            "Name",
            "Intervention_Primary_Staff__c",
            "Program__c",
            "School__c",
        ])
        .filter(format!("Program__c IN {}", soql::in_list(&program_ids)))
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?;

    Ok(sections.left_join(&program_df, "Program__c", "Program__c"))
}

/// Student enrollments of the given programs joined with section staff,
/// staff names and program names. `schools` limits the result to sections
/// at those schools.
pub async fn student_section_staff_table(
    crm: &dyn CrmApi,
    programs: &[&str],
    schools: Option<&[String]>,
) -> Result<Table> {
    let program_df = program_table(crm, programs).await?;
    let program_filter = format!(
        "Program__c IN {}",
        soql::in_list(program_df.column_strings("Program__c"))
    );

    let enrollments = ObjectQuery::new("Student_Section__c")
        .fields(&[
            "Id",
            "Name",
            "Student_Program__c",
            "Program__c",
            "Section__c",
            "Active__c",
            "Enrollment_End_Date__c",
            "Student__c",
            "Student_Name__c",
            "Dosage_to_Date__c",
            "School_Reference_Id__c",
            "Student_Grade__c",
            "School__c",
        ])
        .filter(program_filter.clone())
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?;

    let sections = ObjectQuery::new("Section__c")
        .fields(&["Id", "Intervention_Primary_Staff__c"])
        .filter(program_filter)
        .rename_id()
        .fetch(crm)
        .await?;

    let staff = ObjectQuery::new("Staff__c")
        .fields(&["Id", "Name"])
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?;

    let mut table = enrollments
        .left_join(&sections, "Section__c", "Section__c")
        .left_join(&staff, "Intervention_Primary_Staff__c", "Staff__c")
        .left_join(&program_df, "Program__c", "Program__c");

    if let Some(schools) = schools {
        let school_df = school_table(crm).await?;
        table = table
            .left_join(&school_df, "School__c", "School__c")
            .filter(|r| r.str("School").is_some_and(|s| schools.contains(&s)));
    }
    Ok(table)
}

/// Staff with their school name in `School`. Role matching ignores case.
pub async fn staff_table(
    crm: &dyn CrmApi,
    schools: Option<&[String]>,
    roles: Option<&[String]>,
) -> Result<Table> {
    let school_df = school_table(crm)
        .await?
        .rename(&[("School__c", "Organization__c")]);

    let staff = ObjectQuery::new("Staff__c")
        .fields(&[
            "Id",
            "Individual__c",
            "Name",
            "First_Name_Staff__c",
            "Staff_Last_Name__c",
            "Role__c",
            "Email__c",
            "Organization__c",
        ])
        .filter(format!(
            "Organization__c IN {}",
            soql::in_list(school_df.column_strings("Organization__c"))
        ))
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await?;

    let roles: Option<Vec<String>> =
        roles.map(|roles| roles.iter().map(|r| r.to_lowercase()).collect());

    Ok(staff
        .left_join(&school_df, "Organization__c", "Organization__c")
        .filter(|r| match &roles {
            Some(roles) => r
                .str("Role__c")
                .is_some_and(|role| roles.contains(&role.to_lowercase())),
            None => true,
        })
        .filter(|r| match schools {
            Some(schools) => r.str("School").is_some_and(|s| schools.contains(&s)),
            None => true,
        }))
}

pub async fn student_table(crm: &dyn CrmApi) -> Result<Table> {
    ObjectQuery::new("Student__c")
        .fields(&[
            "Id",
            "Name",
            "Local_Student_ID__c",
            "External_Id__c",
            "School__c",
            "Grade__c",
            "Student_Last_Name__c",
        ])
        .rename_id()
        .rename_name()
        .fetch(crm)
        .await
}

/// Reads the school reference workbook: one row per school team with its
/// CRM name (`School`) and short name (`Informal Name`).
pub fn school_reference(path: &Path) -> Result<Table> {
    let table = workbook::read_table(path, None)?;
    Ok(table.filter(|r| {
        r.str("Informal Name")
            .is_some_and(|name| !NON_SCHOOL_TEAMS.contains(&name.as_str()))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCrm;
    use serde_json::json;

    fn crm() -> MockCrm {
        MockCrm::new()
            .with_records(
                "Program__c",
                vec![
                    json!({"Id": "p1", "Name": "Tutoring: Math"}),
                    json!({"Id": "p2", "Name": "Coaching: Attendance"}),
                ],
            )
            .with_records(
                "Section__c",
                vec![
                    json!({"Id": "a1", "Name": "S-1", "Intervention_Primary_Staff__c": "st1",
                           "Program__c": "p1", "School__c": "sch1"}),
                    json!({"Id": "a2", "Name": "S-2", "Intervention_Primary_Staff__c": "st2",
                           "Program__c": "p2", "School__c": "sch1"}),
                ],
            )
            .with_records(
                "Account",
                vec![
                    json!({"Id": "sch1", "Name": "Hope High School"}),
                    json!({"Id": "sch2", "Name": "Lake Elementary"}),
                ],
            )
            .with_records(
                "Staff__c",
                vec![
                    json!({"Id": "st1", "Name": "Ada Lovelace", "Role__c": "Corps Member",
                           "Organization__c": "sch1", "Email__c": "ada@example.org"}),
                    json!({"Id": "st2", "Name": "Alan Turing", "Role__c": "Impact Manager",
                           "Organization__c": "sch2", "Email__c": "alan@example.org"}),
                ],
            )
    }

    #[tokio::test]
    async fn section_table_joins_program_names() {
        let crm = crm();
        let sections = section_table(&crm, &["Tutoring: Math"]).await.unwrap();

        assert_eq!(sections.len(), 1);
        let row = &sections.rows[0];
        assert_eq!(row.str("Section__c").as_deref(), Some("a1"));
        assert_eq!(row.str("Section__c_Name").as_deref(), Some("S-1"));
        assert_eq!(row.str("Program__c_Name").as_deref(), Some("Tutoring: Math"));

        let queries = crm.queries();
        assert!(queries[0].contains("FROM Program__c WHERE Name IN ('Tutoring: Math')"));
        assert!(queries[1].contains("Program__c IN ('p1')"));
    }

    #[tokio::test]
    async fn staff_table_filters_roles_case_insensitively() {
        let crm = crm();
        let roles = vec!["corps member".to_string()];
        let staff = staff_table(&crm, None, Some(roles.as_slice())).await.unwrap();
        assert_eq!(staff.len(), 1);
        assert_eq!(staff.rows[0].str("School").as_deref(), Some("Hope High School"));
        assert_eq!(staff.rows[0].str("Staff__c_Name").as_deref(), Some("Ada Lovelace"));

        let schools = vec!["Lake Elementary".to_string()];
        let staff = staff_table(&crm, Some(schools.as_slice()), None).await.unwrap();
        assert_eq!(staff.column_strings("Staff__c"), vec!["st2"]);
    }

    #[tokio::test]
    async fn missing_fields_are_described_first() {
        let crm = crm();
        let table = ObjectQuery::new("Account").fetch(&crm).await.unwrap();
        assert_eq!(table.columns, vec!["Id", "Name"]);
        assert!(crm.queries()[0].starts_with("SELECT Id, Name FROM Account"));
    }

    #[tokio::test]
    async fn unknown_programs_produce_a_query_matching_nothing() {
        let crm = crm();
        let sections = section_table(&crm, &["Homework Assistance"]).await.unwrap();
        assert!(sections.is_empty());
        assert!(crm.queries()[1].contains("Program__c IN ('')"));
    }

    #[test]
    fn school_reference_drops_non_school_teams() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("school_reference.xlsx");
        let table = Table::from_rows(
            &["School", "Informal Name"],
            vec![
                Record::new()
                    .with("School", "Hope High School")
                    .with("Informal Name", "Hope"),
                Record::new().with("School", "City Office").with("Informal Name", "CE"),
                Record::new()
                    .with("School", "New Staff")
                    .with("Informal Name", "Onboarding"),
            ],
        );
        workbook::write_table(&path, "Schools", &table).unwrap();

        let reference = school_reference(&path).unwrap();
        assert_eq!(reference.column_strings("Informal Name"), vec!["Hope"]);
    }
}
