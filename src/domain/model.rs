use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.data.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column).filter(|v| !v.is_null())
    }

    /// String view of a cell. Numbers and booleans are rendered, null and
    /// missing cells are `None`.
    pub fn str(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
                _ => n.to_string(),
            }),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn str_or_empty(&self, column: &str) -> String {
        self.str(column).unwrap_or_default()
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        match self.get(column)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn bool(&self, column: &str) -> bool {
        match self.get(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    pub fn date(&self, column: &str) -> Option<NaiveDate> {
        parse_date(&self.str(column)?)
    }

    pub fn is_null(&self, column: &str) -> bool {
        self.get(column).is_none()
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.data.insert(column.to_string(), value.into());
    }
}

/// Ordered set of records sharing a column list, the unit every data puller
/// and shaper works with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Left,
    Inner,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(columns: &[&str], rows: Vec<Record>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn push(&mut self, record: Record) {
        for key in record.data.keys() {
            if !self.has_column(key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(record);
    }

    pub fn rename(mut self, renames: &[(&str, &str)]) -> Self {
        for (from, to) in renames {
            for column in self.columns.iter_mut() {
                if column == from {
                    *column = to.to_string();
                }
            }
            for row in self.rows.iter_mut() {
                if let Some(value) = row.data.remove(*from) {
                    row.data.insert(to.to_string(), value);
                }
            }
        }
        self
    }

    /// Keeps only the listed columns, in the listed order. Columns missing
    /// from a row come out as null.
    pub fn select(mut self, columns: &[&str]) -> Self {
        for row in self.rows.iter_mut() {
            let mut kept = HashMap::with_capacity(columns.len());
            for column in columns {
                let value = row.data.remove(*column).unwrap_or(Value::Null);
                kept.insert(column.to_string(), value);
            }
            row.data = kept;
        }
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn drop_columns(mut self, columns: &[&str]) -> Self {
        self.columns.retain(|c| !columns.contains(&c.as_str()));
        for row in self.rows.iter_mut() {
            for column in columns {
                row.data.remove(*column);
            }
        }
        self
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool,
    {
        self.rows.retain(|r| predicate(r));
        self
    }

    pub fn map_rows<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Record),
    {
        for row in self.rows.iter_mut() {
            f(row);
        }
        self
    }

    /// Adds (or overwrites) a computed column.
    pub fn with_column<F>(mut self, column: &str, f: F) -> Self
    where
        F: Fn(&Record) -> Value,
    {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
        for row in self.rows.iter_mut() {
            let value = f(row);
            row.data.insert(column.to_string(), value);
        }
        self
    }

    pub fn left_join(self, right: &Table, left_on: &str, right_on: &str) -> Self {
        self.join(right, left_on, right_on, JoinKind::Left)
    }

    pub fn inner_join(self, right: &Table, left_on: &str, right_on: &str) -> Self {
        self.join(right, left_on, right_on, JoinKind::Inner)
    }

    fn join(self, right: &Table, left_on: &str, right_on: &str, kind: JoinKind) -> Self {
        let mut index: HashMap<String, Vec<&Record>> = HashMap::new();
        for row in &right.rows {
            if let Some(key) = row.str(right_on) {
                index.entry(key).or_default().push(row);
            }
        }

        let left_columns: HashSet<String> = self.columns.iter().cloned().collect();
        let same_key = left_on == right_on;
        let rename_right = |column: &str| -> Option<String> {
            if same_key && column == right_on {
                None
            } else if left_columns.contains(column) {
                Some(format!("{}_right", column))
            } else {
                Some(column.to_string())
            }
        };

        let mut columns = self.columns.clone();
        for column in &right.columns {
            if let Some(name) = rename_right(column) {
                if !columns.contains(&name) {
                    columns.push(name);
                }
            }
        }

        let mut rows = Vec::with_capacity(self.rows.len());
        for left in self.rows {
            let matches = left.str(left_on).and_then(|k| index.get(&k));
            match matches {
                Some(found) => {
                    for right_row in found {
                        let mut merged = left.clone();
                        for (column, value) in &right_row.data {
                            if let Some(name) = rename_right(column) {
                                merged.data.insert(name, value.clone());
                            }
                        }
                        rows.push(merged);
                    }
                }
                None if kind == JoinKind::Left => {
                    let mut merged = left;
                    for column in &right.columns {
                        if let Some(name) = rename_right(column) {
                            merged.data.entry(name).or_insert(Value::Null);
                        }
                    }
                    rows.push(merged);
                }
                None => {}
            }
        }

        Self { columns, rows }
    }

    /// Keeps the first row for each distinct combination of `columns`.
    pub fn distinct_by(mut self, columns: &[&str]) -> Self {
        let mut seen = HashSet::new();
        self.rows.retain(|row| {
            let key: Vec<String> = columns.iter().map(|c| row.str_or_empty(c)).collect();
            seen.insert(key)
        });
        self
    }

    /// Drops rows identical on every column.
    pub fn distinct(self) -> Self {
        let columns: Vec<String> = self.columns.clone();
        let refs: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
        self.distinct_by(&refs)
    }

    /// Stable multi-column ascending sort. Nulls sort first; numbers compare
    /// numerically.
    pub fn sort_by(mut self, columns: &[&str]) -> Self {
        self.rows.sort_by(|a, b| {
            for column in columns {
                let ordering = compare_values(a.get(column), b.get(column));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        self
    }

    pub fn sort_by_desc(mut self, column: &str) -> Self {
        self.rows
            .sort_by(|a, b| compare_values(b.get(column), a.get(column)));
        self
    }

    pub fn column_strings(&self, column: &str) -> Vec<String> {
        self.rows.iter().filter_map(|r| r.str(column)).collect()
    }

    pub fn unique_strings(&self, column: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.column_strings(column)
            .into_iter()
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    pub fn string_set(&self, column: &str) -> HashSet<String> {
        self.column_strings(column).into_iter().collect()
    }

    /// Sums `value_column` per distinct `key_column`.
    pub fn group_sum(&self, key_column: &str, value_column: &str) -> HashMap<String, f64> {
        let mut sums = HashMap::new();
        for row in &self.rows {
            if let Some(key) = row.str(key_column) {
                *sums.entry(key).or_insert(0.0) += row.f64(value_column).unwrap_or(0.0);
            }
        }
        sums
    }

    /// Splits rows by `column`, preserving first-seen group order.
    pub fn group_by(&self, column: &str) -> Vec<(String, Table)> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
        for row in &self.rows {
            let key = row.str_or_empty(column);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(row.clone());
        }
        order
            .into_iter()
            .map(|key| {
                let rows = groups.remove(&key).unwrap_or_default();
                (
                    key,
                    Table {
                        columns: self.columns.clone(),
                        rows,
                    },
                )
            })
            .collect()
    }

    /// Cartesian product, used to pair every staff member with every program.
    pub fn cross_join(self, right: &Table) -> Self {
        let mut columns = self.columns.clone();
        for column in &right.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        let mut rows = Vec::with_capacity(self.rows.len() * right.rows.len());
        for left in &self.rows {
            for r in &right.rows {
                let mut merged = left.clone();
                for (k, v) in &r.data {
                    merged.data.insert(k.clone(), v.clone());
                }
                rows.push(merged);
            }
        }
        Self { columns, rows }
    }

    /// Rows as string cells in column order, for CSV and worksheet output.
    pub fn to_string_rows(&self, columns: &[&str]) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|r| columns.iter().map(|c| r.str_or_empty(c)).collect())
            .collect()
    }

    pub fn to_csv_bytes(&self) -> crate::utils::error::Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        let columns: Vec<&str> = self.columns.iter().map(|c| c.as_str()).collect();
        for row in self.to_string_rows(&columns) {
            writer.write_record(&row)?;
        }
        writer
            .into_inner()
            .map_err(|e| crate::utils::error::OpsError::processing(e.to_string()))
    }
}

/// Parses the date shapes found in workbooks and CRM payloads: `2019-09-30`,
/// `09/30/2019`, `2019-09-30T14:00:00` and `2019-09-30T14:00:00.000+0000`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    None
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sections() -> Table {
        Table::from_rows(
            &["Section__c", "Program__c", "Intervention_Primary_Staff__c"],
            vec![
                Record::new()
                    .with("Section__c", "a01")
                    .with("Program__c", "p1")
                    .with("Intervention_Primary_Staff__c", "s1"),
                Record::new()
                    .with("Section__c", "a02")
                    .with("Program__c", "p2")
                    .with("Intervention_Primary_Staff__c", "s1"),
                Record::new()
                    .with("Section__c", "a03")
                    .with("Program__c", "p9")
                    .with("Intervention_Primary_Staff__c", "s2"),
            ],
        )
    }

    fn programs() -> Table {
        Table::from_rows(
            &["Program__c", "Program__c_Name"],
            vec![
                Record::new()
                    .with("Program__c", "p1")
                    .with("Program__c_Name", "Tutoring: Math"),
                Record::new()
                    .with("Program__c", "p2")
                    .with("Program__c_Name", "Tutoring: Literacy"),
            ],
        )
    }

    #[test]
    fn left_join_keeps_unmatched_rows_with_nulls() {
        let joined = sections().left_join(&programs(), "Program__c", "Program__c");
        assert_eq!(joined.len(), 3);
        assert_eq!(
            joined.rows[0].str("Program__c_Name").as_deref(),
            Some("Tutoring: Math")
        );
        assert!(joined.rows[2].is_null("Program__c_Name"));
        assert!(joined.has_column("Program__c_Name"));
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let joined = sections().inner_join(&programs(), "Program__c", "Program__c");
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn join_suffixes_colliding_columns() {
        let left = Table::from_rows(
            &["Id", "Name"],
            vec![Record::new().with("Id", "1").with("Name", "left")],
        );
        let right = Table::from_rows(
            &["Ref", "Name"],
            vec![Record::new().with("Ref", "1").with("Name", "right")],
        );
        let joined = left.left_join(&right, "Id", "Ref");
        assert_eq!(joined.rows[0].str("Name").as_deref(), Some("left"));
        assert_eq!(joined.rows[0].str("Name_right").as_deref(), Some("right"));
    }

    #[test]
    fn join_with_many_matches_multiplies_rows() {
        let staff = Table::from_rows(
            &["Staff__c", "Staff__c_Name"],
            vec![Record::new()
                .with("Staff__c", "s1")
                .with("Staff__c_Name", "Ada Lovelace")],
        );
        let joined = staff.left_join(&sections(), "Staff__c", "Intervention_Primary_Staff__c");
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn sort_puts_nulls_first_and_compares_numbers() {
        let table = Table::from_rows(
            &["n"],
            vec![
                Record::new().with("n", 10),
                Record::new().with("n", Value::Null),
                Record::new().with("n", 9),
            ],
        )
        .sort_by(&["n"]);
        assert!(table.rows[0].is_null("n"));
        assert_eq!(table.rows[1].f64("n"), Some(9.0));
        assert_eq!(table.rows[2].f64("n"), Some(10.0));
    }

    #[test]
    fn group_sum_and_distinct() {
        let table = Table::from_rows(
            &["k", "v"],
            vec![
                Record::new().with("k", "a").with("v", 1.5),
                Record::new().with("k", "a").with("v", 2),
                Record::new().with("k", "b").with("v", json!(null)),
            ],
        );
        let sums = table.group_sum("k", "v");
        assert_eq!(sums["a"], 3.5);
        assert_eq!(sums["b"], 0.0);
        assert_eq!(table.distinct_by(&["k"]).len(), 2);
    }

    #[test]
    fn record_str_renders_whole_numbers_without_fraction() {
        let record = Record::new().with("grade", 9.0).with("ratio", 0.5);
        assert_eq!(record.str("grade").as_deref(), Some("9"));
        assert_eq!(record.str("ratio").as_deref(), Some("0.5"));
    }

    #[test]
    fn dates_parse_from_workbook_and_crm_shapes() {
        let expected = NaiveDate::from_ymd_opt(2019, 9, 30);
        assert_eq!(parse_date("2019-09-30"), expected);
        assert_eq!(parse_date("09/30/2019"), expected);
        assert_eq!(parse_date("2019-09-30T08:15:00"), expected);
        assert_eq!(parse_date("2019-09-30T08:15:00.000+0000"), expected);
        assert_eq!(parse_date("next week"), None);
        assert_eq!(Record::new().with("d", "2019-09-30").date("d"), expected);
    }

    #[test]
    fn select_orders_columns_and_fills_missing() {
        let table = sections().select(&["Intervention_Primary_Staff__c", "Missing"]);
        assert_eq!(
            table.columns,
            vec!["Intervention_Primary_Staff__c".to_string(), "Missing".to_string()]
        );
        assert!(table.rows[0].is_null("Missing"));
    }

    #[test]
    fn csv_output_has_header_and_rows() {
        let bytes = programs().to_csv_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Program__c,Program__c_Name"));
        assert_eq!(lines.next(), Some("p1,Tutoring: Math"));
    }
}
