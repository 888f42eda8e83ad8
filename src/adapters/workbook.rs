//! Excel workbook access: worklists are read with `calamine`, templates and
//! reports are edited and written with `umya-spreadsheet`.

use crate::domain::model::{Record, Table};
use crate::utils::error::{OpsError, Result};
use calamine::{open_workbook, Data, DataType, Reader, Xlsx};
use serde_json::Value;
use std::path::Path;
use umya_spreadsheet::{Spreadsheet, Worksheet};

/// Reads a worksheet whose first row holds the column names. Blank rows are
/// skipped; empty cells become null.
pub fn read_table(path: &Path, sheet: Option<&str>) -> Result<Table> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;

    let range = match sheet {
        Some(name) => workbook.worksheet_range(name)?,
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| OpsError::processing(format!("No worksheet in {}", path.display())))??,
    };

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|cell| cell_to_value(cell))
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect(),
        None => return Ok(Table::default()),
    };

    let mut table = Table::new(headers.iter().filter(|h| !h.is_empty()).cloned().collect());
    for row in rows {
        let mut record = Record::new();
        let mut blank = true;
        for (header, cell) in headers.iter().zip(row.iter()) {
            if header.is_empty() {
                continue;
            }
            let value = cell_to_value(cell);
            if !value.is_null() {
                blank = false;
            }
            record.data.insert(header.clone(), value);
        }
        if !blank {
            for header in &table.columns {
                record.data.entry(header.clone()).or_insert(Value::Null);
            }
            table.rows.push(record);
        }
    }

    tracing::debug!("Read {} rows from {}", table.len(), path.display());
    Ok(table)
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => Value::from(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => {
                Value::String(dt.date().format("%Y-%m-%d").to_string())
            }
            Some(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            None => Value::Null,
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(_) => Value::Null,
    }
}

/// A rectangular cell range with 1-based, inclusive coordinates. Whole
/// columns (`A:N`) have `end_row == None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start_col: u32,
    pub start_row: u32,
    pub end_col: u32,
    pub end_row: Option<u32>,
}

impl CellRange {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (start, end) = match text.split_once(':') {
            Some((a, b)) => (a, b),
            None => (text, text),
        };
        let (start_col, start_row) = parse_cell(start)?;
        let (end_col, end_row) = parse_cell(end)?;
        Ok(Self {
            start_col,
            start_row: start_row.unwrap_or(1),
            end_col,
            end_row,
        })
    }

    /// Parses `B4:B6, F4:F6` into its parts.
    pub fn parse_many(text: &str) -> Result<Vec<Self>> {
        text.split(',').map(CellRange::parse).collect()
    }
}

fn parse_cell(text: &str) -> Result<(u32, Option<u32>)> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '$').collect();
    let letters: String = cleaned.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &cleaned[letters.len()..];
    if letters.is_empty() {
        return Err(OpsError::validation(format!("Invalid cell reference: {}", text)));
    }
    let col = column_index(&letters);
    let row = if digits.is_empty() {
        None
    } else {
        Some(
            digits
                .parse::<u32>()
                .map_err(|_| OpsError::validation(format!("Invalid cell reference: {}", text)))?,
        )
    };
    Ok((col, row))
}

/// `A` → 1, `Z` → 26, `AA` → 27.
pub fn column_index(letters: &str) -> u32 {
    letters
        .chars()
        .fold(0, |acc, c| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1))
}

pub fn column_letters(mut index: u32) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// An xlsx workbook opened for editing, typically a tracker template.
pub struct TemplateWorkbook {
    book: Spreadsheet,
}

impl TemplateWorkbook {
    pub fn open(path: &Path) -> Result<Self> {
        let book = umya_spreadsheet::reader::xlsx::read(path).map_err(OpsError::workbook)?;
        Ok(Self { book })
    }

    /// Blank workbook with one sheet called `sheet`.
    pub fn blank(sheet: &str) -> Result<Self> {
        let mut book = umya_spreadsheet::new_file();
        book.get_sheet_by_name_mut("Sheet1")
            .ok_or_else(|| OpsError::workbook("new workbook has no default sheet"))?
            .set_name(sheet);
        Ok(Self { book })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|s| s.get_name().to_string())
            .collect()
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheet_names().iter().any(|n| n == name)
    }

    pub fn first_sheet_name(&self) -> Result<String> {
        self.sheet_names()
            .into_iter()
            .next()
            .ok_or_else(|| OpsError::workbook("workbook has no sheets"))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut Worksheet> {
        self.book
            .get_sheet_by_name_mut(name)
            .ok_or_else(|| OpsError::workbook(format!("missing sheet '{}'", name)))
    }

    pub fn value(&self, sheet: &str, cell: &str) -> Result<String> {
        let ws = self
            .book
            .get_sheet_by_name(sheet)
            .ok_or_else(|| OpsError::workbook(format!("missing sheet '{}'", sheet)))?;
        Ok(ws.get_value(cell))
    }

    pub fn set_value(&mut self, sheet: &str, cell: &str, value: &Value) -> Result<()> {
        let (col, row) = parse_cell(cell)?;
        let row = row.ok_or_else(|| OpsError::validation(format!("Invalid cell: {}", cell)))?;
        write_cell(self.sheet_mut(sheet)?, col, row, value);
        Ok(())
    }

    pub fn set_formula(&mut self, sheet: &str, col: u32, row: u32, formula: &str) -> Result<()> {
        let ws = self.sheet_mut(sheet)?;
        ws.get_cell_mut((col, row))
            .set_formula(formula.trim_start_matches('='));
        Ok(())
    }

    /// Clears every cell of `ranges` (e.g. `B4:B6, F4:F6` or `A:N`).
    pub fn clear(&mut self, sheet: &str, ranges: &str) -> Result<()> {
        let ranges = CellRange::parse_many(ranges)?;
        let ws = self.sheet_mut(sheet)?;
        let highest_row = ws.get_highest_row();
        for range in ranges {
            let end_row = range.end_row.unwrap_or(highest_row);
            for row in range.start_row..=end_row {
                for col in range.start_col..=range.end_col {
                    if ws.get_cell((col, row)).is_some() {
                        ws.get_cell_mut((col, row)).set_value("");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn clear_sheet(&mut self, sheet: &str) -> Result<()> {
        let ws = self.sheet_mut(sheet)?;
        let (cols, rows) = (ws.get_highest_column(), ws.get_highest_row());
        if cols == 0 || rows == 0 {
            return Ok(());
        }
        let range = format!("A1:{}{}", column_letters(cols), rows);
        self.clear(sheet, &range)
    }

    /// Writes `rows` downward and rightward from `anchor`, like pasting a
    /// block without headers.
    pub fn write_rows(&mut self, sheet: &str, anchor: &str, rows: &[Vec<Value>]) -> Result<()> {
        let (col, row) = parse_cell(anchor)?;
        let row = row.ok_or_else(|| OpsError::validation(format!("Invalid anchor: {}", anchor)))?;
        let ws = self.sheet_mut(sheet)?;
        for (r, values) in rows.iter().enumerate() {
            for (c, value) in values.iter().enumerate() {
                write_cell(ws, col + c as u32, row + r as u32, value);
            }
        }
        Ok(())
    }

    /// Writes a table's header row and data rows at `A1`.
    pub fn write_table(&mut self, sheet: &str, table: &Table, header: bool) -> Result<()> {
        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(table.len() + 1);
        if header {
            rows.push(table.columns.iter().map(|c| Value::String(c.clone())).collect());
        }
        for record in &table.rows {
            rows.push(
                table
                    .columns
                    .iter()
                    .map(|c| record.data.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }
        self.write_rows(sheet, "A1", &rows)
    }

    /// Duplicates `source` under `new_name` (appended after the last sheet).
    pub fn copy_sheet(&mut self, source: &str, new_name: &str) -> Result<()> {
        let mut copy = self
            .book
            .get_sheet_by_name(source)
            .ok_or_else(|| OpsError::workbook(format!("missing sheet '{}'", source)))?
            .clone();
        copy.set_name(new_name);
        self.book.add_sheet(copy).map_err(OpsError::workbook)?;
        Ok(())
    }

    /// Copies sheet `source` of another workbook into this one as `new_name`.
    pub fn import_sheet(&mut self, other: &TemplateWorkbook, source: &str, new_name: &str) -> Result<()> {
        let mut copy = other
            .book
            .get_sheet_by_name(source)
            .ok_or_else(|| OpsError::workbook(format!("missing sheet '{}'", source)))?
            .clone();
        copy.set_name(new_name);
        self.book.add_sheet(copy).map_err(OpsError::workbook)?;
        Ok(())
    }

    pub fn add_sheet(&mut self, name: &str) -> Result<()> {
        self.book.new_sheet(name).map_err(OpsError::workbook)?;
        Ok(())
    }

    /// Saves to `path`, replacing any existing file and creating parent folders.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        umya_spreadsheet::writer::xlsx::write(&self.book, path).map_err(OpsError::workbook)?;
        tracing::debug!("Saved workbook {}", path.display());
        Ok(())
    }
}

fn write_cell(ws: &mut Worksheet, col: u32, row: u32, value: &Value) {
    let cell = ws.get_cell_mut((col, row));
    match value {
        Value::Null => {
            cell.set_value("");
        }
        Value::Bool(b) => {
            cell.set_value_bool(*b);
        }
        Value::Number(n) => {
            cell.set_value_number(n.as_f64().unwrap_or(0.0));
        }
        Value::String(s) => {
            cell.set_value(s.clone());
        }
        other => {
            cell.set_value(other.to_string());
        }
    }
}

/// Writes `table` with a header row into a fresh single-sheet workbook.
pub fn write_table(path: &Path, sheet: &str, table: &Table) -> Result<()> {
    let mut workbook = TemplateWorkbook::blank(sheet)?;
    workbook.write_table(sheet, table, true)?;
    workbook.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_ranges() {
        assert_eq!(
            CellRange::parse("B4:C15").unwrap(),
            CellRange {
                start_col: 2,
                start_row: 4,
                end_col: 3,
                end_row: Some(15)
            }
        );
        assert_eq!(
            CellRange::parse("A:N").unwrap(),
            CellRange {
                start_col: 1,
                start_row: 1,
                end_col: 14,
                end_row: None
            }
        );
        assert_eq!(CellRange::parse("$A$1").unwrap().end_row, Some(1));
        assert_eq!(CellRange::parse_many("B4:B6, F4:F6").unwrap().len(), 2);
        assert!(CellRange::parse("42").is_err());
    }

    #[test]
    fn column_letters_round_trip_the_edges() {
        assert_eq!(column_index("A"), 1);
        assert_eq!(column_index("N"), 14);
        assert_eq!(column_index("AA"), 27);
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(28), "AB");
    }

    #[test]
    fn written_table_reads_back_with_headers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("roster.xlsx");
        let table = Table::from_rows(
            &["School", "Student: Grade"],
            vec![
                Record::new().with("School", "Hope High").with("Student: Grade", 9),
                Record::new().with("School", "Lake Elementary").with("Student: Grade", Value::Null),
            ],
        );

        write_table(&path, "Roster", &table).unwrap();
        let read = read_table(&path, Some("Roster")).unwrap();

        assert_eq!(read.columns, vec!["School", "Student: Grade"]);
        assert_eq!(read.len(), 2);
        assert_eq!(read.rows[0].str("Student: Grade").as_deref(), Some("9"));
        assert!(read.rows[1].is_null("Student: Grade"));
    }

    #[test]
    fn template_edits_are_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tracker.xlsx");

        let mut workbook = TemplateWorkbook::blank("Tracker").unwrap();
        workbook.add_sheet("ACM Template").unwrap();
        workbook
            .set_value("Tracker", "A1", &Value::String("old title".into()))
            .unwrap();
        workbook
            .write_rows(
                "ACM Template",
                "B4",
                &[vec![Value::String("x".into())], vec![Value::String("y".into())]],
            )
            .unwrap();
        workbook.clear("ACM Template", "B5:B5").unwrap();
        workbook.copy_sheet("ACM Template", "Ana R.").unwrap();
        workbook
            .set_value("Tracker", "A1", &Value::String("SY20 Attendance Tracker - Hope".into()))
            .unwrap();
        workbook.save(&path).unwrap();

        let reopened = TemplateWorkbook::open(&path).unwrap();
        assert_eq!(
            reopened.sheet_names(),
            vec!["Tracker", "ACM Template", "Ana R."]
        );
        assert_eq!(
            reopened.value("Tracker", "A1").unwrap(),
            "SY20 Attendance Tracker - Hope"
        );
        assert_eq!(reopened.value("Ana R.", "B4").unwrap(), "x");
        assert_eq!(reopened.value("Ana R.", "B5").unwrap(), "");
    }
}
