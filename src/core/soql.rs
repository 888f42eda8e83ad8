//! Query text for the CRM's SQL dialect.

use crate::utils::error::{OpsError, Result};

/// Quotes a literal, escaping backslashes and single quotes.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// `('a', 'b')` for use after `IN`. An empty list renders `('')`, which
/// keeps the clause valid while matching nothing.
pub fn in_list<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted: Vec<String> = values.into_iter().map(|v| quote(v.as_ref())).collect();
    if quoted.is_empty() {
        "('')".to_string()
    } else {
        format!("({})", quoted.join(", "))
    }
}

pub fn select(object: &str, fields: &[String], where_clause: Option<&str>) -> Result<String> {
    if fields.is_empty() {
        return Err(OpsError::validation(format!(
            "No fields requested for {}",
            object
        )));
    }
    let mut query = format!("SELECT {} FROM {}", fields.join(", "), object);
    if let Some(clause) = where_clause.filter(|c| !c.trim().is_empty()) {
        query.push_str(" WHERE ");
        query.push_str(clause);
    }
    Ok(query)
}

pub fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
