use std::path::Path;

use serde_json::{Number, Value};
use tracing::warn;

use crate::plan::test_id::TestId;
use crate::project::settings::Dict;
use crate::runner::definition::TestLoader;

/// Data sets to run a test against, in order.
///
/// An external data file wins over in-file data; with neither, a single
/// empty set is returned so the test still runs once.
pub fn resolve_data_sets(loader: &dyn TestLoader, test: &TestId) -> Vec<Dict> {
    if let Some(path) = loader.external_data(test) {
        let rows = read_csv_data(&path);
        if !rows.is_empty() {
            return rows;
        }
    }

    if let Ok(definition) = loader.load(test)
        && let Some(data) = definition.data
        && !data.is_empty()
    {
        return data;
    }

    vec![Dict::new()]
}

/// Read a CSV data file: the first row holds column names, every later
/// row becomes one data set. Malformed files yield no rows.
pub fn read_csv_data(path: &Path) -> Vec<Dict> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read data file");
            return Vec::new();
        }
    };
    match parse_csv(&raw) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed data file ignored");
            Vec::new()
        }
    }
}

fn parse_csv(raw: &str) -> Result<Vec<Dict>, String> {
    let records = split_records(raw)?;
    let mut records = records.into_iter();
    let Some(header) = records.next() else {
        return Ok(Vec::new());
    };
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_owned()).collect();

    let mut rows = Vec::new();
    for (line, record) in records.enumerate() {
        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        if record.len() != header.len() {
            return Err(format!(
                "row {} has {} fields, header has {}",
                line + 2,
                record.len(),
                header.len()
            ));
        }
        let row: Dict = header
            .iter()
            .cloned()
            .zip(record.iter().map(|field| convert_value(field)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Split CSV text into records of fields, honouring double-quoted fields.
fn split_records(raw: &str) -> Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_owned());
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

/// Convert a raw field to the richest primitive it parses as, falling
/// back to the string itself.
pub fn convert_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        "null" | "None" | "NULL" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = trimmed.parse::<f64>()
        && let Some(number) = Number::from_f64(float)
        && trimmed.chars().any(|c| c.is_ascii_digit())
    {
        return Value::Number(number);
    }
    let bracketed = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'));
    if bracketed && let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }
    Value::String(raw.to_owned())
}
