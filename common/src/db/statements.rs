// Parameterized statement builders for the convenience CRUD surface.
// Every user-supplied value is carried as a bound parameter; only
// validated identifiers are spliced into statement text.

use crate::errors::DatabaseError;
use serde_json::{Map, Value};

/// Accept `[A-Za-z_][A-Za-z0-9_]*`, the subset of identifiers the upper
/// layers use for tables and columns. Anything else is rejected before a
/// statement is built.
pub fn ensure_identifier(name: &str) -> Result<(), DatabaseError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidStatement(format!(
            "invalid identifier '{}'",
            name
        )))
    }
}

fn returning_clause(returning: &[&str]) -> Result<String, DatabaseError> {
    if returning.is_empty() {
        return Ok("*".to_string());
    }
    for column in returning {
        if *column != "*" {
            ensure_identifier(column)?;
        }
    }
    Ok(returning.join(", "))
}

fn split_pairs(
    source: &Map<String, Value>,
    what: &str,
) -> Result<(Vec<String>, Vec<Value>), DatabaseError> {
    if source.is_empty() {
        return Err(DatabaseError::InvalidStatement(format!(
            "{} cannot be empty",
            what
        )));
    }

    let mut columns = Vec::with_capacity(source.len());
    let mut values = Vec::with_capacity(source.len());
    for (column, value) in source {
        ensure_identifier(column)?;
        columns.push(column.clone());
        values.push(value.clone());
    }
    Ok((columns, values))
}

fn where_clause(columns: &[String], offset: usize) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ${}", column, offset + i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `SELECT * FROM {table} WHERE ... LIMIT 1`
pub fn build_find_one(
    table: &str,
    conditions: &Map<String, Value>,
) -> Result<(String, Vec<Value>), DatabaseError> {
    ensure_identifier(table)?;
    let (columns, values) = split_pairs(conditions, "conditions")?;

    let statement = format!(
        "SELECT * FROM {} WHERE {} LIMIT 1",
        table,
        where_clause(&columns, 0)
    );
    Ok((statement, values))
}

/// `INSERT INTO {table} (...) VALUES (...) RETURNING ...`
pub fn build_insert(
    table: &str,
    fields: &Map<String, Value>,
    returning: &[&str],
) -> Result<(String, Vec<Value>), DatabaseError> {
    ensure_identifier(table)?;
    let (columns, values) = split_pairs(fields, "fields")?;

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    let statement = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        columns.join(", "),
        placeholders.join(", "),
        returning_clause(returning)?
    );
    Ok((statement, values))
}

/// `UPDATE {table} SET ... WHERE ... RETURNING ...`
///
/// Field parameters come first, condition parameters after, matching the
/// placeholder numbering.
pub fn build_update(
    table: &str,
    conditions: &Map<String, Value>,
    fields: &Map<String, Value>,
    returning: &[&str],
) -> Result<(String, Vec<Value>), DatabaseError> {
    ensure_identifier(table)?;
    let (set_columns, mut values) = split_pairs(fields, "fields")?;
    let (where_columns, mut condition_values) = split_pairs(conditions, "conditions")?;

    let set_clause = set_columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ${}", column, i + 1))
        .collect::<Vec<_>>()
        .join(", ");

    let statement = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        table,
        set_clause,
        where_clause(&where_columns, set_columns.len()),
        returning_clause(returning)?
    );

    values.append(&mut condition_values);
    Ok((statement, values))
}

/// `DELETE FROM {table} WHERE ... RETURNING ...`
pub fn build_delete(
    table: &str,
    conditions: &Map<String, Value>,
    returning: &[&str],
) -> Result<(String, Vec<Value>), DatabaseError> {
    ensure_identifier(table)?;
    let (columns, values) = split_pairs(conditions, "conditions")?;

    let statement = format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        table,
        where_clause(&columns, 0),
        returning_clause(returning)?
    );
    Ok((statement, values))
}
