//! DBF records → JSON property objects
//!
//! A `dbase::Record` is an unordered map; the field list from the table header
//! gives the key order, which the store keeps so the context generator sees keys
//! the way the source dataset declares them.

use serde_json::{Map, Number, Value};
use shapefile::dbase::{FieldValue, Record};

/// Convert one record, keyed by `fields` in header order
pub fn record_to_properties(fields: &[String], record: &Record) -> Map<String, Value> {
    let mut properties = Map::with_capacity(fields.len());
    for name in fields {
        let value = record.get(name).map(field_value_to_json).unwrap_or(Value::Null);
        properties.insert(name.clone(), value);
    }
    properties
}

/// Map a single DBF cell; empty cells become `null`
pub fn field_value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(s)) => {
            let trimmed = s.trim_end();
            if trimmed.is_empty() {
                Value::Null
            } else {
                Value::String(trimmed.to_string())
            }
        }
        FieldValue::Character(None) => Value::Null,
        FieldValue::Memo(s) => Value::String(s.clone()),
        FieldValue::Numeric(Some(n)) => number(*n),
        FieldValue::Numeric(None) => Value::Null,
        FieldValue::Float(Some(n)) => number(f64::from(*n)),
        FieldValue::Float(None) => Value::Null,
        FieldValue::Integer(n) => Value::from(*n),
        FieldValue::Double(n) => number(*n),
        FieldValue::Currency(n) => number(*n),
        FieldValue::Logical(Some(b)) => Value::Bool(*b),
        FieldValue::Logical(None) => Value::Null,
        FieldValue::Date(Some(d)) => {
            Value::String(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }
        FieldValue::Date(None) => Value::Null,
        other => Value::String(format!("{:?}", other)),
    }
}

/// Integral values become JSON integers so `->>` renders `12`, not `12.0`
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}
