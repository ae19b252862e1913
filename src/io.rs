use std::collections::BTreeMap;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Map, Number};

use crate::pipeline::BatchReport;
use crate::record::{Derived, RecordId, RecordStore, Value, MASK};

/// Read records from a JSON or CSV file, chosen by extension. CSV files hold
/// a single record type, which has to be named.
pub fn read_records(
    filename: &str,
    delimiter: char,
    record_type: Option<&str>,
    ignore_cols: &[String],
) -> Result<RecordStore> {
    let mut store = RecordStore::new();
    let is_csv = Path::new(filename)
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("csv"));
    if is_csv {
        let record_type =
            record_type.ok_or_else(|| anyhow!("CSV input needs a record type"))?;
        read_csv(filename, delimiter, record_type, ignore_cols, &mut store)?;
    } else {
        let file = std::fs::File::open(filename)?;
        let json: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Could not parse {}", filename))?;
        add_json_records(&json, &mut store)?;
    }
    Ok(store)
}

/// Add records from a JSON document `{ "<type>": [ {record}, ... ] }`.
/// Nested objects become untyped records referenced by their parent.
pub fn add_json_records(json: &serde_json::Value, store: &mut RecordStore) -> Result<()> {
    let types = json
        .as_object()
        .ok_or_else(|| anyhow!("Input must map record types to record lists"))?;
    for (record_type, records) in types {
        let records = records
            .as_array()
            .ok_or_else(|| anyhow!("Records of {} must be a list", record_type))?;
        for record in records {
            let object = record
                .as_object()
                .ok_or_else(|| anyhow!("Record of {} is not an object: {}", record_type, record))?;
            add_object(Some(record_type.as_str()), object, store)?;
        }
    }
    Ok(())
}

fn add_object(
    record_type: Option<&str>,
    object: &Map<String, serde_json::Value>,
    store: &mut RecordStore,
) -> Result<RecordId> {
    let mut attributes = BTreeMap::new();
    for (key, value) in object {
        if key.is_empty() {
            bail!("Property key cannot be empty");
        }
        let value = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Bool(flag) => Value::Text(flag.to_string()),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(integer) => Value::Integer(integer),
                None => Value::Double(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(text) => Value::Text(text.clone()),
            serde_json::Value::Array(_) => Value::Text(value.to_string()),
            serde_json::Value::Object(nested) => Value::Ref(add_object(None, nested, store)?),
        };
        attributes.insert(key.clone(), value);
    }
    Ok(store.insert(record_type, attributes))
}

pub fn read_csv(
    filename: &str,
    delimiter: char,
    record_type: &str,
    ignore_cols: &[String],
    store: &mut RecordStore,
) -> Result<()> {
    let mut header: Vec<String> = vec![];

    let file = std::fs::File::open(filename)?;
    let reader = std::io::BufReader::new(file);

    for line in reader.lines() {
        let line = line?;
        if header.is_empty() {
            header = line
                .split(delimiter)
                .map(|value| value.trim().to_string())
                .collect();
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let mut attributes = BTreeMap::new();
        for (i, value) in line.split(delimiter).enumerate() {
            let name = header
                .get(i)
                .ok_or_else(|| anyhow!("Too many values in line: {}", line))?;
            if ignore_cols.contains(name) || value.trim().is_empty() {
                continue;
            }
            attributes.insert(name.clone(), parse_literal(value.trim()));
        }
        store.insert(Some(record_type), attributes);
    }
    Ok(())
}

fn parse_literal(text: &str) -> Value {
    if let Ok(integer) = text.parse::<i64>() {
        Value::Integer(integer)
    } else if let Ok(double) = text.parse::<f64>() {
        Value::Double(double)
    } else {
        Value::Text(text.to_string())
    }
}

/// JSON rendering of the anonymized store: per record type the records in
/// input order and either the KPIs or the error that aborted the type.
pub fn to_json(store: &RecordStore, batch: &BatchReport) -> serde_json::Value {
    let mut output = Map::new();
    for record_type in store.record_types() {
        let data: Vec<serde_json::Value> = store
            .records_of_type(record_type)
            .map(|record| {
                let mut entry = Map::new();
                for (name, value) in &record.attributes {
                    entry.insert(name.clone(), value_to_json(value, store));
                }
                for (name, derived) in &record.derived {
                    entry.insert(name.clone(), derived_to_json(derived, store));
                }
                serde_json::Value::Object(entry)
            })
            .collect();
        let mut section = Map::new();
        section.insert("data".to_string(), serde_json::Value::Array(data));
        match batch.reports.get(record_type) {
            Some(Ok(report)) => {
                section.insert("kpis".to_string(), json!(report));
            }
            Some(Err(e)) => {
                section.insert("error".to_string(), json!(e.to_string()));
            }
            None => {}
        }
        output.insert(record_type.to_string(), serde_json::Value::Object(section));
    }
    for (record_type, report) in &batch.reports {
        if let Err(e) = report {
            output
                .entry(record_type.clone())
                .or_insert_with(|| json!({ "error": e.to_string() }));
        }
    }
    serde_json::Value::Object(output)
}

pub fn write_json(filename: &str, store: &RecordStore, batch: &BatchReport) -> Result<()> {
    let file = std::fs::File::create(filename)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &to_json(store, batch))?;
    writer.write_all("\n".as_bytes())?;
    writer.flush()?;
    Ok(())
}

fn value_to_json(value: &Value, store: &RecordStore) -> serde_json::Value {
    match value {
        Value::Integer(integer) => json!(integer),
        Value::Double(double) => Number::from_f64(*double)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(text) => json!(text),
        Value::Date(temporal) => json!(temporal.to_string()),
        Value::Ref(id) => match store.get(*id) {
            Some(nested) => serde_json::Value::Object(
                nested
                    .attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), value_to_json(value, store)))
                    .collect(),
            ),
            None => serde_json::Value::Null,
        },
    }
}

fn derived_to_json(derived: &Derived, store: &RecordStore) -> serde_json::Value {
    match derived {
        Derived::Bucket(bucket) => {
            let mut range = Map::new();
            if let Some(lower) = &bucket.lower {
                range.insert("min".to_string(), value_to_json(lower, store));
            }
            if let Some(upper) = &bucket.upper {
                range.insert("max".to_string(), value_to_json(upper, store));
            }
            serde_json::Value::Object(range)
        }
        Derived::Category(marker) => json!(marker),
        Derived::Randomized(value) => value_to_json(value, store),
        Derived::Masked => json!(MASK),
    }
}
