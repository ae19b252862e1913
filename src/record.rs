use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone,
    Timelike,
};

/// Redaction marker written by masking and by the categorical fallback.
pub const MASK: &str = "*****";

const SECONDS_PER_DAY: i64 = 86_400;

/// Stable identifier of a record inside a [`RecordStore`]. Identifiers are
/// handed out in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub usize);

impl Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A date or date-time literal. The variant remembers the lexical form so
/// that derived values are written back the way they came in. Date-times
/// with a UTC offset keep it; all forms are handled at second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Temporal {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

impl Temporal {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Some(Temporal::Date(date));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(date_time) = NaiveDateTime::parse_from_str(text, format) {
                return Some(Temporal::DateTime(date_time));
            }
        }
        DateTime::parse_from_rfc3339(text).ok().map(Temporal::Zoned)
    }

    /// Seconds since 0001-01-01T00:00:00, sub-second precision dropped.
    /// Zoned values count from their UTC instant.
    pub fn seconds(&self) -> i64 {
        match self {
            Temporal::Date(date) => date.num_days_from_ce() as i64 * SECONDS_PER_DAY,
            Temporal::DateTime(date_time) => naive_seconds(date_time),
            Temporal::Zoned(date_time) => naive_seconds(&date_time.naive_utc()),
        }
    }

    /// Build a value of the same lexical form from a second count. Plain
    /// dates are rounded to the nearest day.
    pub fn with_seconds(&self, seconds: i64) -> Option<Self> {
        match self {
            Temporal::Date(_) => {
                let days = (seconds + SECONDS_PER_DAY / 2).div_euclid(SECONDS_PER_DAY);
                NaiveDate::from_num_days_from_ce_opt(i32::try_from(days).ok()?).map(Temporal::Date)
            }
            Temporal::DateTime(_) => naive_from_seconds(seconds).map(Temporal::DateTime),
            Temporal::Zoned(date_time) => naive_from_seconds(seconds)
                .map(|utc| Temporal::Zoned(date_time.offset().from_utc_datetime(&utc))),
        }
    }
}

fn naive_seconds(date_time: &NaiveDateTime) -> i64 {
    date_time.date().num_days_from_ce() as i64 * SECONDS_PER_DAY
        + date_time.time().num_seconds_from_midnight() as i64
}

fn naive_from_seconds(seconds: i64) -> Option<NaiveDateTime> {
    let days = seconds.div_euclid(SECONDS_PER_DAY);
    let rest = seconds.rem_euclid(SECONDS_PER_DAY);
    let date = NaiveDate::from_num_days_from_ce_opt(i32::try_from(days).ok()?)?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(rest as u32, 0)?;
    Some(NaiveDateTime::new(date, time))
}

impl Display for Temporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Temporal::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Temporal::DateTime(date_time) => {
                write!(f, "{}", date_time.format("%Y-%m-%dT%H:%M:%S"))
            }
            Temporal::Zoned(date_time) => {
                let use_z = date_time.offset().local_minus_utc() == 0;
                f.write_str(&date_time.to_rfc3339_opts(SecondsFormat::Secs, use_z))
            }
        }
    }
}

/// Attribute value of a record: a literal or a reference to another record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Text(String),
    Date(Temporal),
    Ref(RecordId),
}

impl Value {
    pub fn is_literal(&self) -> bool {
        !matches!(self, Value::Ref(_))
    }

    /// Numeric reading of a literal; text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Double(value) => Some(*value),
            Value::Text(text) => text.trim().parse::<f64>().ok(),
            Value::Date(_) | Value::Ref(_) => None,
        }
    }

    /// Temporal reading of a literal; text is parsed.
    pub fn as_temporal(&self) -> Option<Temporal> {
        match self {
            Value::Date(temporal) => Some(*temporal),
            Value::Text(text) => Temporal::parse(text),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(value) => write!(f, "{}", value),
            Value::Double(value) => write!(f, "{}", value),
            Value::Text(text) => f.write_str(text),
            Value::Date(temporal) => write!(f, "{}", temporal),
            Value::Ref(id) => write!(f, "{}", id),
        }
    }
}

/// Generalization equivalence class. A missing bound is obfuscated: the
/// lowest bucket never reveals the true minimum, the highest never the
/// true maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub index: usize,
    pub lower: Option<Value>,
    pub upper: Option<Value>,
}

/// Value attached to a record by a technique.
#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
    /// Shared bucket of a numeric or date generalization.
    Bucket(Arc<Bucket>),
    /// Marker of a categorical generalization.
    Category(String),
    Randomized(Value),
    Masked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub record_type: Option<String>,
    pub attributes: BTreeMap<String, Value>,
    pub derived: BTreeMap<String, Derived>,
}

/// Projection of one attribute over the records of a type. Records without
/// a value for the attribute are not part of the column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub attribute: String,
    pub entries: Vec<(RecordId, Value)>,
}

impl Column {
    pub fn new(attribute: impl Into<String>, entries: Vec<(RecordId, Value)>) -> Self {
        Self {
            attribute: attribute.into(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory record store scoped to one anonymization request.
///
/// Records of a type keep their insertion order. Nested objects are stored
/// as untyped records and referenced through [`Value::Ref`].
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    types: BTreeMap<String, Vec<RecordId>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        record_type: Option<&str>,
        attributes: BTreeMap<String, Value>,
    ) -> RecordId {
        let id = RecordId(self.records.len());
        if let Some(record_type) = record_type {
            self.types
                .entry(record_type.to_string())
                .or_default()
                .push(id);
        }
        self.records.push(Record {
            id,
            record_type: record_type.map(str::to_string),
            attributes,
            derived: BTreeMap::new(),
        });
        id
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn ids_of_type(&self, record_type: &str) -> &[RecordId] {
        self.types
            .get(record_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn records_of_type<'a>(&'a self, record_type: &str) -> impl Iterator<Item = &'a Record> {
        self.ids_of_type(record_type)
            .iter()
            .filter_map(move |id| self.get(*id))
    }

    /// Look up an attribute on a referenced record. Literals and dangling
    /// references resolve to nothing.
    pub fn resolve(&self, value: &Value, attribute: &str) -> Option<&Value> {
        match value {
            Value::Ref(id) => self.get(*id)?.attributes.get(attribute),
            _ => None,
        }
    }

    pub fn read_column(&self, record_type: &str, attribute: &str) -> Column {
        let entries = self
            .records_of_type(record_type)
            .filter_map(|record| {
                record
                    .attributes
                    .get(attribute)
                    .map(|value| (record.id, value.clone()))
            })
            .collect();
        Column::new(attribute, entries)
    }

    pub fn write_derived(&mut self, id: RecordId, name: impl Into<String>, value: Derived) {
        if let Some(record) = self.records.get_mut(id.0) {
            record.derived.insert(name.into(), value);
        }
    }

    /// Remove the original values of an attribute from every record of a type.
    pub fn delete_original(&mut self, record_type: &str, attribute: &str) {
        let ids = self.ids_of_type(record_type).to_vec();
        for id in ids {
            if let Some(record) = self.records.get_mut(id.0) {
                record.attributes.remove(attribute);
            }
        }
    }
}
