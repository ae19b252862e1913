use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Declared data type of a policy attribute.
///
/// Anything that is not one of the literal types names an object type,
/// which is only anonymizable through categorical generalization or masking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Integer,
    Double,
    Date,
    DateTime,
    String,
    Other(String),
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Double)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::DateTime)
    }
}

impl From<String> for DataType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "integer" => DataType::Integer,
            "double" => DataType::Double,
            "date" => DataType::Date,
            "dateTime" => DataType::DateTime,
            "string" => DataType::String,
            _ => DataType::Other(name),
        }
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.to_string()
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => f.write_str("integer"),
            DataType::Double => f.write_str("double"),
            DataType::Date => f.write_str("date"),
            DataType::DateTime => f.write_str("dateTime"),
            DataType::String => f.write_str("string"),
            DataType::Other(name) => f.write_str(name),
        }
    }
}

/// Technique name as written in a policy. Unknown names survive parsing so
/// that dispatch can reject them with a proper error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TechniqueName {
    Generalization,
    Randomization,
    Masking,
    Unknown(String),
}

impl TechniqueName {
    /// Generalization and randomization count towards the number of jointly
    /// anonymized attributes; masking does not.
    pub fn needs_bucket_count(&self) -> bool {
        matches!(
            self,
            TechniqueName::Generalization | TechniqueName::Randomization
        )
    }
}

impl From<String> for TechniqueName {
    fn from(name: String) -> Self {
        match name.as_str() {
            "generalization" => TechniqueName::Generalization,
            "randomization" => TechniqueName::Randomization,
            "masking" => TechniqueName::Masking,
            _ => TechniqueName::Unknown(name),
        }
    }
}

impl From<TechniqueName> for String {
    fn from(name: TechniqueName) -> Self {
        name.to_string()
    }
}

impl Display for TechniqueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TechniqueName::Generalization => f.write_str("generalization"),
            TechniqueName::Randomization => f.write_str("randomization"),
            TechniqueName::Masking => f.write_str("masking"),
            TechniqueName::Unknown(name) => f.write_str(name),
        }
    }
}

/// Anonymization settings for a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEntry {
    pub data_type: DataType,
    #[serde(rename = "anonymization")]
    pub technique: TechniqueName,
    /// Candidate attributes of the referenced object, most specific first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_order: Option<Vec<String>>,
}

impl PolicyEntry {
    pub fn new(data_type: DataType, technique: TechniqueName) -> Self {
        Self {
            data_type,
            technique,
            attribute_order: None,
        }
    }

    pub fn with_attribute_order(mut self, order: Vec<String>) -> Self {
        self.attribute_order = Some(order);
        self
    }
}

/// Policy entries of one record type, keyed by attribute name.
pub type TypePolicy = BTreeMap<String, PolicyEntry>;

/// Full anonymization policy: record type -> attribute -> entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policy {
    pub types: BTreeMap<String, TypePolicy>,
}

impl Policy {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let policy: Policy = serde_json::from_str(json).context("Could not parse policy")?;
        Ok(policy)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read policy file {}", path.display()))?;
        let policy = Self::from_json_str(&json)?;
        info!(
            "Policy loaded: {} record types, {} attributes",
            policy.types.len(),
            policy.types.values().map(|t| t.len()).sum::<usize>()
        );
        Ok(policy)
    }

    pub fn insert(&mut self, record_type: &str, attribute: &str, entry: PolicyEntry) {
        self.types
            .entry(record_type.to_string())
            .or_default()
            .insert(attribute.to_string(), entry);
    }

    pub fn for_type(&self, record_type: &str) -> Option<&TypePolicy> {
        self.types.get(record_type)
    }
}
