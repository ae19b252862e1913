//! Anonymization techniques and their selection from policy entries.

pub mod generalization;
pub mod masking;
pub mod randomization;

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;

use crate::error::{AnonymizationError, Result};
use crate::policy::{DataType, PolicyEntry, TechniqueName};
use crate::record::{Bucket, Column, Derived, RecordId, RecordStore, Value};

use self::randomization::{DateNoise, NumericNoise};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneralizationKind {
    Numeric,
    Date,
    Categorical { attribute_order: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomizationKind {
    Numeric { integral: bool },
    Date,
}

/// A technique instance selected for one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Technique {
    Generalization(GeneralizationKind),
    Randomization(RandomizationKind),
    Masking,
}

/// Per record result of applying a technique to a column.
#[derive(Debug, Clone, PartialEq)]
pub enum TechniqueOutput {
    Buckets(BTreeMap<RecordId, Arc<Bucket>>),
    Categories(BTreeMap<RecordId, String>),
    Randomized(BTreeMap<RecordId, Value>),
    Masked(Vec<RecordId>),
}

// Select the technique implementation for a policy entry.
pub fn dispatch(entry: &PolicyEntry) -> Result<Technique> {
    let unsupported = || AnonymizationError::UnsupportedCombination {
        technique: entry.technique.to_string(),
        data_type: entry.data_type.to_string(),
    };
    match &entry.technique {
        TechniqueName::Generalization => match &entry.data_type {
            data_type if data_type.is_numeric() => {
                Ok(Technique::Generalization(GeneralizationKind::Numeric))
            }
            data_type if data_type.is_temporal() => {
                Ok(Technique::Generalization(GeneralizationKind::Date))
            }
            DataType::Other(_) => Ok(Technique::Generalization(GeneralizationKind::Categorical {
                attribute_order: entry.attribute_order.clone().unwrap_or_default(),
            })),
            _ => Err(unsupported()),
        },
        TechniqueName::Randomization => match &entry.data_type {
            DataType::Integer => Ok(Technique::Randomization(RandomizationKind::Numeric {
                integral: true,
            })),
            DataType::Double => Ok(Technique::Randomization(RandomizationKind::Numeric {
                integral: false,
            })),
            data_type if data_type.is_temporal() => {
                Ok(Technique::Randomization(RandomizationKind::Date))
            }
            _ => Err(unsupported()),
        },
        TechniqueName::Masking => Ok(Technique::Masking),
        TechniqueName::Unknown(name) => Err(AnonymizationError::UnknownTechnique {
            technique: name.clone(),
        }),
    }
}

impl Technique {
    pub fn name(&self) -> TechniqueName {
        match self {
            Technique::Generalization(_) => TechniqueName::Generalization,
            Technique::Randomization(_) => TechniqueName::Randomization,
            Technique::Masking => TechniqueName::Masking,
        }
    }

    pub fn needs_bucket_count(&self) -> bool {
        self.name().needs_bucket_count()
    }

    /// Name of the attribute the technique writes its output to.
    pub fn derived_attribute(&self, attribute: &str) -> String {
        let suffix = match self {
            Technique::Generalization(_) => "generalized",
            Technique::Randomization(_) => "randomized",
            Technique::Masking => "masked",
        };
        format!("{}_{}", attribute, suffix)
    }

    /// Run the technique over a column. Generalization and randomization
    /// need a bucket count; `store` resolves referenced objects for the
    /// categorical variant.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        column: &Column,
        bucket_count: Option<usize>,
        store: &RecordStore,
        rng: &mut R,
    ) -> Result<TechniqueOutput> {
        let required = || {
            bucket_count.ok_or_else(|| AnonymizationError::EmptyInput {
                context: format!("no bucket count for {}", column.attribute),
            })
        };
        let output = match self {
            Technique::Generalization(GeneralizationKind::Numeric) => TechniqueOutput::Buckets(
                generalization::generalize_numeric(column, required()?)?,
            ),
            Technique::Generalization(GeneralizationKind::Date) => TechniqueOutput::Buckets(
                generalization::generalize_date(column, required()?)?,
            ),
            Technique::Generalization(GeneralizationKind::Categorical { attribute_order }) => {
                TechniqueOutput::Categories(generalization::generalize_categorical(
                    column,
                    required()?,
                    attribute_order,
                    store,
                )?)
            }
            Technique::Randomization(RandomizationKind::Numeric { integral }) => {
                TechniqueOutput::Randomized(randomization::randomize(
                    &NumericNoise {
                        integral: *integral,
                    },
                    column,
                    required()?,
                    rng,
                )?)
            }
            Technique::Randomization(RandomizationKind::Date) => TechniqueOutput::Randomized(
                randomization::randomize(&DateNoise, column, required()?, rng)?,
            ),
            Technique::Masking => TechniqueOutput::Masked(masking::mask(column)),
        };
        Ok(output)
    }
}

impl TechniqueOutput {
    pub fn len(&self) -> usize {
        match self {
            TechniqueOutput::Buckets(buckets) => buckets.len(),
            TechniqueOutput::Categories(categories) => categories.len(),
            TechniqueOutput::Randomized(values) => values.len(),
            TechniqueOutput::Masked(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Derived values to attach to the records.
    pub fn derived(&self) -> Vec<(RecordId, Derived)> {
        match self {
            TechniqueOutput::Buckets(buckets) => buckets
                .iter()
                .map(|(id, bucket)| (*id, Derived::Bucket(Arc::clone(bucket))))
                .collect(),
            TechniqueOutput::Categories(categories) => categories
                .iter()
                .map(|(id, marker)| (*id, Derived::Category(marker.clone())))
                .collect(),
            TechniqueOutput::Randomized(values) => values
                .iter()
                .map(|(id, value)| (*id, Derived::Randomized(value.clone())))
                .collect(),
            TechniqueOutput::Masked(ids) => ids.iter().map(|id| (*id, Derived::Masked)).collect(),
        }
    }
}
