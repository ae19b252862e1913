use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;
use serde::Serialize;

use crate::error::{AnonymizationError, Result};
use crate::policy::{TechniqueName, TypePolicy};
use crate::record::{Column, RecordId, Value};
use crate::technique::{RandomizationKind, Technique, TechniqueOutput};

/// Multiple of the mean randomization deviation within which two records
/// count as indistinguishable.
pub const SIMILARITY_BENCHMARK_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeKpi {
    pub technique: TechniqueName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_count: Option<usize>,
}

/// Privacy metrics of one anonymized record type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiReport {
    pub k_anonymity: usize,
    pub attributes: BTreeMap<String, AttributeKpi>,
}

/// Result of anonymizing one attribute, kept for the aggregation phase.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeOutcome {
    pub technique: Technique,
    pub bucket_count: Option<usize>,
    pub original: Column,
    pub output: TechniqueOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Bucket(usize),
    Category(String),
    Missing,
}

// Compute the k-anonymity of a record type.
// Records are grouped by their buckets on all generalized attributes at
// once, then each group is narrowed to the records that stay similar on
// every randomized attribute. k is the size of the smallest result.
// Policy attributes without an outcome are skipped.
pub fn aggregate_kpi(
    records: &[RecordId],
    policy: &TypePolicy,
    outcomes: &BTreeMap<String, AttributeOutcome>,
) -> Result<KpiReport> {
    let mut attributes = BTreeMap::new();
    let mut generalized = vec![];
    let mut randomized = vec![];
    for attribute in policy.keys() {
        let Some(outcome) = outcomes.get(attribute) else {
            debug!("No data for {}, skipped in k-anonymity", attribute);
            continue;
        };
        attributes.insert(
            attribute.clone(),
            AttributeKpi {
                technique: outcome.technique.name(),
                bucket_count: outcome.bucket_count,
            },
        );
        match &outcome.technique {
            Technique::Generalization(_) => generalized.push(&outcome.output),
            Technique::Randomization(kind) => randomized.push((attribute, *kind, outcome)),
            Technique::Masking => {}
        }
    }

    let mut similar = equivalence_classes(records, &generalized);
    for (attribute, kind, outcome) in randomized {
        let pairs = randomization_pairs(attribute, kind, outcome)?;
        let similarity = similarity_sets(records, &pairs);
        for (id, group) in similar.iter_mut() {
            match similarity.get(id) {
                Some(close) => group.retain(|other| close.contains(other)),
                None => group.clear(),
            }
        }
    }

    let k_anonymity = similar.values().map(BTreeSet::len).min().unwrap_or(0);
    Ok(KpiReport {
        k_anonymity,
        attributes,
    })
}

// Group records sharing the same assignment on every generalized attribute.
fn equivalence_classes(
    records: &[RecordId],
    generalized: &[&TechniqueOutput],
) -> BTreeMap<RecordId, BTreeSet<RecordId>> {
    let mut classes: HashMap<Vec<GroupKey>, BTreeSet<RecordId>> = HashMap::new();
    for id in records {
        let key = generalized
            .iter()
            .map(|output| group_key(output, id))
            .collect::<Vec<_>>();
        classes.entry(key).or_default().insert(*id);
    }
    let mut similar = BTreeMap::new();
    for class in classes.values() {
        for id in class {
            similar.insert(*id, class.clone());
        }
    }
    similar
}

fn group_key(output: &TechniqueOutput, id: &RecordId) -> GroupKey {
    match output {
        TechniqueOutput::Buckets(buckets) => buckets
            .get(id)
            .map_or(GroupKey::Missing, |bucket| GroupKey::Bucket(bucket.index)),
        TechniqueOutput::Categories(categories) => categories
            .get(id)
            .map_or(GroupKey::Missing, |marker| GroupKey::Category(marker.clone())),
        _ => GroupKey::Missing,
    }
}

// Original and randomized value of every record as plain numbers.
fn randomization_pairs(
    attribute: &str,
    kind: RandomizationKind,
    outcome: &AttributeOutcome,
) -> Result<BTreeMap<RecordId, (f64, f64)>> {
    let randomized = match &outcome.output {
        TechniqueOutput::Randomized(values) => values,
        _ => return Ok(BTreeMap::new()),
    };
    let scalar = |value: &Value| {
        let number = match kind {
            RandomizationKind::Numeric { .. } => value.as_f64(),
            RandomizationKind::Date => value.as_temporal().map(|date| date.seconds() as f64),
        };
        number.ok_or_else(|| AnonymizationError::TypeMismatch {
            attribute: attribute.to_string(),
            value: value.to_string(),
            expected: match kind {
                RandomizationKind::Numeric { .. } => "number",
                RandomizationKind::Date => "date",
            },
        })
    };
    let mut pairs = BTreeMap::new();
    for (id, original) in &outcome.original.entries {
        if let Some(noisy) = randomized.get(id) {
            pairs.insert(*id, (scalar(original)?, scalar(noisy)?));
        }
    }
    Ok(pairs)
}

// For each record, the records whose original value lies within the
// benchmark distance of its randomized value. Records without a value are
// only similar to each other.
fn similarity_sets(
    records: &[RecordId],
    pairs: &BTreeMap<RecordId, (f64, f64)>,
) -> HashMap<RecordId, BTreeSet<RecordId>> {
    let mut similarity = HashMap::new();
    let missing: BTreeSet<RecordId> = records
        .iter()
        .filter(|id| !pairs.contains_key(id))
        .copied()
        .collect();
    for id in &missing {
        similarity.insert(*id, missing.clone());
    }
    if pairs.is_empty() {
        return similarity;
    }

    let deviation: f64 = pairs
        .values()
        .map(|(original, noisy)| (original - noisy).abs())
        .sum::<f64>()
        / pairs.len() as f64;
    let benchmark = deviation * SIMILARITY_BENCHMARK_FACTOR;
    let mut originals: Vec<(f64, RecordId)> = pairs
        .iter()
        .map(|(id, (original, _))| (*original, *id))
        .collect();
    originals.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    for (id, (_, noisy)) in pairs {
        let start = originals.partition_point(|(original, _)| *original < noisy - benchmark);
        let end = originals.partition_point(|(original, _)| *original <= noisy + benchmark);
        let mut close: BTreeSet<RecordId> = originals[start..end.max(start)]
            .iter()
            .map(|(_, other)| *other)
            .collect();
        close.insert(*id);
        similarity.insert(*id, close);
    }
    similarity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DataType, PolicyEntry};
    use crate::record::Bucket;
    use crate::technique::GeneralizationKind;
    use std::sync::Arc;

    fn ids(n: usize) -> Vec<RecordId> {
        (0..n).map(RecordId).collect()
    }

    fn bucket_outcome(assignment: &[usize]) -> AttributeOutcome {
        let buckets: Vec<Arc<Bucket>> = (0..=*assignment.iter().max().unwrap())
            .map(|index| {
                Arc::new(Bucket {
                    index,
                    lower: None,
                    upper: None,
                })
            })
            .collect();
        let output = assignment
            .iter()
            .enumerate()
            .map(|(i, b)| (RecordId(i), Arc::clone(&buckets[*b])))
            .collect();
        AttributeOutcome {
            technique: Technique::Generalization(GeneralizationKind::Numeric),
            bucket_count: Some(buckets.len()),
            original: Column::new("a", vec![]),
            output: TechniqueOutput::Buckets(output),
        }
    }

    fn randomized_outcome(values: &[(f64, f64)]) -> AttributeOutcome {
        AttributeOutcome {
            technique: Technique::Randomization(RandomizationKind::Numeric { integral: false }),
            bucket_count: Some(2),
            original: Column::new(
                "r",
                values
                    .iter()
                    .enumerate()
                    .map(|(i, (o, _))| (RecordId(i), Value::Double(*o)))
                    .collect(),
            ),
            output: TechniqueOutput::Randomized(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, (_, r))| (RecordId(i), Value::Double(*r)))
                    .collect(),
            ),
        }
    }

    fn policy(entries: &[(&str, &str, &str)]) -> TypePolicy {
        entries
            .iter()
            .map(|(attribute, data_type, technique)| {
                (
                    attribute.to_string(),
                    PolicyEntry::new(
                        DataType::from(data_type.to_string()),
                        TechniqueName::from(technique.to_string()),
                    ),
                )
            })
            .collect()
    }

    #[test]
    fn test_single_generalization_gives_smallest_bucket() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert("a".to_string(), bucket_outcome(&[0, 0, 0, 1, 1, 2, 2, 2, 2]));
        let report = aggregate_kpi(
            &ids(9),
            &policy(&[("a", "integer", "generalization")]),
            &outcomes,
        )
        .unwrap();
        assert_eq!(report.k_anonymity, 2);
        assert_eq!(report.attributes["a"].bucket_count, Some(3));
    }

    #[test]
    fn test_joint_classes_use_tuples() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert("a".to_string(), bucket_outcome(&[0, 0, 1, 1]));
        outcomes.insert("b".to_string(), bucket_outcome(&[0, 1, 0, 1]));
        let report = aggregate_kpi(
            &ids(4),
            &policy(&[("a", "double", "generalization"), ("b", "double", "generalization")]),
            &outcomes,
        )
        .unwrap();
        assert_eq!(report.k_anonymity, 1);
    }

    #[test]
    fn test_no_generalization_is_one_class() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "m".to_string(),
            AttributeOutcome {
                technique: Technique::Masking,
                bucket_count: None,
                original: Column::new("m", vec![]),
                output: TechniqueOutput::Masked(ids(5)),
            },
        );
        let report = aggregate_kpi(&ids(5), &policy(&[("m", "string", "masking")]), &outcomes)
            .unwrap();
        assert_eq!(report.k_anonymity, 5);
        assert_eq!(report.attributes["m"].bucket_count, None);
        assert_eq!(report.attributes["m"].technique, TechniqueName::Masking);
    }

    #[test]
    fn test_randomization_narrows_classes() {
        // mean deviation 0.5, benchmark 1.0
        let values = [(1.0, 1.5), (2.0, 1.5), (10.0, 10.5), (11.0, 10.5)];
        let mut outcomes = BTreeMap::new();
        outcomes.insert("r".to_string(), randomized_outcome(&values));
        let report = aggregate_kpi(
            &ids(4),
            &policy(&[("r", "double", "randomization")]),
            &outcomes,
        )
        .unwrap();
        assert_eq!(report.k_anonymity, 2);
    }

    #[test]
    fn test_similarity_splits_equivalence_classes() {
        // buckets {0,1,2} {3,4,5}; similar pairs {0,1} {2,3} {4,5}
        let values = [
            (1.0, 1.5),
            (2.0, 1.5),
            (5.0, 5.5),
            (6.0, 5.5),
            (10.0, 10.5),
            (11.0, 10.5),
        ];
        let mut outcomes = BTreeMap::new();
        outcomes.insert("a".to_string(), bucket_outcome(&[0, 0, 0, 1, 1, 1]));
        let rules = policy(&[("a", "integer", "generalization")]);
        assert_eq!(aggregate_kpi(&ids(6), &rules, &outcomes).unwrap().k_anonymity, 3);

        let mut only_noise = BTreeMap::new();
        only_noise.insert("r".to_string(), randomized_outcome(&values));
        let rules = policy(&[("r", "double", "randomization")]);
        assert_eq!(aggregate_kpi(&ids(6), &rules, &only_noise).unwrap().k_anonymity, 2);

        outcomes.insert("r".to_string(), randomized_outcome(&values));
        let rules = policy(&[
            ("a", "integer", "generalization"),
            ("r", "double", "randomization"),
        ]);
        let report = aggregate_kpi(&ids(6), &rules, &outcomes).unwrap();
        // record 2 shares its bucket with 0 and 1 but is only similar to 3
        assert_eq!(report.k_anonymity, 1);
        assert_eq!(report.attributes.len(), 2);
    }

    #[test]
    fn test_similarity_sets() {
        let pairs: BTreeMap<RecordId, (f64, f64)> = [
            (RecordId(0), (1.0, 1.5)),
            (RecordId(1), (2.0, 1.5)),
            (RecordId(2), (10.0, 10.5)),
            (RecordId(3), (11.0, 10.5)),
        ]
        .into_iter()
        .collect();
        let sets = similarity_sets(&ids(5), &pairs);
        assert_eq!(sets[&RecordId(0)], [RecordId(0), RecordId(1)].into());
        assert_eq!(sets[&RecordId(3)], [RecordId(2), RecordId(3)].into());
        assert_eq!(sets[&RecordId(4)], [RecordId(4)].into());
    }

    #[test]
    fn test_missing_attribute_is_skipped() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert("a".to_string(), bucket_outcome(&[0, 0, 1, 1, 1]));
        let report = aggregate_kpi(
            &ids(5),
            &policy(&[
                ("a", "integer", "generalization"),
                ("gone", "double", "randomization"),
            ]),
            &outcomes,
        )
        .unwrap();
        assert_eq!(report.k_anonymity, 2);
        assert!(!report.attributes.contains_key("gone"));
    }

    #[test]
    fn test_no_records() {
        let report = aggregate_kpi(&[], &TypePolicy::new(), &BTreeMap::new()).unwrap();
        assert_eq!(report.k_anonymity, 0);
    }
}
