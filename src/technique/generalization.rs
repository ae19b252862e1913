use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;

use log::debug;
use num::Float;

use crate::error::{AnonymizationError, Result};
use crate::record::{Bucket, Column, RecordId, RecordStore, Temporal, Value, MASK};

/// Share of the average bucket size the smallest category group must exceed.
pub const MIN_GROUP_SHARE: f64 = 0.5;

// Partition a numeric column into at most bucket_count buckets of
// (nearly) equal size. Equal values are ordered by record id so repeated
// runs assign the same buckets.
pub fn generalize_numeric(
    column: &Column,
    bucket_count: usize,
) -> Result<BTreeMap<RecordId, Arc<Bucket>>> {
    let mut sorted = column
        .entries
        .iter()
        .map(|(id, value)| match value.as_f64() {
            Some(number) if number.is_finite() => Ok((*id, number)),
            _ => Err(type_mismatch(&column.attribute, value, "number")),
        })
        .collect::<Result<Vec<_>>>()?;
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    Ok(assign_buckets(&sorted, bucket_count, |a, b| {
        Value::Double(midpoint(*a, *b))
    }))
}

// Same as generalize_numeric for date and date-time literals. Boundaries
// keep the lexical form of the values they were computed from.
pub fn generalize_date(
    column: &Column,
    bucket_count: usize,
) -> Result<BTreeMap<RecordId, Arc<Bucket>>> {
    let mut sorted = column
        .entries
        .iter()
        .map(|(id, value)| {
            value
                .as_temporal()
                .map(|temporal| (*id, temporal))
                .ok_or_else(|| type_mismatch(&column.attribute, value, "date"))
        })
        .collect::<Result<Vec<_>>>()?;
    sorted.sort_by(|a, b| a.1.seconds().cmp(&b.1.seconds()).then(a.0.cmp(&b.0)));
    Ok(assign_buckets(&sorted, bucket_count, |a, b| {
        Value::Date(date_midpoint(a, b))
    }))
}

// Replace each referenced object by the value of the first candidate
// attribute that yields few enough, large enough groups. Falls back to
// the mask marker when no candidate qualifies.
pub fn generalize_categorical(
    column: &Column,
    bucket_count: usize,
    attribute_order: &[String],
    store: &RecordStore,
) -> Result<BTreeMap<RecordId, String>> {
    if let Some((_, value)) = column.entries.iter().find(|(_, value)| value.is_literal()) {
        return Err(type_mismatch(&column.attribute, value, "object"));
    }
    let total = column.len();
    if total == 0 {
        return Ok(BTreeMap::new());
    }
    for candidate in attribute_order {
        let markers: Vec<(RecordId, String)> = column
            .entries
            .iter()
            .map(|(id, value)| {
                let marker = store
                    .resolve(value, candidate)
                    .filter(|value| value.is_literal())
                    .map(ToString::to_string)
                    .unwrap_or_default();
                (*id, marker)
            })
            .collect();
        if accepts_grouping(&markers, total, bucket_count) {
            debug!(
                "{} generalized by {} ({} buckets)",
                column.attribute, candidate, bucket_count
            );
            return Ok(markers.into_iter().collect());
        }
    }
    debug!("{} has no discriminating attribute, masking", column.attribute);
    Ok(column
        .entries
        .iter()
        .map(|(id, _)| (*id, MASK.to_string()))
        .collect())
}

fn accepts_grouping(markers: &[(RecordId, String)], total: usize, bucket_count: usize) -> bool {
    let mut groups: HashMap<&str, usize> = HashMap::new();
    for (_, marker) in markers {
        *groups.entry(marker.as_str()).or_insert(0) += 1;
    }
    let smallest = match groups.values().min() {
        Some(&smallest) => smallest,
        None => return false,
    };
    groups.len() <= bucket_count
        && smallest as f64 > total as f64 * MIN_GROUP_SHARE / bucket_count as f64
}

// Assign sorted position i to bucket floor(bucket_count * i / n) and link
// every record to its shared bucket. Inner boundaries sit halfway between
// neighbouring buckets; the outer ones are left out.
fn assign_buckets<T, F>(
    sorted: &[(RecordId, T)],
    bucket_count: usize,
    midpoint: F,
) -> BTreeMap<RecordId, Arc<Bucket>>
where
    F: Fn(&T, &T) -> Value,
{
    let ranges = bucket_ranges(sorted.len(), bucket_count);
    let mut assignments = BTreeMap::new();
    for (index, range) in ranges.iter().enumerate() {
        let lower = index
            .checked_sub(1)
            .map(|previous| midpoint(&sorted[ranges[previous].end - 1].1, &sorted[range.start].1));
        let upper = ranges
            .get(index + 1)
            .map(|next| midpoint(&sorted[range.end - 1].1, &sorted[next.start].1));
        let bucket = Arc::new(Bucket {
            index,
            lower,
            upper,
        });
        for (id, _) in &sorted[range.clone()] {
            assignments.insert(*id, Arc::clone(&bucket));
        }
    }
    assignments
}

// Position ranges of the non-empty buckets, in ascending order.
fn bucket_ranges(n: usize, bucket_count: usize) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut current = None;
    for i in 0..n {
        let bucket = bucket_count * i / n;
        if current == Some(bucket) {
            if let Some(range) = ranges.last_mut() {
                range.end = i + 1;
            }
        } else {
            ranges.push(i..i + 1);
            current = Some(bucket);
        }
    }
    ranges
}

fn midpoint<T: Float>(a: T, b: T) -> T {
    (a + b) / (T::one() + T::one())
}

fn date_midpoint(a: &Temporal, b: &Temporal) -> Temporal {
    let start = a.seconds();
    let half = (b.seconds() - start) as f64 / 2.0;
    a.with_seconds(start + half.round() as i64).unwrap_or(*a)
}

fn type_mismatch(attribute: &str, value: &Value, expected: &'static str) -> AnonymizationError {
    AnonymizationError::TypeMismatch {
        attribute: attribute.to_string(),
        value: value.to_string(),
        expected,
    }
}
