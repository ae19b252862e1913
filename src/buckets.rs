use num::Float;

use crate::error::{AnonymizationError, Result};

/// Confidence that a chance match across all anonymized attributes does not
/// single out a record.
pub const CONFIDENCE: f64 = 0.99;

// Compute the number of equivalence classes for an attribute.
// sample_size is the number of non-null values of the attribute,
// attributes is the number of jointly generalized or randomized attributes.
// Generalization uses the result as bucket count, randomization to size its
// noise window, so both aim at the same worst-case re-identification risk.
pub fn bucket_count(sample_size: usize, attributes: usize) -> Result<usize> {
    if sample_size == 0 {
        return Err(AnonymizationError::EmptyInput {
            context: "bucket count needs at least one record".to_string(),
        });
    }
    if attributes == 0 {
        return Err(AnonymizationError::EmptyInput {
            context: "bucket count needs at least one anonymized attribute".to_string(),
        });
    }
    let n = sample_size as f64;
    let m = attributes as f64;
    let chance = root(1.0 - root(1.0 - root(CONFIDENCE, n), n), m);
    let buckets = (1.0 / chance).floor();
    // Rounding can only push a single-record sample below one bucket.
    Ok((buckets as usize).max(1))
}

fn root<T: Float>(value: T, degree: T) -> T {
    value.powf(T::one() / degree)
}
