use std::cmp::Ordering;
use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{AnonymizationError, Result};
use crate::record::{Column, RecordId, Temporal, Value};

/// Per data type hooks of the sliding-window noise algorithm.
pub trait NoiseDomain {
    type Item;

    fn parse(&self, attribute: &str, value: &Value) -> Result<Self::Item>;

    /// Signed distance from `b` to `a`.
    fn distance(&self, a: &Self::Item, b: &Self::Item) -> f64;

    fn ordering(&self, a: &Self::Item, b: &Self::Item) -> Ordering;

    /// Perturb `value` with Gaussian noise of standard deviation `scale`,
    /// staying inside `[min, max]`.
    fn create_noisy<R: Rng + ?Sized>(
        &self,
        value: &Self::Item,
        scale: f64,
        min: &Self::Item,
        max: &Self::Item,
        rng: &mut R,
    ) -> Value;
}

/// Integer and double attributes. Integers stay integral after noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericNoise {
    pub integral: bool,
}

impl NoiseDomain for NumericNoise {
    type Item = f64;

    fn parse(&self, attribute: &str, value: &Value) -> Result<f64> {
        match value.as_f64() {
            Some(number) if number.is_finite() => Ok(number),
            _ => Err(AnonymizationError::TypeMismatch {
                attribute: attribute.to_string(),
                value: value.to_string(),
                expected: "number",
            }),
        }
    }

    fn distance(&self, a: &f64, b: &f64) -> f64 {
        a - b
    }

    fn ordering(&self, a: &f64, b: &f64) -> Ordering {
        a.total_cmp(b)
    }

    fn create_noisy<R: Rng + ?Sized>(
        &self,
        value: &f64,
        scale: f64,
        min: &f64,
        max: &f64,
        rng: &mut R,
    ) -> Value {
        let noisy = reflect(*value, draw_noise(scale, rng), *min, *max);
        if self.integral {
            Value::Integer(noisy.round() as i64)
        } else {
            Value::Double(noisy)
        }
    }
}

/// Date and date-time attributes; noise is an offset in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateNoise;

impl NoiseDomain for DateNoise {
    type Item = Temporal;

    fn parse(&self, attribute: &str, value: &Value) -> Result<Temporal> {
        value
            .as_temporal()
            .ok_or_else(|| AnonymizationError::TypeMismatch {
                attribute: attribute.to_string(),
                value: value.to_string(),
                expected: "date",
            })
    }

    fn distance(&self, a: &Temporal, b: &Temporal) -> f64 {
        (a.seconds() - b.seconds()) as f64
    }

    fn ordering(&self, a: &Temporal, b: &Temporal) -> Ordering {
        a.seconds().cmp(&b.seconds())
    }

    fn create_noisy<R: Rng + ?Sized>(
        &self,
        value: &Temporal,
        scale: f64,
        min: &Temporal,
        max: &Temporal,
        rng: &mut R,
    ) -> Value {
        let noisy = reflect(
            value.seconds() as f64,
            draw_noise(scale, rng),
            min.seconds() as f64,
            max.seconds() as f64,
        );
        let noisy = value.with_seconds(noisy.round() as i64).unwrap_or(*value);
        Value::Date(noisy)
    }
}

// Randomize every value of a column. Records are sorted, each one gets a
// noise scale from the tightest window of n / bucket_count neighbours, and
// the noisy value is drawn within the global min and max of the column.
pub fn randomize<D, R>(
    domain: &D,
    column: &Column,
    bucket_count: usize,
    rng: &mut R,
) -> Result<BTreeMap<RecordId, Value>>
where
    D: NoiseDomain,
    R: Rng + ?Sized,
{
    let mut sorted = column
        .entries
        .iter()
        .map(|(id, value)| Ok((*id, domain.parse(&column.attribute, value)?)))
        .collect::<Result<Vec<_>>>()?;
    sorted.sort_by(|a, b| domain.ordering(&a.1, &b.1).then(a.0.cmp(&b.0)));
    let (min, max) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => (&first.1, &last.1),
        _ => return Ok(BTreeMap::new()),
    };
    let items: Vec<&D::Item> = sorted.iter().map(|(_, item)| item).collect();
    let scales = noise_scales(domain, &items, bucket_count);
    let randomized = sorted
        .iter()
        .zip(scales)
        .map(|((id, item), scale)| (*id, domain.create_noisy(item, scale, min, max, &mut *rng)))
        .collect();
    Ok(randomized)
}

// For every sorted position, the largest distance to the ends of the window
// of width n / bucket_count around it that keeps those distances smallest.
// Window starts only move forward.
pub fn noise_scales<D: NoiseDomain>(domain: &D, sorted: &[&D::Item], bucket_count: usize) -> Vec<f64> {
    let n = sorted.len();
    if n == 0 {
        return vec![];
    }
    let mut window = n / bucket_count.max(1);
    if window == n {
        window -= 1;
    }
    let gap = |a: usize, b: usize| domain.distance(sorted[a], sorted[b]).abs();
    let mut lower = 0;
    let mut scales = Vec::with_capacity(n);
    for idx in 0..n {
        while lower + window + 1 < n
            && (lower + window < idx || gap(lower, idx) > gap(lower + window + 1, idx))
        {
            lower += 1;
        }
        scales.push(gap(lower, idx).max(gap(lower + window, idx)));
    }
    scales
}

fn draw_noise<R: Rng + ?Sized>(scale: f64, rng: &mut R) -> f64 {
    if !scale.is_finite() || scale <= 0.0 {
        return 0.0;
    }
    match Normal::new(0.0, scale) {
        Ok(normal) => normal.sample(rng),
        Err(_) => 0.0,
    }
}

// Flip the noise once if it leaves the domain; clamp whatever still does.
fn reflect(value: f64, noise: f64, min: f64, max: f64) -> f64 {
    let mut noisy = value + noise;
    if noisy > max || noisy < min {
        noisy = value - noise;
    }
    num::clamp(noisy, min, max)
}
