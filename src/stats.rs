//! Order statistics over throughput and latency samples.
//!
//! Every function here is total: empty input yields `0.0` instead of a panic,
//! and the input slice is never reordered.

/// Median of `values`. Even-length input averages the two central values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let sorted = sorted(values);
    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        mean(&sorted[mid - 1..=mid])
    } else {
        sorted[mid]
    }
}

/// Percentile selection without interpolation.
///
/// Sorts ascending and picks index `floor(p * len)`, clamped to the last
/// element so that `p = 1.0` selects the maximum.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let sorted = sorted(values);
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    let index = ((p * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);

    sorted[index]
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.iter().sum::<f64>() / values.len() as f64
}

/// Drop `fraction` of the samples from each end of the sorted input.
///
/// At least one sample is always kept when the input is non-empty.
pub fn trim_outliers(values: &[f64], fraction: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let sorted = sorted(values);
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 0.5) };
    let mut cut = (sorted.len() as f64 * fraction).floor() as usize;
    if cut * 2 >= sorted.len() {
        cut = (sorted.len() - 1) / 2;
    }

    sorted[cut..sorted.len() - cut].to_vec()
}

/// Mean of the samples left after [`trim_outliers`].
pub fn trimmed_mean(values: &[f64], fraction: f64) -> f64 {
    mean(&trim_outliers(values, fraction))
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}
