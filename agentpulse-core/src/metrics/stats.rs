//! Numeric helpers: percentiles, means, response-time histogram.

use serde::Serialize;

/// Histogram bucket lower edges in minutes. Bucket `i` holds
/// `[EDGES[i], EDGES[i + 1])`; the last bucket is open-ended.
pub const HISTOGRAM_EDGES_MINUTES: [u32; 10] = [0, 2, 5, 10, 20, 40, 60, 120, 240, 480];

/// One histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBucket {
    /// Lower edge in minutes (inclusive)
    pub minutes: u32,
    pub count: usize,
}

/// Percentile by linear interpolation between closest ranks.
///
/// `p` is a fraction in `[0, 1]`. Returns `None` for an empty sample.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let p = p.clamp(0.0, 1.0);
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 0.5)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// `numerator / denominator`, or `None` when either side is missing or the
/// denominator is zero.
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d),
        _ => None,
    }
}

/// Index of the bucket that holds a response time of `minutes`.
pub fn bucket_index(minutes: f64) -> usize {
    HISTOGRAM_EDGES_MINUTES
        .iter()
        .rposition(|&edge| minutes >= edge as f64)
        .unwrap_or(0)
}

/// Bucket response times given in seconds.
pub fn histogram(response_secs: &[f64]) -> Vec<HistogramBucket> {
    let mut counts = [0usize; HISTOGRAM_EDGES_MINUTES.len()];
    for secs in response_secs {
        counts[bucket_index(secs / 60.0)] += 1;
    }
    HISTOGRAM_EDGES_MINUTES
        .iter()
        .zip(counts)
        .map(|(&minutes, count)| HistogramBucket { minutes, count })
        .collect()
}
