//! Latency sample aggregation: mean and p95.

/// Below this many samples p95 falls back to a plain index into the sorted
/// samples instead of interpolating.
pub const INTERPOLATION_MIN_SAMPLES: usize = 20;

/// A merged set of per-operation latencies in milliseconds. Order carries no
/// meaning; only the aggregates do.
#[derive(Debug, Clone, Default)]
pub struct LatencySamples {
    samples_ms: Vec<f64>,
}

impl LatencySamples {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            samples_ms: Vec::with_capacity(n),
        }
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = f64>) {
        self.samples_ms.extend(other);
    }

    pub fn len(&self) -> usize {
        self.samples_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples_ms.is_empty()
    }

    pub fn mean_ms(&self) -> f64 {
        mean(&self.samples_ms)
    }

    pub fn p95_ms(&self) -> f64 {
        p95(&self.samples_ms)
    }
}

impl FromIterator<f64> for LatencySamples {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self {
            samples_ms: iter.into_iter().collect(),
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 95th percentile.
///
/// With at least [`INTERPOLATION_MIN_SAMPLES`] values this is the 19th of 20
/// cut points of the "exclusive" quantile method (positions over `n + 1`,
/// linear interpolation between neighbours). Smaller sets index the sorted
/// values at `⌈0.95·(n−1)⌉`. Both branches are kept as-is so results stay
/// comparable with earlier runs.
pub fn p95(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();

    if n >= INTERPOLATION_MIN_SAMPLES {
        const CUTS: i64 = 20;
        const CUT: i64 = 19;
        let m = n as i64 + 1;
        let j = (CUT * m / CUTS).clamp(1, n as i64 - 1);
        let delta = CUT * m - j * CUTS;
        let lo = sorted[(j - 1) as usize];
        let hi = sorted[j as usize];
        return (lo * (CUTS - delta) as f64 + hi * delta as f64) / CUTS as f64;
    }

    // ⌈95·(n−1)/100⌉ in integer arithmetic.
    let idx = (95 * (n - 1)).div_ceil(100);
    sorted[idx.min(n - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p95_of_one_to_hundred_interpolates() {
        let v: Vec<f64> = (1..=100).map(f64::from).collect();
        let p = p95(&v);
        assert!((p - 95.95).abs() < 1e-9, "got {p}");
        assert!((p - 96.0).abs() <= 1.0);
    }

    #[test]
    fn p95_ignores_input_order() {
        let mut v: Vec<f64> = (1..=100).map(f64::from).collect();
        v.reverse();
        assert!((p95(&v) - 95.95).abs() < 1e-9);
    }

    #[test]
    fn p95_small_sample_uses_ceiling_index() {
        // n = 11: ⌈0.95 × 10⌉ = 10 → the maximum.
        let v: Vec<f64> = (1..=11).map(f64::from).collect();
        assert_eq!(p95(&v), 11.0);
        // n = 5: ⌈0.95 × 4⌉ = 4.
        assert_eq!(p95(&[5.0, 1.0, 4.0, 2.0, 3.0]), 5.0);
        assert_eq!(p95(&[7.0]), 7.0);
    }

    #[test]
    fn p95_at_threshold_interpolates() {
        // n = 20: j = 19, delta = 19 → x[18] + 0.95·(x[19] − x[18]).
        let v: Vec<f64> = (1..=20).map(f64::from).collect();
        assert!((p95(&v) - 19.95).abs() < 1e-9);
    }

    #[test]
    fn empty_samples_aggregate_to_zero() {
        let s = LatencySamples::with_capacity(8);
        assert!(s.is_empty());
        assert_eq!(s.mean_ms(), 0.0);
        assert_eq!(s.p95_ms(), 0.0);
    }

    #[test]
    fn mean_of_samples() {
        let s: LatencySamples = [1.0, 2.0, 3.0, 6.0].into_iter().collect();
        assert_eq!(s.len(), 4);
        assert!((s.mean_ms() - 3.0).abs() < 1e-12);
    }
}
