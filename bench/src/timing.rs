//! Timed operation runner.
//!
//! Only the wrapped operation runs between the two clock reads; any setup
//! (building payloads, binding ids) must happen before calling in here.

use anyhow::{bail, Result};
use std::time::{Duration, Instant};

/// Run `op` once and return its value with the elapsed wall time.
pub fn time_once<T>(op: impl FnOnce() -> Result<T>) -> Result<(T, Duration)> {
    let start = Instant::now();
    let value = op()?;
    Ok((value, start.elapsed()))
}

/// Run `op` `reps` times back to back and return the average per call in
/// milliseconds. Zero repetitions have no average and are an error.
pub fn time_avg_ms(reps: usize, mut op: impl FnMut() -> Result<()>) -> Result<f64> {
    if reps == 0 {
        bail!("cannot average over zero repetitions");
    }
    let start = Instant::now();
    for _ in 0..reps {
        op()?;
    }
    Ok(per_op_ms(start.elapsed(), reps))
}

/// Total time of a batch expressed as milliseconds per logical operation.
pub fn per_op_ms(total: Duration, ops: usize) -> f64 {
    total.as_secs_f64() / ops.max(1) as f64 * 1000.0
}

pub fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_once_returns_value() {
        let (v, elapsed) = time_once(|| Ok(21 * 2)).unwrap();
        assert_eq!(v, 42);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn time_avg_runs_every_repetition() {
        let mut calls = 0;
        let avg = time_avg_ms(100, || {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 100);
        assert!(avg >= 0.0);
    }

    #[test]
    fn time_avg_stops_on_first_error() {
        let mut calls = 0;
        let res = time_avg_ms(10, || {
            calls += 1;
            if calls == 3 {
                anyhow::bail!("boom");
            }
            Ok(())
        });
        assert!(res.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn per_op_ms_divides_total() {
        let ms = per_op_ms(Duration::from_secs(2), 1000);
        assert!((ms - 2.0).abs() < 1e-12);
    }

    #[test]
    fn time_avg_rejects_zero_repetitions() {
        let mut calls = 0;
        let res = time_avg_ms(0, || {
            calls += 1;
            Ok(())
        });
        assert!(res.is_err());
        assert_eq!(calls, 0);
    }
}
