//! Window statistics used by the feature engine and the classifier.
//!
//! Everything here returns `None` instead of a NaN or a division by zero, so
//! a degenerate window can only ever fail a test, never poison a result.

/// Arithmetic mean. `None` for an empty window or non-finite input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (divide by n - 1). `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// `sample_std / mean`. `None` when the mean is zero or negative or the
/// deviation is undefined.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if m <= 0.0 {
        return None;
    }
    let sd = sample_std(values)?;
    Some(sd / m)
}

/// Least-squares slope of `values` against the index axis `0..n`.
pub fn linear_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let y_mean = mean(values)?;
    let x_mean = (n - 1) as f64 / 2.0;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    Some(num / den)
}

/// Number of day-over-day strict increases.
pub fn rising_days(values: &[f64]) -> usize {
    values.windows(2).filter(|w| w[1] > w[0]).count()
}

/// Trailing rolling mean. Positions before the window fills, and windows
/// containing a NaN, are NaN.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }

    let mut sum = 0.0;
    let mut nan_count = 0usize;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            nan_count += 1;
        } else {
            sum += v;
        }
        if i >= window {
            let leaving = values[i - window];
            if leaving.is_nan() {
                nan_count -= 1;
            } else {
                sum -= leaving;
            }
        }
        if i + 1 >= window && nan_count == 0 {
            out[i] = sum / window as f64;
        }
    }
    out
}
