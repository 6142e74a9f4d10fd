//! Small numeric helpers shared by features, thresholds, forecasting and the simulator.

/// Linear-interpolation quantile (numpy's default method). `q` in [0, 1].
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, q)
}

/// Same as [`quantile`] on values already sorted ascending. `None` when empty.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q.clamp(0.0, 1.0) * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        Some(sorted[lo])
    } else {
        let frac = pos - lo as f64;
        Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Shannon entropy in bits of a count distribution. Zero for an empty distribution.
pub fn entropy_bits<I>(counts: I) -> f64
where
    I: IntoIterator<Item = u32>,
{
    let counts: Vec<u32> = counts.into_iter().filter(|&c| c > 0).collect();
    let total: u32 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

pub fn mae(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum();
    Some(sum / actual.len() as f64)
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    Some((sum / actual.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile(&v, 0.5).unwrap(), 2.5);
        assert_relative_eq!(quantile(&v, 0.0).unwrap(), 1.0);
        assert_relative_eq!(quantile(&v, 1.0).unwrap(), 4.0);
        assert_relative_eq!(quantile(&v, 0.75).unwrap(), 3.25);
        assert!(quantile(&[], 0.5).is_none());
        assert!(quantile(&[f64::NAN], 0.5).is_none());
    }

    #[test]
    fn test_quantile_sorted_handles_empty_and_single() {
        assert_eq!(quantile_sorted(&[], 0.5), None);
        assert_eq!(quantile_sorted(&[7.0], 0.9), Some(7.0));
        assert_eq!(quantile_sorted(&[1.0, 3.0], 2.0), Some(3.0));
    }

    #[test]
    fn test_entropy_bits() {
        assert_eq!(entropy_bits(Vec::<u32>::new()), 0.0);
        assert_eq!(entropy_bits(vec![5]), 0.0);
        assert_relative_eq!(entropy_bits(vec![3, 3]), 1.0);
        assert_relative_eq!(entropy_bits(vec![1, 1, 1, 1, 0]), 2.0);
    }

    #[test]
    fn test_error_metrics() {
        let actual = [1.0, 2.0, 3.0];
        let predicted = [1.0, 4.0, 3.0];
        assert_relative_eq!(mae(&actual, &predicted).unwrap(), 2.0 / 3.0);
        assert_relative_eq!(rmse(&actual, &predicted).unwrap(), (4.0f64 / 3.0).sqrt());
        assert!(mae(&actual, &predicted[..2]).is_none());
    }

    #[test]
    fn test_std_dev() {
        assert_relative_eq!(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap(), 2.0);
    }
}
