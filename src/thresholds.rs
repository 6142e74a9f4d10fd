use log::{info, warn};
use serde::Serialize;

use crate::config::ThresholdConfig;
use crate::stats;

/// Thresholds derived from the empirical distribution of bucket counts.
/// Fixed for the duration of a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSet {
    /// Idle cutoff; compared inclusively (`count <= theta_idle`).
    pub theta_idle: f64,
    /// High-demand cutoff used by the peak rules.
    pub theta_high: f64,
    pub up_ratio: f64,
    pub down_ratio: f64,
    pub lobby_share: f64,
    pub entropy_dispersed: f64,
    /// True when the idle cutoff came from the fallback constant.
    pub idle_fallback_used: bool,
}

/// Idle cutoff from the non-zero counts. Returns the cutoff and whether the fallback fired.
///
/// Zero-activity buckets dominate nights and weekends, so the quantile of the full
/// distribution collapses to 0. Only non-zero counts are used, and the result is
/// never below 1.
pub fn compute_theta_idle(counts: &[f64], config: &ThresholdConfig) -> (f64, bool) {
    let nonzero: Vec<f64> = counts.iter().copied().filter(|&c| c > 0.0).collect();

    let (theta, fallback) = if nonzero.len() >= config.idle_min_nonzero {
        match stats::quantile(&nonzero, config.idle_quantile) {
            Some(q) => (q, false),
            None => (config.idle_fallback, true),
        }
    } else {
        warn!(
            "Only {} non-zero buckets (< {}); idle cutoff falls back to {}",
            nonzero.len(),
            config.idle_min_nonzero,
            config.idle_fallback
        );
        (config.idle_fallback, true)
    };

    if theta < 1.0 {
        warn!("Idle cutoff {:.3} is below 1; raising to 1", theta);
        (1.0, fallback)
    } else {
        (theta, fallback)
    }
}

impl ThresholdSet {
    pub fn from_counts(counts: &[f64], config: &ThresholdConfig) -> Self {
        let (mut theta_idle, mut idle_fallback_used) = compute_theta_idle(counts, config);
        if let Some(over) = config.theta_idle_override {
            theta_idle = over.max(1.0);
            idle_fallback_used = false;
        }

        let quantile_high = stats::quantile(counts, config.high_quantile).unwrap_or(0.0);
        let mut theta_high = config.theta_high_override.unwrap_or(quantile_high);
        // A cutoff at or below the idle cutoff would make the peak rules unreachable.
        if theta_high <= theta_idle {
            warn!(
                "High-demand cutoff {:.3} does not exceed idle cutoff {:.3}; using {:.3}",
                theta_high,
                theta_idle,
                theta_idle + 1.0
            );
            theta_high = theta_idle + 1.0;
        }

        let set = Self {
            theta_idle,
            theta_high,
            up_ratio: config.up_ratio,
            down_ratio: config.down_ratio,
            lobby_share: config.lobby_share,
            entropy_dispersed: config.entropy_dispersed,
            idle_fallback_used,
        };
        info!(
            "Thresholds: idle <= {:.2}{}, high >= {:.2}",
            set.theta_idle,
            if set.idle_fallback_used { " (fallback)" } else { "" },
            set.theta_high
        );
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_theta_idle_never_below_one() {
        let config = ThresholdConfig::default();
        let sequences: Vec<Vec<f64>> = vec![
            vec![],
            vec![0.0; 50],
            vec![1.0; 40],
            (0..100).map(|i| (i % 3) as f64).collect(),
            (0..200).map(|i| if i % 2 == 0 { 0.0 } else { (i % 17) as f64 }).collect(),
        ];
        for counts in sequences {
            let (theta, _) = compute_theta_idle(&counts, &config);
            assert!(theta >= 1.0, "theta {} for {:?}", theta, counts);
        }
    }

    #[test]
    fn test_all_zero_falls_back() {
        let (theta, fallback) = compute_theta_idle(&[0.0; 288], &ThresholdConfig::default());
        assert_eq!(theta, 1.0);
        assert!(fallback);
    }

    #[test]
    fn test_quantile_of_nonzero_subset() {
        let mut counts = vec![0.0; 500];
        counts.extend((1..=40).map(|v| v as f64));
        let (theta, fallback) = compute_theta_idle(&counts, &ThresholdConfig::default());
        assert!(!fallback);
        // 10th percentile of 1..=40
        assert_relative_eq!(theta, 4.9, epsilon = 1e-9);
    }

    #[test]
    fn test_high_cutoff_kept_above_idle() {
        let set = ThresholdSet::from_counts(&[0.0; 20], &ThresholdConfig::default());
        assert_eq!(set.theta_idle, 1.0);
        assert_eq!(set.theta_high, 2.0);
    }
}
