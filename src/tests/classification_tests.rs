#[cfg(test)]
mod classification_tests {
    use approx::assert_relative_eq;
    use chrono::Duration;

    use crate::classifier::{KMeansClassifier, RuleClassifier, StateClassifier};
    use crate::config::{PipelineConfig, ThresholdConfig};
    use crate::models::{Direction, EventRecord, TrafficState};
    use crate::pipeline::{ClassifierKind, PreparedData};
    use crate::tests::test_helpers::*;
    use crate::thresholds::{compute_theta_idle, ThresholdSet};

    const COUNTS: [u32; 12] = [0, 0, 1, 0, 2, 0, 0, 15, 20, 16, 0, 0];

    /// A Tuesday morning hour with the counts above. Car stops pin the first
    /// and last (empty) buckets into the timeline.
    fn sparse_morning() -> Vec<EventRecord> {
        let start = at(4, 7, 0);
        let mut events = vec![
            EventRecord::car_stop(start, 1, 0),
            EventRecord::car_stop(start + Duration::minutes(55), 1, 0),
        ];
        for (i, &n) in COUNTS.iter().enumerate() {
            let bucket = start + Duration::minutes(5 * i as i64);
            match n {
                0 => {}
                1 => events.extend(calls(bucket, 1, 5, Direction::Up)),
                2 => events.extend(calls(bucket, 2, 6, Direction::Down)),
                _ => events.extend(calls(bucket, n, 1, Direction::Up)),
            }
        }
        events
    }

    #[test]
    fn test_sparse_weekday_thresholds_and_states() {
        let features = extract(&sparse_morning());
        let counts: Vec<u32> = features.iter().map(|f| f.count).collect();
        assert_eq!(counts, COUNTS.to_vec());

        let as_f64: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        let thresholds = ThresholdSet::from_counts(&as_f64, &ThresholdConfig::default());
        assert_eq!(thresholds.theta_idle, 1.0);
        assert!(thresholds.idle_fallback_used);
        assert_relative_eq!(thresholds.theta_high, 5.25, epsilon = 1e-12);

        let classifier = RuleClassifier::new(thresholds);
        let states = classifier.classify_all(&features);
        for (fv, state) in features.iter().zip(&states) {
            match fv.count {
                0 | 1 => assert_eq!(*state, TrafficState::Idle),
                2 => assert_ne!(*state, TrafficState::Idle),
                _ => assert_eq!(*state, TrafficState::MorningUpPeak),
            }
        }
    }

    #[test]
    fn test_theta_idle_properties() {
        let config = ThresholdConfig::default();

        // all-zero history
        let (theta, fallback) = compute_theta_idle(&[0.0; 288], &config);
        assert_eq!(theta, 1.0);
        assert!(fallback);

        // enough non-zero buckets: quantile of the non-zero counts only
        let mut counts = vec![0.0; 500];
        counts.extend((1..=100).map(|c| c as f64));
        let (theta, fallback) = compute_theta_idle(&counts, &config);
        assert!(!fallback);
        assert_relative_eq!(theta, 10.9, epsilon = 1e-9);

        // low non-zero counts never push the cutoff below 1
        let (theta, _) = compute_theta_idle(&[0.0, 0.2, 0.3, 0.5], &config);
        assert!(theta >= 1.0);
    }

    #[test]
    fn test_classifiers_are_total_and_deterministic() {
        let data = PreparedData::from_events(PipelineConfig::default(), weekday_history(3..=5), 0).unwrap();
        for kind in [ClassifierKind::Rules, ClassifierKind::KMeans] {
            let classifier = data.build_classifier(kind);
            let a = classifier.classify_all(&data.features);
            let b = classifier.classify_all(&data.features);
            assert_eq!(a.len(), data.features.len());
            assert_eq!(a, b);
            for (fv, state) in data.features.iter().zip(&a) {
                if fv.count == 0 {
                    assert_eq!(*state, TrafficState::Idle);
                }
            }
        }
    }

    #[test]
    fn test_rule_states_follow_the_day() {
        let data = PreparedData::from_events(PipelineConfig::default(), weekday_history(3..=5), 0).unwrap();
        let classifier = data.build_classifier(ClassifierKind::Rules);
        let state_at = |h: u32, m: u32| {
            let fv = data
                .features
                .iter()
                .find(|f| f.bucket_start == at(4, h, m))
                .unwrap();
            classifier.classify(fv)
        };
        assert_eq!(state_at(8, 30), TrafficState::MorningUpPeak);
        assert_eq!(state_at(17, 30), TrafficState::EveningDownPeak);
        assert_eq!(state_at(3, 0), TrafficState::Idle);
    }

    #[test]
    fn test_kmeans_fit_is_seeded() {
        let data = PreparedData::from_events(PipelineConfig::default(), weekday_history(3..=4), 0).unwrap();
        let a = KMeansClassifier::fit(&data.features, 6, 42, 0.6, 0.4).unwrap();
        let b = KMeansClassifier::fit(&data.features, 6, 42, 0.6, 0.4).unwrap();
        assert_eq!(a.cluster_labels(), b.cluster_labels());
        assert_eq!(a.classify_all(&data.features), b.classify_all(&data.features));
    }
}
