#[cfg(test)]
mod backtest_tests {
    use chrono::Duration;
    use std::collections::{BTreeMap, HashMap};

    use crate::config::{PipelineConfig, ProfileFallback};
    use crate::models::{Direction, EventRecord, FloorRange, TrafficState};
    use crate::optimizer::ParkingOptimizer;
    use crate::parallel::ParallelRunner;
    use crate::pipeline::{ClassifierKind, PreparedData};
    use crate::profile::FloorDemandProfile;
    use crate::simulator::{Backtest, Policy, PolicySummary, SimulationParams};
    use crate::stress::{default_scenarios, STRESS_SEED};
    use crate::tests::test_helpers::*;

    fn one_car() -> SimulationParams {
        SimulationParams {
            n_elevators: 1,
            lobby_floor: 1,
            seconds_per_floor: 1.5,
            door_time_s: 8.0,
            long_wait_threshold_s: 20.0,
        }
    }

    /// One call per bucket, two minutes in, alternating between floors 2 and 20.
    fn bimodal_calls(n: usize) -> Vec<EventRecord> {
        (0..n)
            .map(|t| {
                let floor = if t % 2 == 0 { 2 } else { 20 };
                let dir = if floor == 2 { Direction::Up } else { Direction::Down };
                EventRecord::hall_call(at(4, 10, 0) + Duration::minutes(5 * t as i64 + 2), floor, dir)
            })
            .collect()
    }

    fn bimodal_profile() -> FloorDemandProfile {
        let floors: BTreeMap<i32, f64> = [(2, 1.0), (20, 1.0)].into_iter().collect();
        FloorDemandProfile::from_weights(HashMap::from([(TrafficState::LunchMixed, floors)]))
    }

    fn summary(runs: &[PolicySummary], policy: Policy) -> &PolicySummary {
        runs.iter().find(|s| s.policy == policy).unwrap()
    }

    #[test]
    fn test_policies_on_bimodal_demand() {
        let events = bimodal_calls(12);
        let features = extract(&events);
        assert_eq!(features.len(), 12);

        let classifier = FixedClassifier(TrafficState::LunchMixed);
        let profile = bimodal_profile();
        let optimizer = ParkingOptimizer::new(FloorRange::new(1, 20), ProfileFallback::Fail);
        let backtest = Backtest::new(&features, &events, &classifier, &profile, &optimizer, one_car(), 5);

        let runs: Vec<PolicySummary> = backtest.run_all().into_iter().map(|r| r.summary).collect();
        assert_eq!(runs.len(), 3);
        let idle = summary(&runs, Policy::NoReposition);
        let lobby = summary(&runs, Policy::AlwaysLobby);
        let dynamic = summary(&runs, Policy::Dynamic);

        for s in &runs {
            assert_eq!(s.calls, 12);
            assert_eq!(s.failed_epochs, 0);
        }
        // lobby: 1.5 s to floor 2, 28.5 s to floor 20
        assert!((lobby.awt_s - 15.0).abs() < 1e-9);
        // no repositioning: every call after the first crosses 18 floors
        assert!((idle.awt_s - (1.5 + 11.0 * 27.0) / 12.0).abs() < 1e-9);
        assert!(dynamic.awt_s < lobby.awt_s);
        assert!(lobby.awt_s < idle.awt_s);

        assert_eq!(idle.reposition_moves, 0);
        assert!(dynamic.reposition_moves > 0);
        assert!(dynamic.max_wait_s < idle.max_wait_s);
    }

    #[test]
    fn test_first_epoch_has_no_state() {
        let events = bimodal_calls(4);
        let features = extract(&events);
        let classifier = FixedClassifier(TrafficState::LunchMixed);
        let profile = bimodal_profile();
        let optimizer = ParkingOptimizer::new(FloorRange::new(1, 20), ProfileFallback::Fail);
        let backtest = Backtest::new(&features, &events, &classifier, &profile, &optimizer, one_car(), 5);

        let run = backtest.run(Policy::Dynamic);
        assert_eq!(run.buckets.len(), 4);
        assert_eq!(run.buckets[0].state, None);
        assert_eq!(run.buckets[0].moves, 0);
        assert!(run.buckets[1..].iter().all(|b| b.state == Some(TrafficState::LunchMixed)));
        assert_eq!(run.buckets.iter().map(|b| b.calls).sum::<usize>(), 4);
    }

    #[test]
    fn test_missing_profile_skips_epochs() {
        let events = bimodal_calls(6);
        let features = extract(&events);
        let classifier = FixedClassifier(TrafficState::WeekendLowDemand);
        let profile = bimodal_profile();
        let optimizer = ParkingOptimizer::new(FloorRange::new(1, 20), ProfileFallback::Fail);
        let backtest = Backtest::new(&features, &events, &classifier, &profile, &optimizer, one_car(), 5);

        let dynamic = backtest.run(Policy::Dynamic);
        let idle = backtest.run(Policy::NoReposition);
        assert!(dynamic.summary.failed_epochs > 0);
        assert_eq!(dynamic.summary.reposition_moves, 0);
        assert_eq!(dynamic.summary.awt_s, idle.summary.awt_s);
        assert!(dynamic.buckets.iter().skip(1).any(|b| b.plan_failed));
    }

    #[test]
    fn test_backtest_is_deterministic() {
        let data = PreparedData::from_events(PipelineConfig::default(), weekday_history(3..=4), 0).unwrap();
        let classifier = data.build_classifier(ClassifierKind::Rules);
        let timeline = data.timeline(classifier.as_ref());
        let profile = data.profile(&timeline);
        let optimizer = data.optimizer();
        let backtest = Backtest::new(
            &data.features,
            &data.events,
            classifier.as_ref(),
            &profile,
            &optimizer,
            data.sim_params(),
            data.bucket_minutes(),
        );

        let a = backtest.run_all();
        let b = ParallelRunner::with_workers(2).quiet().run_policies(&backtest);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.summary, y.summary);
            assert_eq!(x.buckets, y.buckets);
        }
    }

    #[test]
    fn test_stress_grid() {
        let data = PreparedData::from_events(PipelineConfig::default(), weekday_history(3..=3), 0).unwrap();
        let classifier = data.build_classifier(ClassifierKind::Rules);
        let timeline = data.timeline(classifier.as_ref());
        let profile = data.profile(&timeline);
        let optimizer = data.optimizer();
        let backtest = Backtest::new(
            &data.features,
            &data.events,
            classifier.as_ref(),
            &profile,
            &optimizer,
            data.sim_params(),
            data.bucket_minutes(),
        );

        let scenarios = default_scenarios();
        let runs = ParallelRunner::with_workers(2)
            .quiet()
            .run_scenarios(&backtest, &scenarios, STRESS_SEED);
        assert_eq!(runs.len(), scenarios.len() * Policy::ALL.len());

        let calls = |scenario: &str| {
            runs.iter()
                .find(|r| r.scenario == scenario)
                .map(|r| r.run.summary.calls)
                .unwrap()
        };
        let base = calls("base");
        assert_eq!(calls("scale_1p5"), base + base / 2);
        assert_eq!(calls("shock_burst"), base + 120);
        assert_eq!(calls("params_plus20"), base);

        assert!(runs.iter().all(|r| r.run.summary.awt_s.is_finite()));
    }

    #[test]
    fn test_stress_grid_uses_replay_window_calls() {
        let data = PreparedData::from_events(PipelineConfig::default(), weekday_history(3..=5), 0).unwrap();
        let classifier = data.build_classifier(ClassifierKind::Rules);
        let timeline = data.timeline(classifier.as_ref());
        let profile = data.profile(&timeline);
        let optimizer = data.optimizer();
        let start = data.replay_start(Some(1));
        let backtest = Backtest::new(
            &data.features[start..],
            &data.events,
            classifier.as_ref(),
            &profile,
            &optimizer,
            data.sim_params(),
            data.bucket_minutes(),
        );

        let (origin, end) = backtest.window().unwrap();
        assert_eq!(origin, at(5, 0, 0));
        assert_eq!(end, at(6, 0, 0));
        let in_window = backtest.window_calls();
        assert!(in_window.len() < backtest.calls().len());
        assert!(in_window.iter().all(|c| c.time >= origin && c.time < end));

        let runs = ParallelRunner::with_workers(2)
            .quiet()
            .run_scenarios(&backtest, &default_scenarios(), STRESS_SEED);
        let calls = |scenario: &str| {
            runs.iter()
                .find(|r| r.scenario == scenario)
                .map(|r| r.run.summary.calls)
                .unwrap()
        };
        let base = calls("base");
        assert_eq!(base, in_window.len());
        assert_eq!(calls("shock_burst"), base + 120);
        assert_eq!(calls("scale_1p5"), base + base / 2);
        assert_eq!(calls("params_plus20"), base);
    }
}
