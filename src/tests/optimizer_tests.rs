#[cfg(test)]
mod optimizer_tests {
    use std::collections::{BTreeMap, HashMap, HashSet};

    use crate::config::ProfileFallback;
    use crate::models::{FloorRange, TrafficState};
    use crate::optimizer::{assign_greedy, ParkingOptimizer};
    use crate::profile::FloorDemandProfile;

    fn weights(pairs: &[(i32, f64)]) -> BTreeMap<i32, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_three_cars_split_low_and_high_demand() {
        let w = weights(&[(1, 1.0), (2, 1.0), (12, 2.0), (13, 3.0), (14, 2.0)]);
        let profile =
            FloorDemandProfile::from_weights(HashMap::from([(TrafficState::EveningDownPeak, w)]));
        let optimizer = ParkingOptimizer::new(FloorRange::new(1, 15), ProfileFallback::Fail);
        let idle = [(0, 1), (1, 8), (2, 15)];
        let plan = optimizer
            .plan(TrafficState::EveningDownPeak, &idle, &profile)
            .unwrap();

        assert_eq!(plan.targets.len(), 3);
        assert_eq!(plan.targets.iter().filter(|&&t| t <= 2).count(), 1);
        assert_eq!(
            plan.targets.iter().filter(|&&t| (12..=14).contains(&t)).count(),
            2
        );
        assert!(!plan.fallback);
    }

    #[test]
    fn test_assignment_is_one_to_one() {
        let idle = [(4, 3), (1, 3), (7, 10), (2, 20)];
        let targets = [2, 3, 11, 18];
        let assignments = assign_greedy(&idle, &targets);
        assert_eq!(assignments.len(), 4);

        let ids: HashSet<u32> = assignments.iter().map(|a| a.elevator_id).collect();
        assert_eq!(ids.len(), 4);
        let mut assigned: Vec<i32> = assignments.iter().map(|a| a.target_floor).collect();
        assigned.sort();
        assert_eq!(assigned, targets.to_vec());

        // equal distance: the lower id claims the shared floor
        let car1 = assignments.iter().find(|a| a.elevator_id == 1).unwrap();
        assert_eq!(car1.target_floor, 3);
    }
}
