use log::debug;

use super::StateClassifier;
use crate::models::{FeatureVector, TrafficState};
use crate::thresholds::ThresholdSet;

pub type Predicate = fn(&FeatureVector, &ThresholdSet) -> bool;

/// One `(predicate, label)` pair. Rules are evaluated in order; the first match wins.
#[derive(Clone)]
pub struct Rule {
    pub name: &'static str,
    pub state: TrafficState,
    predicate: Predicate,
}

impl Rule {
    pub fn new(name: &'static str, state: TrafficState, predicate: Predicate) -> Self {
        Self {
            name,
            state,
            predicate,
        }
    }

    pub fn matches(&self, fv: &FeatureVector, thresholds: &ThresholdSet) -> bool {
        (self.predicate)(fv, thresholds)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

fn is_idle(fv: &FeatureVector, t: &ThresholdSet) -> bool {
    // Inclusive, so zero-activity buckets stay idle even with a degenerate cutoff.
    fv.count as f64 <= t.theta_idle
}

fn is_weekend(fv: &FeatureVector, _t: &ThresholdSet) -> bool {
    fv.is_weekend
}

fn is_up_peak(fv: &FeatureVector, t: &ThresholdSet) -> bool {
    fv.count as f64 >= t.theta_high
        && fv.ratio_or_neutral() >= t.up_ratio
        && fv.lobby_share >= t.lobby_share
}

fn is_down_peak(fv: &FeatureVector, t: &ThresholdSet) -> bool {
    fv.count as f64 >= t.theta_high && fv.ratio_or_neutral() <= t.down_ratio
}

fn is_lunch_mixed(fv: &FeatureVector, t: &ThresholdSet) -> bool {
    let r = fv.ratio_or_neutral();
    fv.count as f64 >= t.theta_high
        && r > t.down_ratio
        && r < t.up_ratio
        && fv.entropy >= t.entropy_dispersed
}

fn always(_fv: &FeatureVector, _t: &ThresholdSet) -> bool {
    true
}

pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new("idle", TrafficState::Idle, is_idle),
        Rule::new("weekend", TrafficState::WeekendLowDemand, is_weekend),
        Rule::new("up_peak", TrafficState::MorningUpPeak, is_up_peak),
        Rule::new("down_peak", TrafficState::EveningDownPeak, is_down_peak),
        Rule::new("lunch_mixed", TrafficState::LunchMixed, is_lunch_mixed),
        Rule::new("default", TrafficState::AfternoonMixed, always),
    ]
}

#[derive(Debug, Clone)]
pub struct RuleClassifier {
    thresholds: ThresholdSet,
    rules: Vec<Rule>,
}

impl RuleClassifier {
    pub fn new(thresholds: ThresholdSet) -> Self {
        Self::with_rules(thresholds, default_rules())
    }

    pub fn with_rules(thresholds: ThresholdSet, rules: Vec<Rule>) -> Self {
        Self { thresholds, rules }
    }

    pub fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Every rule that matches, in evaluation order.
    pub fn matching_rules(&self, fv: &FeatureVector) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.matches(fv, &self.thresholds))
            .collect()
    }
}

impl StateClassifier for RuleClassifier {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn classify(&self, fv: &FeatureVector) -> TrafficState {
        match self.rules.iter().find(|r| r.matches(fv, &self.thresholds)) {
            Some(rule) => rule.state,
            None => {
                debug!("No rule matched bucket {}; using default", fv.bucket_start);
                TrafficState::AfternoonMixed
            }
        }
    }
}
