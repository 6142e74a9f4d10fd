pub mod clustering;
pub mod rules;

use crate::models::{FeatureVector, TrafficState};

pub use clustering::KMeansClassifier;
pub use rules::{Rule, RuleClassifier};

/// Maps one feature vector to exactly one traffic state. Total over all valid vectors.
pub trait StateClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, features: &FeatureVector) -> TrafficState;

    fn classify_all(&self, features: &[FeatureVector]) -> Vec<TrafficState> {
        features.iter().map(|fv| self.classify(fv)).collect()
    }
}
