use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::StateClassifier;
use crate::models::{FeatureVector, TrafficState};
use crate::stats;

pub const DEFAULT_CLUSTERS: usize = 6;
pub const DEFAULT_SEED: u64 = 42;
const N_INIT: usize = 10;
const MAX_ITER: usize = 100;

/// Width of the clustering feature space.
const DIM: usize = 11;

/// Demand, direction and dispersion first, then car activity and load.
/// Labelling reads columns 0 (count) and 2 (up ratio).
fn raw_features(fv: &FeatureVector) -> [f64; DIM] {
    [
        fv.count as f64,
        fv.rolling_mean.unwrap_or(fv.count as f64),
        fv.ratio_or_neutral(),
        fv.entropy,
        fv.lobby_share,
        if fv.maintenance_active { 1.0 } else { 0.0 },
        fv.car_calls as f64,
        fv.departures as f64,
        fv.departures_recent,
        fv.mean_load.unwrap_or(0.0),
        fv.load_recent,
    ]
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Clustering alternative to the rule classifier: k-means over standardised
/// features, with clusters labelled by their mean demand and direction.
#[derive(Debug, Clone)]
pub struct KMeansClassifier {
    means: [f64; DIM],
    scales: [f64; DIM],
    centroids: Vec<[f64; DIM]>,
    labels: Vec<TrafficState>,
    up_ratio: f64,
    down_ratio: f64,
}

impl KMeansClassifier {
    /// Fit on historical vectors. Returns `None` when there are fewer vectors than clusters.
    pub fn fit(
        features: &[FeatureVector],
        k: usize,
        seed: u64,
        up_ratio: f64,
        down_ratio: f64,
    ) -> Option<Self> {
        if k == 0 || features.len() < k {
            warn!(
                "Cannot fit {} clusters on {} feature vectors",
                k,
                features.len()
            );
            return None;
        }

        let raw: Vec<[f64; DIM]> = features.iter().map(raw_features).collect();
        let mut means = [0.0; DIM];
        let mut scales = [1.0; DIM];
        for d in 0..DIM {
            let column: Vec<f64> = raw.iter().map(|r| r[d]).collect();
            means[d] = stats::mean(&column).unwrap_or(0.0);
            let sd = stats::std_dev(&column).unwrap_or(0.0);
            scales[d] = if sd > 1e-12 { sd } else { 1.0 };
        }
        let scaled: Vec<[f64; DIM]> = raw
            .iter()
            .map(|r| {
                let mut s = [0.0; DIM];
                for d in 0..DIM {
                    s[d] = (r[d] - means[d]) / scales[d];
                }
                s
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut best: Option<(f64, Vec<[f64; DIM]>, Vec<usize>)> = None;
        for _ in 0..N_INIT {
            let (centroids, assignment, inertia) = lloyd(&scaled, k, &mut rng);
            if best.as_ref().map_or(true, |(b, _, _)| inertia < *b) {
                best = Some((inertia, centroids, assignment));
            }
        }
        let (inertia, centroids, assignment) = best?;

        // Cluster mean of raw count and up ratio drive the labels.
        let mut count_sum = vec![0.0; k];
        let mut ratio_sum = vec![0.0; k];
        let mut members = vec![0usize; k];
        for (r, &c) in raw.iter().zip(&assignment) {
            count_sum[c] += r[0];
            ratio_sum[c] += r[2];
            members[c] += 1;
        }
        let cluster_count: Vec<f64> = (0..k)
            .map(|c| count_sum[c] / members[c].max(1) as f64)
            .collect();
        let cluster_ratio: Vec<f64> = (0..k)
            .map(|c| {
                if members[c] == 0 {
                    0.5
                } else {
                    ratio_sum[c] / members[c] as f64
                }
            })
            .collect();
        let labels = label_clusters(&cluster_count, &cluster_ratio, up_ratio, down_ratio);

        info!(
            "Fitted {} clusters on {} vectors (inertia {:.3}): {:?}",
            k,
            features.len(),
            inertia,
            labels
        );

        Some(Self {
            means,
            scales,
            centroids,
            labels,
            up_ratio,
            down_ratio,
        })
    }

    pub fn cluster_labels(&self) -> &[TrafficState] {
        &self.labels
    }

    pub fn nearest_cluster(&self, fv: &FeatureVector) -> usize {
        let raw = raw_features(fv);
        let mut scaled = [0.0; DIM];
        for d in 0..DIM {
            scaled[d] = (raw[d] - self.means[d]) / self.scales[d];
        }
        nearest(&self.centroids, &scaled).0
    }

    pub fn ratio_cutoffs(&self) -> (f64, f64) {
        (self.up_ratio, self.down_ratio)
    }
}

/// Label clusters from their mean count and mean up ratio.
pub fn label_clusters(
    mean_count: &[f64],
    mean_ratio: &[f64],
    up_ratio: f64,
    down_ratio: f64,
) -> Vec<TrafficState> {
    let q1 = stats::quantile(mean_count, 0.25).unwrap_or(0.0);
    let q3 = stats::quantile(mean_count, 0.75).unwrap_or(0.0);
    mean_count
        .iter()
        .zip(mean_ratio)
        .map(|(&count, &ratio)| {
            if count >= q3 && ratio >= up_ratio {
                TrafficState::MorningUpPeak
            } else if count >= q3 && ratio <= down_ratio {
                TrafficState::EveningDownPeak
            } else if count <= q1 {
                TrafficState::Idle
            } else {
                TrafficState::AfternoonMixed
            }
        })
        .collect()
}

fn nearest(centroids: &[[f64; DIM]], point: &[f64; DIM]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(c, point)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

/// k-means++ seeding followed by Lloyd iterations.
fn lloyd(points: &[[f64; DIM]], k: usize, rng: &mut StdRng) -> (Vec<[f64; DIM]>, Vec<usize>, f64) {
    let mut centroids: Vec<[f64; DIM]> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);
    while centroids.len() < k {
        let d2: Vec<f64> = points.iter().map(|p| nearest(&centroids, p).1).collect();
        let total: f64 = d2.iter().sum();
        let next = if total <= 0.0 {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, &d) in d2.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        centroids.push(points[next]);
    }

    let mut assignment = vec![0usize; points.len()];
    for _ in 0..MAX_ITER {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let c = nearest(&centroids, p).0;
            if assignment[i] != c {
                assignment[i] = c;
                changed = true;
            }
        }

        let mut sums = vec![[0.0; DIM]; k];
        let mut counts = vec![0usize; k];
        for (p, &c) in points.iter().zip(&assignment) {
            for d in 0..DIM {
                sums[c][d] += p[d];
            }
            counts[c] += 1;
        }
        for c in 0..k {
            // Empty clusters keep their previous centroid.
            if counts[c] > 0 {
                for d in 0..DIM {
                    centroids[c][d] = sums[c][d] / counts[c] as f64;
                }
            }
        }

        if !changed {
            break;
        }
    }

    let inertia = points
        .iter()
        .zip(&assignment)
        .map(|(p, &c)| squared_distance(p, &centroids[c]))
        .sum();
    (centroids, assignment, inertia)
}

impl StateClassifier for KMeansClassifier {
    fn name(&self) -> &'static str {
        "kmeans"
    }

    fn classify(&self, fv: &FeatureVector) -> TrafficState {
        if fv.count == 0 {
            return TrafficState::Idle;
        }
        self.labels
            .get(self.nearest_cluster(fv))
            .copied()
            .unwrap_or(TrafficState::AfternoonMixed)
    }
}
