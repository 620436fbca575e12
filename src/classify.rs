use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::models::Segment;

pub const HEURISTIC_ENGINE: &str = "heuristic";
pub const KMEANS_ENGINE: &str = "kmeans";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierInput {
    pub score: f64,
    /// Acknowledgement rate as shown on the profile (rounded percent / 100).
    pub ack_rate: f64,
    pub features: Vec<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ClassifierError {
    #[error("no users to classify")]
    Empty,
    #[error("feature vector {index} has {found} values, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("feature vector {index} contains a non-finite value")]
    NonFinite { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EnginePreference {
    /// Cluster when enough users exist, otherwise use thresholds.
    #[default]
    Auto,
    /// Always use the threshold rules.
    Heuristic,
}

pub trait Classifier {
    fn engine(&self) -> &'static str;

    fn is_available(&self, user_count: usize) -> bool;

    /// Returns one segment per input, in input order.
    fn classify(&self, inputs: &[ClassifierInput]) -> Result<Vec<Segment>, ClassifierError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn segment(score: f64, ack_rate: f64) -> Segment {
        if score >= 0.7 && ack_rate >= 0.65 {
            Segment::HighlyEngaged
        } else if score >= 0.45 {
            Segment::Steady
        } else {
            Segment::NeedsAttention
        }
    }

    pub fn segments(&self, inputs: &[ClassifierInput]) -> Vec<Segment> {
        inputs
            .iter()
            .map(|input| Self::segment(input.score, input.ack_rate))
            .collect()
    }
}

impl Classifier for HeuristicClassifier {
    fn engine(&self) -> &'static str {
        HEURISTIC_ENGINE
    }

    fn is_available(&self, _user_count: usize) -> bool {
        true
    }

    fn classify(&self, inputs: &[ClassifierInput]) -> Result<Vec<Segment>, ClassifierError> {
        Ok(self.segments(inputs))
    }
}

/// Seeded k-means over the feature vectors. Clusters are ranked by the mean
/// engagement score of their members.
#[derive(Debug, Clone)]
pub struct ClusteringClassifier {
    pub clusters: usize,
    pub min_users: usize,
    pub restarts: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ClusteringClassifier {
    fn default() -> Self {
        Self {
            clusters: 3,
            min_users: 3,
            restarts: 10,
            max_iterations: 300,
            seed: 0,
        }
    }
}

impl Classifier for ClusteringClassifier {
    fn engine(&self) -> &'static str {
        KMEANS_ENGINE
    }

    fn is_available(&self, user_count: usize) -> bool {
        self.clusters > 0 && user_count >= self.min_users
    }

    fn classify(&self, inputs: &[ClassifierInput]) -> Result<Vec<Segment>, ClassifierError> {
        let points = validate(inputs)?;
        let k = self.clusters.min(points.len());
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut best: Option<(Vec<usize>, f64)> = None;
        for _ in 0..self.restarts.max(1) {
            let (labels, inertia) = lloyd(&points, k, self.max_iterations, &mut rng);
            if best.as_ref().map_or(true, |(_, current)| inertia < *current) {
                best = Some((labels, inertia));
            }
        }
        let Some((labels, _)) = best else {
            return Err(ClassifierError::Empty);
        };

        let mut totals = vec![(0.0_f64, 0_usize); k];
        for (input, label) in inputs.iter().zip(&labels) {
            totals[*label].0 += input.score;
            totals[*label].1 += 1;
        }

        let mut ranked: Vec<(usize, f64)> = totals
            .iter()
            .enumerate()
            .filter(|(_, (_, count))| *count > 0)
            .map(|(label, (sum, count))| (label, sum / *count as f64))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut mapping = vec![Segment::Steady; k];
        for (rank, (label, _)) in ranked.iter().enumerate() {
            let last = Segment::RANKED.len() - 1;
            mapping[*label] = Segment::RANKED[rank.min(last)];
        }

        Ok(labels.into_iter().map(|label| mapping[label]).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub segments: Vec<Segment>,
    pub engine: &'static str,
}

pub fn classify_users(inputs: &[ClassifierInput], preference: EnginePreference) -> Classification {
    let heuristic = HeuristicClassifier;
    match preference {
        EnginePreference::Auto => {
            classify_with_fallback(&ClusteringClassifier::default(), &heuristic, inputs)
        }
        EnginePreference::Heuristic => Classification {
            segments: heuristic.segments(inputs),
            engine: heuristic.engine(),
        },
    }
}

/// Uses `primary` when it is available and succeeds; otherwise every user is
/// labelled by the heuristic. Labels from the two engines are never mixed.
pub fn classify_with_fallback(
    primary: &dyn Classifier,
    fallback: &HeuristicClassifier,
    inputs: &[ClassifierInput],
) -> Classification {
    if primary.is_available(inputs.len()) {
        match primary.classify(inputs) {
            Ok(segments) if segments.len() == inputs.len() => {
                return Classification {
                    segments,
                    engine: primary.engine(),
                };
            }
            Ok(segments) => {
                tracing::warn!(
                    engine = primary.engine(),
                    expected = inputs.len(),
                    returned = segments.len(),
                    "Classifier returned the wrong number of labels, using heuristic"
                );
            }
            Err(error) => {
                tracing::warn!(
                    engine = primary.engine(),
                    error = %error,
                    "Classifier failed, using heuristic"
                );
            }
        }
    }

    Classification {
        segments: fallback.segments(inputs),
        engine: fallback.engine(),
    }
}

fn validate(inputs: &[ClassifierInput]) -> Result<Vec<&[f64]>, ClassifierError> {
    let first = inputs.first().ok_or(ClassifierError::Empty)?;
    let expected = first.features.len();
    if expected == 0 {
        return Err(ClassifierError::DimensionMismatch {
            index: 0,
            expected: 1,
            found: 0,
        });
    }

    let mut points = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        if input.features.len() != expected {
            return Err(ClassifierError::DimensionMismatch {
                index,
                expected,
                found: input.features.len(),
            });
        }
        if input.features.iter().any(|value| !value.is_finite()) || !input.score.is_finite() {
            return Err(ClassifierError::NonFinite { index });
        }
        points.push(input.features.as_slice());
    }
    Ok(points)
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best.1 {
            best = (index, distance);
        }
    }
    best
}

/// k-means++ seeding.
fn seed_centroids(points: &[&[f64]], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].to_vec());

    while centroids.len() < k {
        let distances: Vec<f64> = points
            .iter()
            .map(|point| nearest(point, &centroids).1)
            .collect();
        let total: f64 = distances.iter().sum();

        let chosen = if total > 0.0 {
            let mut threshold = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (index, distance) in distances.iter().enumerate() {
                if threshold < *distance {
                    chosen = index;
                    break;
                }
                threshold -= distance;
            }
            chosen
        } else {
            rng.gen_range(0..points.len())
        };
        centroids.push(points[chosen].to_vec());
    }

    centroids
}

fn lloyd(points: &[&[f64]], k: usize, max_iterations: usize, rng: &mut StdRng) -> (Vec<usize>, f64) {
    let dims = points[0].len();
    let mut centroids = seed_centroids(points, k, rng);
    let mut labels = vec![usize::MAX; points.len()];

    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for (label, point) in labels.iter_mut().zip(points) {
            let (nearest_index, _) = nearest(point, &centroids);
            if *label != nearest_index {
                *label = nearest_index;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dims]; k];
        let mut counts = vec![0_usize; k];
        for (label, point) in labels.iter().zip(points) {
            counts[*label] += 1;
            for (sum, value) in sums[*label].iter_mut().zip(point.iter()) {
                *sum += value;
            }
        }
        // Empty clusters keep their previous centroid.
        for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
            if count > 0 {
                *centroid = sum.into_iter().map(|value| value / count as f64).collect();
            }
        }
    }

    let inertia = labels
        .iter()
        .zip(points)
        .map(|(label, point)| squared_distance(point, &centroids[*label]))
        .sum();
    (labels, inertia)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(score: f64, ack_rate: f64, features: [f64; 4]) -> ClassifierInput {
        ClassifierInput {
            score,
            ack_rate,
            features: features.to_vec(),
        }
    }

    fn separated_groups() -> Vec<ClassifierInput> {
        vec![
            input(0.1, 0.0, [1.0, 0.0, 0.0, 0.5]),
            input(0.95, 1.0, [20.0, 20.0, 1.0, 0.1]),
            input(0.55, 0.5, [10.0, 5.0, 0.5, 1.0]),
            input(0.96, 1.0, [20.0, 20.0, 1.0, 0.1]),
            input(0.12, 0.0, [1.0, 0.0, 0.0, 0.5]),
            input(0.5, 0.5, [10.0, 5.0, 0.5, 1.0]),
        ]
    }

    struct Failing;

    impl Classifier for Failing {
        fn engine(&self) -> &'static str {
            "failing"
        }

        fn is_available(&self, _user_count: usize) -> bool {
            true
        }

        fn classify(&self, _inputs: &[ClassifierInput]) -> Result<Vec<Segment>, ClassifierError> {
            Err(ClassifierError::Empty)
        }
    }

    #[test]
    fn heuristic_thresholds() {
        assert_eq!(HeuristicClassifier::segment(0.7, 0.65), Segment::HighlyEngaged);
        assert_eq!(HeuristicClassifier::segment(0.9, 0.6), Segment::Steady);
        assert_eq!(HeuristicClassifier::segment(0.45, 0.0), Segment::Steady);
        assert_eq!(HeuristicClassifier::segment(0.4499, 1.0), Segment::NeedsAttention);
    }

    #[test]
    fn kmeans_ranks_clusters_by_mean_score() {
        let segments = ClusteringClassifier::default()
            .classify(&separated_groups())
            .unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::NeedsAttention,
                Segment::HighlyEngaged,
                Segment::Steady,
                Segment::HighlyEngaged,
                Segment::NeedsAttention,
                Segment::Steady,
            ]
        );
    }

    #[test]
    fn kmeans_is_deterministic() {
        let inputs = vec![
            input(0.3, 0.2, [3.0, 1.0, 0.33, 0.5]),
            input(0.8, 0.9, [7.0, 6.0, 0.86, 0.2]),
            input(0.6, 0.7, [4.0, 3.0, 0.75, 2.0]),
            input(0.2, 0.0, [2.0, 0.0, 0.0, 0.5]),
            input(0.9, 1.0, [9.0, 9.0, 1.0, 0.05]),
        ];
        let classifier = ClusteringClassifier::default();
        assert_eq!(
            classifier.classify(&inputs).unwrap(),
            classifier.classify(&inputs).unwrap()
        );
    }

    #[test]
    fn identical_users_share_one_label() {
        let inputs = vec![input(0.5, 0.5, [2.0, 1.0, 0.5, 0.5]); 4];
        let segments = ClusteringClassifier::default().classify(&inputs).unwrap();
        assert!(segments.iter().all(|segment| *segment == segments[0]));
    }

    #[test]
    fn kmeans_rejects_non_finite_features() {
        let mut inputs = separated_groups();
        inputs[2].features[3] = f64::NAN;
        assert_eq!(
            ClusteringClassifier::default().classify(&inputs),
            Err(ClassifierError::NonFinite { index: 2 })
        );
    }

    #[test]
    fn small_batches_use_heuristic() {
        let inputs = separated_groups()[..2].to_vec();
        let result = classify_users(&inputs, EnginePreference::Auto);
        assert_eq!(result.engine, HEURISTIC_ENGINE);
        assert_eq!(
            result.segments,
            vec![Segment::NeedsAttention, Segment::HighlyEngaged]
        );
    }

    #[test]
    fn failure_downgrades_whole_batch() {
        let inputs = separated_groups();
        let result = classify_with_fallback(&Failing, &HeuristicClassifier, &inputs);
        assert_eq!(result.engine, HEURISTIC_ENGINE);
        assert_eq!(result.segments, HeuristicClassifier.segments(&inputs));
    }

    #[test]
    fn heuristic_preference_skips_clustering() {
        let result = classify_users(&separated_groups(), EnginePreference::Heuristic);
        assert_eq!(result.engine, HEURISTIC_ENGINE);
        assert_eq!(result.segments.len(), 6);
    }

    #[test]
    fn auto_preference_clusters_large_batches() {
        let result = classify_users(&separated_groups(), EnginePreference::Auto);
        assert_eq!(result.engine, KMEANS_ENGINE);
    }
}
