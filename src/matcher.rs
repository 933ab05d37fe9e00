use crate::Embedding;
use facematch_vision::face::euclidean_distance;
use serde::Serialize;

pub const UNKNOWN_LABEL: &str = "unknown";

/// Reference descriptors sharing one label.
#[derive(Debug, Clone)]
pub struct LabeledDescriptors {
    pub label: String,
    pub descriptors: Vec<Embedding>,
}

impl LabeledDescriptors {
    pub fn single(label: impl Into<String>, descriptor: Embedding) -> Self {
        Self {
            label: label.into(),
            descriptors: vec![descriptor],
        }
    }

    fn mean_distance(&self, query: &Embedding) -> f32 {
        let total: f32 = self
            .descriptors
            .iter()
            .map(|d| euclidean_distance(d, query))
            .sum();
        total / self.descriptors.len().max(1) as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub label: String,
    pub distance: f32,
}

/// Nearest-label lookup over a fixed set of labeled descriptors.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    labeled: Vec<LabeledDescriptors>,
    distance_threshold: f32,
}

impl FaceMatcher {
    /// Returns `None` when there is nothing to match against.
    pub fn new(labeled: Vec<LabeledDescriptors>, distance_threshold: f32) -> Option<Self> {
        if labeled.iter().all(|l| l.descriptors.is_empty()) {
            return None;
        }
        let labeled = labeled
            .into_iter()
            .filter(|l| !l.descriptors.is_empty())
            .collect();
        Some(Self {
            labeled,
            distance_threshold,
        })
    }

    pub fn distance_threshold(&self) -> f32 {
        self.distance_threshold
    }

    /// Closest label by mean distance; `unknown` unless strictly under the threshold.
    pub fn find_best_match(&self, query: &Embedding) -> FaceMatch {
        let mut best: Option<(&str, f32)> = None;
        for entry in &self.labeled {
            let distance = entry.mean_distance(query);
            match best {
                Some((_, d)) if d <= distance => {}
                _ => best = Some((entry.label.as_str(), distance)),
            }
        }

        // `new` guarantees at least one non-empty entry
        let (label, distance) = best.unwrap_or((UNKNOWN_LABEL, f32::INFINITY));
        let label = if distance < self.distance_threshold {
            label
        } else {
            UNKNOWN_LABEL
        };
        FaceMatch {
            label: label.to_string(),
            distance,
        }
    }
}
