use serde::{Deserialize, Serialize};

use crate::model::Feature;

/// Finds feature correspondences between frames.
pub trait FeatureMatcher {
    /// Index of the candidate matching `query`, or `None` if there is no unambiguous match.
    fn find_pair(&self, query: &Feature, candidates: &[Feature]) -> Option<usize>;

    /// Pairs `(query_index, train_index)` of matched features.
    fn match_frames(&self, query: &[Feature], train: &[Feature]) -> Vec<(usize, usize)> {
        query
            .iter()
            .enumerate()
            .filter_map(|(i, q)| self.find_pair(q, train).map(|j| (i, j)))
            .collect()
    }
}

/// Brute-force nearest neighbour matcher with Lowe's ratio test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioTestMatcher {
    /// The best distance must be below `ratio` times the second best.
    pub ratio: f32,
    /// Keep only matches that are also nearest neighbours in the reverse direction.
    pub mutual: bool,
}

impl Default for RatioTestMatcher {
    fn default() -> Self {
        Self {
            ratio: 0.8,
            mutual: true,
        }
    }
}

impl RatioTestMatcher {
    /// Matcher with the given ratio and a mutual consistency check.
    pub fn new(ratio: f32) -> Self {
        Self { ratio, mutual: true }
    }
}

fn descriptor_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

impl FeatureMatcher for RatioTestMatcher {
    fn find_pair(&self, query: &Feature, candidates: &[Feature]) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        let mut second = f32::INFINITY;

        for (i, c) in candidates.iter().enumerate() {
            let d = descriptor_distance(&query.descriptor, &c.descriptor);
            match best {
                Some((_, b)) if d >= b => second = second.min(d),
                Some((_, b)) => {
                    second = b;
                    best = Some((i, d));
                }
                None => best = Some((i, d)),
            }
        }

        let (index, distance) = best?;
        if !distance.is_finite() {
            return None;
        }
        // a tie is ambiguous even when both distances are zero
        if second.is_finite() && !(distance < self.ratio * second) {
            return None;
        }
        Some(index)
    }

    fn match_frames(&self, query: &[Feature], train: &[Feature]) -> Vec<(usize, usize)> {
        query
            .iter()
            .enumerate()
            .filter_map(|(i, q)| {
                let j = self.find_pair(q, train)?;
                if self.mutual && self.find_pair(&train[j], query) != Some(i) {
                    return None;
                }
                Some((i, j))
            })
            .collect()
    }
}
