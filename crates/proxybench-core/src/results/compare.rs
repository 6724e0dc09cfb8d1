use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::timing::Phase;
use crate::results::stats::{compute_all_stats, Stats};
use crate::results::TrialRun;

/// Mean difference of one phase between two runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Difference {
    /// `candidate mean - baseline mean`, in nanoseconds. Negative means the
    /// candidate is faster.
    pub absolute_nanos: i64,
    /// `absolute / baseline mean * 100`, or `0` when the baseline mean is
    /// zero.
    pub percentage: f64,
}

impl Difference {
    pub fn between(baseline_mean: Duration, candidate_mean: Duration) -> Self {
        let base = signed_nanos(baseline_mean);
        let absolute_nanos = signed_nanos(candidate_mean).saturating_sub(base);
        let percentage = if base > 0 {
            absolute_nanos as f64 / base as f64 * 100.0
        } else {
            0.0
        };
        Self {
            absolute_nanos,
            percentage,
        }
    }

    pub fn absolute_ms(&self) -> f64 {
        self.absolute_nanos as f64 / 1_000_000.0
    }
}

/// Phase-by-phase comparison of a candidate run against a baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Comparison {
    pub baseline_name: String,
    pub candidate_name: String,
    pub baseline_stats: BTreeMap<Phase, Stats>,
    pub candidate_stats: BTreeMap<Phase, Stats>,
    pub differences: BTreeMap<Phase, Difference>,
    /// Candidate success rate minus baseline success rate, in percentage
    /// points.
    pub success_rate_delta: f64,
}

impl Comparison {
    pub fn difference(&self, phase: Phase) -> Option<&Difference> {
        self.differences.get(&phase)
    }
}

pub fn compare(baseline: &TrialRun, candidate: &TrialRun) -> Comparison {
    let baseline_stats = compute_all_stats(baseline);
    let candidate_stats = compute_all_stats(candidate);
    let differences = compare_stats(&baseline_stats, &candidate_stats);

    Comparison {
        baseline_name: baseline.proxy_name().to_string(),
        candidate_name: candidate.proxy_name().to_string(),
        baseline_stats,
        candidate_stats,
        differences,
        success_rate_delta: candidate.success_rate() - baseline.success_rate(),
    }
}

/// Differences for every phase present in both stat sets.
pub fn compare_stats(
    baseline: &BTreeMap<Phase, Stats>,
    candidate: &BTreeMap<Phase, Stats>,
) -> BTreeMap<Phase, Difference> {
    baseline
        .iter()
        .filter_map(|(phase, base)| {
            candidate
                .get(phase)
                .map(|cand| (*phase, Difference::between(base.mean, cand.mean)))
        })
        .collect()
}

fn signed_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}
