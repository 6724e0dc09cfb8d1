use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::timing::Phase;
use crate::results::TrialRun;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Distribution summary of one phase over a run's successful trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Stats {
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Stats {
    /// Mean in fractional milliseconds, the unit reports use.
    pub fn mean_ms(&self) -> f64 {
        self.mean.as_secs_f64() * 1000.0
    }
}

/// Summarise `durations`. Empty input yields all-zero [`Stats`].
pub fn compute_stats(durations: &[Duration]) -> Stats {
    if durations.is_empty() {
        return Stats::default();
    }

    let mut sorted = durations.to_vec();
    sorted.sort_unstable();

    // Integer accumulation keeps the mean exact for any sample count.
    let sum: u128 = durations.iter().map(Duration::as_nanos).sum();
    let mean = duration_from_nanos(sum / durations.len() as u128);

    Stats {
        mean,
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
    }
}

/// The `p`-th percentile (0–100) of ascending `sorted`, linearly
/// interpolated between the two nearest ranks.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let Some(last) = sorted.len().checked_sub(1) else {
        return Duration::ZERO;
    };
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 100.0 {
        return sorted[last];
    }

    let rank = p / 100.0 * last as f64;
    let lower = rank.floor() as usize;
    let upper = lower + 1;
    if upper > last {
        return sorted[lower];
    }

    let fraction = rank - lower as f64;
    let lo = sorted[lower].as_nanos() as f64;
    let hi = sorted[upper].as_nanos() as f64;
    duration_from_nanos((lo + fraction * (hi - lo)).round() as u128)
}

/// Durations of `phase` across the successful trials of `run`. Failed trials
/// contribute no sample.
pub fn phase_durations(run: &TrialRun, phase: Phase) -> Vec<Duration> {
    run.completed_trials()
        .filter(|(_, t)| t.success)
        .map(|(_, t)| t.get(phase))
        .collect()
}

/// [`compute_stats`] for every phase of `run`.
pub fn compute_all_stats(run: &TrialRun) -> BTreeMap<Phase, Stats> {
    Phase::ALL
        .iter()
        .map(|&phase| (phase, compute_stats(&phase_durations(run, phase))))
        .collect()
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}
