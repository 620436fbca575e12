use crate::models::UserStats;

const UNKNOWN_DELAY_HOURS: f64 = 12.0;
const UNKNOWN_DELAY_MINUTES_FOR_RISK: f64 = 90.0;
const ACTIVITY_CAP: u32 = 20;
const OUTSTANDING_CAP: usize = 3;

/// Composite engagement score in `[0, 1]`, rounded to 4 decimals.
pub fn engagement_score(stats: &UserStats) -> f64 {
    // Acknowledgements without a matching open can push the raw rate past 1.
    let ack_rate = stats.ack_rate().min(1.0);
    let avg_delay_hours = stats
        .mean_delay_seconds()
        .map(|seconds| seconds / 3600.0)
        .unwrap_or(UNKNOWN_DELAY_HOURS);
    let delay_score = (1.0 - avg_delay_hours / 24.0).clamp(0.0, 1.0);
    let activity = (stats.open_count.saturating_add(stats.ack_count)).min(ACTIVITY_CAP) as f64
        / ACTIVITY_CAP as f64;

    round_to(0.6 * ack_rate + 0.25 * delay_score + 0.15 * activity, 4)
}

/// Follow-up priority for a user; unbounded above.
pub fn risk_score(ack_rate: f64, outstanding: usize, avg_delay_minutes: Option<f64>) -> f64 {
    let avg_delay_hours = avg_delay_minutes.unwrap_or(UNKNOWN_DELAY_MINUTES_FOR_RISK) / 60.0;
    (1.0 - ack_rate)
        + outstanding.min(OUTSTANDING_CAP) as f64 * 0.2
        + (avg_delay_hours / 12.0).min(1.0)
}

pub fn is_risk_candidate(ack_rate: f64, outstanding: usize) -> bool {
    ack_rate < 0.6 || outstanding > 0
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
