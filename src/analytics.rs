use crate::classify::{self, ClassifierInput, EnginePreference, HEURISTIC_ENGINE};
use crate::models::{
    AnalyticsReport, Event, LeaderEntry, OverallStats, RiskEntry, Segment, UserProfile,
};
use crate::scoring;
use crate::sessions::{self, Reconstruction};

pub const EMPTY_LOG_INSIGHT: &str = "No engagement events recorded yet. Ask users to open and acknowledge announcements to gather data.";
pub const LOW_CONVERSION_INSIGHT: &str = "Overall conversion rate is under 60%. Consider reinforcing acknowledgements in upcoming communications.";
pub const SLOW_ACK_INSIGHT: &str = "Average acknowledgement time exceeds 3 hours. Send reminders or shorten tasks to encourage quicker responses.";
pub const HEALTHY_INSIGHT: &str = "Engagement metrics look healthy. Continue monitoring for trends.";

const LEADER_LIMIT: usize = 3;
const RISK_LIMIT: usize = 3;
const CONVERSION_TARGET_PERCENT: f64 = 60.0;
const SLOW_ACK_MINUTES: f64 = 180.0;
const UNKNOWN_DELAY_FEATURE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticsOptions {
    pub engine: EnginePreference,
}

pub fn compute_analytics(events: &[Event]) -> AnalyticsReport {
    compute_analytics_with(events, &AnalyticsOptions::default())
}

/// Recomputes the whole report from the event sequence. Never fails; an
/// empty log yields a report with a single prompt to collect data.
pub fn compute_analytics_with(events: &[Event], options: &AnalyticsOptions) -> AnalyticsReport {
    let mut report = AnalyticsReport {
        overall: OverallStats {
            total_events: events.len(),
            ..OverallStats::default()
        },
        leaders: Vec::new(),
        risks: Vec::new(),
        insights: Vec::new(),
        engine: HEURISTIC_ENGINE.to_string(),
        profiles: Vec::new(),
        outstanding: Vec::new(),
    };

    if events.is_empty() {
        report.insights.push(EMPTY_LOG_INSIGHT.to_string());
        return report;
    }

    let reconstruction = sessions::reconstruct(events);
    let (profiles, engine) = build_profiles(&reconstruction, options.engine);

    let total_opens = reconstruction.total_opens();
    let total_acks = reconstruction.total_acks();
    let delays: Vec<f64> = reconstruction
        .users
        .iter()
        .flat_map(|stats| stats.ack_delays.iter().copied())
        .collect();
    let avg_ack_minutes = mean(&delays).map(|seconds| scoring::round_to(seconds / 60.0, 1));

    report.engine = engine.to_string();
    report.overall.total_users = reconstruction.users.len();
    report.overall.conversion_rate =
        scoring::round_to(scoring::percent(total_acks, total_opens), 1);
    report.overall.avg_ack_minutes = avg_ack_minutes;

    let outstanding_total = reconstruction.outstanding_total();
    if outstanding_total > 0 {
        report.insights.push(format!(
            "{} pending acknowledgement(s) across {} user(s). Prioritise follow-up.",
            outstanding_total,
            reconstruction.outstanding_users()
        ));
    }

    report.leaders = rank_leaders(&profiles);
    report.risks = rank_risks(&profiles);

    if report.overall.conversion_rate < CONVERSION_TARGET_PERCENT {
        report.insights.push(LOW_CONVERSION_INSIGHT.to_string());
    }
    if avg_ack_minutes.is_some_and(|minutes| minutes > SLOW_ACK_MINUTES) {
        report.insights.push(SLOW_ACK_INSIGHT.to_string());
    }
    if report.insights.is_empty() {
        report.insights.push(HEALTHY_INSIGHT.to_string());
    }

    tracing::debug!(
        users = report.overall.total_users,
        engine = %report.engine,
        leaders = report.leaders.len(),
        risks = report.risks.len(),
        "Computed engagement analytics"
    );

    report.profiles = profiles;
    report.outstanding = reconstruction
        .outstanding
        .into_iter()
        .flat_map(|(_, sessions)| sessions)
        .collect();
    report
}

fn build_profiles(
    reconstruction: &Reconstruction,
    preference: EnginePreference,
) -> (Vec<UserProfile>, &'static str) {
    let mut profiles = Vec::with_capacity(reconstruction.users.len());
    let mut inputs = Vec::with_capacity(reconstruction.users.len());

    for stats in &reconstruction.users {
        let ack_rate = stats.ack_rate();
        let avg_delay_minutes = stats.mean_delay_seconds().map(|seconds| seconds / 60.0);
        let ack_rate_percent = scoring::round_to(ack_rate * 100.0, 1);
        let score = scoring::engagement_score(stats);

        inputs.push(ClassifierInput {
            score,
            ack_rate: ack_rate_percent / 100.0,
            features: vec![
                stats.open_count as f64,
                stats.ack_count as f64,
                ack_rate,
                avg_delay_minutes
                    .map(|minutes| minutes / 60.0)
                    .unwrap_or(UNKNOWN_DELAY_FEATURE),
            ],
        });

        profiles.push(UserProfile {
            user: stats.user.clone(),
            opens: stats.open_count,
            acks: stats.ack_count,
            ack_rate_percent,
            avg_delay_minutes: avg_delay_minutes.map(|minutes| scoring::round_to(minutes, 1)),
            score,
            classification: Segment::Steady,
            outstanding: reconstruction.outstanding_for(&stats.user).len(),
            last_event_at: stats.last_event_at,
            target_count: stats.targets.len(),
        });
    }

    let classification = classify::classify_users(&inputs, preference);
    for (profile, segment) in profiles.iter_mut().zip(classification.segments) {
        profile.classification = segment;
    }

    (profiles, classification.engine)
}

fn rank_leaders(profiles: &[UserProfile]) -> Vec<LeaderEntry> {
    let mut ordered: Vec<&UserProfile> = profiles.iter().collect();
    ordered.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    ordered
        .into_iter()
        .take(LEADER_LIMIT)
        .map(|profile| LeaderEntry {
            user: profile.user.clone(),
            score: profile.score,
            classification: profile.classification,
            ack_rate_percent: profile.ack_rate_percent,
            avg_delay_minutes: profile.avg_delay_minutes,
        })
        .collect()
}

fn rank_risks(profiles: &[UserProfile]) -> Vec<RiskEntry> {
    let mut candidates: Vec<RiskEntry> = profiles
        .iter()
        .filter_map(|profile| {
            let ack_rate = profile.ack_rate_percent / 100.0;
            if !scoring::is_risk_candidate(ack_rate, profile.outstanding) {
                return None;
            }
            let risk = scoring::risk_score(ack_rate, profile.outstanding, profile.avg_delay_minutes);
            Some(RiskEntry {
                user: profile.user.clone(),
                ack_rate_percent: profile.ack_rate_percent,
                outstanding: profile.outstanding,
                avg_delay_minutes: profile.avg_delay_minutes,
                classification: profile.classification,
                risk_score: scoring::round_to(risk, 3),
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.risk_score
            .partial_cmp(&a.risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(RISK_LIMIT);
    candidates
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KMEANS_ENGINE;
    use crate::models::{format_timestamp, EventKind};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn opened(id: i64, user: &str, minutes: i64) -> Event {
        event(EventKind::Opened, id, user, minutes)
    }

    fn acked(id: i64, user: &str, minutes: i64) -> Event {
        event(EventKind::Acknowledged, id, user, minutes)
    }

    fn event(kind: EventKind, id: i64, user: &str, minutes: i64) -> Event {
        Event {
            kind,
            announcement_id: Some(id),
            user: Some(user.to_string()),
            target: Some(format!("https://example.com/tasks/{id}")),
            timestamp: Some(format_timestamp(base() + Duration::minutes(minutes))),
            device: Some("Mozilla/5.0".to_string()),
            ip: Some("10.0.0.1".to_string()),
        }
    }

    fn heuristic() -> AnalyticsOptions {
        AnalyticsOptions {
            engine: EnginePreference::Heuristic,
        }
    }

    #[test]
    fn empty_log_returns_single_prompt() {
        let report = compute_analytics(&[]);
        assert_eq!(report.overall.total_events, 0);
        assert_eq!(report.overall.total_users, 0);
        assert_eq!(report.insights, vec![EMPTY_LOG_INSIGHT.to_string()]);
        assert!(report.leaders.is_empty());
        assert!(report.risks.is_empty());
        assert_eq!(report.engine, HEURISTIC_ENGINE);
    }

    #[test]
    fn healthy_fleet_gets_default_insight() {
        let events = vec![
            opened(1, "ana", 0),
            acked(1, "ana", 5),
            opened(1, "ben", 1),
            acked(1, "ben", 11),
        ];

        let report = compute_analytics(&events);
        assert_eq!(report.overall.total_events, 4);
        assert_eq!(report.overall.total_users, 2);
        assert_eq!(report.overall.conversion_rate, 100.0);
        assert_eq!(report.overall.avg_ack_minutes, Some(7.5));
        assert_eq!(report.insights, vec![HEALTHY_INSIGHT.to_string()]);
        assert!(report.risks.is_empty());
        assert_eq!(report.leaders[0].user, "ana");
        assert_eq!(report.engine, HEURISTIC_ENGINE);
    }

    #[test]
    fn conversion_rate_sixty_percent_is_not_flagged() {
        let mut events = Vec::new();
        for id in 0..10 {
            events.push(opened(id, "ana", 0));
        }
        for id in 0..6 {
            events.push(acked(id, "ana", 10));
        }

        let report = compute_analytics_with(&events, &heuristic());
        assert_eq!(report.overall.conversion_rate, 60.0);
        assert!(!report.insights.contains(&LOW_CONVERSION_INSIGHT.to_string()));
        assert_eq!(
            report.insights[0],
            "4 pending acknowledgement(s) across 1 user(s). Prioritise follow-up."
        );
    }

    #[test]
    fn pending_low_conversion_and_slow_insights_in_order() {
        let events = vec![
            opened(1, "ana", 0),
            acked(1, "ana", 240),
            opened(2, "ben", 0),
            opened(3, "ben", 0),
            opened(2, "cal", 0),
        ];

        let report = compute_analytics_with(&events, &heuristic());
        assert_eq!(report.overall.conversion_rate, 25.0);
        assert_eq!(report.overall.avg_ack_minutes, Some(240.0));
        assert_eq!(
            report.insights,
            vec![
                "3 pending acknowledgement(s) across 2 user(s). Prioritise follow-up.".to_string(),
                LOW_CONVERSION_INSIGHT.to_string(),
                SLOW_ACK_INSIGHT.to_string(),
            ]
        );
        assert_eq!(report.outstanding.len(), 3);
        assert_eq!(report.outstanding[0].user, "ben");
    }

    #[test]
    fn risks_rank_by_score_and_include_unknown_delay_penalty() {
        let events = vec![
            // ana: 2 opens, 1 ack, one open left -> rate 0.5, outstanding 1
            opened(1, "ana", 0),
            opened(2, "ana", 0),
            acked(1, "ana", 60),
            // ben: 2 opens, 1 ack without a pairable open -> rate 0.5, outstanding 2
            opened(3, "ben", 10),
            opened(4, "ben", 10),
            acked(5, "ben", 20),
            // cal: fully acknowledged, not a candidate
            opened(6, "cal", 0),
            acked(6, "cal", 1),
        ];

        let report = compute_analytics_with(&events, &heuristic());
        let users: Vec<&str> = report.risks.iter().map(|risk| risk.user.as_str()).collect();
        assert_eq!(users, vec!["ben", "ana"]);
        assert!((report.risks[0].risk_score - 1.025).abs() < 1e-9);
        assert_eq!(report.risks[0].avg_delay_minutes, None);
        // 0.5 + 0.2 + (60 / 60) / 12
        assert!((report.risks[1].risk_score - 0.783).abs() < 1e-9);
    }

    #[test]
    fn risk_ties_keep_first_seen_order() {
        let events = vec![
            opened(1, "zed", 0),
            opened(1, "amy", 0),
            opened(1, "kai", 0),
            opened(1, "lou", 0),
        ];

        let report = compute_analytics_with(&events, &heuristic());
        let users: Vec<&str> = report.risks.iter().map(|risk| risk.user.as_str()).collect();
        assert_eq!(users, vec!["zed", "amy", "kai"]);
    }

    #[test]
    fn leaders_are_top_three_by_score() {
        let events = vec![
            opened(1, "low", 0),
            opened(1, "mid", 0),
            acked(1, "mid", 600),
            opened(1, "top", 0),
            acked(1, "top", 1),
            opened(1, "also", 0),
            acked(1, "also", 30),
        ];

        let report = compute_analytics_with(&events, &heuristic());
        let users: Vec<&str> = report.leaders.iter().map(|leader| leader.user.as_str()).collect();
        assert_eq!(users, vec!["top", "also", "mid"]);
        assert_eq!(report.profiles.len(), 4);
    }

    #[test]
    fn heuristic_labels_are_total_and_repeatable() {
        let events = vec![
            opened(1, "ana", 0),
            acked(1, "ana", 2),
            opened(1, "ben", 0),
            opened(2, "ben", 0),
            acked(2, "ben", 900),
            opened(1, "cal", 0),
        ];

        let first = compute_analytics_with(&events, &heuristic());
        let second = compute_analytics_with(&events, &heuristic());
        let labels: Vec<Segment> = first.profiles.iter().map(|p| p.classification).collect();
        assert_eq!(
            labels,
            vec![
                Segment::HighlyEngaged,
                Segment::NeedsAttention,
                Segment::NeedsAttention
            ]
        );
        assert_eq!(first, second);
    }

    #[test]
    fn clustering_used_for_three_or_more_users() {
        let events = vec![
            opened(1, "ana", 0),
            acked(1, "ana", 2),
            opened(1, "ben", 0),
            opened(1, "cal", 0),
            acked(1, "cal", 30),
        ];

        let report = compute_analytics(&events);
        assert_eq!(report.engine, KMEANS_ENGINE);
        assert_eq!(report.profiles.len(), 3);
    }

    #[test]
    fn opened_and_acknowledged_totals_are_preserved() {
        let events = vec![
            opened(1, "ana", 0),
            acked(1, "ana", 1),
            acked(1, "ana", 2),
            event(EventKind::Other("viewed".to_string()), 1, "ana", 3),
            opened(2, " ana ", 4),
        ];

        let report = compute_analytics_with(&events, &heuristic());
        let profile = &report.profiles[0];
        assert_eq!(report.overall.total_events, 5);
        assert_eq!(report.overall.total_users, 1);
        assert_eq!(profile.opens, 2);
        assert_eq!(profile.acks, 2);
        assert_eq!(profile.outstanding, 1);
    }
}
