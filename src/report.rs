use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{AnalyticsReport, Segment};

pub fn segment_counts(report: &AnalyticsReport) -> Vec<(Segment, usize)> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for profile in &report.profiles {
        let rank = Segment::RANKED
            .iter()
            .position(|segment| *segment == profile.classification)
            .unwrap_or(0);
        *counts.entry(rank).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(rank, count)| (Segment::RANKED[rank], count))
        .collect()
}

fn minutes_label(minutes: Option<f64>) -> String {
    match minutes {
        Some(value) => format!("{value:.1} min"),
        None => "n/a".to_string(),
    }
}

pub fn build_report(title: Option<&str>, report: &AnalyticsReport) -> String {
    let mut output = String::new();
    let scope = title.unwrap_or("all announcements");

    let _ = writeln!(output, "# Acknowledgement Engagement Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} events, engine: {})",
        scope, report.overall.total_events, report.engine
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Users: {}", report.overall.total_users);
    let _ = writeln!(output, "- Conversion: {:.1}%", report.overall.conversion_rate);
    let _ = writeln!(
        output,
        "- Average acknowledgement delay: {}",
        minutes_label(report.overall.avg_ack_minutes)
    );

    let segments = segment_counts(report);
    if !segments.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Segments");
        for (segment, count) in segments {
            let _ = writeln!(output, "- {segment}: {count} user(s)");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Contributors");

    if report.leaders.is_empty() {
        let _ = writeln!(output, "No users recorded yet.");
    } else {
        for leader in &report.leaders {
            let _ = writeln!(
                output,
                "- {} ({}) score {:.4}, ack rate {:.1}%, avg delay {}",
                leader.user,
                leader.classification,
                leader.score,
                leader.ack_rate_percent,
                minutes_label(leader.avg_delay_minutes)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Follow-up");

    if report.risks.is_empty() {
        let _ = writeln!(output, "No users need follow-up.");
    } else {
        for risk in &report.risks {
            let _ = writeln!(
                output,
                "- {} ({}) risk {:.3}, ack rate {:.1}%, {} pending, avg delay {}",
                risk.user,
                risk.classification,
                risk.risk_score,
                risk.ack_rate_percent,
                risk.outstanding,
                minutes_label(risk.avg_delay_minutes)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pending Acknowledgements");

    if report.outstanding.is_empty() {
        let _ = writeln!(output, "Nothing pending.");
    } else {
        let mut pending = report.outstanding.clone();
        pending.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        for session in pending.iter().take(10) {
            let announcement = session
                .announcement_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let _ = writeln!(
                output,
                "- {} opened announcement {} at {}{}",
                session.user,
                announcement,
                session.opened_at.format("%Y-%m-%d %H:%M UTC"),
                session
                    .target
                    .as_deref()
                    .map(|target| format!(" ({target})"))
                    .unwrap_or_default()
            );
        }
        if pending.len() > 10 {
            let _ = writeln!(output, "- ... and {} more", pending.len() - 10);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Insights");
    for insight in &report.insights {
        let _ = writeln!(output, "- {insight}");
    }

    output
}
