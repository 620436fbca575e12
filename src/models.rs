use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ANONYMOUS_USER: &str = "anonymous";

/// Kind of a tracking event. Unknown kinds are kept verbatim so they can be
/// written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum EventKind {
    Opened,
    Acknowledged,
    Other(String),
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Other(String::new())
    }
}

impl From<Option<String>> for EventKind {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("opened") => EventKind::Opened,
            Some("acknowledged") => EventKind::Acknowledged,
            _ => EventKind::Other(value.unwrap_or_default()),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Opened => "opened".to_string(),
            EventKind::Acknowledged => "acknowledged".to_string(),
            EventKind::Other(raw) => raw,
        }
    }
}

/// One record of the append-only event log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "event", default)]
    pub kind: EventKind,
    pub announcement_id: Option<i64>,
    pub user: Option<String>,
    pub target: Option<String>,
    pub timestamp: Option<String>,
    pub device: Option<String>,
    pub ip: Option<String>,
}

impl Event {
    pub fn normalized_user(&self) -> String {
        normalize_user(self.user.as_deref())
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref().filter(|target| !target.is_empty())
    }
}

pub fn normalize_user(value: Option<&str>) -> String {
    let user = value.unwrap_or_default().trim();
    if user.is_empty() {
        ANONYMOUS_USER.to_string()
    } else {
        user.to_string()
    }
}

/// Accepts RFC 3339, naive ISO-8601 date-times (read as UTC) and bare dates.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserStats {
    pub user: String,
    pub open_count: u32,
    pub ack_count: u32,
    pub ack_delays: Vec<f64>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub targets: BTreeSet<String>,
}

impl UserStats {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn ack_rate(&self) -> f64 {
        if self.open_count == 0 {
            0.0
        } else {
            self.ack_count as f64 / self.open_count as f64
        }
    }

    pub fn mean_delay_seconds(&self) -> Option<f64> {
        if self.ack_delays.is_empty() {
            None
        } else {
            Some(self.ack_delays.iter().sum::<f64>() / self.ack_delays.len() as f64)
        }
    }
}

/// An opened event that no acknowledgement consumed by the end of the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingSession {
    pub user: String,
    pub announcement_id: Option<i64>,
    pub opened_at: DateTime<Utc>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Segment {
    #[serde(rename = "Highly Engaged")]
    HighlyEngaged,
    #[serde(rename = "Steady")]
    Steady,
    #[serde(rename = "Needs Attention")]
    NeedsAttention,
}

impl Segment {
    /// Labels in descending engagement order.
    pub const RANKED: [Segment; 3] = [
        Segment::HighlyEngaged,
        Segment::Steady,
        Segment::NeedsAttention,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Segment::HighlyEngaged => "Highly Engaged",
            Segment::Steady => "Steady",
            Segment::NeedsAttention => "Needs Attention",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user: String,
    pub opens: u32,
    pub acks: u32,
    pub ack_rate_percent: f64,
    pub avg_delay_minutes: Option<f64>,
    pub score: f64,
    pub classification: Segment,
    pub outstanding: usize,
    pub last_event_at: Option<DateTime<Utc>>,
    pub target_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_events: usize,
    pub total_users: usize,
    pub conversion_rate: f64,
    pub avg_ack_minutes: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderEntry {
    pub user: String,
    pub score: f64,
    pub classification: Segment,
    pub ack_rate_percent: f64,
    pub avg_delay_minutes: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskEntry {
    pub user: String,
    pub ack_rate_percent: f64,
    pub outstanding: usize,
    pub avg_delay_minutes: Option<f64>,
    pub classification: Segment,
    pub risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub overall: OverallStats,
    pub leaders: Vec<LeaderEntry>,
    pub risks: Vec<RiskEntry>,
    pub insights: Vec<String>,
    pub engine: String,
    pub profiles: Vec<UserProfile>,
    pub outstanding: Vec<OutstandingSession>,
}
