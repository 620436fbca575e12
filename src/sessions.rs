use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::models::{Event, EventKind, OutstandingSession, UserStats};

type PairKey = (i64, String);

#[derive(Debug, Clone)]
struct QueuedOpen {
    opened_at: DateTime<Utc>,
    target: Option<String>,
}

/// Per-user statistics and unacknowledged opens rebuilt from an event scan.
/// Users appear in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub users: Vec<UserStats>,
    pub outstanding: Vec<(String, Vec<OutstandingSession>)>,
}

impl Reconstruction {
    pub fn outstanding_for(&self, user: &str) -> &[OutstandingSession] {
        self.outstanding
            .iter()
            .find(|(owner, _)| owner == user)
            .map(|(_, sessions)| sessions.as_slice())
            .unwrap_or(&[])
    }

    pub fn outstanding_total(&self) -> usize {
        self.outstanding.iter().map(|(_, sessions)| sessions.len()).sum()
    }

    pub fn outstanding_users(&self) -> usize {
        self.outstanding.len()
    }

    pub fn total_opens(&self) -> u64 {
        self.users.iter().map(|stats| stats.open_count as u64).sum()
    }

    pub fn total_acks(&self) -> u64 {
        self.users.iter().map(|stats| stats.ack_count as u64).sum()
    }
}

/// Pairs opened events with later acknowledgements, FIFO per
/// `(announcement, user)` key, in log order.
pub fn reconstruct(events: &[Event]) -> Reconstruction {
    let mut users: Vec<UserStats> = Vec::new();
    let mut user_index: HashMap<String, usize> = HashMap::new();
    let mut queues: Vec<(PairKey, VecDeque<QueuedOpen>)> = Vec::new();
    let mut queue_index: HashMap<PairKey, usize> = HashMap::new();

    for event in events {
        let user = event.normalized_user();
        let timestamp = event.parsed_timestamp();

        let slot = *user_index.entry(user.clone()).or_insert_with(|| {
            users.push(UserStats::new(user.clone()));
            users.len() - 1
        });
        let stats = &mut users[slot];

        if let Some(ts) = timestamp {
            if stats.last_event_at.map_or(true, |last| ts > last) {
                stats.last_event_at = Some(ts);
            }
        }
        if let Some(target) = event.target() {
            stats.targets.insert(target.to_string());
        }

        // Events without an announcement id are counted but never paired.
        let key: Option<PairKey> = event.announcement_id.map(|id| (id, user));

        match event.kind {
            EventKind::Opened => {
                stats.open_count += 1;
                if let (Some(opened_at), Some(key)) = (timestamp, key) {
                    let queue = queue_for(&mut queues, &mut queue_index, key);
                    queue.push_back(QueuedOpen {
                        opened_at,
                        target: event.target().map(str::to_string),
                    });
                }
            }
            EventKind::Acknowledged => {
                stats.ack_count += 1;
                let Some(key) = key else {
                    continue;
                };
                let queue = queue_for(&mut queues, &mut queue_index, key);
                let Some(acked_at) = timestamp else {
                    continue;
                };
                // An acknowledgement earlier than the oldest open leaves that
                // open queued and outstanding. It is not popped and discarded
                // the way a plain pop-front pairing would do; keep it that way.
                let delay = queue
                    .front()
                    .filter(|open| open.opened_at <= acked_at)
                    .map(|open| elapsed_seconds(open.opened_at, acked_at));
                if let Some(delay) = delay {
                    stats.ack_delays.push(delay);
                    queue.pop_front();
                }
            }
            EventKind::Other(_) => {}
        }
    }

    let mut outstanding: Vec<(String, Vec<OutstandingSession>)> = Vec::new();
    let mut owner_index: HashMap<String, usize> = HashMap::new();
    for ((announcement_id, user), queue) in queues {
        if queue.is_empty() {
            continue;
        }
        let slot = *owner_index.entry(user.clone()).or_insert_with(|| {
            outstanding.push((user.clone(), Vec::new()));
            outstanding.len() - 1
        });
        outstanding[slot]
            .1
            .extend(queue.into_iter().map(|open| OutstandingSession {
                user: user.clone(),
                announcement_id: Some(announcement_id),
                opened_at: open.opened_at,
                target: open.target,
            }));
    }

    tracing::debug!(
        events = events.len(),
        users = users.len(),
        outstanding = outstanding.iter().map(|(_, s)| s.len()).sum::<usize>(),
        "Reconstructed sessions"
    );

    Reconstruction { users, outstanding }
}

fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from)
        .num_microseconds()
        .map_or(0.0, |micros| micros as f64 / 1_000_000.0)
}

fn queue_for<'a>(
    queues: &'a mut Vec<(PairKey, VecDeque<QueuedOpen>)>,
    index: &mut HashMap<PairKey, usize>,
    key: PairKey,
) -> &'a mut VecDeque<QueuedOpen> {
    let slot = match index.get(&key) {
        Some(slot) => *slot,
        None => {
            queues.push((key.clone(), VecDeque::new()));
            index.insert(key, queues.len() - 1);
            queues.len() - 1
        }
    };
    &mut queues[slot].1
}
