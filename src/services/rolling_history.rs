//! Bounded, insertion-ordered history of tier events.
//!
//! Appends never block on readers for longer than a pointer push and never
//! apply backpressure: once full, the oldest entry is evicted. Every append
//! is also fanned out on a broadcast channel; slow subscribers lag instead of
//! slowing the writer.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use tokio::sync::broadcast;

use crate::domain::models::{HistoryConfig, Tier, TierEvent};

/// Match an event type against an exact name or a `*` wildcard pattern.
///
/// `*` matches any run of characters, so `step.*`, `*.completed` and
/// `*error*` all work.
pub fn matches_type(event_type: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return event_type == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return false,
    };
    let Some(mut remaining) = event_type.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

/// Composable filter over history entries.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Exact type or `*` pattern.
    pub event_type: Option<String>,
    pub tier: Option<Tier>,
    pub component: Option<String>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, pattern: impl Into<String>) -> Self {
        self.event_type = Some(pattern.into());
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &TierEvent) -> bool {
        self.event_type
            .as_deref()
            .is_none_or(|pattern| matches_type(&event.event_type, pattern))
            && self.tier.is_none_or(|tier| event.tier == tier)
            && self
                .component
                .as_deref()
                .is_none_or(|component| event.component == component)
            && self.since.is_none_or(|since| event.timestamp >= since)
            && self.until.is_none_or(|until| event.timestamp < until)
    }
}

pub struct RollingHistory {
    events: RwLock<VecDeque<TierEvent>>,
    capacity: usize,
    live: broadcast::Sender<TierEvent>,
}

impl RollingHistory {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self::with_broadcast_buffer(capacity, 256)
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::with_broadcast_buffer(config.capacity, config.broadcast_buffer)
    }

    pub fn with_broadcast_buffer(capacity: usize, buffer: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(buffer.max(1));
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(4_096))),
            capacity,
            live,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Append an event, evicting the oldest when full.
    pub fn append(&self, event: TierEvent) {
        {
            let mut events = self.events.write();
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
        // No subscribers is fine.
        let _ = self.live.send(event);
    }

    pub fn extend(&self, events: impl IntoIterator<Item = TierEvent>) {
        for event in events {
            self.append(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TierEvent> {
        self.live.subscribe()
    }

    /// Owned copy for analysis; later appends do not affect it.
    pub fn snapshot(&self) -> Vec<TierEvent> {
        self.events.read().iter().cloned().collect()
    }

    pub fn query(&self, query: &HistoryQuery) -> Vec<TierEvent> {
        let events = self.events.read();
        let mut matched: Vec<TierEvent> = events
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub fn by_type(&self, pattern: &str) -> Vec<TierEvent> {
        self.query(&HistoryQuery::new().event_type(pattern))
    }

    pub fn by_tier(&self, tier: Tier) -> Vec<TierEvent> {
        self.query(&HistoryQuery::new().tier(tier))
    }

    /// Events with `since <= timestamp < until`.
    pub fn in_window(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<TierEvent> {
        self.query(&HistoryQuery::new().since(since).until(until))
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}
