//! Recovery event log: bounded, append-only, diagnostics only.

use std::time::Instant;

use serde::Serialize;

use crate::heat::HistoryRing;
use crate::state_machine::{RecoveryOutcome, Signals};
use crate::strategy::RecoveryAction;

/// One recovery attempt (or forced repair) as seen by diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryEvent {
    #[serde(skip)]
    pub timestamp: Instant,
    /// Seconds since the regulator was built
    pub offset_secs: f64,
    pub sequence: u64,
    pub trigger_reason: String,
    pub heat: f64,
    pub coherence: f64,
    pub drift: f64,
    pub action: String,
    pub heat_delta: f64,
}

/// Ring of the most recent recovery events
#[derive(Debug, Clone)]
pub struct EventLog {
    ring: HistoryRing<RecoveryEvent>,
    origin: Instant,
    next_sequence: u64,
}

impl EventLog {
    pub fn new(capacity: usize, origin: Instant) -> Self {
        Self {
            ring: HistoryRing::new(capacity),
            origin,
            next_sequence: 0,
        }
    }

    pub fn record_outcome(&mut self, outcome: &RecoveryOutcome, now: Instant) {
        self.record(
            now,
            outcome.trigger_reason.clone(),
            outcome.heat_before,
            outcome.signals,
            outcome.action,
            outcome.heat_delta,
        );
    }

    pub fn record(
        &mut self,
        now: Instant,
        trigger_reason: String,
        heat: f64,
        signals: Signals,
        action: RecoveryAction,
        heat_delta: f64,
    ) {
        let event = RecoveryEvent {
            timestamp: now,
            offset_secs: now.saturating_duration_since(self.origin).as_secs_f64(),
            sequence: self.next_sequence,
            trigger_reason,
            heat,
            coherence: signals.coherence,
            drift: signals.drift,
            action: action.name().to_string(),
            heat_delta,
        };
        self.next_sequence += 1;
        self.ring.push(event);
    }

    /// Up to `limit` most recent events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<RecoveryEvent> {
        let skip = self.ring.len().saturating_sub(limit);
        self.ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Events ever recorded, including those rotated out
    pub fn total_recorded(&self) -> u64 {
        self.next_sequence
    }
}
