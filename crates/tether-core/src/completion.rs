//! Task-completion tracking.
//!
//! Terminal output flickers between "working" and "idle" within milliseconds,
//! so a session only declares a turn finished after a completion signal has
//! survived a debounce window. The session records every step of that decision
//! as a [`TaskCompletionTraceRecord`]; this module folds those records into
//! turns and scores how likely each turn is to be complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tether_proto::{TaskCompletionTraceRecord, TraceEvent};

/// Turns retained by a streaming tracker.
const MAX_TURNS: usize = 50;

/// Records retained per turn; older records are dropped first.
const MAX_RECORDS_PER_TURN: usize = 200;

/// Score adjustments applied to each record.
///
/// The defaults are empirical and tunable. Only the clamp to 0..=100 and the
/// fixed 100 on `transition_ready` are relied upon elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfidenceWeights {
    pub base: i32,
    pub loading_penalty: i32,
    pub ready_bonus: i32,
    pub task_complete_bonus: i32,
    pub signal_bonus: i32,
    pub rejection_penalty: i32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            base: 10,
            loading_penalty: 40,
            ready_bonus: 20,
            task_complete_bonus: 45,
            signal_bonus: 20,
            rejection_penalty: 30,
        }
    }
}

impl ConfidenceWeights {
    /// Scores a single record.
    pub fn score(&self, record: &TaskCompletionTraceRecord) -> u8 {
        if record.event == TraceEvent::TransitionReady {
            return 100;
        }
        let mut score = self.base;
        if record.loading {
            score -= self.loading_penalty;
        }
        if record.ready {
            score += self.ready_bonus;
        }
        if record.task_complete {
            score += self.task_complete_bonus;
        }
        if record.signal {
            score += self.signal_bonus;
        }
        if record.event.is_rejection() {
            score -= self.rejection_penalty;
        }
        score.clamp(0, 100) as u8
    }
}

/// Where a turn stands after a given record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Active,
    ActiveLoading,
    LikelyComplete,
    Rejected,
    Completed,
}

impl TurnStatus {
    /// Derives the status implied by a single record.
    pub fn of(record: &TaskCompletionTraceRecord) -> Self {
        match record.event {
            TraceEvent::TransitionReady => TurnStatus::Completed,
            e if e.is_rejection() => TurnStatus::Rejected,
            _ if record.loading => TurnStatus::ActiveLoading,
            TraceEvent::DebounceFire if record.signal => TurnStatus::LikelyComplete,
            _ => TurnStatus::Active,
        }
    }

    /// A settled turn is closed by the next `busy_signal`.
    pub fn is_settled(self) -> bool {
        matches!(self, TurnStatus::Completed | TurnStatus::Rejected)
    }
}

/// Per-record verdict returned by [`TaskCompletionTracker::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub turn: usize,
    pub status: TurnStatus,
    pub confidence: u8,
}

/// One request/response cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionTurn {
    /// 1-based turn number within the session.
    pub index: usize,
    pub status: TurnStatus,
    pub confidence: u8,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub records: VecDeque<TaskCompletionTraceRecord>,
}

impl CompletionTurn {
    fn open(index: usize, record: &TaskCompletionTraceRecord) -> Self {
        Self {
            index,
            status: TurnStatus::Active,
            confidence: 0,
            started_at: record.at,
            completed_at: None,
            records: VecDeque::new(),
        }
    }
}

/// Ordered turns of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletionTimeline {
    pub turns: Vec<CompletionTurn>,
}

impl TaskCompletionTimeline {
    pub fn last(&self) -> Option<&CompletionTurn> {
        self.turns.last()
    }

    pub fn completed_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.status == TurnStatus::Completed)
            .count()
    }
}

/// Streaming fold of trace records into turns.
#[derive(Debug, Clone, Default)]
pub struct TaskCompletionTracker {
    weights: ConfidenceWeights,
    turns: VecDeque<CompletionTurn>,
    next_index: usize,
}

impl TaskCompletionTracker {
    pub fn new(weights: ConfidenceWeights) -> Self {
        Self {
            weights,
            turns: VecDeque::new(),
            next_index: 1,
        }
    }

    pub fn weights(&self) -> &ConfidenceWeights {
        &self.weights
    }

    /// Adds a record, opening a new turn when the current one has settled.
    pub fn push(&mut self, record: TaskCompletionTraceRecord) -> Assessment {
        let opens_turn = match self.turns.back() {
            None => true,
            Some(turn) => turn.status.is_settled() && record.event == TraceEvent::BusySignal,
        };
        if opens_turn {
            let index = self.next_index.max(1);
            self.next_index = index + 1;
            self.turns.push_back(CompletionTurn::open(index, &record));
            if self.turns.len() > MAX_TURNS {
                self.turns.pop_front();
            }
        }

        let status = TurnStatus::of(&record);
        let confidence = self.weights.score(&record);
        let Some(turn) = self.turns.back_mut() else {
            unreachable!("a turn is always open after the check above");
        };

        // A completed turn stays completed until the next busy signal opens a new one.
        if turn.status != TurnStatus::Completed {
            turn.status = status;
            turn.confidence = confidence;
            if status == TurnStatus::Completed {
                turn.completed_at = Some(record.at);
            }
        }
        turn.records.push_back(record);
        if turn.records.len() > MAX_RECORDS_PER_TURN {
            turn.records.pop_front();
        }

        Assessment {
            turn: turn.index,
            status: turn.status,
            confidence: turn.confidence,
        }
    }

    pub fn current(&self) -> Option<&CompletionTurn> {
        self.turns.back()
    }

    pub fn timeline(&self) -> TaskCompletionTimeline {
        TaskCompletionTimeline {
            turns: self.turns.iter().cloned().collect(),
        }
    }
}

/// Builds a timeline from a complete record list using default weights.
pub fn build_timeline<I>(records: I) -> TaskCompletionTimeline
where
    I: IntoIterator<Item = TaskCompletionTraceRecord>,
{
    let mut tracker = TaskCompletionTracker::new(ConfidenceWeights::default());
    for record in records {
        tracker.push(record);
    }
    tracker.timeline()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(event: TraceEvent) -> TaskCompletionTraceRecord {
        TaskCompletionTraceRecord::new("s1", event)
    }

    #[test]
    fn test_six_record_trace_yields_two_turns() {
        let records = vec![
            rec(TraceEvent::BusySignal),
            rec(TraceEvent::DebounceSchedule).with_flags(false, true, false).with_signal(true),
            rec(TraceEvent::DebounceRejectSignal),
            rec(TraceEvent::BusySignal),
            rec(TraceEvent::DebounceFire).with_flags(false, true, false).with_signal(true),
            rec(TraceEvent::TransitionReady),
        ];
        let timeline = build_timeline(records);

        assert_eq!(timeline.turns.len(), 2);
        assert_eq!(timeline.turns[0].status, TurnStatus::Rejected);
        assert_eq!(timeline.turns[0].records.len(), 3);

        let second = &timeline.turns[1];
        assert_eq!(second.index, 2);
        assert_eq!(second.status, TurnStatus::Completed);
        assert_eq!(second.confidence, 100);
        assert!(second.completed_at.is_some());
        assert_eq!(second.records.len(), 3);
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(TurnStatus::of(&rec(TraceEvent::TransitionReady)), TurnStatus::Completed);
        assert_eq!(
            TurnStatus::of(&rec(TraceEvent::DebounceRejectStatus)),
            TurnStatus::Rejected
        );
        assert_eq!(
            TurnStatus::of(&rec(TraceEvent::BusySignal).with_flags(true, false, false)),
            TurnStatus::ActiveLoading
        );
        assert_eq!(
            TurnStatus::of(&rec(TraceEvent::DebounceFire).with_signal(true)),
            TurnStatus::LikelyComplete
        );
        assert_eq!(TurnStatus::of(&rec(TraceEvent::DebounceFire)), TurnStatus::Active);
        assert_eq!(TurnStatus::of(&rec(TraceEvent::DebounceSchedule)), TurnStatus::Active);
    }

    #[test]
    fn test_confidence_scoring() {
        let w = ConfidenceWeights::default();
        assert_eq!(w.score(&rec(TraceEvent::BusySignal)), 10);
        assert_eq!(
            w.score(&rec(TraceEvent::BusySignal).with_flags(true, false, false)),
            0
        );
        assert_eq!(
            w.score(&rec(TraceEvent::DebounceFire).with_flags(false, true, true).with_signal(true)),
            95
        );
        assert_eq!(
            w.score(&rec(TraceEvent::DebounceRejectSignal).with_flags(false, true, false)),
            0
        );
        assert_eq!(
            w.score(&rec(TraceEvent::DebounceSchedule).with_flags(false, true, false).with_signal(true)),
            50
        );
        assert_eq!(
            w.score(&rec(TraceEvent::TransitionReady).with_flags(true, false, false)),
            100
        );
    }

    #[test]
    fn test_scores_clamp_to_upper_bound() {
        let w = ConfidenceWeights {
            base: 90,
            ..ConfidenceWeights::default()
        };
        let record = rec(TraceEvent::DebounceFire).with_flags(false, true, true).with_signal(true);
        assert_eq!(w.score(&record), 100);
    }

    #[test]
    fn test_completed_turn_ignores_trailing_records_until_busy() {
        let mut tracker = TaskCompletionTracker::new(ConfidenceWeights::default());
        tracker.push(rec(TraceEvent::BusySignal));
        tracker.push(rec(TraceEvent::TransitionReady));
        let late = tracker.push(rec(TraceEvent::DebounceRejectStatus));
        assert_eq!(late.turn, 1);
        assert_eq!(late.status, TurnStatus::Completed);

        let next = tracker.push(rec(TraceEvent::BusySignal));
        assert_eq!(next.turn, 2);
        assert_eq!(next.status, TurnStatus::Active);
    }

    #[test]
    fn test_first_record_opens_turn_even_without_busy_signal() {
        let timeline = build_timeline(vec![rec(TraceEvent::DebounceSchedule)]);
        assert_eq!(timeline.turns.len(), 1);
        assert_eq!(timeline.turns[0].index, 1);
    }

    #[test]
    fn test_timeline_counts_completed_turns() {
        let timeline = build_timeline(vec![
            rec(TraceEvent::BusySignal),
            rec(TraceEvent::TransitionReady),
            rec(TraceEvent::BusySignal),
            rec(TraceEvent::TransitionReady),
            rec(TraceEvent::BusySignal),
        ]);
        assert_eq!(timeline.turns.len(), 3);
        assert_eq!(timeline.completed_turns(), 2);
        assert_eq!(timeline.last().map(|t| t.status), Some(TurnStatus::Active));
    }
}
