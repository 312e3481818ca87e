//! Debounce coordinator: collapses bursts of change signals into one
//! regeneration.
//!
//! ```text
//!            signal                 deadline elapsed
//!   Idle ─────────────▶ PendingQuiet ───────────────▶ Running
//!    ▲                   │    ▲                         │
//!    │                   └────┘ signal (restart timer)  │
//!    │                                                  │
//!    └──────────── complete, nothing queued ────────────┘
//!                  complete, signals queued ──▶ PendingQuiet
//! ```
//!
//! The coordinator owns all watch state and never reads a clock: callers
//! pass `now` to every transition, which keeps it deterministic under test.
//! Signals that arrive while `Running` are queued and start exactly one
//! follow-up quiet period when the regeneration completes.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    PendingQuiet { deadline: Instant },
    Running,
}

#[derive(Debug)]
pub struct DebounceCoordinator {
    quiet_period: Duration,
    state: State,
    pending: BTreeSet<String>,
    queued: BTreeSet<String>,
}

impl DebounceCoordinator {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            state: State::Idle,
            pending: BTreeSet::new(),
            queued: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Whether a regeneration is waiting for its quiet period or queued
    /// behind the one in progress.
    pub fn is_pending(&self) -> bool {
        match self.state {
            State::Idle => false,
            State::PendingQuiet { .. } => true,
            State::Running => !self.queued.is_empty(),
        }
    }

    /// When the current quiet period ends, if one is running.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::PendingQuiet { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Record a change. Restarts the quiet period unless a regeneration is
    /// running, in which case the change is queued.
    pub fn signal(&mut self, change: impl Into<String>, now: Instant) {
        let change = change.into();
        match self.state {
            State::Idle | State::PendingQuiet { .. } => {
                self.pending.insert(change);
                self.state = State::PendingQuiet {
                    deadline: now + self.quiet_period,
                };
            }
            State::Running => {
                self.queued.insert(change);
            }
        }
    }

    /// If the quiet period has elapsed, enter `Running` and hand back the
    /// changes to regenerate for. The pending set is cleared in the same step.
    pub fn poll(&mut self, now: Instant) -> Option<BTreeSet<String>> {
        match self.state {
            State::PendingQuiet { deadline } if now >= deadline => {
                self.state = State::Running;
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }

    /// Leave `Running`. Changes queued meanwhile start a fresh quiet period.
    pub fn complete(&mut self, now: Instant) {
        if self.state != State::Running {
            tracing::debug!(state = ?self.state, "complete called outside a regeneration");
            return;
        }
        if self.queued.is_empty() {
            self.state = State::Idle;
        } else {
            self.pending = std::mem::take(&mut self.queued);
            self.state = State::PendingQuiet {
                deadline: now + self.quiet_period,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(2000);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Feed signals at the given offsets, regenerating instantly whenever
    /// a deadline passes. Returns the change sets dispatched.
    fn simulate(offsets_ms: &[u64]) -> Vec<BTreeSet<String>> {
        let t0 = Instant::now();
        let mut c = DebounceCoordinator::new(QUIET);
        let mut dispatched = Vec::new();

        for (i, off) in offsets_ms.iter().enumerate() {
            let now = t0 + ms(*off);
            if let Some(batch) = c.poll(now) {
                dispatched.push(batch);
                c.complete(now);
            }
            c.signal(format!("f{}", i), now);
        }
        let end = t0 + ms(offsets_ms.last().copied().unwrap_or(0)) + QUIET;
        if let Some(batch) = c.poll(end) {
            dispatched.push(batch);
            c.complete(end);
        }
        dispatched
    }

    #[test]
    fn burst_within_quiet_period_coalesces() {
        let batches = simulate(&[0, 10, 500, 1900, 3800]);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 5);
    }

    #[test]
    fn spaced_signals_each_regenerate() {
        let batches = simulate(&[0, 2500, 5000, 7500]);
        assert_eq!(batches.len(), 4);
        assert!(batches.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn deadline_restarts_on_every_signal() {
        let t0 = Instant::now();
        let mut c = DebounceCoordinator::new(QUIET);
        c.signal("a", t0);
        c.signal("b", t0 + ms(1500));
        assert_eq!(c.deadline(), Some(t0 + ms(3500)));
        assert!(c.poll(t0 + ms(2500)).is_none());
        let batch = c.poll(t0 + ms(3500)).unwrap();
        assert_eq!(batch.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(c.state(), State::Running);
    }

    #[test]
    fn signal_while_running_is_queued_once() {
        let t0 = Instant::now();
        let mut c = DebounceCoordinator::new(QUIET);
        c.signal("a", t0);
        c.poll(t0 + QUIET).unwrap();

        c.signal("b", t0 + ms(2100));
        c.signal("c", t0 + ms(2200));
        assert_eq!(c.state(), State::Running);
        assert!(c.poll(t0 + ms(9000)).is_none(), "no second concurrent run");
        assert!(c.is_pending());

        c.complete(t0 + ms(2300));
        assert_eq!(
            c.state(),
            State::PendingQuiet {
                deadline: t0 + ms(4300)
            }
        );
        let follow_up = c.poll(t0 + ms(4300)).unwrap();
        assert_eq!(follow_up.len(), 2);
        c.complete(t0 + ms(4400));
        assert_eq!(c.state(), State::Idle);
        assert!(!c.is_pending());
    }

    #[test]
    fn complete_without_queue_returns_to_idle() {
        let t0 = Instant::now();
        let mut c = DebounceCoordinator::new(QUIET);
        c.signal("a", t0);
        c.poll(t0 + QUIET).unwrap();
        c.complete(t0 + QUIET);
        assert_eq!(c.state(), State::Idle);
        assert!(c.deadline().is_none());
    }

    #[test]
    fn complete_outside_running_is_ignored() {
        let t0 = Instant::now();
        let mut c = DebounceCoordinator::new(QUIET);
        c.complete(t0);
        assert_eq!(c.state(), State::Idle);
        c.signal("a", t0);
        c.complete(t0);
        assert!(matches!(c.state(), State::PendingQuiet { .. }));
    }
}
