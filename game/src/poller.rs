use std::time::Duration;

use engine::clock::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollState {
    Idle,
    Waiting { next_due: Millis },
    InFlight { seq: u64, issued_at: Millis },
}

/// Readiness poller for the awaiting-next phase.
///
/// Only one poll is ever in flight: the next one becomes due only after the previous reply
/// has been settled, at least `interval` after it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    state: PollState,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: PollState::Idle,
        }
    }

    /// Arms the poller. The first poll is due one interval from `now`.
    pub fn start(&mut self, now: Millis) {
        self.state = PollState::Waiting {
            next_due: now.saturating_add(self.interval),
        };
    }

    /// Returns whether the poller was active.
    pub fn cancel(&mut self) -> bool {
        let was_active = self.is_active();
        self.state = PollState::Idle;
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.state != PollState::Idle
    }

    pub fn due(&self, now: Millis) -> bool {
        matches!(self.state, PollState::Waiting { next_due } if now >= next_due)
    }

    pub fn issued(&mut self, seq: u64, now: Millis) {
        if self.is_active() {
            self.state = PollState::InFlight {
                seq,
                issued_at: now,
            };
        }
    }

    /// Accepts the reply for `seq`. Returns false for replies the poller is not waiting on,
    /// including late replies after cancellation.
    pub fn settle(&mut self, seq: u64, now: Millis) -> bool {
        match self.state {
            PollState::InFlight {
                seq: expected,
                issued_at,
            } if expected == seq => {
                let next_due = issued_at.saturating_add(self.interval).max(now);
                self.state = PollState::Waiting { next_due };
                true
            }
            _ => false,
        }
    }
}
