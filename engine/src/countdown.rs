use std::time::Duration;

use crate::clock::Millis;

/// Single-shot countdown against a monotonic deadline.
///
/// The expiry "callback" is a value handed back exactly once by `tick`, which keeps
/// the owner in control of what happens on expiry. Remaining time is derived from the
/// deadline on every sample, so a host that stalls between ticks does not drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown<E> {
    armed: Option<Armed<E>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Armed<E> {
    deadline: Millis,
    duration: Duration,
    on_expiry: E,
}

impl<E> Default for Countdown<E> {
    fn default() -> Self {
        Self { armed: None }
    }
}

impl<E> Countdown<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the countdown. Any timer already running is replaced without firing.
    pub fn start(&mut self, now: Millis, duration: Duration, on_expiry: E) {
        self.armed = Some(Armed {
            deadline: now.saturating_add(duration),
            duration,
            on_expiry,
        });
    }

    /// Disarms the countdown. Returns whether a timer was running.
    pub fn cancel(&mut self) -> bool {
        self.armed.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.armed.is_some()
    }

    /// Time left before expiry; zero when idle or already past the deadline.
    pub fn remaining(&self, now: Millis) -> Duration {
        match &self.armed {
            Some(armed) => armed.deadline.duration_since(now).min(armed.duration),
            None => Duration::ZERO,
        }
    }

    /// Samples the countdown. Yields the expiry payload once the deadline is reached and
    /// disarms, so later ticks are no-ops.
    pub fn tick(&mut self, now: Millis) -> Option<E> {
        let expired = self
            .armed
            .as_ref()
            .is_some_and(|armed| now >= armed.deadline);
        if !expired {
            return None;
        }
        self.armed.take().map(|armed| armed.on_expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down_from_the_deadline() {
        let mut t = Countdown::new();
        t.start(Millis(1_000), Duration::from_secs(180), ());
        assert_eq!(t.remaining(Millis(1_000)), Duration::from_secs(180));
        assert_eq!(t.remaining(Millis(61_000)), Duration::from_secs(120));
        assert_eq!(t.remaining(Millis(500_000)), Duration::ZERO);
    }

    #[test]
    fn expiry_fires_exactly_once() {
        let mut t = Countdown::new();
        t.start(Millis(0), Duration::from_secs(3), "stage-0");
        assert_eq!(t.tick(Millis(2_999)), None);
        assert_eq!(t.tick(Millis(3_000)), Some("stage-0"));

        // Once fired it stays quiet.
        assert_eq!(t.tick(Millis(4_000)), None);
        assert!(!t.is_active());
    }

    #[test]
    fn restart_replaces_prior_timer() {
        let mut t = Countdown::new();
        t.start(Millis(0), Duration::from_secs(1), 1);
        t.start(Millis(500), Duration::from_secs(2), 2);
        assert_eq!(t.tick(Millis(1_000)), None);
        assert_eq!(t.tick(Millis(2_500)), Some(2));
    }

    #[test]
    fn cancel_is_idempotent_and_suppresses_expiry() {
        let mut t = Countdown::new();
        t.start(Millis(0), Duration::from_secs(1), ());
        assert!(t.cancel());
        assert!(!t.cancel());
        assert_eq!(t.tick(Millis(10_000)), None);
        assert_eq!(t.remaining(Millis(0)), Duration::ZERO);
    }

    #[test]
    fn stalled_host_catches_up_on_next_sample() {
        let mut t = Countdown::new();
        t.start(Millis(0), Duration::from_secs(180), ());
        // No ticks for a long while (e.g. a suspended tab), then a single sample.
        assert_eq!(t.tick(Millis(200_000)), Some(()));
    }
}
