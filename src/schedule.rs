// Fixed-rate transmit deadline for the chassis command stream
//
// The chassis expects a steady command cadence. The loop polls this between
// reads; a late poll fires once and advances the deadline by one period, so
// short hiccups are caught up one frame per loop pass. After a long stall the
// deadline jumps to now + period instead, so at most one frame goes out on
// resume.

use std::time::{Duration, Instant};

/// Lag beyond which the schedule stops catching up
pub const MAX_LAG: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TransmitSchedule {
    period: Duration,
    next_deadline: Instant,
}

impl TransmitSchedule {
    /// First deadline is one period after `now`
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_deadline: now + period,
        }
    }

    /// Period for a given rate, with rates below 1 Hz treated as 1 Hz
    pub fn period_for_hz(hz: f64) -> Duration {
        Duration::from_secs_f64(1.0 / hz.max(1.0))
    }

    /// True when a frame is due at `now`
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_deadline {
            return false;
        }

        self.next_deadline += self.period;
        if now.saturating_duration_since(self.next_deadline) > MAX_LAG {
            self.next_deadline = now + self.period;
        }
        true
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }
}
