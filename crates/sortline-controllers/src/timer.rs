//! Cancellable deadlines owned by a controller.
//!
//! A [`ScheduledTimer`] is plain state: the controller arms and cancels it
//! while handling messages, and the actor loop sleeps until the earliest
//! armed deadline. Because the deadline is re-read after every message, a
//! cancel can never race with an expiry already in flight.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ScheduledTimer {
    period: Duration,
    deadline: Option<Instant>,
}

impl ScheduledTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Arm (or re-arm) the timer one period from now.
    pub fn arm(&mut self) -> Instant {
        self.arm_from(Instant::now())
    }

    pub fn arm_from(&mut self, now: Instant) -> Instant {
        let deadline = now + self.period;
        self.deadline = Some(deadline);
        deadline
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm and report `true` if the deadline has passed at `now`.
    pub fn take_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
