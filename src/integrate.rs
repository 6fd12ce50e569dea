//! Integration session state machine. Timestamps are injected by the caller
//! (the acquisition loop stamps ticks with wall-clock seconds, tests drive
//! it directly), so every transition is deterministic under test.

/// What one poll tick means for the pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    /// No session active: skip delay tracking and buffer growth.
    Idle,
    /// Session active with time remaining: run the delay controller and grow
    /// the accumulation buffers by one row.
    MidIntegration { remaining_s: f64 },
    /// Remaining time reached zero this tick: package the buffers and reset
    /// them. The session is already back to idle when this is returned.
    Finalize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IntegrationSession {
    active: bool,
    requested_s: f64,
    started_at_s: f64,
    remaining_s: f64,
}

impl IntegrationSession {
    /// Begin a session. Rejected, with no state touched, when one is already
    /// active or the requested duration is not positive.
    pub fn start(&mut self, duration_s: f64, now_s: f64) -> bool {
        if self.active || duration_s <= 0.0 {
            return false;
        }
        self.requested_s = duration_s;
        self.started_at_s = now_s;
        self.remaining_s = duration_s;
        self.active = true;
        true
    }

    /// Abort without finalization: accumulated rows are discarded by the
    /// caller, no products are emitted. Rejected when idle.
    pub fn abort(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        true
    }

    pub fn tick(&mut self, now_s: f64) -> TickOutcome {
        if !self.active {
            return TickOutcome::Idle;
        }
        let remaining = self.requested_s - (now_s - self.started_at_s);
        self.remaining_s = remaining.max(0.0);
        if remaining > 0.0 {
            TickOutcome::MidIntegration {
                remaining_s: self.remaining_s,
            }
        } else {
            self.active = false;
            TickOutcome::Finalize
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn remaining_s(&self) -> f64 {
        self.remaining_s
    }

    pub fn requested_s(&self) -> f64 {
        self.requested_s
    }

    pub fn started_at_s(&self) -> f64 {
        self.started_at_s
    }
}
