//! Deterministic simulated correlator, standing in for the serial transport
//! and vendor packet decoding that live outside this crate. The binary runs
//! against it end to end; tests use it as a predictable packet source.

use tracing::debug;

use crate::packet::{
    CorrelatorInfo, HardwareSink, LagBin, LineMode, Packet, PacketSource, Poll,
};
use crate::utils::DynError;

// xorshift64*, enough randomness for photon-count jitter.
fn next_noise(state: &mut u64) -> f64 {
    let mut x = *state;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    *state = x;
    (x.wrapping_mul(0x2545F4914F6CDD1D) >> 40) as f64 / (1u64 << 24) as f64
}

/// Synthetic packet stream: per-line counts around a base rate, lag series
/// with a correlated peak at the mid lag.
pub struct SimulatedCorrelator {
    info: CorrelatorInfo,
    period_s: f64,
    base_counts: u64,
    noise_state: u64,
    tick: u64,
}

impl SimulatedCorrelator {
    pub fn new(info: CorrelatorInfo, period_s: f64, seed: u64) -> Self {
        Self {
            info,
            period_s,
            base_counts: 10_000,
            noise_state: seed | 1,
            tick: 0,
        }
    }

    fn lag_series(&mut self, size: usize, peak: f64) -> Vec<LagBin> {
        let mid = size / 2;
        (0..size)
            .map(|lag| {
                let offset = lag.abs_diff(mid) as f64;
                let magnitude =
                    peak * (-offset * offset / 4.0).exp() + next_noise(&mut self.noise_state);
                LagBin {
                    magnitude,
                    count: self.base_counts as f64,
                }
            })
            .collect()
    }
}

impl PacketSource for SimulatedCorrelator {
    fn next_packet(&mut self) -> Poll {
        self.tick += 1;
        // Slow drift on top of the per-line jitter so rates are not flat.
        let drift = (self.tick % 64) * 4;
        let counts = (0..self.info.nlines)
            .map(|_| self.base_counts + drift + (next_noise(&mut self.noise_state) * 100.0) as u64)
            .collect();
        let autocorrelations = (0..self.info.nlines)
            .map(|_| self.lag_series(self.info.auto_lag_size, self.base_counts as f64))
            .collect();
        let crosscorrelations = (0..self.info.nbaselines())
            .map(|_| self.lag_series(self.info.cross_lag_size, self.base_counts as f64 * 0.4))
            .collect();
        Poll::Packet(Packet {
            counts,
            autocorrelations,
            crosscorrelations,
        })
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn packet_period(&self) -> f64 {
        self.period_s
    }
}

/// Hardware sink that only records what was programmed. Doubles as the
/// simulator's register file and as a probe in tests.
#[derive(Clone, Debug, Default)]
pub struct SimulatedSink {
    pub delays: Vec<(usize, u32)>,
    pub modes: Vec<(usize, LineMode)>,
    pub capture_enabled: bool,
}

impl HardwareSink for SimulatedSink {
    fn set_delay(&mut self, line: usize, steps: u32) -> Result<(), DynError> {
        debug!(line, steps, "delay register");
        self.delays.push((line, steps));
        Ok(())
    }

    fn set_line_mode(&mut self, line: usize, mode: LineMode) -> Result<(), DynError> {
        debug!(line, bits = mode.register_bits(), "line mode register");
        self.modes.push((line, mode));
        Ok(())
    }

    fn set_capture_enabled(&mut self, enabled: bool) -> Result<(), DynError> {
        self.capture_enabled = enabled;
        Ok(())
    }
}
