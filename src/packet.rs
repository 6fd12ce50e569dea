//! Correlator packet model and the two seams to the hardware: the packet
//! source the acquisition loop blocks on, and the configuration sink the
//! delay controller programs.

use crate::utils::DynError;

/// One lag bin of a correlation function: accumulated magnitude and the
/// number of samples that contributed to it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LagBin {
    pub magnitude: f64,
    pub count: f64,
}

impl LagBin {
    /// Magnitude normalized by sample count; zero-count bins read as zero
    /// rather than dividing.
    pub fn normalized(&self) -> f64 {
        if self.count > 0.0 {
            self.magnitude / self.count
        } else {
            0.0
        }
    }
}

/// One hardware sample epoch. `counts` has one entry per line;
/// `autocorrelations` one lag series per line; `crosscorrelations` one lag
/// series per baseline, in (i, j) i<j pair order.
#[derive(Clone, Debug)]
pub struct Packet {
    pub counts: Vec<u64>,
    pub autocorrelations: Vec<Vec<LagBin>>,
    pub crosscorrelations: Vec<Vec<LagBin>>,
}

impl Packet {
    /// Mid-lag bin of a cross-correlation series, the zero-delay sample used
    /// for running sums and image accumulation.
    pub fn cross_mid_lag(&self, baseline: usize) -> LagBin {
        let lags = &self.crosscorrelations[baseline];
        lags[lags.len() / 2]
    }
}

/// Outcome of one poll of the transport. `RetryLater` is the transient
/// not-ready case and is never an error.
pub enum Poll {
    Packet(Packet),
    RetryLater,
}

/// The stream of correlator packets. Blocking and reconnection semantics
/// stay inside the transport; the acquisition loop only ever sees a packet
/// or a request to retry after one sample period.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Poll;

    /// Whether the transport currently has a live device behind it.
    fn is_connected(&self) -> bool;

    /// Nominal seconds between two hardware packets, also used as the retry
    /// backoff.
    fn packet_period(&self) -> f64;
}

/// Per-line input conditioning flags, mirroring the hardware register.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LineMode {
    pub enabled: bool,
    pub powered: bool,
    pub active_low: bool,
    pub edge_triggered: bool,
    pub differential: bool,
}

impl LineMode {
    pub fn dark() -> Self {
        Self::default()
    }

    /// Register encoding: one flag per bit, enable in the LSB.
    pub fn register_bits(&self) -> u8 {
        (self.enabled as u8)
            | (self.powered as u8) << 1
            | (self.active_low as u8) << 2
            | (self.edge_triggered as u8) << 3
            | (self.differential as u8) << 4
    }
}

/// Hardware configuration sink: delay-line registers, line conditioning and
/// the capture gate.
pub trait HardwareSink: Send {
    fn set_delay(&mut self, line: usize, steps: u32) -> Result<(), DynError>;
    fn set_line_mode(&mut self, line: usize, mode: LineMode) -> Result<(), DynError>;
    fn set_capture_enabled(&mut self, enabled: bool) -> Result<(), DynError>;
}

/// Fixed hardware description reported by the correlator at handshake.
#[derive(Clone, Copy, Debug)]
pub struct CorrelatorInfo {
    pub nlines: usize,
    /// Lag bins per autocorrelation series.
    pub auto_lag_size: usize,
    /// Lag bins per cross-correlation series.
    pub cross_lag_size: usize,
    /// Sample clock, Hz. One delay step is one sample clock period.
    pub sample_clock_hz: f64,
    /// Number of programmable delay-line steps.
    pub max_delay_steps: u32,
}

impl CorrelatorInfo {
    pub fn nbaselines(&self) -> usize {
        self.nlines * self.nlines.saturating_sub(1) / 2
    }
}
