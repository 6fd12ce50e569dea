//! Periodic reporter: on its own wall-clock cadence, independent of packet
//! arrival, drain the running totals and publish scalar telemetry. Draining
//! is the one and only reset of the totals, so the reporter must run at
//! least once per reporting window for the rates to stay meaningful.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::acquire::Shared;
use crate::utils::DynError;

#[derive(Clone, Copy, Debug)]
pub struct LineTelemetry {
    /// Pulse rate over the reporting window, counts per second.
    pub counts_rate: f64,
    /// Relative magnitude estimate against the configured zero-point rate;
    /// None when no pulses arrived.
    pub magnitude: Option<f64>,
    /// Geometric delay currently programmed, meters.
    pub delay_m: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct BaselineTelemetry {
    /// Mid-lag correlation magnitude per second.
    pub correlation_rate: f64,
    /// Coherence ratio: accumulated magnitude over accumulated sample count.
    pub coherence: f64,
}

#[derive(Clone, Debug)]
pub struct TelemetryReport {
    pub lines: Vec<LineTelemetry>,
    pub baselines: Vec<BaselineTelemetry>,
    pub integration_time_left_s: f64,
}

/// Consumer of telemetry reports; the control layer publishes these on its
/// own property surface.
pub trait TelemetrySink: Send {
    fn publish(&mut self, report: TelemetryReport);
}

#[derive(Clone, Copy, Debug)]
pub struct ReporterConfig {
    pub period: Duration,
    /// Pulse rate corresponding to magnitude 0.
    pub magnitude_zero_rate: f64,
}

/// Drain the totals and fold them into one report covering `period_s`
/// seconds of accumulation.
pub fn build_report(shared: &Shared, period_s: f64, magnitude_zero_rate: f64) -> TelemetryReport {
    let drained = {
        let mut totals = shared.totals.lock().unwrap_or_else(|e| e.into_inner());
        totals.drain()
    };
    let delays: Vec<f64> = {
        let layout = shared.layout.lock().unwrap_or_else(|e| e.into_inner());
        layout.lines.iter().map(|l| l.delay_m).collect()
    };

    let lines = drained
        .counts
        .iter()
        .zip(&delays)
        .map(|(&counts, &delay_m)| {
            let counts_rate = counts / period_s;
            let magnitude = if counts_rate > 0.0 && magnitude_zero_rate > 0.0 {
                Some(-2.5 * (counts_rate / magnitude_zero_rate).log10())
            } else {
                None
            };
            LineTelemetry {
                counts_rate,
                magnitude,
                delay_m,
            }
        })
        .collect();

    let baselines = drained
        .correlations
        .iter()
        .map(|sum| BaselineTelemetry {
            correlation_rate: sum.magnitude / period_s,
            coherence: if sum.count > 0.0 {
                sum.magnitude / sum.count
            } else {
                0.0
            },
        })
        .collect();

    TelemetryReport {
        lines,
        baselines,
        integration_time_left_s: shared.time_left_s(),
    }
}

/// Run the reporter on its own thread until the shared stop flag is raised.
pub fn spawn(
    shared: Arc<Shared>,
    config: ReporterConfig,
    mut sink: Box<dyn TelemetrySink>,
) -> Result<JoinHandle<()>, DynError> {
    let handle = thread::Builder::new()
        .name("reporter".into())
        .spawn(move || {
            let period_s = config.period.as_secs_f64();
            while !shared.stop_requested() {
                thread::sleep(config.period);
                let report = build_report(&shared, period_s, config.magnitude_zero_rate);
                debug!(
                    lines = report.lines.len(),
                    time_left = report.integration_time_left_s,
                    "telemetry"
                );
                sink.publish(report);
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::{DeviceConfig, Shared, Target};
    use crate::packet::{CorrelatorInfo, LagBin};

    fn shared() -> Shared {
        let info = CorrelatorInfo {
            nlines: 2,
            auto_lag_size: 4,
            cross_lag_size: 7,
            sample_clock_hz: 1.0e6,
            max_delay_steps: 1024,
        };
        let config = DeviceConfig {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            target: Target {
                ra_rad: 0.0,
                dec_rad: 0.0,
                wavelength_m: 0.21,
                bandwidth_m: 1000.0,
            },
            plot_size: 8,
            pin_cpu: None,
        };
        Shared::new(&info, &config)
    }

    #[test]
    fn report_scales_by_period_and_drains_totals() {
        let shared = shared();
        {
            let mut totals = shared.totals.lock().unwrap();
            totals.add_line_counts(0, 500);
            totals.add_correlation(
                0,
                LagBin {
                    magnitude: 3.0,
                    count: 6.0,
                },
            );
        }
        let report = build_report(&shared, 0.5, 1000.0);
        assert_eq!(report.lines[0].counts_rate, 1000.0);
        assert!(report.lines[0].magnitude.unwrap().abs() < 1e-12);
        assert_eq!(report.baselines[0].correlation_rate, 6.0);
        assert_eq!(report.baselines[0].coherence, 0.5);

        // Next window starts from zero.
        let report = build_report(&shared, 0.5, 1000.0);
        assert_eq!(report.lines[0].counts_rate, 0.0);
        assert!(report.lines[0].magnitude.is_none());
        assert_eq!(report.baselines[0].coherence, 0.0);
    }

    #[test]
    fn magnitude_tracks_the_zero_point_rate() {
        let shared = shared();
        shared.totals.lock().unwrap().add_line_counts(1, 100);
        let report = build_report(&shared, 1.0, 1000.0);
        // One tenth of the zero-point rate is 2.5 magnitudes fainter.
        assert!((report.lines[1].magnitude.unwrap() - 2.5).abs() < 1e-9);
    }
}
