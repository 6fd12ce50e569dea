use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arraycorr::acquire::{
    ControlEvents, CorrelatorDevice, DeviceConfig, NumberUpdate, SwitchUpdate, Target,
};
use arraycorr::args::Args;
use arraycorr::fits::FitsCodec;
use arraycorr::packet::CorrelatorInfo;
use arraycorr::report::{self, ReporterConfig, TelemetryReport, TelemetrySink};
use arraycorr::sim::{SimulatedCorrelator, SimulatedSink};
use arraycorr::utils::DynError;
use arraycorr::xml::{self, LineConfig};
use arraycorr::{geom, plot};

// Telemetry consumer for the CLI: log each report and keep the first line's
// pulse-rate history for the quick-look plot.
struct LogSink {
    history: Arc<Mutex<Vec<f64>>>,
}

impl TelemetrySink for LogSink {
    fn publish(&mut self, report: TelemetryReport) {
        for (line, telemetry) in report.lines.iter().enumerate() {
            info!(
                line,
                rate = %format!("{:.1}", telemetry.counts_rate),
                magnitude = %telemetry
                    .magnitude
                    .map(|m| format!("{m:.2}"))
                    .unwrap_or_else(|| "-".into()),
                delay_m = %format!("{:.3e}", telemetry.delay_m),
                "line stats"
            );
        }
        for (baseline, telemetry) in report.baselines.iter().enumerate() {
            info!(
                baseline,
                rate = %format!("{:.1}", telemetry.correlation_rate),
                coherence = %format!("{:.4}", telemetry.coherence),
                "baseline stats"
            );
        }
        if report.integration_time_left_s > 0.0 {
            info!(
                time_left = %format!("{:.1}", report.integration_time_left_s),
                "integrating"
            );
        }
        if let Some(first) = report.lines.first() {
            if let Ok(mut history) = self.history.lock() {
                history.push(first.counts_rate);
            }
        }
    }
}

fn default_lines(count: usize) -> Vec<LineConfig> {
    // East-west grid, 10 m spacing, everything enabled.
    (0..count)
        .map(|i| LineConfig {
            position: [10.0 * i as f64, 0.0, 0.0],
            enabled: true,
        })
        .collect()
}

fn main() -> Result<(), DynError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let (site, lines) = match &args.config {
        Some(path) => {
            let config = xml::load_array_config(path)?;
            (config.clone(), config.lines)
        }
        None => (
            xml::ArrayConfig {
                latitude_deg: 0.0,
                longitude_deg: 0.0,
                wavelength_m: xml::DEFAULT_WAVELENGTH_M,
                bandwidth_m: xml::DEFAULT_BANDWIDTH_M,
                plot_size: xml::DEFAULT_PLOT_SIZE,
                lines: Vec::new(),
            },
            default_lines(args.lines),
        ),
    };
    let lines = if lines.is_empty() {
        default_lines(args.lines)
    } else {
        lines
    };

    let latitude_deg = args.lat.unwrap_or(site.latitude_deg);
    let longitude_deg = args.lon.unwrap_or(site.longitude_deg);
    let plot_size = args.plot_size.unwrap_or(site.plot_size);
    let ra_rad = geom::parse_ra(&args.ra)?;
    let dec_rad = geom::parse_dec(&args.dec)?;

    let info = CorrelatorInfo {
        nlines: lines.len(),
        auto_lag_size: args.auto_lags,
        cross_lag_size: args.cross_lags,
        sample_clock_hz: args.clock_mhz * 1.0e6,
        max_delay_steps: args.delay_steps,
    };
    let device_config = DeviceConfig {
        latitude_deg,
        longitude_deg,
        target: Target {
            ra_rad,
            dec_rad,
            wavelength_m: site.wavelength_m,
            bandwidth_m: site.bandwidth_m,
        },
        plot_size,
        pin_cpu: args.cpu,
    };

    info!(
        nlines = info.nlines,
        baselines = info.nbaselines(),
        plot_size,
        "starting acquisition"
    );

    let source = SimulatedCorrelator::new(info, args.packet_ms as f64 / 1000.0, args.seed);
    let device = CorrelatorDevice::spawn(
        Box::new(source),
        Box::new(SimulatedSink::default()),
        Arc::new(FitsCodec),
        info,
        device_config,
    )?;

    // Feed the array description through the same control surface the
    // protocol layer would use.
    for (line, config) in lines.iter().enumerate() {
        device.on_number_update(NumberUpdate::LineLocation {
            line,
            position: config.position,
        });
        device.on_switch_update(SwitchUpdate::LineEnable {
            line,
            on: config.enabled,
        });
        device.on_switch_update(SwitchUpdate::LinePower {
            line,
            on: config.enabled,
        });
    }

    let history = Arc::new(Mutex::new(Vec::new()));
    let reporter = report::spawn(
        device.shared(),
        ReporterConfig {
            period: Duration::from_millis(args.poll_ms),
            magnitude_zero_rate: args.zero_rate,
        },
        Box::new(LogSink {
            history: Arc::clone(&history),
        }),
    )?;

    if !device.start_integration(args.length) {
        return Err("failed to start integration".into());
    }
    info!(length = args.length, "integration started");

    let timeout = Duration::from_secs_f64(args.length + 5.0);
    let products = device
        .recv_products_timeout(timeout)
        .ok_or("no products before timeout")?;

    fs::create_dir_all(&args.output)?;
    let all = products
        .plots
        .iter()
        .chain(&products.autocorrelations)
        .chain(&products.crosscorrelations);
    for product in all {
        let path = args
            .output
            .join(format!("{}.fits", product.label.to_lowercase()));
        fs::write(&path, &product.data)?;
        info!(path = %path.display(), bytes = product.data.len(), "product written");
    }

    if args.plots {
        if let Some(image) = products.plots.first() {
            match arraycorr::fits::decode_fits(&image.data) {
                Ok(decoded) if decoded.dims.len() == 2 => {
                    let path = args.output.join("dirty_image.png");
                    if let Err(err) = plot::plot_heatmap(
                        &decoded.samples,
                        decoded.dims[0],
                        decoded.dims[1],
                        &path.to_string_lossy(),
                        "Dirty image",
                    ) {
                        warn!("quick-look image failed: {err}");
                    }
                }
                Ok(_) => warn!("unexpected plot dimensionality"),
                Err(err) => warn!("could not decode plot product: {err}"),
            }
        }
        let history = history.lock().unwrap_or_else(|e| e.into_inner());
        if !history.is_empty() {
            let path = args.output.join("counts_rate.png");
            if let Err(err) = plot::plot_series(
                &history,
                &path.to_string_lossy(),
                "reporting window",
                "counts/s",
                "line 1",
            ) {
                warn!("quick-look series failed: {err}");
            }
        }
    }

    device.shutdown()?;
    if reporter.join().is_err() {
        warn!("reporter thread terminated abnormally");
    }
    info!("done");
    Ok(())
}
