use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Correlator-array acquisition and delay tracking",
    long_about = None,
    after_help = "Examples:\n  arraycorr --config array.xml --ra 18h06m14.659 --dec -20d31m31.57s --length 5\n  arraycorr --lines 4 --lat 44.5 --lon 11.33 --ra 271.561 --dec -20.5254 --length 2 --plots\n"
)]
pub struct Args {
    /// Array description XML (site, settings, per-line positions)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of lines when no --config is given (all placed on a default
    /// east-west grid, all enabled)
    #[arg(long, default_value_t = 4)]
    pub lines: usize,

    /// Site latitude in degrees (overrides --config)
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Site longitude in degrees, east positive (overrides --config)
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Target RA (supports hhmmss/hms or degrees)
    #[arg(long)]
    pub ra: String,

    /// Target Dec (supports ddmmss/dms or degrees)
    #[arg(long, allow_hyphen_values = true)]
    pub dec: String,

    /// Integration length in seconds
    #[arg(long, visible_alias = "sec", default_value_t = 2.0)]
    pub length: f64,

    /// Reporter polling period in milliseconds
    #[arg(long = "poll-ms", default_value_t = 500)]
    pub poll_ms: u64,

    /// Simulated hardware packet cadence in milliseconds
    #[arg(long = "packet-ms", default_value_t = 50)]
    pub packet_ms: u64,

    /// Dirty-image size in pixels (overrides --config)
    #[arg(long = "plot-size")]
    pub plot_size: Option<usize>,

    /// Output directory for FITS products
    #[arg(long, default_value = ".")]
    pub output: PathBuf,

    /// Also write quick-look PNGs next to the FITS products
    #[arg(long, default_value_t = false)]
    pub plots: bool,

    /// Pin the acquisition thread to this CPU
    #[arg(long)]
    pub cpu: Option<usize>,

    /// Pulse rate corresponding to magnitude 0, counts per second
    #[arg(long = "zero-rate", default_value_t = 1.0e6)]
    pub zero_rate: f64,

    /// Simulated sample clock in MHz
    #[arg(long = "clock-mhz", default_value_t = 10.0)]
    pub clock_mhz: f64,

    /// Simulated delay-line length in steps
    #[arg(long = "delay-steps", default_value_t = 1024)]
    pub delay_steps: u32,

    /// Autocorrelator lag bins per packet
    #[arg(long = "auto-lags", default_value_t = 32)]
    pub auto_lags: usize,

    /// Cross-correlator lag bins per packet
    #[arg(long = "cross-lags", default_value_t = 63)]
    pub cross_lags: usize,

    /// Simulator noise seed
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}
