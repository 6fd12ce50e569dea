//! Acquisition core: the shared device context, the long-running worker that
//! consumes one correlator packet per iteration, and the finalization path
//! that turns accumulation buffers into packaged products.
//!
//! Concurrency layout: the worker thread is the single writer of all science
//! buffers. Control threads and the periodic reporter touch only the scalar
//! state in [`Shared`], each field behind its own brief mutex. At
//! finalization the worker takes ownership of the buffers and encodes them
//! with no lock held.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::accum::{ImageAccumulator, LagBuffer, Totals};
use crate::array::{baseline_pairs, ArrayLayout};
use crate::delay;
use crate::fits::{package, BitDepth, ImageCodec, Product};
use crate::geom::{uv_coordinates, Pointing};
use crate::integrate::{IntegrationSession, TickOutcome};
use crate::packet::{CorrelatorInfo, HardwareSink, LineMode, Packet, PacketSource, Poll};
use crate::utils::{pin_current_thread, unix_seconds_now, unix_seconds_to_mjd, DynError};

const DISCONNECTED_BACKOFF: Duration = Duration::from_millis(100);

/// Pointing target and filter settings, updated through the control surface.
#[derive(Clone, Copy, Debug)]
pub struct Target {
    pub ra_rad: f64,
    pub dec_rad: f64,
    pub wavelength_m: f64,
    pub bandwidth_m: f64,
}

impl Target {
    /// Filter passband as a (low, high) frequency pair in Hz, the coupling
    /// the settings surface exposes.
    pub fn frequency_range(&self) -> (f64, f64) {
        let center = crate::geom::LIGHTSPEED / self.wavelength_m;
        let width = crate::geom::LIGHTSPEED / self.bandwidth_m;
        (center - width / 2.0, center + width / 2.0)
    }
}

/// Static per-device configuration.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub latitude_deg: f64,
    /// East-positive, degrees.
    pub longitude_deg: f64,
    pub target: Target,
    pub plot_size: usize,
    /// Pin the acquisition thread to this CPU (Linux only).
    pub pin_cpu: Option<usize>,
}

/// State shared between the acquisition worker, the control surface and the
/// periodic reporter.
pub struct Shared {
    pub layout: Mutex<ArrayLayout>,
    pub totals: Mutex<Totals>,
    pub session: Mutex<IntegrationSession>,
    pub target: Mutex<Target>,
    /// Requested dirty-image size; the worker resizes its accumulator when
    /// this changes.
    pub plot_size: AtomicUsize,
    /// Integration time left, f64 bits, for the reporter.
    timeleft_bits: AtomicU64,
    stop: AtomicBool,
    discard: AtomicBool,
}

impl Shared {
    pub fn new(info: &CorrelatorInfo, config: &DeviceConfig) -> Self {
        Self {
            layout: Mutex::new(ArrayLayout::new(info.nlines)),
            totals: Mutex::new(Totals::new(info.nlines, info.nbaselines())),
            session: Mutex::new(IntegrationSession::default()),
            target: Mutex::new(config.target),
            plot_size: AtomicUsize::new(config.plot_size),
            timeleft_bits: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            discard: AtomicBool::new(false),
        }
    }

    pub fn time_left_s(&self) -> f64 {
        f64::from_bits(self.timeleft_bits.load(Ordering::Relaxed))
    }

    fn set_time_left(&self, seconds: f64) {
        self.timeleft_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// The blob set of one finished integration.
#[derive(Clone, Debug, Default)]
pub struct SessionProducts {
    pub plots: Vec<Product>,
    pub autocorrelations: Vec<Product>,
    pub crosscorrelations: Vec<Product>,
}

/// Typed control-layer updates. The control protocol stays outside this
/// crate; it translates its own property events into these.
#[derive(Clone, Copy, Debug)]
pub enum NumberUpdate {
    LineLocation { line: usize, position: [f64; 3] },
    Settings {
        wavelength_m: f64,
        bandwidth_m: f64,
        plot_size: usize,
    },
}

#[derive(Clone, Copy, Debug)]
pub enum SwitchUpdate {
    LineEnable { line: usize, on: bool },
    LinePower { line: usize, on: bool },
    LineActiveEdge { line: usize, active_low: bool },
    LineEdgeTrigger { line: usize, on_edge: bool },
    LineDifferential { line: usize, on: bool },
    Capture { on: bool },
}

/// Callback surface the control layer invokes. Returns false for rejected
/// or out-of-range updates, with no state mutated.
pub trait ControlEvents {
    fn on_number_update(&self, update: NumberUpdate) -> bool;
    fn on_switch_update(&self, update: SwitchUpdate) -> bool;
}

struct Worker {
    shared: Arc<Shared>,
    sink: Arc<Mutex<Box<dyn HardwareSink>>>,
    codec: Arc<dyn ImageCodec>,
    config: DeviceConfig,
    info: CorrelatorInfo,
    autocorrelations: Vec<LagBuffer>,
    crosscorrelations: Vec<LagBuffer>,
    image: ImageAccumulator,
    products_tx: Sender<SessionProducts>,
}

impl Worker {
    fn new(
        shared: Arc<Shared>,
        sink: Arc<Mutex<Box<dyn HardwareSink>>>,
        codec: Arc<dyn ImageCodec>,
        config: DeviceConfig,
        info: CorrelatorInfo,
        products_tx: Sender<SessionProducts>,
    ) -> Self {
        let plot_size = config.plot_size;
        Self {
            shared,
            sink,
            codec,
            config,
            autocorrelations: (0..info.nlines)
                .map(|_| LagBuffer::new(info.auto_lag_size))
                .collect(),
            crosscorrelations: (0..info.nbaselines())
                .map(|_| LagBuffer::new(info.cross_lag_size))
                .collect(),
            image: ImageAccumulator::new(plot_size),
            info,
            products_tx,
        }
    }

    fn run(mut self, mut source: Box<dyn PacketSource>) {
        if let Some(cpu) = self.config.pin_cpu {
            if !pin_current_thread(cpu) {
                warn!("failed to pin acquisition thread to cpu {cpu}");
            }
        }
        while !self.shared.stop_requested() {
            if !source.is_connected() {
                thread::sleep(DISCONNECTED_BACKOFF);
                continue;
            }
            match source.next_packet() {
                Poll::RetryLater => {
                    thread::sleep(Duration::from_secs_f64(source.packet_period()));
                }
                Poll::Packet(packet) => self.process_packet(&packet, unix_seconds_now()),
            }
        }
    }

    /// Whether the packet matches the advertised hardware shape. Every index
    /// below assumes it does.
    fn packet_shape_ok(&self, packet: &Packet) -> bool {
        packet.counts.len() == self.info.nlines
            && packet.autocorrelations.len() == self.info.nlines
            && packet.crosscorrelations.len() == self.info.nbaselines()
            && packet
                .autocorrelations
                .iter()
                .all(|lags| lags.len() == self.info.auto_lag_size)
            && packet
                .crosscorrelations
                .iter()
                .all(|lags| lags.len() == self.info.cross_lag_size)
    }

    /// One tick of the pipeline. Split from `run` so tests can drive it with
    /// injected timestamps.
    fn process_packet(&mut self, packet: &Packet, now_s: f64) {
        if !self.packet_shape_ok(packet) {
            warn!(
                counts = packet.counts.len(),
                crosscorrelations = packet.crosscorrelations.len(),
                "dropping packet with unexpected shape"
            );
            return;
        }
        self.apply_plot_resize();
        if self.shared.discard.swap(false, Ordering::Relaxed) {
            // Aborted session: drop accumulated rows without packaging, and
            // stop advertising the stale remaining time.
            self.reset_buffers();
            self.shared.set_time_left(0.0);
        }

        let outcome = {
            let mut session = self.shared.session.lock().unwrap_or_else(|e| e.into_inner());
            session.tick(now_s)
        };
        match outcome {
            TickOutcome::Idle => {}
            TickOutcome::MidIntegration { remaining_s } => {
                self.shared.set_time_left(remaining_s);
                self.mid_integration_tick(packet, now_s);
            }
            TickOutcome::Finalize => {
                self.shared.set_time_left(0.0);
                self.finalize();
            }
        }

        // Running totals for the reporter, integration state notwithstanding.
        // Only the reporter's drain ever resets these.
        let layout = self.shared.layout.lock().unwrap_or_else(|e| e.into_inner());
        let mut totals = self.shared.totals.lock().unwrap_or_else(|e| e.into_inner());
        for (line, &counts) in packet.counts.iter().enumerate() {
            if layout.lines[line].enabled() {
                totals.add_line_counts(line, counts);
            }
        }
        for (idx, (i, j)) in baseline_pairs(self.info.nlines).enumerate() {
            if layout.both_enabled(i, j) {
                totals.add_correlation(idx, packet.cross_mid_lag(idx));
            }
        }
    }

    fn apply_plot_resize(&mut self) {
        let requested = self.shared.plot_size.load(Ordering::Relaxed);
        if requested != self.image.size() && requested > 0 {
            self.image.resize(requested);
        }
    }

    fn pointing_at(&self, now_s: f64) -> Pointing {
        let target = *self.shared.target.lock().unwrap_or_else(|e| e.into_inner());
        Pointing::from_equatorial(
            target.ra_rad,
            target.dec_rad,
            self.config.latitude_deg.to_radians(),
            self.config.longitude_deg,
            unix_seconds_to_mjd(now_s),
        )
    }

    fn mid_integration_tick(&mut self, packet: &Packet, now_s: f64) {
        let pointing = self.pointing_at(now_s);
        {
            let mut layout = self.shared.layout.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(plan) = delay::compute_plan(&layout, pointing, &self.info) {
                let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(err) = delay::apply_plan(&plan, &mut layout, sink.as_mut()) {
                    warn!("delay-line programming failed: {err}");
                }
            }
            for (idx, (i, j)) in baseline_pairs(self.info.nlines).enumerate() {
                if layout.both_enabled(i, j) {
                    let uv = uv_coordinates(pointing, layout.baseline_vector(i, j));
                    self.image.add_sample(uv, packet.cross_mid_lag(idx));
                }
            }
        }

        if self.info.auto_lag_size > 1 {
            for (line, buffer) in self.autocorrelations.iter_mut().enumerate() {
                buffer.push_row(&packet.autocorrelations[line]);
            }
        }
        if self.info.cross_lag_size > 1 {
            for (idx, buffer) in self.crosscorrelations.iter_mut().enumerate() {
                buffer.push_row(&packet.crosscorrelations[idx]);
            }
        }
    }

    fn reset_buffers(&mut self) {
        for buffer in &mut self.autocorrelations {
            buffer.reset();
        }
        for buffer in &mut self.crosscorrelations {
            buffer.reset();
        }
        self.image.reset();
    }

    /// Package every buffer, then reset to base shape. Ownership of the
    /// buffer contents moves out of the accumulation state first, so the
    /// encode runs on a snapshot with no shared state held.
    fn finalize(&mut self) {
        info!("integration complete, packaging products");

        let image_size = self.image.size();
        let image = std::mem::replace(&mut self.image, ImageAccumulator::new(image_size));
        let autos: Vec<LagBuffer> = self
            .autocorrelations
            .iter_mut()
            .map(|buffer| {
                let width = buffer.width();
                std::mem::replace(buffer, LagBuffer::new(width))
            })
            .collect();
        let crosses: Vec<LagBuffer> = self
            .crosscorrelations
            .iter_mut()
            .map(|buffer| {
                let width = buffer.width();
                std::mem::replace(buffer, LagBuffer::new(width))
            })
            .collect();

        let codec = Arc::clone(&self.codec);
        let plots = vec![package(
            codec.as_ref(),
            "PLOT01",
            image.samples(),
            &image.dims(),
            BitDepth::F64,
        )]
        .into_iter()
        .flatten()
        .collect();

        let autocorrelations = if self.info.auto_lag_size > 1 {
            autos
                .par_iter()
                .enumerate()
                .filter_map(|(line, buffer)| {
                    package(
                        codec.as_ref(),
                        &format!("AUTOCORRELATIONS_{:02}", line + 1),
                        buffer.samples(),
                        &buffer.dims(),
                        BitDepth::F64,
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        let crosscorrelations = if self.info.cross_lag_size > 1 {
            let labels: Vec<String> = baseline_pairs(self.info.nlines)
                .map(|(i, j)| format!("CROSSCORRELATIONS_{:02}_{:02}", i + 1, j + 1))
                .collect();
            crosses
                .par_iter()
                .zip(labels.par_iter())
                .filter_map(|(buffer, label)| {
                    package(
                        codec.as_ref(),
                        label,
                        buffer.samples(),
                        &buffer.dims(),
                        BitDepth::F64,
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        let products = SessionProducts {
            plots,
            autocorrelations,
            crosscorrelations,
        };
        info!(
            plots = products.plots.len(),
            autocorrelations = products.autocorrelations.len(),
            crosscorrelations = products.crosscorrelations.len(),
            "products packaged"
        );
        if self.products_tx.send(products).is_err() {
            warn!("no consumer for session products, discarding");
        }
    }
}

/// The device context: owns the worker thread and exposes the integration
/// control surface and the product stream. Constructed by the control layer
/// and passed around by reference; there is no process-wide singleton.
pub struct CorrelatorDevice {
    shared: Arc<Shared>,
    sink: Arc<Mutex<Box<dyn HardwareSink>>>,
    info: CorrelatorInfo,
    products_rx: Receiver<SessionProducts>,
    worker: Option<JoinHandle<()>>,
}

impl CorrelatorDevice {
    /// Wire up the device and start the acquisition thread. Capture is
    /// enabled on the way in, mirroring the hardware handshake.
    pub fn spawn(
        source: Box<dyn PacketSource>,
        mut sink: Box<dyn HardwareSink>,
        codec: Arc<dyn ImageCodec>,
        info: CorrelatorInfo,
        config: DeviceConfig,
    ) -> Result<Self, DynError> {
        sink.set_capture_enabled(true)?;
        let shared = Arc::new(Shared::new(&info, &config));
        let sink = Arc::new(Mutex::new(sink));
        let (products_tx, products_rx) = mpsc::channel();
        let worker = Worker::new(
            Arc::clone(&shared),
            Arc::clone(&sink),
            codec,
            config,
            info,
            products_tx,
        );
        let handle = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || worker.run(source))?;
        Ok(Self {
            shared,
            sink,
            info,
            products_rx,
            worker: Some(handle),
        })
    }

    pub fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    pub fn info(&self) -> CorrelatorInfo {
        self.info
    }

    /// Begin an integration. False when one is already running or the
    /// duration is not positive.
    pub fn start_integration(&self, duration_s: f64) -> bool {
        let mut session = self.shared.session.lock().unwrap_or_else(|e| e.into_inner());
        session.start(duration_s, unix_seconds_now())
    }

    /// Abort the running integration; accumulated data is discarded on the
    /// next worker tick and no products are emitted. False when idle.
    pub fn abort_integration(&self) -> bool {
        let mut session = self.shared.session.lock().unwrap_or_else(|e| e.into_inner());
        if session.abort() {
            self.shared.discard.store(true, Ordering::Relaxed);
            self.shared.set_time_left(0.0);
            true
        } else {
            false
        }
    }

    /// Products of finished sessions, non-blocking.
    pub fn try_recv_products(&self) -> Option<SessionProducts> {
        match self.products_rx.try_recv() {
            Ok(products) => Some(products),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until the next session's products arrive or the worker is gone.
    pub fn recv_products_timeout(&self, timeout: Duration) -> Option<SessionProducts> {
        self.products_rx.recv_timeout(timeout).ok()
    }

    /// Cooperative teardown: stop the worker, join it, then set the hardware
    /// dark (capture off, every line disabled).
    pub fn shutdown(mut self) -> Result<(), DynError> {
        self.shared.request_stop();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("acquisition thread terminated abnormally");
            }
        }
        let nlines = self.info.nlines;
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        sink.set_capture_enabled(false)?;
        for line in 0..nlines {
            sink.set_line_mode(line, LineMode::dark())?;
        }
        Ok(())
    }
}

impl ControlEvents for CorrelatorDevice {
    fn on_number_update(&self, update: NumberUpdate) -> bool {
        match update {
            NumberUpdate::LineLocation { line, position } => {
                let mut layout = self.shared.layout.lock().unwrap_or_else(|e| e.into_inner());
                if line >= layout.nlines() {
                    return false;
                }
                layout.lines[line].position = position;
                true
            }
            NumberUpdate::Settings {
                wavelength_m,
                bandwidth_m,
                plot_size,
            } => {
                if wavelength_m <= 0.0 || bandwidth_m <= 0.0 || plot_size == 0 {
                    return false;
                }
                {
                    let mut target = self.shared.target.lock().unwrap_or_else(|e| e.into_inner());
                    target.wavelength_m = wavelength_m;
                    target.bandwidth_m = bandwidth_m;
                }
                self.shared.plot_size.store(plot_size, Ordering::Relaxed);
                true
            }
        }
    }

    fn on_switch_update(&self, update: SwitchUpdate) -> bool {
        if let SwitchUpdate::Capture { on } = update {
            let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            return sink.set_capture_enabled(on).is_ok();
        }
        let (line, mutate): (usize, fn(&mut LineMode, bool)) = match update {
            SwitchUpdate::LineEnable { line, .. } => (line, |m, v| m.enabled = v),
            SwitchUpdate::LinePower { line, .. } => (line, |m, v| m.powered = v),
            SwitchUpdate::LineActiveEdge { line, .. } => (line, |m, v| m.active_low = v),
            SwitchUpdate::LineEdgeTrigger { line, .. } => (line, |m, v| m.edge_triggered = v),
            SwitchUpdate::LineDifferential { line, .. } => (line, |m, v| m.differential = v),
            SwitchUpdate::Capture { .. } => unreachable!(),
        };
        let value = match update {
            SwitchUpdate::LineEnable { on, .. }
            | SwitchUpdate::LinePower { on, .. }
            | SwitchUpdate::LineDifferential { on, .. } => on,
            SwitchUpdate::LineActiveEdge { active_low, .. } => active_low,
            SwitchUpdate::LineEdgeTrigger { on_edge, .. } => on_edge,
            SwitchUpdate::Capture { .. } => unreachable!(),
        };
        let mode = {
            let mut layout = self.shared.layout.lock().unwrap_or_else(|e| e.into_inner());
            if line >= layout.nlines() {
                return false;
            }
            mutate(&mut layout.lines[line].mode, value);
            layout.lines[line].mode
        };
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        sink.set_line_mode(line, mode).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::FitsCodec;
    use crate::packet::LagBin;

    struct NullSink;
    impl HardwareSink for NullSink {
        fn set_delay(&mut self, _: usize, _: u32) -> Result<(), DynError> {
            Ok(())
        }
        fn set_line_mode(&mut self, _: usize, _: LineMode) -> Result<(), DynError> {
            Ok(())
        }
        fn set_capture_enabled(&mut self, _: bool) -> Result<(), DynError> {
            Ok(())
        }
    }

    /// Codec that refuses every buffer whose label the packager asked for
    /// cross-correlations; used through a sample-count marker instead of the
    /// label so it stays a pure `ImageCodec`.
    struct FailCrossCodec {
        cross_width: usize,
    }
    impl ImageCodec for FailCrossCodec {
        fn encode(
            &self,
            samples: &[f64],
            dims: &[usize],
            depth: BitDepth,
        ) -> Result<Vec<u8>, DynError> {
            if dims.first() == Some(&self.cross_width) {
                return Err("forced cross-correlation encode failure".into());
            }
            FitsCodec.encode(samples, dims, depth)
        }
    }

    fn test_info() -> CorrelatorInfo {
        CorrelatorInfo {
            nlines: 3,
            auto_lag_size: 4,
            cross_lag_size: 7,
            sample_clock_hz: 1.0e6,
            max_delay_steps: 1024,
        }
    }

    fn test_config() -> DeviceConfig {
        DeviceConfig {
            latitude_deg: 44.5,
            longitude_deg: 11.3,
            target: Target {
                ra_rad: 1.0,
                dec_rad: 0.4,
                wavelength_m: 0.211,
                bandwidth_m: 1199.0,
            },
            plot_size: 16,
            pin_cpu: None,
        }
    }

    fn test_packet(info: &CorrelatorInfo) -> Packet {
        let bin = LagBin {
            magnitude: 2.0,
            count: 4.0,
        };
        Packet {
            counts: vec![100, 200, 300],
            autocorrelations: vec![vec![bin; info.auto_lag_size]; info.nlines],
            crosscorrelations: vec![vec![bin; info.cross_lag_size]; info.nbaselines()],
        }
    }

    fn worker_with_codec(codec: Arc<dyn ImageCodec>) -> (Worker, Receiver<SessionProducts>) {
        let info = test_info();
        let config = test_config();
        let shared = Arc::new(Shared::new(&info, &config));
        {
            let mut layout = shared.layout.lock().unwrap();
            layout.lines[0].position = [0.0, 0.0, 0.0];
            layout.lines[1].position = [10.0, 0.0, 0.0];
            layout.lines[2].position = [0.0, 10.0, 0.0];
            for line in &mut layout.lines {
                line.mode.enabled = true;
            }
        }
        let sink: Arc<Mutex<Box<dyn HardwareSink>>> = Arc::new(Mutex::new(Box::new(NullSink)));
        let (tx, rx) = mpsc::channel();
        (
            Worker::new(shared, sink, codec, config, info, tx),
            rx,
        )
    }

    fn worker() -> (Worker, Receiver<SessionProducts>) {
        worker_with_codec(Arc::new(FitsCodec))
    }

    #[test]
    fn buffers_grow_only_during_mid_integration_ticks() {
        let (mut worker, _rx) = worker();
        let packet = test_packet(&worker.info);

        // Idle ticks: no growth.
        worker.process_packet(&packet, 10.0);
        worker.process_packet(&packet, 10.5);
        assert_eq!(worker.autocorrelations[0].rows(), 0);

        worker
            .shared
            .session
            .lock()
            .unwrap()
            .start(2.0, 11.0);
        for k in 0..5 {
            worker.process_packet(&packet, 11.0 + 0.5 * k as f64);
        }
        // Four mid ticks grew the buffers, the fifth finalized and reset.
        assert_eq!(worker.autocorrelations[0].rows(), 0);
        assert_eq!(worker.crosscorrelations[0].rows(), 0);
        assert!(worker.image.samples().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn finalize_emits_full_product_set() {
        let (mut worker, rx) = worker();
        let packet = test_packet(&worker.info);
        worker.shared.session.lock().unwrap().start(1.0, 0.0);
        worker.process_packet(&packet, 0.0);
        assert_eq!(worker.autocorrelations[0].rows(), 1);
        worker.process_packet(&packet, 1.0);

        let products = rx.try_recv().expect("products after finalize");
        assert_eq!(products.plots.len(), 1);
        assert_eq!(products.autocorrelations.len(), 3);
        assert_eq!(products.crosscorrelations.len(), 3);

        let image = crate::fits::decode_fits(&products.autocorrelations[0].data).unwrap();
        assert_eq!(image.dims, vec![4, 1]);
    }

    #[test]
    fn cross_codec_failure_still_emits_remaining_products() {
        let info = test_info();
        let (mut worker, rx) = worker_with_codec(Arc::new(FailCrossCodec {
            cross_width: info.cross_lag_size,
        }));
        let packet = test_packet(&worker.info);
        worker.shared.session.lock().unwrap().start(0.5, 0.0);
        worker.process_packet(&packet, 0.0);
        worker.process_packet(&packet, 0.5);

        let products = rx.try_recv().expect("partial products after finalize");
        assert_eq!(products.plots.len(), 1);
        assert_eq!(products.autocorrelations.len(), 3);
        assert!(products.crosscorrelations.is_empty());
        // The session still completed: buffers are back to base shape.
        assert_eq!(worker.crosscorrelations[0].rows(), 0);
    }

    #[test]
    fn totals_accumulate_regardless_of_integration_state() {
        let (mut worker, _rx) = worker();
        let packet = test_packet(&worker.info);
        worker.process_packet(&packet, 0.0);
        worker.shared.session.lock().unwrap().start(0.5, 1.0);
        worker.process_packet(&packet, 1.0);
        worker.process_packet(&packet, 1.5);

        let totals = worker.shared.totals.lock().unwrap();
        // Three packets, enabled everywhere: counts triple, finalize did not
        // touch them.
        assert_eq!(totals.counts[0], 300.0);
        assert_eq!(totals.correlations[0].magnitude, 6.0);
    }

    #[test]
    fn disabled_lines_are_excluded_from_totals() {
        let (mut worker, _rx) = worker();
        worker.shared.layout.lock().unwrap().lines[2].mode.enabled = false;
        let packet = test_packet(&worker.info);
        worker.process_packet(&packet, 0.0);

        let totals = worker.shared.totals.lock().unwrap();
        assert_eq!(totals.counts[2], 0.0);
        // Baselines touching line 2 stay untouched: (0,2) is flat index 1.
        assert_eq!(totals.correlations[1].magnitude, 0.0);
        assert_eq!(totals.correlations[0].magnitude, 2.0);
    }

    #[test]
    fn abort_discards_rows_without_products() {
        let (mut worker, rx) = worker();
        let packet = test_packet(&worker.info);
        worker.shared.session.lock().unwrap().start(10.0, 0.0);
        worker.process_packet(&packet, 0.0);
        worker.process_packet(&packet, 0.5);
        assert_eq!(worker.autocorrelations[0].rows(), 2);

        assert!(worker.shared.session.lock().unwrap().abort());
        worker.shared.discard.store(true, Ordering::Relaxed);
        worker.process_packet(&packet, 1.0);
        assert_eq!(worker.autocorrelations[0].rows(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn abort_clears_time_left_telemetry() {
        let (mut worker, _rx) = worker();
        let packet = test_packet(&worker.info);
        worker.shared.session.lock().unwrap().start(10.0, 0.0);
        worker.process_packet(&packet, 1.0);
        assert!(worker.shared.time_left_s() > 0.0);

        assert!(worker.shared.session.lock().unwrap().abort());
        worker.shared.discard.store(true, Ordering::Relaxed);
        worker.process_packet(&packet, 1.5);
        assert_eq!(worker.shared.time_left_s(), 0.0);
    }

    #[test]
    fn short_packet_is_dropped_without_effect() {
        let (mut worker, _rx) = worker();
        let mut packet = test_packet(&worker.info);
        packet.counts.pop();
        packet.crosscorrelations.pop();

        worker.shared.session.lock().unwrap().start(1.0, 0.0);
        worker.process_packet(&packet, 0.0);
        assert_eq!(worker.autocorrelations[0].rows(), 0);
        let totals = worker.shared.totals.lock().unwrap();
        assert!(totals.counts.iter().all(|c| *c == 0.0));
    }

    #[test]
    fn plot_resize_takes_effect_on_next_tick() {
        let (mut worker, _rx) = worker();
        let packet = test_packet(&worker.info);
        worker.shared.plot_size.store(32, Ordering::Relaxed);
        worker.process_packet(&packet, 0.0);
        assert_eq!(worker.image.size(), 32);
    }

    #[test]
    fn frequency_range_derives_from_wavelength_settings() {
        let target = Target {
            ra_rad: 0.0,
            dec_rad: 0.0,
            wavelength_m: 0.21,
            bandwidth_m: 1000.0,
        };
        let (lo, hi) = target.frequency_range();
        let center = crate::geom::LIGHTSPEED / 0.21;
        assert!(lo < center && center < hi);
        assert!((hi - lo - crate::geom::LIGHTSPEED / 1000.0).abs() < 1e-6);
    }
}
