//! Science accumulation state: growable lag-spectrum buffers, the 2-D
//! visibility ("dirty image") accumulator, and the running totals the
//! periodic reporter drains.
//!
//! Lag buffers grow by exactly one row per mid-integration tick and reset to
//! their base shape (zero rows) at finalization; nothing else mutates their
//! shape. The totals are independent of integration state: the acquisition
//! loop only ever adds to them, and `drain` is the single reset path, owned
//! by the reporter.

use crate::geom::UvCoordinate;
use crate::packet::LagBin;

/// Row-growable numeric buffer. Each row is one poll tick's lag series;
/// rows accumulate into a waterfall over the integration.
#[derive(Clone, Debug)]
pub struct LagBuffer {
    width: usize,
    data: Vec<f64>,
}

impl LagBuffer {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            data: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    pub fn push_row(&mut self, lags: &[LagBin]) {
        debug_assert_eq!(lags.len(), self.width);
        self.data.extend(lags.iter().map(|bin| bin.magnitude));
    }

    /// Back to the base shape: zero rows.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn samples(&self) -> &[f64] {
        &self.data
    }

    /// Shape as trailing-dimension-last (width, rows), the axis order the
    /// image packager encodes.
    pub fn dims(&self) -> [usize; 2] {
        [self.width, self.rows()]
    }
}

/// Square 2-D visibility accumulator. Samples land at the cell addressed by
/// the baseline's (u, v) coordinate and at the point-mirrored cell, building
/// the Hermitian-symmetric dirty image the original driver plots.
#[derive(Clone, Debug)]
pub struct ImageAccumulator {
    size: usize,
    data: Vec<f64>,
}

impl ImageAccumulator {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            data: vec![0.0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Change the plot size, discarding accumulated content.
    pub fn resize(&mut self, size: usize) {
        self.size = size;
        self.data = vec![0.0; size * size];
    }

    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn samples(&self) -> &[f64] {
        &self.data
    }

    pub fn dims(&self) -> [usize; 2] {
        [self.size, self.size]
    }

    /// Add one baseline sample at its (u, v) cell and the mirrored cell.
    /// Out-of-range coordinates and zero-count bins are skipped.
    pub fn add_sample(&mut self, uv: UvCoordinate, bin: LagBin) {
        if bin.count <= 0.0 {
            return;
        }
        let w = self.size as i64;
        let h = self.size as i64;
        let xx = (w as f64 * uv.u / 2.0) as i64;
        let yy = (h as f64 * uv.v / 2.0) as i64;
        if xx < -w / 2 || xx >= w / 2 || yy < -h / 2 || yy >= h / 2 {
            return;
        }
        let z = w * h / 2 + w / 2 + xx + yy * w;
        if z < 0 || z >= w * h {
            return;
        }
        let value = bin.magnitude / bin.count;
        self.data[z as usize] += value;
        self.data[(w * h - 1 - z) as usize] += value;
    }
}

/// Per-baseline running sums for the reporter: mid-lag magnitude and sample
/// count accumulated since the last drain.
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationSum {
    pub magnitude: f64,
    pub count: f64,
}

/// Scalar totals shared between the acquisition loop (writer) and the
/// periodic reporter (reader + reset). Guarded by one mutex in the device
/// context; accesses are brief on both sides.
#[derive(Clone, Debug, Default)]
pub struct Totals {
    pub counts: Vec<f64>,
    pub correlations: Vec<CorrelationSum>,
}

impl Totals {
    pub fn new(nlines: usize, nbaselines: usize) -> Self {
        Self {
            counts: vec![0.0; nlines],
            correlations: vec![CorrelationSum::default(); nbaselines],
        }
    }

    pub fn add_line_counts(&mut self, line: usize, counts: u64) {
        self.counts[line] += counts as f64;
    }

    pub fn add_correlation(&mut self, baseline: usize, bin: LagBin) {
        self.correlations[baseline].magnitude += bin.magnitude;
        self.correlations[baseline].count += bin.count;
    }

    /// Take the accumulated totals and zero them. The reporter is the only
    /// caller; finalization never resets these.
    pub fn drain(&mut self) -> Totals {
        let drained = self.clone();
        self.counts.iter_mut().for_each(|c| *c = 0.0);
        self.correlations
            .iter_mut()
            .for_each(|c| *c = CorrelationSum::default());
        drained
    }
}
