//! Receiver-array data model: per-line state and the (i, j) i<j baseline
//! enumeration every packet and buffer index follows.

use crate::geom::{vector_sub, Pointing};
use crate::packet::LineMode;

/// One receiving element of the array.
#[derive(Clone, Debug, Default)]
pub struct Line {
    /// Local east/north/up position, meters.
    pub position: [f64; 3],
    pub mode: LineMode,
    /// Last programmed geometric delay, meters. Telemetry only.
    pub delay_m: f64,
}

impl Line {
    pub fn enabled(&self) -> bool {
        self.mode.enabled
    }
}

/// Flat index of baseline (i, j), i < j, in pair-enumeration order:
/// (0,1), (0,2), .., (0,n-1), (1,2), ..
pub fn baseline_index(nlines: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < nlines);
    i * nlines - i * (i + 1) / 2 + (j - i - 1)
}

/// All (i, j) i<j pairs in flat-index order.
pub fn baseline_pairs(nlines: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..nlines).flat_map(move |i| (i + 1..nlines).map(move |j| (i, j)))
}

#[derive(Clone, Debug, Default)]
pub struct ArrayLayout {
    pub lines: Vec<Line>,
}

impl ArrayLayout {
    pub fn new(nlines: usize) -> Self {
        Self {
            lines: vec![Line::default(); nlines],
        }
    }

    pub fn nlines(&self) -> usize {
        self.lines.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.lines.iter().filter(|l| l.enabled()).count()
    }

    pub fn both_enabled(&self, i: usize, j: usize) -> bool {
        self.lines[i].enabled() && self.lines[j].enabled()
    }

    /// Baseline vector from line i to line j, meters.
    pub fn baseline_vector(&self, i: usize, j: usize) -> [f64; 3] {
        vector_sub(self.lines[j].position, self.lines[i].position)
    }

    /// Unweighted centroid of the enabled line positions. None with no
    /// enabled lines; the delay controller additionally requires two.
    pub fn phase_center(&self) -> Option<[f64; 3]> {
        let mut sum = [0.0f64; 3];
        let mut n = 0usize;
        for line in self.lines.iter().filter(|l| l.enabled()) {
            sum[0] += line.position[0];
            sum[1] += line.position[1];
            sum[2] += line.position[2];
            n += 1;
        }
        if n == 0 {
            return None;
        }
        Some([sum[0] / n as f64, sum[1] / n as f64, sum[2] / n as f64])
    }

    /// Position of a line relative to the phase center.
    pub fn offset_from(&self, line: usize, center: [f64; 3]) -> [f64; 3] {
        vector_sub(self.lines[line].position, center)
    }

    /// Projected delay of every enabled baseline for the given pointing,
    /// keyed by flat baseline index. Fewer than two enabled lines produce
    /// nothing.
    pub fn enabled_baseline_delays(&self, pointing: Pointing) -> Vec<(usize, f64)> {
        let n = self.nlines();
        baseline_pairs(n)
            .enumerate()
            .filter(|&(_, (i, j))| self.both_enabled(i, j))
            .map(|(idx, (i, j))| {
                (
                    idx,
                    crate::geom::baseline_delay_m(pointing, self.baseline_vector(i, j)),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_index_matches_enumeration_order() {
        let n = 5;
        for (flat, (i, j)) in baseline_pairs(n).enumerate() {
            assert_eq!(baseline_index(n, i, j), flat);
        }
        assert_eq!(baseline_pairs(n).count(), n * (n - 1) / 2);
    }

    #[test]
    fn phase_center_is_centroid_of_enabled_lines() {
        let mut layout = ArrayLayout::new(3);
        layout.lines[0].position = [0.0, 0.0, 0.0];
        layout.lines[1].position = [10.0, 0.0, 0.0];
        layout.lines[2].position = [0.0, 10.0, 0.0];
        layout.lines[0].mode.enabled = true;
        layout.lines[1].mode.enabled = true;

        let center = layout.phase_center().unwrap();
        assert!((center[0] - 5.0).abs() < 1e-12);
        assert!(center[1].abs() < 1e-12);

        layout.lines[2].mode.enabled = true;
        let center = layout.phase_center().unwrap();
        assert!((center[0] - 10.0 / 3.0).abs() < 1e-12);
        assert!((center[1] - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn no_enabled_lines_yield_no_phase_center_and_no_baselines() {
        let layout = ArrayLayout::new(4);
        assert!(layout.phase_center().is_none());
        assert!(layout
            .enabled_baseline_delays(Pointing::zenith())
            .is_empty());
    }

    #[test]
    fn single_enabled_line_yields_no_baselines() {
        let mut layout = ArrayLayout::new(3);
        layout.lines[1].mode.enabled = true;
        assert!(layout.phase_center().is_some());
        assert!(layout
            .enabled_baseline_delays(Pointing::zenith())
            .is_empty());
    }
}
