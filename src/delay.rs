//! Delay controller: once per mid-integration tick, pick the reference
//! element and program every other enabled element's delay line so the
//! correlation lags track the pointing.

use crate::array::ArrayLayout;
use crate::geom::{self, Pointing, LIGHTSPEED};
use crate::packet::{CorrelatorInfo, HardwareSink};
use crate::utils::DynError;

/// One tick's worth of delay-line programming.
#[derive(Clone, Debug, PartialEq)]
pub struct DelayPlan {
    /// The element whose correction is fixed at zero.
    pub reference: usize,
    /// (line, delay-line steps, geometric delay in meters) for every element
    /// that gets reprogrammed this tick, the reference included. Elements
    /// not listed keep their previous setting.
    pub settings: Vec<(usize, u32, f64)>,
}

/// Convert a geometric delay in meters to hardware delay-line steps,
/// clamped into the programmable range.
pub fn delay_steps(delay_m: f64, info: &CorrelatorInfo) -> u32 {
    let steps = (delay_m / LIGHTSPEED * info.sample_clock_hz) as i64;
    steps.clamp(0, info.max_delay_steps.saturating_sub(1) as i64) as u32
}

/// Compute the tick's delay plan. None when fewer than two elements are
/// enabled: no reference can be chosen and no baseline work happens.
pub fn compute_plan(
    layout: &ArrayLayout,
    pointing: Pointing,
    info: &CorrelatorInfo,
) -> Option<DelayPlan> {
    if layout.enabled_count() < 2 {
        return None;
    }
    let center = layout.phase_center()?;

    // Reference: the enabled element with the largest normalized projection
    // of its phase-center offset onto the pointing direction. Strict
    // comparison keeps the lowest index on ties. Projections below the
    // epsilon are trigonometric noise (cos of a right angle is ~6e-17, not
    // zero) and count as an exact tie.
    const PROJECTION_EPSILON: f64 = 1e-9;
    let mut reference = layout.lines.iter().position(|l| l.enabled())?;
    let mut projection_max = 0.0;
    for (x, line) in layout.lines.iter().enumerate() {
        if !line.enabled() {
            continue;
        }
        let offset = layout.offset_from(x, center);
        let norm = geom::vector_norm(offset);
        if norm <= 0.0 {
            continue;
        }
        let projection = geom::baseline_projection_m(pointing, offset) / norm;
        if projection > PROJECTION_EPSILON && projection > projection_max {
            reference = x;
            projection_max = projection;
        }
    }

    let mut settings = vec![(reference, 0u32, 0.0)];
    for (i, j) in crate::array::baseline_pairs(layout.nlines()) {
        if !layout.both_enabled(i, j) {
            continue;
        }
        let other = if i == reference {
            j
        } else if j == reference {
            i
        } else {
            continue;
        };
        let delay_m = geom::baseline_delay_m(pointing, layout.baseline_vector(i, j));
        settings.push((other, delay_steps(delay_m, info), delay_m));
    }

    Some(DelayPlan {
        reference,
        settings,
    })
}

/// Push a plan to the hardware and record the per-line delays for telemetry.
pub fn apply_plan(
    plan: &DelayPlan,
    layout: &mut ArrayLayout,
    sink: &mut dyn HardwareSink,
) -> Result<(), DynError> {
    for &(line, steps, delay_m) in &plan.settings {
        sink.set_delay(line, steps)?;
        layout.lines[line].delay_m = delay_m;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::LineMode;

    fn info() -> CorrelatorInfo {
        CorrelatorInfo {
            nlines: 3,
            auto_lag_size: 8,
            cross_lag_size: 15,
            sample_clock_hz: 1.0e6,
            max_delay_steps: 1024,
        }
    }

    fn layout_of(positions: &[[f64; 3]], enabled: &[bool]) -> ArrayLayout {
        let mut layout = ArrayLayout::new(positions.len());
        for (line, (&position, &on)) in positions.iter().zip(enabled).enumerate() {
            layout.lines[line].position = position;
            layout.lines[line].mode.enabled = on;
        }
        layout
    }

    #[test]
    fn fewer_than_two_enabled_elements_skip_the_controller() {
        let layout = layout_of(&[[0.0; 3], [10.0, 0.0, 0.0]], &[true, false]);
        assert!(compute_plan(&layout, Pointing::zenith(), &info()).is_none());
        let layout = layout_of(&[[0.0; 3], [10.0, 0.0, 0.0]], &[false, false]);
        assert!(compute_plan(&layout, Pointing::zenith(), &info()).is_none());
    }

    #[test]
    fn reference_element_is_always_programmed_to_zero_steps() {
        let layout = layout_of(
            &[[0.0; 3], [100.0, 0.0, 0.0], [0.0, 250.0, 0.0]],
            &[true, true, true],
        );
        let pointing = Pointing {
            altitude: 0.4,
            azimuth: 1.2,
        };
        let plan = compute_plan(&layout, pointing, &info()).unwrap();
        let (line, steps, delay_m) = plan.settings[0];
        assert_eq!(line, plan.reference);
        assert_eq!(steps, 0);
        assert_eq!(delay_m, 0.0);
    }

    #[test]
    fn zenith_over_horizontal_array_is_a_tie_broken_by_lowest_index() {
        // All projected delays are zero at zenith for a horizontal array, so
        // any element is a valid reference; the tie resolves to the lowest
        // enabled index.
        let layout = layout_of(
            &[[0.0; 3], [10.0, 0.0, 0.0], [0.0, 10.0, 0.0]],
            &[true, true, true],
        );
        let plan = compute_plan(&layout, Pointing::zenith(), &info()).unwrap();
        assert_eq!(plan.reference, 0);
        for &(_, steps, delay_m) in &plan.settings {
            assert_eq!(steps, 0);
            assert!(delay_m.abs() < 1e-9);
        }
    }

    #[test]
    fn disabled_lowest_index_is_never_the_reference() {
        let layout = layout_of(
            &[[0.0; 3], [10.0, 0.0, 0.0], [0.0, 10.0, 0.0]],
            &[false, true, true],
        );
        let plan = compute_plan(&layout, Pointing::zenith(), &info()).unwrap();
        assert_eq!(plan.reference, 1);
    }

    #[test]
    fn steps_scale_with_sample_clock_and_clamp_to_range() {
        let inf = info();
        // 300 m of path at 1 MHz sample clock is about one step.
        assert_eq!(delay_steps(300.0, &inf), 1);
        assert_eq!(delay_steps(0.0, &inf), 0);
        // Absurd baseline clamps to the top of the register.
        assert_eq!(delay_steps(1.0e12, &inf), inf.max_delay_steps - 1);
    }

    #[test]
    fn plan_applies_registers_and_telemetry_delays() {
        struct Recorder(Vec<(usize, u32)>);
        impl HardwareSink for Recorder {
            fn set_delay(&mut self, line: usize, steps: u32) -> Result<(), DynError> {
                self.0.push((line, steps));
                Ok(())
            }
            fn set_line_mode(&mut self, _: usize, _: LineMode) -> Result<(), DynError> {
                Ok(())
            }
            fn set_capture_enabled(&mut self, _: bool) -> Result<(), DynError> {
                Ok(())
            }
        }

        let mut layout = layout_of(
            &[[0.0; 3], [100.0, 0.0, 0.0]],
            &[true, true],
        );
        // Source out east at the horizon: the full baseline length projects.
        let pointing = Pointing {
            altitude: 0.0,
            azimuth: std::f64::consts::FRAC_PI_2,
        };
        let plan = compute_plan(&layout, pointing, &info()).unwrap();
        let mut sink = Recorder(Vec::new());
        apply_plan(&plan, &mut layout, &mut sink).unwrap();
        assert!(sink.0.contains(&(plan.reference, 0)));
        let other = 1 - plan.reference;
        assert!((layout.lines[other].delay_m - 100.0).abs() < 1e-9);
    }
}
