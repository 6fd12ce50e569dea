use std::f64::consts::PI;

use crate::utils::DynError;

pub const LIGHTSPEED: f64 = 299792458.0; // m/s

// --- Interferometer geometry definitions ---
// Line position vector (p): local east/north/up offset of a receiver from the
// array origin, in meters.
// Baseline vector (b): vector from line i to line j (b = p_j - p_i).
// Pointing unit vector (s): direction towards the observed source, derived
// from altitude/azimuth (azimuth measured from north, through east).
// Projected delay: extra geometric path |b . s| one wavefront travels to
// reach the nearer endpoint, in meters. Reported as a magnitude; the signed
// projection is kept separately for reference-element selection.
// -------------------------------------------

fn parse_packed_hhmmss(value: f64) -> Result<(f64, f64, f64), DynError> {
    let abs = value.abs();
    let h = (abs / 10000.0).floor();
    let rem = abs - h * 10000.0;
    let m = (rem / 100.0).floor();
    let s = rem - m * 100.0;
    if !(0.0..60.0).contains(&m) || !(0.0..60.0).contains(&s) {
        return Err("Invalid hhmmss/ddmmss value".into());
    }
    Ok((h, m, s))
}

fn parse_sexagesimal(input: &str, markers: &[char]) -> Result<(f64, f64, f64), DynError> {
    let mut cleaned = input.to_string();
    for marker in markers {
        cleaned = cleaned.replace(*marker, " ");
    }
    let parts: Vec<&str> = cleaned.split_whitespace().collect();
    match parts.len() {
        1 => {
            let packed = parts[0].parse::<f64>()?;
            parse_packed_hhmmss(packed)
        }
        3 => {
            let a = parts[0].parse::<f64>()?;
            let m = parts[1].parse::<f64>()?;
            let s = parts[2].parse::<f64>()?;
            if !(0.0..60.0).contains(&m) || !(0.0..60.0).contains(&s) {
                return Err("Invalid sexagesimal value".into());
            }
            Ok((a, m, s))
        }
        _ => Err("Invalid sexagesimal format".into()),
    }
}

// Parse an RA string to radians.
// Supports: hms markers, hh:mm:ss, hhmmss, or decimal degrees.
pub fn parse_ra(ra_str: &str) -> Result<f64, DynError> {
    let raw = ra_str.trim().to_lowercase();
    if raw.is_empty() {
        return Err("Empty RA".into());
    }

    let has_hms_marker = raw.contains('h')
        || raw.contains('m')
        || raw.contains('s')
        || raw.contains(':')
        || raw.contains(' ');

    let hours = if has_hms_marker {
        let (h, m, s) = parse_sexagesimal(&raw, &['h', 'm', 's', ':'])?;
        h + m / 60.0 + s / 3600.0
    } else {
        let v = raw.parse::<f64>()?;
        if v.abs() >= 10000.0 {
            let (h, m, s) = parse_packed_hhmmss(v)?;
            h + m / 60.0 + s / 3600.0
        } else {
            // Decimal degrees
            return Ok(v.to_radians());
        }
    };

    Ok((hours * 15.0).to_radians())
}

// Parse a Dec string to radians.
// Supports: dms markers, dd:mm:ss, ddmmss, or decimal degrees.
pub fn parse_dec(dec_str: &str) -> Result<f64, DynError> {
    let raw = dec_str.trim().to_lowercase();
    if raw.is_empty() {
        return Err("Empty Dec".into());
    }

    let sign = if raw.starts_with('-') { -1.0 } else { 1.0 };
    let stripped = raw.trim_start_matches(|c: char| c == '+' || c == '-');

    let has_dms_marker = stripped.contains('d')
        || stripped.contains('m')
        || stripped.contains('s')
        || stripped.contains('\'')
        || stripped.contains('\"')
        || stripped.contains(':')
        || stripped.contains(' ');

    let degrees = if has_dms_marker {
        let (d, m, s) = parse_sexagesimal(stripped, &['d', 'm', 's', '\'', '\"', ':'])?;
        d + m / 60.0 + s / 3600.0
    } else {
        let v = stripped.parse::<f64>()?;
        if v.abs() >= 10000.0 {
            let (d, m, s) = parse_packed_hhmmss(v)?;
            d + m / 60.0 + s / 3600.0
        } else {
            return Ok((sign * v).to_radians());
        }
    };

    Ok((sign * degrees).to_radians())
}

// Greenwich Mean Sidereal Time (radians) from MJD.
pub fn mjd_to_gmst(mjd: f64) -> f64 {
    // Formula from Astronomical Almanac / IAU 2006.
    // T is centuries from J2000.0 (JD 2451545.0, which is 2000-01-01 12:00:00 UT1).
    let jd = mjd + 2400000.5;
    let t_ut1 = (jd - 2451545.0) / 36525.0;

    // GMST at J2000.0 (12h UT1) is 18h 41m 50.54841s (67310.54841s).
    // The rate includes the 86400s per day rotation.
    let gmst_sec = 67310.54841
        + (876600.0 * 3600.0 + 8640184.812866) * t_ut1
        + 0.093104 * t_ut1.powi(2)
        - 6.2e-6 * t_ut1.powi(3);

    let gmst_rad = (gmst_sec * PI / 43200.0) % (2.0 * PI);
    if gmst_rad < 0.0 {
        gmst_rad + 2.0 * PI
    } else {
        gmst_rad
    }
}

// Local sidereal time (radians) for an observing site at the given
// east-positive longitude, in degrees.
pub fn local_sidereal_time(mjd: f64, longitude_deg: f64) -> f64 {
    normalize_angle(mjd_to_gmst(mjd) + longitude_deg.to_radians())
}

pub fn local_hour_angle(lst_rad: f64, ra_rad: f64) -> f64 {
    normalize_angle(lst_rad - ra_rad)
}

fn normalize_angle(mut a: f64) -> f64 {
    a %= 2.0 * PI;
    if a < 0.0 {
        a += 2.0 * PI;
    }
    a
}

/// Current pointing of the array: altitude/azimuth of the target, radians.
/// Azimuth is measured from north through east.
#[derive(Clone, Copy, Debug)]
pub struct Pointing {
    pub altitude: f64,
    pub azimuth: f64,
}

impl Pointing {
    /// Alt/az of (ra, dec) as seen from (latitude, longitude) at the given
    /// MJD. All angle arguments in radians except longitude (degrees,
    /// east-positive, matching the site configuration file).
    pub fn from_equatorial(ra: f64, dec: f64, latitude: f64, longitude_deg: f64, mjd: f64) -> Self {
        let lst = local_sidereal_time(mjd, longitude_deg);
        let ha = local_hour_angle(lst, ra);

        let sin_alt = dec.sin() * latitude.sin() + dec.cos() * latitude.cos() * ha.cos();
        let altitude = sin_alt.clamp(-1.0, 1.0).asin();
        let azimuth = normalize_angle(f64::atan2(
            -dec.cos() * ha.sin(),
            dec.sin() * latitude.cos() - dec.cos() * latitude.sin() * ha.cos(),
        ));
        Self { altitude, azimuth }
    }

    pub fn zenith() -> Self {
        Self {
            altitude: PI / 2.0,
            azimuth: 0.0,
        }
    }

    /// Unit vector towards the source in local east/north/up coordinates.
    pub fn unit_enu(&self) -> [f64; 3] {
        [
            self.altitude.cos() * self.azimuth.sin(),
            self.altitude.cos() * self.azimuth.cos(),
            self.altitude.sin(),
        ]
    }
}

pub fn vector_norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn vector_sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

// Signed projection of a baseline onto the pointing direction, meters.
// Positive when the wavefront reaches the baseline tail first.
pub fn baseline_projection_m(pointing: Pointing, baseline_enu: [f64; 3]) -> f64 {
    let s = pointing.unit_enu();
    baseline_enu[0] * s[0] + baseline_enu[1] * s[1] + baseline_enu[2] * s[2]
}

// Projected geometric path difference for a baseline, meters. Always a
// magnitude: the delay line only compensates in one direction and the sign
// is reintroduced by which endpoint gets programmed.
pub fn baseline_delay_m(pointing: Pointing, baseline_enu: [f64; 3]) -> f64 {
    baseline_projection_m(pointing, baseline_enu).abs()
}

/// Sky-plane placement of a baseline, each component normalized to [-1, 1]
/// by the baseline length. Used only to place samples in the dirty image.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UvCoordinate {
    pub u: f64,
    pub v: f64,
}

pub fn uv_coordinates(pointing: Pointing, baseline_enu: [f64; 3]) -> UvCoordinate {
    let norm = vector_norm(baseline_enu);
    if norm <= 0.0 {
        return UvCoordinate::default();
    }
    let (sin_az, cos_az) = pointing.azimuth.sin_cos();
    let (sin_alt, cos_alt) = pointing.altitude.sin_cos();
    // Orthonormal basis of the plane perpendicular to the pointing vector:
    // e_u points along increasing azimuth, e_v towards the zenith side.
    let e_u = [cos_az, -sin_az, 0.0];
    let e_v = [-sin_alt * sin_az, -sin_alt * cos_az, cos_alt];
    UvCoordinate {
        u: (baseline_enu[0] * e_u[0] + baseline_enu[1] * e_u[1]) / norm,
        v: (baseline_enu[0] * e_v[0] + baseline_enu[1] * e_v[1] + baseline_enu[2] * e_v[2]) / norm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ra_supports_hhmmss_and_hms() {
        let ra_hms = parse_ra("16h42m58.8s").unwrap();
        let ra_packed = parse_ra("164258.8").unwrap();
        assert!((ra_hms - ra_packed).abs() < 1e-12);
    }

    #[test]
    fn parse_dec_supports_ddmmss_and_dms() {
        let dec_dms = parse_dec("+39d48m36.0s").unwrap();
        let dec_packed = parse_dec("+394836.0").unwrap();
        assert!((dec_dms - dec_packed).abs() < 1e-12);
    }

    #[test]
    fn gmst_progresses_at_earth_rotation_rate() {
        let mjd = 60352.66111;
        let gmst_0 = mjd_to_gmst(mjd);
        let gmst_1 = mjd_to_gmst(mjd + 1.0 / 86400.0);
        let mut d = gmst_1 - gmst_0;
        if d < 0.0 {
            d += 2.0 * PI;
        }
        // Sidereal angular speed ~ 7.2921159e-5 rad/s
        assert!(d > 7.2e-5 && d < 7.4e-5, "unexpected gmst delta rad/s: {d}");
    }

    #[test]
    fn horizontal_baselines_have_zero_delay_at_zenith() {
        let zenith = Pointing::zenith();
        for baseline in [[10.0, 0.0, 0.0], [0.0, 10.0, 0.0], [-10.0, 10.0, 0.0]] {
            assert!(baseline_delay_m(zenith, baseline).abs() < 1e-12);
        }
    }

    #[test]
    fn delay_is_symmetric_after_abs_normalization() {
        let pointing = Pointing {
            altitude: 0.7,
            azimuth: 2.1,
        };
        let p_i = [12.0, -3.0, 0.5];
        let p_j = [-4.0, 9.0, 1.5];
        let d_ij = baseline_delay_m(pointing, vector_sub(p_j, p_i));
        let d_ji = baseline_delay_m(pointing, vector_sub(p_i, p_j));
        assert!((d_ij - d_ji).abs() < 1e-12);
    }

    #[test]
    fn low_altitude_east_baseline_approaches_full_length() {
        // Source on the eastern horizon, 100 m east-west baseline: the
        // projected path difference is the whole baseline.
        let pointing = Pointing {
            altitude: 0.0,
            azimuth: PI / 2.0,
        };
        let delay = baseline_delay_m(pointing, [100.0, 0.0, 0.0]);
        assert!((delay - 100.0).abs() < 1e-9);
    }

    #[test]
    fn uv_components_stay_normalized() {
        let pointing = Pointing {
            altitude: 0.9,
            azimuth: 4.0,
        };
        let uv = uv_coordinates(pointing, [35.0, -20.0, 5.0]);
        assert!(uv.u.abs() <= 1.0 + 1e-12);
        assert!(uv.v.abs() <= 1.0 + 1e-12);
        assert_eq!(uv_coordinates(pointing, [0.0, 0.0, 0.0]), UvCoordinate::default());
    }

    #[test]
    fn transit_pointing_is_due_south_for_northern_site() {
        // Source below the pole observed at transit (hour angle 0) from a
        // northern site culminates due south.
        let lat = 35.0_f64.to_radians();
        let dec = 10.0_f64.to_radians();
        // Pick an MJD, then choose RA = LST so the hour angle is zero.
        let mjd = 60000.25;
        let ra = local_sidereal_time(mjd, 131.5);
        let pointing = Pointing::from_equatorial(ra, dec, lat, 131.5, mjd);
        assert!((pointing.azimuth - PI).abs() < 1e-6);
        let expected_alt = PI / 2.0 - lat + dec;
        assert!((pointing.altitude - expected_alt).abs() < 1e-6);
    }
}
