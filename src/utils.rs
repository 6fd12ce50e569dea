use std::error::Error;

pub type DynError = Box<dyn Error + Send + Sync>;

// Pin the calling thread to a single CPU so the acquisition loop is not
// migrated between cores mid-integration. No-op off Linux.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> bool {
    unsafe {
        let mut cpu_set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpu_set);
        libc::CPU_SET(cpu, &mut cpu_set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpu_set) == 0
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> bool {
    false
}

// Seconds since the Unix epoch as a fractional value. The acquisition loop
// stamps every tick with this; tests inject their own timestamps instead.
pub fn unix_seconds_now() -> f64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(_) => 0.0,
    }
}

// Unix seconds to Modified Julian Date. 1970-01-01T00:00:00Z is MJD 40587.0.
pub fn unix_seconds_to_mjd(unix_seconds: f64) -> f64 {
    40587.0 + unix_seconds / 86400.0
}

#[cfg(test)]
mod tests {
    use super::unix_seconds_to_mjd;

    #[test]
    fn epoch_maps_to_mjd_40587() {
        assert!((unix_seconds_to_mjd(0.0) - 40587.0).abs() < 1e-12);
        // 2000-01-01T12:00:00Z is JD 2451545.0, MJD 51544.5
        assert!((unix_seconds_to_mjd(946_728_000.0) - 51544.5).abs() < 1e-9);
    }
}
