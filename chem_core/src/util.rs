//! Unit constants and rounding helpers shared across chem_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;
/// Millilitres per US fluid ounce.
pub const ML_PER_OZ: f64 = 29.5735;
/// Millilitres per US gallon.
pub const ML_PER_GALLON: f64 = 3_785.411_784;
pub const SECS_PER_DAY: f64 = 86_400.0;

/// Round to `places` decimals, half away from zero. Non-finite input maps to 0.
#[inline]
pub fn round_to(x: f64, places: i32) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let p = 10f64.powi(places);
    (x * p).round() / p
}

/// Seconds needed to pump `volume_ml` at `ml_per_min`, rounded to whole seconds.
#[inline]
pub fn secs_for_volume(volume_ml: f64, ml_per_min: f64) -> f64 {
    if ml_per_min <= 0.0 {
        return 0.0;
    }
    (volume_ml / (ml_per_min / 60.0)).round()
}

/// Volume pumped in `secs` at `ml_per_min`, rounded to whole millilitres.
#[inline]
pub fn volume_for_secs(secs: f64, ml_per_min: f64) -> f64 {
    (secs * ml_per_min / 60.0).round()
}

/// `secs` as a `Duration`, or `None` when it is negative, non-finite or too
/// large to represent.
#[inline]
pub fn secs_to_duration(secs: f64) -> Option<std::time::Duration> {
    std::time::Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_helpers() {
        assert_eq!(round_to(1.234_567_89, 6), 1.234_568);
        assert_eq!(round_to(f64::NAN, 3), 0.0);
        assert_eq!(secs_for_volume(100.0, 100.0), 60.0);
        assert_eq!(secs_for_volume(5.0, 0.0), 0.0);
        assert_eq!(volume_for_secs(60.0, 100.0), 100.0);
        assert_eq!(volume_for_secs(1.0, 100.0), 2.0);
    }

    #[test]
    fn out_of_range_seconds_have_no_duration() {
        assert_eq!(secs_to_duration(1.5), Some(std::time::Duration::from_millis(1_500)));
        assert_eq!(secs_to_duration(0.0), Some(std::time::Duration::ZERO));
        assert_eq!(secs_to_duration(-1.0), None);
        assert_eq!(secs_to_duration(f64::NAN), None);
        assert_eq!(secs_to_duration(1e20), None);
    }
}
