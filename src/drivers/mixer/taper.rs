//! Fader taper and pan conversions for 14-bit NRPN values

use crate::error::DeviceError;
use crate::midi::MAX_14BIT;

pub const MIN_DB: f32 = -80.0;
pub const MAX_DB: f32 = 10.0;

/// Measured taper points: (dB, 14-bit level). Linear between points.
const FADER_TAPER: [(f32, u16); 13] = [
    (-80.0, 5698),
    (-60.0, 8073),
    (-40.0, 10447),
    (-35.0, 11041),
    (-30.0, 11634),
    (-25.0, 12228),
    (-20.0, 12822),
    (-15.0, 13415),
    (-10.0, 14009),
    (-5.0, 14602),
    (0.0, 15196),
    (5.0, 15790),
    (10.0, 16383),
];

/// Convert a dB level to the fader's 14-bit value.
///
/// At or below -80 dB the fader is fully down (-inf, value 0); at or above
/// +10 dB it is fully up. Out-of-range requests clamp rather than fail.
pub fn db_to_level(db: f32) -> u16 {
    if db.is_nan() || db <= MIN_DB {
        return 0;
    }
    if db >= MAX_DB {
        return MAX_14BIT;
    }

    let upper = FADER_TAPER
        .iter()
        .position(|&(point_db, _)| db <= point_db)
        .unwrap_or(FADER_TAPER.len() - 1);
    let (db1, level1) = FADER_TAPER[upper - 1];
    let (db2, level2) = FADER_TAPER[upper];

    let level = level1 as f32 + (db - db1) * (level2 as f32 - level1 as f32) / (db2 - db1);
    level.round().clamp(0.0, MAX_14BIT as f32) as u16
}

/// Inverse of [`db_to_level`]. Values below the -80 dB point read as -80 dB.
pub fn level_to_db(level: u16) -> f32 {
    let level = level.min(MAX_14BIT);
    if level <= FADER_TAPER[0].1 {
        return MIN_DB;
    }

    let upper = FADER_TAPER
        .iter()
        .position(|&(_, point_level)| level <= point_level)
        .unwrap_or(FADER_TAPER.len() - 1);
    let (db1, level1) = FADER_TAPER[upper - 1];
    let (db2, level2) = FADER_TAPER[upper];

    db1 + (level as f32 - level1 as f32) * (db2 - db1) / (level2 as f32 - level1 as f32)
}

/// Convert pan (-100 = hard left, 0 = centre, +100 = hard right) to 14-bit
pub fn pan_to_value(pan: i32) -> Result<u16, DeviceError> {
    if !(-100..=100).contains(&pan) {
        return Err(DeviceError::Range(format!(
            "Pan {} outside -100..=100",
            pan
        )));
    }
    Ok((((pan + 100) as f32 / 200.0) * MAX_14BIT as f32) as u16)
}

/// Inverse of [`pan_to_value`], rounded to the nearest step
pub fn value_to_pan(value: u16) -> i32 {
    let value = value.min(MAX_14BIT) as f32;
    ((value / MAX_14BIT as f32) * 200.0 - 100.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_taper_points() {
        assert_eq!(db_to_level(0.0), 15196);
        assert_eq!(db_to_level(-40.0), 10447);
        assert_eq!(db_to_level(5.0), 15790);
    }

    #[test]
    fn test_interpolation_between_points() {
        // Halfway between -10 (14009) and -5 (14602)
        assert_eq!(db_to_level(-7.5), 14306);
    }

    #[test]
    fn test_clamping() {
        assert_eq!(db_to_level(-80.0), 0);
        assert_eq!(db_to_level(-120.0), 0);
        assert_eq!(db_to_level(f32::NEG_INFINITY), 0);
        assert_eq!(db_to_level(10.0), 16383);
        assert_eq!(db_to_level(42.0), 16383);
    }

    #[test]
    fn test_pan_values() {
        assert_eq!(pan_to_value(-100).unwrap(), 0);
        assert_eq!(pan_to_value(0).unwrap(), 8191);
        assert_eq!(pan_to_value(100).unwrap(), 16383);
    }

    #[test]
    fn test_pan_out_of_range() {
        assert!(matches!(pan_to_value(101), Err(DeviceError::Range(_))));
        assert!(matches!(pan_to_value(-101), Err(DeviceError::Range(_))));
    }

    proptest! {
        #[test]
        fn prop_fader_is_monotonic(a in -100.0f32..20.0, b in -100.0f32..20.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(db_to_level(lo) <= db_to_level(hi));
        }

        #[test]
        fn prop_fader_round_trip(db in -79.9f32..9.9) {
            let back = level_to_db(db_to_level(db));
            prop_assert!((back - db).abs() < 0.05, "{} -> {}", db, back);
        }

        #[test]
        fn prop_pan_is_monotonic_and_invertible(a in -100i32..=100, b in -100i32..=100) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(pan_to_value(lo).unwrap() <= pan_to_value(hi).unwrap());
            prop_assert_eq!(value_to_pan(pan_to_value(a).unwrap()), a);
        }
    }
}
