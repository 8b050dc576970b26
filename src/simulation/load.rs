//! Deterministic diurnal load shapes per customer class.
//!
//! Multipliers are normalized so that noon equals 1.0 for every class; the
//! configured base MW values therefore describe the midday operating point.

use crate::grid::CustomerClass;

/// Hour-of-day multiplier for a class. `hour` is fractional local hour
/// (0.0..24.0); values outside the range are wrapped.
pub fn diurnal_multiplier(class: CustomerClass, hour: f64) -> f64 {
    let h = hour.rem_euclid(24.0);
    match class {
        CustomerClass::Industrial => {
            if h < 6.0 {
                // Night shift baseline
                0.55
            } else if h < 8.0 {
                // Morning ramp-up
                0.55 + (h - 6.0) * 0.225
            } else if h < 18.0 {
                // Full production
                1.0
            } else if h < 22.0 {
                // Wind-down
                1.0 - (h - 18.0) * 0.1125
            } else {
                0.55
            }
        }
        CustomerClass::Commercial => {
            if h < 7.0 {
                0.35
            } else if h < 9.0 {
                // Opening hours ramp
                0.35 + (h - 7.0) * 0.325
            } else if h < 17.0 {
                1.0
            } else if h < 21.0 {
                1.0 - (h - 17.0) * 0.1625
            } else {
                0.35
            }
        }
        CustomerClass::Residential => {
            if h < 5.0 {
                0.5
            } else if h < 7.0 {
                // Breakfast ramp
                0.5 + (h - 5.0) * 0.3
            } else if h < 9.0 {
                // Morning peak
                1.1
            } else if h < 12.0 {
                1.1 - (h - 9.0) * (0.1 / 3.0)
            } else if h < 16.0 {
                1.0
            } else if h < 18.0 {
                // Cooking/evening ramp
                1.0 + (h - 16.0) * 0.175
            } else if h < 21.0 {
                // Evening peak
                1.35
            } else {
                1.35 - (h - 21.0) * 0.25
            }
        }
    }
}
