//! Derived plant-physiology metrics.
//!
//! Pure functions computing vapor pressure deficit and dew point from air
//! temperature and relative humidity. Inputs outside the domain of the
//! formulas produce `None` rather than an error or a non-finite number, so a
//! single undefined metric never affects the rest of the pipeline.
//!
//! # Example
//!
//! ```
//! use sentinel_core::metrics::{dew_point, vapor_pressure_deficit};
//!
//! assert_eq!(vapor_pressure_deficit(20.0, 60.0), Some(0.935));
//! assert_eq!(dew_point(25.0, 50.0), Some(13.84));
//! assert_eq!(dew_point(25.0, 0.0), None);
//! ```

use serde::{Deserialize, Serialize};

use sentinel_types::Reading;

/// Tetens coefficients for saturation vapor pressure (kPa).
const TETENS_A: f64 = 0.61078;
const TETENS_B: f64 = 17.27;
const TETENS_C: f64 = 237.3;

/// Magnus coefficients for dew point.
const MAGNUS_A: f64 = 17.27;
const MAGNUS_B: f64 = 237.7;

/// Metrics derived from a single reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Vapor pressure deficit in kPa, rounded to 3 decimals.
    pub vpd_kpa: Option<f64>,
    /// Dew point in degrees Celsius, rounded to 2 decimals.
    pub dew_point_c: Option<f64>,
}

impl DerivedMetrics {
    /// Compute all derived metrics for a reading.
    pub fn compute(reading: &Reading) -> Self {
        Self {
            vpd_kpa: vapor_pressure_deficit(reading.temperature_c, reading.humidity_rh),
            dew_point_c: dew_point(reading.temperature_c, reading.humidity_rh),
        }
    }
}

/// Vapor pressure deficit in kPa.
///
/// `svp = 0.61078 * exp(17.27 * T / (T + 237.3))`, `vp = svp * RH / 100`,
/// result `svp - vp` rounded to 3 decimals.
///
/// Returns `None` when the humidity is outside 0-100 %, the temperature is
/// -237.3 °C, or the arithmetic is not finite.
pub fn vapor_pressure_deficit(temperature_c: f64, humidity_rh: f64) -> Option<f64> {
    if !temperature_c.is_finite() || !(0.0..=100.0).contains(&humidity_rh) {
        return None;
    }

    let denominator = temperature_c + TETENS_C;
    if denominator == 0.0 {
        return None;
    }

    let svp = TETENS_A * (TETENS_B * temperature_c / denominator).exp();
    let vp = svp * (humidity_rh / 100.0);
    finite(round_to(svp - vp, 3))
}

/// Dew point in degrees Celsius (Magnus formula).
///
/// `alpha = 17.27 * T / (237.7 + T) + ln(RH / 100)`, result
/// `237.7 * alpha / (17.27 - alpha)` rounded to 2 decimals.
///
/// Returns `None` when `RH <= 0`, when `alpha == 17.27`, or when the
/// arithmetic is not finite.
pub fn dew_point(temperature_c: f64, humidity_rh: f64) -> Option<f64> {
    if !temperature_c.is_finite() || !humidity_rh.is_finite() || humidity_rh <= 0.0 {
        return None;
    }

    let alpha = (MAGNUS_A * temperature_c) / (MAGNUS_B + temperature_c) + (humidity_rh / 100.0).ln();
    if !alpha.is_finite() || alpha == MAGNUS_A {
        return None;
    }

    finite(round_to((MAGNUS_B * alpha) / (MAGNUS_A - alpha), 2))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
