//! Climate thresholds and alert evaluation.
//!
//! This module provides configurable per-metric bounds and the evaluator
//! that turns a reading plus its derived metrics into operator alerts.
//!
//! # Example
//!
//! ```
//! use sentinel_core::{DerivedMetrics, Thresholds};
//! use sentinel_types::Reading;
//! use time::macros::datetime;
//!
//! let reading = Reading::builder("GH-001", datetime!(2024-05-01 12:00:00 UTC))
//!     .temperature(32.5)
//!     .humidity(60.0)
//!     .build();
//!
//! let thresholds = Thresholds::default();
//! let alerts = thresholds.evaluate(&reading, &DerivedMetrics::compute(&reading));
//! assert_eq!(alerts.len(), 1);
//! assert_eq!(alerts[0].to_string(), "High Temp Alert: 32.5C");
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use sentinel_types::Reading;

use crate::metrics::DerivedMetrics;

/// Metric name for air temperature.
pub const TEMPERATURE: &str = "temperature_c";
/// Metric name for relative humidity.
pub const HUMIDITY: &str = "humidity_rh";
/// Metric name for vapor pressure deficit.
pub const VPD: &str = "vpd_kpa";

/// Acceptable range for one metric. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Bound {
    /// A closed range.
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Only a lower limit.
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// Only an upper limit.
    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// Which side of the range `value` falls out of, if any.
    ///
    /// Values equal to a limit are inside the range.
    pub fn breach(&self, value: f64) -> Option<Breach> {
        if self.max.is_some_and(|max| value > max) {
            Some(Breach::Above)
        } else if self.min.is_some_and(|min| value < min) {
            Some(Breach::Below)
        } else {
            None
        }
    }
}

/// Direction of a threshold violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breach {
    Above,
    Below,
}

/// Configuration for alert thresholds: metric name to bound.
///
/// Serializes as a plain table, e.g. in TOML:
///
/// ```toml
/// [thresholds.temperature_c]
/// min = 15.0
/// max = 30.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdConfig {
    bounds: BTreeMap<String, Bound>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self::empty()
            .with_bound(TEMPERATURE, Bound::range(15.0, 30.0))
            .with_bound(HUMIDITY, Bound::at_least(40.0))
            .with_bound(VPD, Bound::range(0.4, 1.6))
    }
}

impl ThresholdConfig {
    /// No bounds at all; nothing ever alerts.
    pub fn empty() -> Self {
        Self {
            bounds: BTreeMap::new(),
        }
    }

    /// Set (or replace) the bound for a metric.
    pub fn with_bound(mut self, metric: impl Into<String>, bound: Bound) -> Self {
        self.bounds.insert(metric.into(), bound);
        self
    }

    /// Bound configured for a metric.
    pub fn bound(&self, metric: &str) -> Option<&Bound> {
        self.bounds.get(metric)
    }

    /// Iterate over all configured bounds.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bound)> {
        self.bounds.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// An alert raised for a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Alert {
    HighTemperature(f64),
    LowTemperature(f64),
    LowHumidity(f64),
    HighHumidity(f64),
    LowVpd(f64),
    HighVpd(f64),
}

impl Alert {
    /// Metric that triggered the alert.
    pub fn metric(&self) -> &'static str {
        match self {
            Alert::HighTemperature(_) | Alert::LowTemperature(_) => TEMPERATURE,
            Alert::LowHumidity(_) | Alert::HighHumidity(_) => HUMIDITY,
            Alert::LowVpd(_) | Alert::HighVpd(_) => VPD,
        }
    }

    /// The measured value that triggered the alert.
    pub fn value(&self) -> f64 {
        match *self {
            Alert::HighTemperature(v)
            | Alert::LowTemperature(v)
            | Alert::LowHumidity(v)
            | Alert::HighHumidity(v)
            | Alert::LowVpd(v)
            | Alert::HighVpd(v) => v,
        }
    }
}

/// Values always keep a decimal point: `Low Temp Alert: 10.0C`.
impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::HighTemperature(t) => write!(f, "High Temp Alert: {t:?}C"),
            Alert::LowTemperature(t) => write!(f, "Low Temp Alert: {t:?}C"),
            Alert::LowHumidity(h) => write!(f, "Low Humidity Alert: {h:?}%"),
            Alert::HighHumidity(h) => write!(f, "High Humidity Alert: {h:?}%"),
            Alert::LowVpd(v) => write!(f, "Danger: Low VPD ({v:?} kPa) - Fungal Risk"),
            Alert::HighVpd(v) => write!(f, "Danger: High VPD ({v:?} kPa) - Plant Stress"),
        }
    }
}

/// Threshold evaluator for greenhouse readings.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    config: ThresholdConfig,
}

impl Thresholds {
    /// Create a new threshold evaluator with the given configuration.
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Evaluate all checks against a reading and its derived metrics.
    ///
    /// Checks run in a fixed order (temperature, humidity, VPD). Each yields
    /// at most one alert and every check runs regardless of earlier results.
    /// The VPD check is skipped when VPD is undefined for the reading.
    pub fn evaluate(&self, reading: &Reading, derived: &DerivedMetrics) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if let Some(breach) = self.check(TEMPERATURE, reading.temperature_c) {
            alerts.push(match breach {
                Breach::Above => Alert::HighTemperature(reading.temperature_c),
                Breach::Below => Alert::LowTemperature(reading.temperature_c),
            });
        }

        if let Some(breach) = self.check(HUMIDITY, reading.humidity_rh) {
            alerts.push(match breach {
                Breach::Above => Alert::HighHumidity(reading.humidity_rh),
                Breach::Below => Alert::LowHumidity(reading.humidity_rh),
            });
        }

        if let Some(vpd) = derived.vpd_kpa
            && let Some(breach) = self.check(VPD, vpd)
        {
            alerts.push(match breach {
                Breach::Above => Alert::HighVpd(vpd),
                Breach::Below => Alert::LowVpd(vpd),
            });
        }

        alerts
    }

    fn check(&self, metric: &str, value: f64) -> Option<Breach> {
        self.config.bound(metric).and_then(|b| b.breach(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sentinel_types::Status;
    use time::macros::datetime;

    fn reading(temperature: f64, humidity: f64) -> Reading {
        Reading::builder("GH-001", datetime!(2024-05-01 12:00:00 UTC))
            .temperature(temperature)
            .humidity(humidity)
            .build()
    }

    fn evaluate(temperature: f64, humidity: f64, vpd: Option<f64>) -> Vec<Alert> {
        let derived = DerivedMetrics {
            vpd_kpa: vpd,
            dew_point_c: None,
        };
        Thresholds::default().evaluate(&reading(temperature, humidity), &derived)
    }

    #[test]
    fn test_high_temperature() {
        let alerts = evaluate(32.5, 60.0, Some(1.0));
        assert_eq!(alerts, vec![Alert::HighTemperature(32.5)]);
        assert_eq!(alerts[0].to_string(), "High Temp Alert: 32.5C");
    }

    #[test]
    fn test_low_temperature() {
        let alerts = evaluate(10.0, 60.0, Some(1.0));
        assert_eq!(alerts, vec![Alert::LowTemperature(10.0)]);
        assert_eq!(alerts[0].to_string(), "Low Temp Alert: 10.0C");
    }

    #[test]
    fn test_nominal_reading_has_no_alerts() {
        let alerts = evaluate(22.0, 60.0, Some(1.0));
        assert!(alerts.is_empty());
        assert_eq!(Status::from_alerts(&alerts), Status::Ok);
    }

    #[test]
    fn test_limits_are_inclusive() {
        assert!(evaluate(15.0, 40.0, Some(0.4)).is_empty());
        assert!(evaluate(30.0, 40.0, Some(1.6)).is_empty());
    }

    #[test]
    fn test_all_checks_run_in_fixed_order() {
        let alerts = evaluate(35.0, 20.0, Some(3.2));
        assert_eq!(
            alerts,
            vec![
                Alert::HighTemperature(35.0),
                Alert::LowHumidity(20.0),
                Alert::HighVpd(3.2),
            ]
        );
        assert_eq!(Status::from_alerts(&alerts), Status::Alert);
    }

    #[test]
    fn test_vpd_alert_texts() {
        assert_eq!(
            evaluate(20.0, 95.0, Some(0.117))[0].to_string(),
            "Danger: Low VPD (0.117 kPa) - Fungal Risk"
        );
        assert_eq!(
            Alert::HighVpd(2.1).to_string(),
            "Danger: High VPD (2.1 kPa) - Plant Stress"
        );
        assert_eq!(Alert::LowHumidity(35.5).to_string(), "Low Humidity Alert: 35.5%");
    }

    #[test]
    fn test_whole_number_alert_values_keep_decimal() {
        assert_eq!(Alert::LowTemperature(10.0).to_string(), "Low Temp Alert: 10.0C");
        assert_eq!(Alert::HighHumidity(90.0).to_string(), "High Humidity Alert: 90.0%");
        assert_eq!(
            Alert::HighVpd(2.0).to_string(),
            "Danger: High VPD (2.0 kPa) - Plant Stress"
        );
    }

    #[test]
    fn test_vpd_check_skipped_without_value() {
        assert!(evaluate(22.0, 60.0, None).is_empty());
    }

    #[test]
    fn test_no_high_humidity_alert_by_default() {
        assert!(evaluate(22.0, 99.0, Some(0.5)).is_empty());
    }

    #[test]
    fn test_configured_humidity_max() {
        let config = ThresholdConfig::default().with_bound(HUMIDITY, Bound::range(40.0, 80.0));
        let thresholds = Thresholds::new(config);
        let r = reading(22.0, 90.0);
        let alerts = thresholds.evaluate(&r, &DerivedMetrics::default());
        assert_eq!(alerts, vec![Alert::HighHumidity(90.0)]);
        assert_eq!(alerts[0].metric(), HUMIDITY);
        assert_eq!(alerts[0].value(), 90.0);
    }

    #[test]
    fn test_empty_config_never_alerts() {
        let thresholds = Thresholds::new(ThresholdConfig::empty());
        let r = reading(80.0, 0.0);
        assert!(thresholds.evaluate(&r, &DerivedMetrics::compute(&r)).is_empty());
    }

    #[test]
    fn test_config_serializes_as_table() {
        let json = serde_json::to_value(ThresholdConfig::default()).unwrap();
        assert_eq!(json["temperature_c"]["min"], 15.0);
        assert_eq!(json["temperature_c"]["max"], 30.0);
        assert!(json["humidity_rh"].get("max").is_none());

        let parsed: ThresholdConfig =
            serde_json::from_str(r#"{"vpd_kpa":{"max":2.0}}"#).unwrap();
        assert_eq!(parsed.bound(VPD), Some(&Bound::at_most(2.0)));
        assert_eq!(parsed.bound(TEMPERATURE), None);
    }

    proptest! {
        #[test]
        fn prop_evaluate_is_pure(t in -20.0f64..50.0, rh in 0.0f64..=100.0) {
            let r = reading(t, rh);
            let derived = DerivedMetrics::compute(&r);
            let thresholds = Thresholds::default();
            let first = thresholds.evaluate(&r, &derived);
            let second = thresholds.evaluate(&r, &derived);
            prop_assert_eq!(&first, &second);
            prop_assert!(first.len() <= 3);
            prop_assert_eq!(r, reading(t, rh));
        }
    }
}
