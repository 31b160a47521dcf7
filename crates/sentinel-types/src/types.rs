//! Core types for greenhouse sensor data.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::{ParseError, ParseResult};

/// A single sensor reading as captured on the edge device.
///
/// Required fields are `sensor_id`, `timestamp`, `temperature_c` and
/// `humidity_rh`. All other measurements are optional; an absent value is
/// carried as `None` end-to-end and never coerced to zero.
///
/// Deserialization goes through [`RawReading`] so that every decode path
/// applies the same validation rules.
///
/// # Example
///
/// ```
/// use sentinel_types::Reading;
///
/// let json = br#"{
///     "sensor_id": "GH-001",
///     "timestamp": "2024-05-01T12:00:00Z",
///     "temperature_c": 24.5,
///     "humidity_rh": 61.0,
///     "co2_ppm": 450
/// }"#;
///
/// let reading = Reading::from_json(json).unwrap();
/// assert_eq!(reading.sensor_id, "GH-001");
/// assert_eq!(reading.co2_ppm, Some(450.0));
/// assert_eq!(reading.soil_moisture, None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReading")]
pub struct Reading {
    /// Identifier of the sensor (or greenhouse) that produced the reading.
    pub sensor_id: String,
    /// Capture time, normalized to UTC.
    #[serde(serialize_with = "time::serde::rfc3339::serialize")]
    pub timestamp: OffsetDateTime,
    /// Air temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Relative humidity percentage (0-100).
    pub humidity_rh: f64,
    /// Volumetric soil moisture percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_moisture: Option<f64>,
    /// CO2 concentration in ppm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2_ppm: Option<f64>,
    /// Photosynthetically active radiation in µmol/m²/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub par_umol: Option<f64>,
    /// Soil electrical conductivity in dS/m.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_ec: Option<f64>,
    /// Battery level percentage of the sensor node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
}

impl Reading {
    /// Create a builder for a reading with the given identity.
    pub fn builder(sensor_id: impl Into<String>, timestamp: OffsetDateTime) -> ReadingBuilder {
        ReadingBuilder {
            reading: Reading {
                sensor_id: sensor_id.into(),
                timestamp,
                temperature_c: 0.0,
                humidity_rh: 0.0,
                soil_moisture: None,
                co2_ppm: None,
                par_umol: None,
                soil_ec: None,
                battery_level: None,
            },
        }
    }

    /// Decode a reading from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the payload is not a JSON object, a
    /// required field is missing, a numeric field is not a number, or the
    /// timestamp is not ISO-8601.
    pub fn from_json(bytes: &[u8]) -> ParseResult<Self> {
        let raw: RawReading = serde_json::from_slice(bytes)?;
        Self::try_from(raw)
    }

    /// Encode the reading into its JSON wire form.
    pub fn to_json(&self) -> ParseResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Builder for constructing a [`Reading`].
#[derive(Debug)]
#[must_use]
pub struct ReadingBuilder {
    reading: Reading,
}

impl ReadingBuilder {
    /// Set temperature.
    pub fn temperature(mut self, celsius: f64) -> Self {
        self.reading.temperature_c = celsius;
        self
    }

    /// Set relative humidity.
    pub fn humidity(mut self, percent: f64) -> Self {
        self.reading.humidity_rh = percent;
        self
    }

    /// Set soil moisture.
    pub fn soil_moisture(mut self, percent: f64) -> Self {
        self.reading.soil_moisture = Some(percent);
        self
    }

    /// Set CO2 concentration.
    pub fn co2(mut self, ppm: f64) -> Self {
        self.reading.co2_ppm = Some(ppm);
        self
    }

    /// Set PAR.
    pub fn par(mut self, umol: f64) -> Self {
        self.reading.par_umol = Some(umol);
        self
    }

    /// Set soil EC.
    pub fn soil_ec(mut self, ds_per_m: f64) -> Self {
        self.reading.soil_ec = Some(ds_per_m);
        self
    }

    /// Set battery level.
    pub fn battery(mut self, percent: f64) -> Self {
        self.reading.battery_level = Some(percent);
        self
    }

    /// Build the reading.
    pub fn build(self) -> Reading {
        self.reading
    }
}

/// Loosely typed reading as it arrives on the wire.
///
/// Every field is optional and numeric fields keep their raw JSON value, so
/// that a missing field and a field of the wrong type can be reported
/// separately. Convert with `Reading::try_from`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReading {
    pub sensor_id: Option<String>,
    pub timestamp: Option<String>,
    pub temperature_c: Option<Value>,
    pub humidity_rh: Option<Value>,
    pub soil_moisture: Option<Value>,
    pub co2_ppm: Option<Value>,
    pub par_umol: Option<Value>,
    pub soil_ec: Option<Value>,
    pub battery_level: Option<Value>,
}

impl TryFrom<RawReading> for Reading {
    type Error = ParseError;

    fn try_from(raw: RawReading) -> ParseResult<Self> {
        let sensor_id = raw.sensor_id.ok_or(ParseError::MissingField("sensor_id"))?;
        if sensor_id.trim().is_empty() {
            return Err(ParseError::EmptySensorId);
        }

        let timestamp = raw
            .timestamp
            .as_deref()
            .ok_or(ParseError::MissingField("timestamp"))
            .and_then(parse_timestamp)?;

        Ok(Reading {
            sensor_id,
            timestamp,
            temperature_c: required_number("temperature_c", raw.temperature_c)?,
            humidity_rh: required_number("humidity_rh", raw.humidity_rh)?,
            soil_moisture: optional_number("soil_moisture", raw.soil_moisture)?,
            co2_ppm: optional_number("co2_ppm", raw.co2_ppm)?,
            par_umol: optional_number("par_umol", raw.par_umol)?,
            soil_ec: optional_number("soil_ec", raw.soil_ec)?,
            battery_level: optional_number("battery_level", raw.battery_level)?,
        })
    }
}

fn required_number(field: &'static str, value: Option<Value>) -> ParseResult<f64> {
    optional_number(field, value)?.ok_or(ParseError::MissingField(field))
}

fn optional_number(field: &'static str, value: Option<Value>) -> ParseResult<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or(ParseError::NonNumeric {
            field,
            value: n.to_string(),
        }),
        Some(other) => Err(ParseError::NonNumeric {
            field,
            value: other.to_string(),
        }),
    }
}

/// Parse an ISO-8601 timestamp into a UTC date-time.
///
/// RFC 3339 strings (`2024-05-01T12:00:00Z`, `...+02:00`) are accepted, as
/// are offset-less date-times such as `2024-05-01T12:00:00.123456`, which
/// are interpreted as UTC.
///
/// # Examples
///
/// ```
/// use sentinel_types::parse_timestamp;
///
/// let a = parse_timestamp("2024-05-01T12:00:00Z").unwrap();
/// let b = parse_timestamp("2024-05-01T12:00:00").unwrap();
/// assert_eq!(a, b);
/// assert!(parse_timestamp("yesterday").is_err());
/// assert!(parse_timestamp("2300-01-01T00:00:00Z").is_err());
/// ```
pub fn parse_timestamp(value: &str) -> ParseResult<OffsetDateTime> {
    let ts = OffsetDateTime::parse(value, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(value, &Iso8601::DEFAULT))
        .map(|ts| ts.to_offset(UtcOffset::UTC))
        .or_else(|_| {
            PrimitiveDateTime::parse(value, &Iso8601::DEFAULT).map(PrimitiveDateTime::assume_utc)
        })
        .map_err(|_| ParseError::InvalidTimestamp(value.to_string()))?;

    if !is_storable(ts) {
        return Err(ParseError::TimestampOutOfRange(value.to_string()));
    }
    Ok(ts)
}

/// Whether `ts` fits in signed 64-bit Unix nanoseconds
/// (1677-09-21 to 2262-04-11), the resolution timestamps are stored at.
pub fn is_storable(ts: OffsetDateTime) -> bool {
    i64::try_from(ts.unix_timestamp_nanos()).is_ok()
}

/// Greenhouse health status derived from the active alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    /// No threshold is violated.
    #[default]
    #[serde(rename = "OK")]
    Ok,
    /// At least one alert is active.
    #[serde(rename = "ALERT")]
    Alert,
}

impl Status {
    /// Derive the status from an alert list: `Alert` iff it is non-empty.
    ///
    /// ```
    /// use sentinel_types::Status;
    ///
    /// assert_eq!(Status::from_alerts::<String>(&[]), Status::Ok);
    /// assert_eq!(Status::from_alerts(&["Low Temp Alert: 10.0C"]), Status::Alert);
    /// ```
    pub fn from_alerts<T>(alerts: &[T]) -> Self {
        if alerts.is_empty() {
            Status::Ok
        } else {
            Status::Alert
        }
    }

    /// Stable string form, as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Alert => "ALERT",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reading waiting in the edge buffer.
///
/// A record only exists while it is pending delivery. Acknowledging it
/// deletes it, so there is no "synced" flag to carry around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedRecord {
    /// Buffer-assigned id, strictly increasing and never reused.
    pub id: i64,
    /// Serialized [`Reading`] (JSON).
    pub payload: String,
    /// When the record was committed to the buffer.
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
}

impl BufferedRecord {
    /// Decode the buffered payload back into a reading.
    pub fn reading(&self) -> ParseResult<Reading> {
        Reading::from_json(self.payload.as_bytes())
    }
}

/// Live state document for one sensor, latest write wins per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenhouseState {
    pub sensor_id: String,
    /// When the gateway last wrote this document.
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
    /// Capture time of the reading that last touched this document.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_reading_at: Option<OffsetDateTime>,
    pub current_temp: Option<f64>,
    pub current_humidity: Option<f64>,
    pub current_vpd: Option<f64>,
    pub current_co2: Option<f64>,
    pub status: Status,
    pub active_alerts: Vec<String>,
}

impl GreenhouseState {
    /// An empty document for a sensor seen for the first time.
    pub fn new(sensor_id: impl Into<String>, last_update: OffsetDateTime) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            last_update,
            last_reading_at: None,
            current_temp: None,
            current_humidity: None,
            current_vpd: None,
            current_co2: None,
            status: Status::Ok,
            active_alerts: Vec::new(),
        }
    }
}

/// A partial write to a [`GreenhouseState`].
///
/// `None` means "not present in this write": the stored value is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub sensor_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_reading_at: Option<OffsetDateTime>,
    pub current_temp: Option<f64>,
    pub current_humidity: Option<f64>,
    pub current_vpd: Option<f64>,
    pub current_co2: Option<f64>,
    pub status: Option<Status>,
    pub active_alerts: Option<Vec<String>>,
}

impl StateUpdate {
    /// A write that only touches `last_update`.
    pub fn new(sensor_id: impl Into<String>, last_update: OffsetDateTime) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            last_update,
            last_reading_at: None,
            current_temp: None,
            current_humidity: None,
            current_vpd: None,
            current_co2: None,
            status: None,
            active_alerts: None,
        }
    }

    /// Merge this write into the stored document, creating it if needed.
    ///
    /// ```
    /// use sentinel_types::{GreenhouseState, StateUpdate};
    /// use time::OffsetDateTime;
    ///
    /// let now = OffsetDateTime::now_utc();
    /// let mut first = StateUpdate::new("GH-001", now);
    /// first.current_co2 = Some(450.0);
    /// let stored = first.merge_into(None);
    ///
    /// let mut second = StateUpdate::new("GH-001", now);
    /// second.current_temp = Some(21.0);
    /// let merged = second.merge_into(Some(stored));
    ///
    /// assert_eq!(merged.current_co2, Some(450.0));
    /// assert_eq!(merged.current_temp, Some(21.0));
    /// ```
    pub fn merge_into(self, existing: Option<GreenhouseState>) -> GreenhouseState {
        let mut state =
            existing.unwrap_or_else(|| GreenhouseState::new(self.sensor_id.clone(), self.last_update));

        state.last_update = self.last_update;
        merge(&mut state.last_reading_at, self.last_reading_at);
        merge(&mut state.current_temp, self.current_temp);
        merge(&mut state.current_humidity, self.current_humidity);
        merge(&mut state.current_vpd, self.current_vpd);
        merge(&mut state.current_co2, self.current_co2);
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(alerts) = self.active_alerts {
            state.active_alerts = alerts;
        }
        state
    }
}

fn merge<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Immutable history row: the reading plus its derived metrics.
///
/// Keyed by `(sensor_id, timestamp)`; never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub sensor_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub temperature_c: f64,
    pub humidity_rh: f64,
    pub soil_moisture: Option<f64>,
    pub co2_ppm: Option<f64>,
    pub par_umol: Option<f64>,
    pub soil_ec: Option<f64>,
    pub battery_level: Option<f64>,
    /// Vapor pressure deficit in kPa, if defined for this reading.
    pub vpd_kpa: Option<f64>,
    /// Dew point in degrees Celsius, if defined for this reading.
    pub dew_point_c: Option<f64>,
}

impl HistoryRecord {
    /// Build a history row from a reading and its derived metrics.
    pub fn from_reading(reading: &Reading, vpd_kpa: Option<f64>, dew_point_c: Option<f64>) -> Self {
        Self {
            sensor_id: reading.sensor_id.clone(),
            timestamp: reading.timestamp,
            temperature_c: reading.temperature_c,
            humidity_rh: reading.humidity_rh,
            soil_moisture: reading.soil_moisture,
            co2_ppm: reading.co2_ppm,
            par_umol: reading.par_umol,
            soil_ec: reading.soil_ec,
            battery_level: reading.battery_level,
            vpd_kpa,
            dew_point_c,
        }
    }
}
