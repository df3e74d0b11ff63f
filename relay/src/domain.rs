//! ==============================================================================
//! domain.rs - sensor reading, metric and push envelope types
//! ==============================================================================
//!
//! purpose:
//!     the shared vocabulary of the relay and the dashboard core.
//!     a reading is what a soil node publishes over mqtt, what the store
//!     persists and what the push channel re-emits to viewers.
//!
//! wire format:
//!     {"fecha": "2025-03-01T10:00:00Z", "humedad": 41.2, "ph": 6.8, ...}
//!
//! ```text
//!     - `fecha` may arrive as rfc 3339 text or epoch milliseconds; when it is
//!       missing or null the relay stamps the reading with "now"
//!     - `pH` is accepted on the way in, `ph` is the only key on the way out
//!     - metric fields are number|null, gps fields are optional
//! ```
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownMetric;

/// milliseconds since the unix epoch, the time axis of every series
pub type TimestampMs = i64;

// ==============================================================================
// metric - closed set of plotted quantities
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "humedad")]
    Humidity,
    #[serde(rename = "temperatura")]
    Temperature,
    #[serde(rename = "conductividad")]
    Conductivity,
    #[serde(rename = "ph", alias = "pH")]
    Ph,
    #[serde(rename = "nitrogeno")]
    Nitrogen,
    #[serde(rename = "fosforo")]
    Phosphorus,
    #[serde(rename = "potasio")]
    Potassium,
    #[serde(rename = "bateria")]
    Battery,
    #[serde(rename = "corriente")]
    Current,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::Humidity,
        Metric::Temperature,
        Metric::Conductivity,
        Metric::Ph,
        Metric::Nitrogen,
        Metric::Phosphorus,
        Metric::Potassium,
        Metric::Battery,
        Metric::Current,
    ];

    /// position in `Metric::ALL`
    pub fn index(self) -> usize {
        self as usize
    }

    /// field name in readings and the `var` query parameter
    pub fn key(self) -> &'static str {
        match self {
            Metric::Humidity => "humedad",
            Metric::Temperature => "temperatura",
            Metric::Conductivity => "conductividad",
            Metric::Ph => "ph",
            Metric::Nitrogen => "nitrogeno",
            Metric::Phosphorus => "fosforo",
            Metric::Potassium => "potasio",
            Metric::Battery => "bateria",
            Metric::Current => "corriente",
        }
    }

    /// line color used by the renderer
    pub fn color(self) -> &'static str {
        match self {
            Metric::Humidity => "#00bcd4",
            Metric::Temperature => "#ff7043",
            Metric::Conductivity => "#7e57c2",
            Metric::Ph => "#81c784",
            Metric::Nitrogen => "#ffca28",
            Metric::Phosphorus => "#ec407a",
            Metric::Potassium => "#29b6f6",
            Metric::Battery => "#8d6e63",
            Metric::Current => "#c2185b",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Humidity => "%",
            Metric::Temperature => "°C",
            Metric::Conductivity => "µS/cm",
            Metric::Ph => "pH",
            Metric::Nitrogen | Metric::Phosphorus | Metric::Potassium => "mg/kg",
            Metric::Battery => "V",
            Metric::Current => "mA",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "pH" {
            return Ok(Metric::Ph);
        }
        Metric::ALL
            .into_iter()
            .find(|m| m.key() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

// ==============================================================================
// sensor reading
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// capture time, defaulted to "now" by the relay when absent
    #[serde(default = "Utc::now", deserialize_with = "deserialize_fecha")]
    pub fecha: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub humedad: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub temperatura: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub conductividad: Option<f64>,
    #[serde(default, alias = "pH", deserialize_with = "deserialize_number")]
    pub ph: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub nitrogeno: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub fosforo: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub potasio: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub bateria: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub corriente: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_number")]
    pub latitud: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_number")]
    pub longitud: Option<f64>,
}

impl SensorReading {
    /// empty reading at `fecha`, truncated to millisecond precision
    pub fn at(fecha: DateTime<Utc>) -> Self {
        Self {
            fecha: truncate_to_millis(fecha),
            humedad: None,
            temperatura: None,
            conductividad: None,
            ph: None,
            nitrogeno: None,
            fosforo: None,
            potasio: None,
            bateria: None,
            corriente: None,
            latitud: None,
            longitud: None,
        }
    }

    pub fn at_millis(ts: TimestampMs) -> Self {
        Self::at(DateTime::from_timestamp_millis(ts).unwrap_or_default())
    }

    /// builder, mostly for tests
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        *self.slot_mut(metric) = Some(value);
        self
    }

    pub fn timestamp_ms(&self) -> TimestampMs {
        self.fecha.timestamp_millis()
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Humidity => self.humedad,
            Metric::Temperature => self.temperatura,
            Metric::Conductivity => self.conductividad,
            Metric::Ph => self.ph,
            Metric::Nitrogen => self.nitrogeno,
            Metric::Phosphorus => self.fosforo,
            Metric::Potassium => self.potasio,
            Metric::Battery => self.bateria,
            Metric::Current => self.corriente,
        }
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        *self.slot_mut(metric) = value;
    }

    fn slot_mut(&mut self, metric: Metric) -> &mut Option<f64> {
        match metric {
            Metric::Humidity => &mut self.humedad,
            Metric::Temperature => &mut self.temperatura,
            Metric::Conductivity => &mut self.conductividad,
            Metric::Ph => &mut self.ph,
            Metric::Nitrogen => &mut self.nitrogeno,
            Metric::Phosphorus => &mut self.fosforo,
            Metric::Potassium => &mut self.potasio,
            Metric::Battery => &mut self.bateria,
            Metric::Current => &mut self.corriente,
        }
    }

    /// gps fix, only when both coordinates are present and finite
    pub fn position(&self) -> Option<GeoPoint> {
        match (self.latitud, self.longitud) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                Some(GeoPoint { lat, lon })
            }
            _ => None,
        }
    }

    /// stored timestamps have millisecond resolution
    pub fn normalized(mut self) -> Self {
        self.fecha = truncate_to_millis(self.fecha);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

fn truncate_to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FechaRepr {
    Millis(i64),
    Float(f64),
    Text(String),
}

fn deserialize_fecha<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let parsed = match Option::<FechaRepr>::deserialize(deserializer)? {
        None => return Ok(Utc::now()),
        Some(FechaRepr::Millis(ms)) => DateTime::from_timestamp_millis(ms),
        Some(FechaRepr::Float(ms)) => DateTime::from_timestamp_millis(ms as i64),
        Some(FechaRepr::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .ok(),
    };
    parsed.ok_or_else(|| D::Error::custom("fecha is not an rfc 3339 timestamp or epoch millis"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Number(f64),
    Text(String),
}

/// json numbers or numeric strings; null and "" read as absent
fn deserialize_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let text = match Option::<NumberRepr>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(NumberRepr::Number(v)) => return Ok(Some(v)),
        Some(NumberRepr::Text(text)) => text,
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("not a number: {:?}", text)))
}

// ==============================================================================
// push channel envelope
// ==============================================================================
// {"event": "nuevoDato", "data": {...}}   one live reading
// {"event": "historico", "data": [...]}   seed, once per connection

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    #[serde(rename = "nuevoDato")]
    NuevoDato(SensorReading),
    #[serde(rename = "historico")]
    Historico(Vec<SensorReading>),
}
