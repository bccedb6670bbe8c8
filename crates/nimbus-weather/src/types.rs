use serde::{Deserialize, Serialize};

const METERS_PER_MILE: f64 = 1609.34;
const HPA_PER_INHG: f64 = 33.864;

/// Unit system requested from the weather provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Imperial,
    Metric,
    Standard,
}

impl Units {
    /// Value of the provider's `units` query parameter
    pub fn as_query(&self) -> &'static str {
        match self {
            Self::Imperial => "imperial",
            Self::Metric => "metric",
            Self::Standard => "standard",
        }
    }
}

/// Weather condition categories mapped from provider condition codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert an OpenWeather condition id to a WeatherCondition
    /// See: https://openweathermap.org/weather-conditions
    pub fn from_condition_code(code: u32) -> Self {
        match code {
            200..=299 => Self::Thunderstorm,
            300..=399 => Self::Drizzle,
            511 => Self::Sleet, // Freezing rain
            502..=504 | 522 | 531 => Self::HeavyRain,
            500..=599 => Self::Rain,
            611..=616 => Self::Sleet,
            600..=699 => Self::Snow,
            700..=799 => Self::Fog, // Mist, haze, dust, smoke
            801 | 802 => Self::PartlyCloudy,
            803 | 804 => Self::Cloudy,
            _ => Self::Clear,
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
        }
    }
}

/// Geographic position reported by a location source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Wind reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Wind {
    pub speed: f64,
    /// Meteorological degrees
    pub direction: f64,
    pub gust: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrecipitationKind {
    #[default]
    None,
    Rain,
    Snow,
}

/// Precipitation volume over the provider's most recent window (mm)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Precipitation {
    pub kind: PrecipitationKind,
    pub amount: f64,
}

impl Precipitation {
    /// Snow takes precedence over rain when both are reported.
    pub fn from_volumes(rain: Option<f64>, snow: Option<f64>) -> Self {
        match (rain.unwrap_or(0.0), snow.unwrap_or(0.0)) {
            (_, snow) if snow > 0.0 => Self {
                kind: PrecipitationKind::Snow,
                amount: snow,
            },
            (rain, _) if rain > 0.0 => Self {
                kind: PrecipitationKind::Rain,
                amount: rain,
            },
            _ => Self::default(),
        }
    }
}

/// Point-in-time weather reading. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub temperature: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub feels_like: f64,
    /// Relative humidity in percent
    pub humidity: u8,
    /// Sea-level pressure in hPa
    pub pressure: f64,
    /// Visibility in metres
    pub visibility: u32,
    pub wind: Wind,
    pub precipitation: Precipitation,
    /// Cloud cover in percent
    pub cloud_cover: u8,
    pub condition_code: u32,
    pub description: String,
    pub sunrise_epoch_sec: i64,
    pub sunset_epoch_sec: i64,
    pub timezone_offset_sec: i32,
    pub fetched_at_epoch_ms: u64,
}

impl WeatherSnapshot {
    pub fn condition(&self) -> WeatherCondition {
        WeatherCondition::from_condition_code(self.condition_code)
    }

    pub fn visibility_miles(&self) -> f64 {
        f64::from(self.visibility) / METERS_PER_MILE
    }

    pub fn pressure_in_hg(&self) -> f64 {
        self.pressure / HPA_PER_INHG
    }
}

/// Reverse-geocoded place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceInfo {
    pub name: String,
    pub country: String,
    /// State or province, when the provider knows it
    #[serde(default)]
    pub region: Option<String>,
}

impl PlaceInfo {
    /// "Fort Worth, TX" when a region is known, otherwise "Paris, FR".
    pub fn display_name(&self) -> String {
        match self.region.as_deref().filter(|r| !r.is_empty()) {
            Some(region) => format!("{}, {}", self.name, region),
            None => format!("{}, {}", self.name, self.country),
        }
    }
}

/// Location service errors
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Location service unavailable")]
    ServiceUnavailable,
    #[error("Location request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Location error: {0}")]
    Other(String),
}

/// Weather and geocoding provider errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Provider returned status {status}")]
    Status { status: u16 },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("No place found for position")]
    NoPlace,
}
