//! OpenWeather current-conditions client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::types::{
    Position, Precipitation, Units, WeatherError, WeatherSnapshot, Wind,
};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Source of current weather for a position.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current_weather(&self, position: Position) -> Result<WeatherSnapshot, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    weather: Vec<ApiCondition>,
    main: ApiMain,
    #[serde(default)]
    visibility: u32,
    #[serde(default)]
    wind: ApiWind,
    #[serde(default)]
    clouds: ApiClouds,
    rain: Option<ApiVolume>,
    snow: Option<ApiVolume>,
    sys: ApiSys,
    #[serde(default)]
    timezone: i32,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    id: u32,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ApiMain {
    temp: f64,
    feels_like: f64,
    temp_min: f64,
    temp_max: f64,
    pressure: f64,
    humidity: u8,
}

#[derive(Debug, Default, Deserialize)]
struct ApiWind {
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    deg: f64,
    gust: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiClouds {
    #[serde(default)]
    all: u8,
}

#[derive(Debug, Deserialize)]
struct ApiVolume {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

impl ApiVolume {
    fn latest(&self) -> Option<f64> {
        self.one_hour.or(self.three_hours)
    }
}

#[derive(Debug, Deserialize)]
struct ApiSys {
    #[serde(default)]
    sunrise: i64,
    #[serde(default)]
    sunset: i64,
}

impl ApiResponse {
    fn into_snapshot(self) -> Result<WeatherSnapshot, WeatherError> {
        let condition = self
            .weather
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::Parse("response has no weather conditions".into()))?;

        Ok(WeatherSnapshot {
            temperature: self.main.temp,
            temp_min: self.main.temp_min,
            temp_max: self.main.temp_max,
            feels_like: self.main.feels_like,
            humidity: self.main.humidity,
            pressure: self.main.pressure,
            visibility: self.visibility,
            wind: Wind {
                speed: self.wind.speed,
                direction: self.wind.deg,
                gust: self.wind.gust,
            },
            precipitation: Precipitation::from_volumes(
                self.rain.as_ref().and_then(ApiVolume::latest),
                self.snow.as_ref().and_then(ApiVolume::latest),
            ),
            cloud_cover: self.clouds.all,
            condition_code: condition.id,
            description: condition.description,
            sunrise_epoch_sec: self.sys.sunrise,
            sunset_epoch_sec: self.sys.sunset,
            timezone_offset_sec: self.timezone,
            // Stamped by the scheduler when the update is committed
            fetched_at_epoch_ms: 0,
        })
    }
}

/// HTTP client for the OpenWeather current-weather and reverse-geocoding APIs.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    pub(crate) client: Arc<Client>,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    units: Units,
}

impl OpenWeatherClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        units: Units,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            units,
        })
    }

    pub fn units(&self) -> Units {
        self.units
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn current_weather(&self, position: Position) -> Result<WeatherSnapshot, WeatherError> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", position.latitude.to_string()),
                ("lon", position.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", self.units.as_query().to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Weather request returned status {}", status);
            return Err(WeatherError::Status {
                status: status.as_u16(),
            });
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        body.into_snapshot()
    }
}
