//! Reverse geocoding: convert coordinates to a place name.
//! Uses the OpenWeather geocoding endpoint, sharing the weather client.

use async_trait::async_trait;
use serde::Deserialize;

use crate::provider::OpenWeatherClient;
use crate::types::{PlaceInfo, Position, WeatherError};

#[async_trait]
pub trait PlaceSource: Send + Sync {
    async fn reverse_geocode(&self, position: Position) -> Result<PlaceInfo, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct GeoPlace {
    name: String,
    #[serde(default)]
    country: String,
    state: Option<String>,
}

impl From<GeoPlace> for PlaceInfo {
    fn from(place: GeoPlace) -> Self {
        Self {
            name: place.name,
            country: place.country,
            region: place.state.filter(|s| !s.is_empty()),
        }
    }
}

#[async_trait]
impl PlaceSource for OpenWeatherClient {
    async fn reverse_geocode(&self, position: Position) -> Result<PlaceInfo, WeatherError> {
        let url = format!("{}/geo/1.0/reverse", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", position.latitude.to_string()),
                ("lon", position.longitude.to_string()),
                ("limit", "1".to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Reverse geocode returned status {}", status);
            return Err(WeatherError::Status {
                status: status.as_u16(),
            });
        }

        let places: Vec<GeoPlace> = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        let place: PlaceInfo = places.into_iter().next().ok_or(WeatherError::NoPlace)?.into();
        tracing::debug!("Reverse geocoded to: {}", place.display_name());
        Ok(place)
    }
}
