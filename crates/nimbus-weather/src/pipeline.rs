//! One update attempt: locate, then fetch weather and place together.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::geocode::PlaceSource;
use crate::location::LocationSource;
use crate::provider::WeatherSource;
use crate::types::{PlaceInfo, Position, WeatherSnapshot};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("No location available")]
    NoLocation,
    #[error("Location request failed: {0}")]
    Location(String),
    #[error("Weather unavailable: {0}")]
    WeatherUnavailable(String),
    #[error("Place unavailable: {0}")]
    PlaceUnavailable(String),
    #[error("Update timed out")]
    Timeout,
    #[error("Update cancelled")]
    Canceled,
}

/// Result of a successful attempt. `place` is `None` when only the reverse
/// geocode failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedUpdate {
    pub position: Position,
    pub weather: WeatherSnapshot,
    pub place: Option<PlaceInfo>,
}

#[derive(Clone)]
pub struct FetchPipeline {
    location: Arc<dyn LocationSource>,
    weather: Arc<dyn WeatherSource>,
    places: Arc<dyn PlaceSource>,
    timeout: Duration,
}

impl FetchPipeline {
    pub fn new(
        location: Arc<dyn LocationSource>,
        weather: Arc<dyn WeatherSource>,
        places: Arc<dyn PlaceSource>,
    ) -> Self {
        Self {
            location,
            weather,
            places,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a single attempt. Returns [`FetchError::Canceled`] as soon as
    /// `cancel` fires; dropping the in-flight futures aborts their requests.
    pub async fn fetch_once(&self, cancel: &CancellationToken) -> Result<FetchedUpdate, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Canceled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Canceled),
            result = tokio::time::timeout(self.timeout, self.attempt(cancel)) => {
                result.unwrap_or(Err(FetchError::Timeout))
            }
        }
    }

    async fn attempt(&self, cancel: &CancellationToken) -> Result<FetchedUpdate, FetchError> {
        let position = match self.location.current_position(cancel).await {
            Ok(Some(position)) => position,
            Ok(None) => return Err(FetchError::NoLocation),
            Err(e) => return Err(FetchError::Location(e.to_string())),
        };
        tracing::debug!("Got location: {}, {}", position.latitude, position.longitude);

        let (weather, place) = tokio::join!(
            self.weather.current_weather(position),
            self.places.reverse_geocode(position),
        );

        let weather = weather.map_err(|e| FetchError::WeatherUnavailable(e.to_string()))?;
        let place = match place {
            Ok(place) => Some(place),
            Err(e) => {
                let err = FetchError::PlaceUnavailable(e.to_string());
                tracing::warn!("{}; keeping weather result", err);
                None
            }
        };

        Ok(FetchedUpdate {
            position,
            weather,
            place,
        })
    }
}

impl std::fmt::Debug for FetchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPipeline")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scriptable collaborators shared by the pipeline and scheduler tests.
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use crate::geocode::PlaceSource;
    use crate::location::LocationSource;
    use crate::provider::WeatherSource;
    use crate::types::*;

    pub fn snapshot(temperature: f64) -> WeatherSnapshot {
        WeatherSnapshot {
            temperature,
            temp_min: temperature - 3.0,
            temp_max: temperature + 4.0,
            feels_like: temperature - 1.0,
            humidity: 45,
            pressure: 1012.0,
            visibility: 9000,
            wind: Wind {
                speed: 6.0,
                direction: 200.0,
                gust: None,
            },
            precipitation: Precipitation::default(),
            cloud_cover: 10,
            condition_code: 800,
            description: "clear sky".to_string(),
            sunrise_epoch_sec: 1_700_000_000,
            sunset_epoch_sec: 1_700_040_000,
            timezone_offset_sec: -21600,
            fetched_at_epoch_ms: 1_700_000_000_000,
        }
    }

    pub fn fort_worth() -> PlaceInfo {
        PlaceInfo {
            name: "Fort Worth".to_string(),
            country: "US".to_string(),
            region: Some("TX".to_string()),
        }
    }

    /// What a scripted location source does when asked.
    pub enum LocationScript {
        At(Position),
        Nowhere,
        Fail,
        /// Cancel the caller's token, then never answer.
        CancelAndHang,
        Hang,
    }

    pub struct ScriptedLocation {
        pub script: Mutex<LocationScript>,
        pub calls: AtomicUsize,
    }

    impl ScriptedLocation {
        pub fn new(script: LocationScript) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn at_fort_worth() -> Self {
            Self::new(LocationScript::At(Position {
                latitude: 32.75,
                longitude: -97.33,
            }))
        }

        pub fn set(&self, script: LocationScript) {
            *self.script.lock() = script;
        }
    }

    #[async_trait]
    impl LocationSource for ScriptedLocation {
        async fn current_position(
            &self,
            cancel: &CancellationToken,
        ) -> Result<Option<Position>, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let action = match &*self.script.lock() {
                LocationScript::At(p) => Ok(Some(*p)),
                LocationScript::Nowhere => Ok(None),
                LocationScript::Fail => Err(LocationError::ServiceUnavailable),
                LocationScript::CancelAndHang => {
                    cancel.cancel();
                    Err(LocationError::Other("hang".into()))
                }
                LocationScript::Hang => Err(LocationError::Other("hang".into())),
            };
            match action {
                Err(LocationError::Other(_)) => std::future::pending().await,
                other => other,
            }
        }
    }

    /// Serves a queue of weather results; the last one repeats.
    pub struct ScriptedWeather {
        pub results: Mutex<Vec<Result<WeatherSnapshot, u16>>>,
    }

    impl ScriptedWeather {
        pub fn ok(temperature: f64) -> Self {
            Self {
                results: Mutex::new(vec![Ok(snapshot(temperature))]),
            }
        }

        pub fn failing(status: u16) -> Self {
            Self {
                results: Mutex::new(vec![Err(status)]),
            }
        }

        pub fn set(&self, result: Result<WeatherSnapshot, u16>) {
            *self.results.lock() = vec![result];
        }
    }

    #[async_trait]
    impl WeatherSource for ScriptedWeather {
        async fn current_weather(&self, _position: Position) -> Result<WeatherSnapshot, WeatherError> {
            let mut results = self.results.lock();
            let next = if results.len() > 1 {
                results.remove(0)
            } else {
                results[0].clone()
            };
            next.map_err(|status| WeatherError::Status { status })
        }
    }

    pub struct ScriptedPlaces {
        pub result: Mutex<Option<PlaceInfo>>,
    }

    impl ScriptedPlaces {
        pub fn ok(place: PlaceInfo) -> Self {
            Self {
                result: Mutex::new(Some(place)),
            }
        }

        pub fn empty() -> Self {
            Self {
                result: Mutex::new(None),
            }
        }

        pub fn set(&self, place: Option<PlaceInfo>) {
            *self.result.lock() = place;
        }
    }

    #[async_trait]
    impl PlaceSource for ScriptedPlaces {
        async fn reverse_geocode(&self, _position: Position) -> Result<PlaceInfo, WeatherError> {
            self.result.lock().clone().ok_or(WeatherError::NoPlace)
        }
    }
}
