//! Location sources: where is the device right now?

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::types::{LocationError, Position};

const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "Nimbus/0.1.0";

/// One-shot position request.
///
/// `Ok(None)` means the source answered but has no position to give, which is
/// different from failing to answer.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Position>, LocationError>;
}

/// Always reports the configured coordinates.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation {
    position: Position,
}

impl FixedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Position {
                latitude,
                longitude,
            },
        }
    }
}

#[async_trait]
impl LocationSource for FixedLocation {
    async fn current_position(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Option<Position>, LocationError> {
        Ok(Some(self.position))
    }
}

#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    status: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Coarse position from an IP geolocation service.
#[derive(Debug, Clone)]
pub struct IpLocation {
    client: Client,
    url: String,
}

impl IpLocation {
    pub fn new(url: impl Into<String>) -> Result<Self, LocationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn lookup(&self) -> Result<Option<Position>, LocationError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if status.is_server_error() {
            tracing::debug!("IP lookup returned status {}", status);
            return Err(LocationError::ServiceUnavailable);
        }
        if !status.is_success() {
            return Err(LocationError::Other(format!(
                "IP lookup returned status {}",
                status
            )));
        }

        let body: IpLookupResponse = response.json().await?;
        if body.status != "success" {
            tracing::debug!("IP lookup reported status {:?}", body.status);
            return Ok(None);
        }

        Ok(body.lat.zip(body.lon).map(|(latitude, longitude)| Position {
            latitude,
            longitude,
        }))
    }
}

#[async_trait]
impl LocationSource for IpLocation {
    async fn current_position(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Position>, LocationError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(LocationError::Other("Location request cancelled".into())),
            result = self.lookup() => result,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fixed_location() {
        let source = FixedLocation::new(32.75, -97.33);
        let pos = source
            .current_position(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.latitude, 32.75);
        assert_eq!(pos.longitude, -97.33);
    }

    #[tokio::test]
    async fn test_ip_location_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "lat": 32.7555,
                "lon": -97.3308,
                "city": "Fort Worth"
            })))
            .mount(&mock_server)
            .await;

        let source = IpLocation::new(format!("{}/json", mock_server.uri())).unwrap();
        let pos = source
            .current_position(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.latitude, 32.7555);
        assert_eq!(pos.longitude, -97.3308);
    }

    #[tokio::test]
    async fn test_ip_location_fail_status_is_no_position() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "fail",
                "message": "reserved range"
            })))
            .mount(&mock_server)
            .await;

        let source = IpLocation::new(format!("{}/json", mock_server.uri())).unwrap();
        let pos = source
            .current_position(&CancellationToken::new())
            .await
            .unwrap();
        assert!(pos.is_none());
    }

    #[tokio::test]
    async fn test_ip_location_server_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let source = IpLocation::new(format!("{}/json", mock_server.uri())).unwrap();
        let result = source.current_position(&CancellationToken::new()).await;
        assert!(matches!(result, Err(LocationError::ServiceUnavailable)));
    }

    #[tokio::test]
    async fn test_ip_location_client_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let source = IpLocation::new(format!("{}/json", mock_server.uri())).unwrap();
        let result = source.current_position(&CancellationToken::new()).await;
        assert!(matches!(result, Err(LocationError::Other(_))));
    }

    #[tokio::test]
    async fn test_ip_location_cancelled() {
        let source = IpLocation::new("http://127.0.0.1:9/json").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(source.current_position(&cancel).await.is_err());
    }
}
