// Seoul bus open API client.
//
// Endpoints (ws.bus.go.kr):
// - Station list by route: /api/rest/busRouteInfo/getStaionByRoute
// - Bus positions by route: /api/rest/buspos/getBusPosByRtid
//
// Both are asked for `_type=json` and both answer in XML anyway.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::catalog::{StopRecord, build_catalog};
use crate::error::{BusError, Result};
use crate::markup::parse_markup;
use crate::transform::{JsonValue, transform_document};

pub const DEFAULT_BASE_URL: &str = "http://ws.bus.go.kr/api/rest";

/// Raw text transport. The HTTP implementation is the only one the server
/// uses; tests substitute canned responses.
#[async_trait]
pub trait TransitFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BusError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl TransitFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BusError::NetworkError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BusError::NetworkError(format!(
                "API returned error: {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| BusError::NetworkError(format!("Failed to read response: {}", e)))
    }
}

pub struct BusApi<F> {
    fetcher: F,
    base_url: String,
    service_key: String,
}

impl<F: TransitFetcher> BusApi<F> {
    pub fn new(fetcher: F, base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        BusApi {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    // The service key is issued already percent-encoded and goes in verbatim.
    pub fn station_list_url(&self, route_id: &str) -> String {
        format!(
            "{}/busRouteInfo/getStaionByRoute?serviceKey={}&busRouteId={}&_type=json",
            self.base_url, self.service_key, route_id
        )
    }

    pub fn bus_positions_url(&self, route_id: &str) -> String {
        format!(
            "{}/buspos/getBusPosByRtid?serviceKey={}&busRouteId={}&_type=json",
            self.base_url, self.service_key, route_id
        )
    }

    /// Fetches a response and turns its XML body into a JSON-like tree.
    pub async fn fetch_document(&self, url: &str) -> Result<JsonValue> {
        let body = self.fetcher.fetch_text(url).await?;
        debug!(bytes = body.len(), "📥 API response received");

        let root = parse_markup(&body)?;
        Ok(transform_document(&root))
    }

    pub async fn station_list(&self, route_id: &str) -> Result<Vec<StopRecord>> {
        let document = self.fetch_document(&self.station_list_url(route_id)).await?;
        Ok(build_catalog(&document))
    }

    /// The raw position response; reconciliation navigates the envelope.
    pub async fn bus_positions(&self, route_id: &str) -> Result<JsonValue> {
        self.fetch_document(&self.bus_positions_url(route_id)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies by URL substring and records every request.
    #[derive(Default)]
    pub struct CannedFetcher {
        pub bodies: Mutex<HashMap<String, String>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl CannedFetcher {
        pub fn with(self, url_part: &str, body: &str) -> Self {
            self.bodies
                .lock()
                .unwrap()
                .insert(url_part.to_string(), body.to_string());
            self
        }
    }

    #[async_trait]
    impl TransitFetcher for CannedFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            self.requests.lock().unwrap().push(url.to_string());
            self.bodies
                .lock()
                .unwrap()
                .iter()
                .find(|(part, _)| url.contains(part.as_str()))
                .map(|(_, body)| body.clone())
                .ok_or_else(|| BusError::NetworkError(format!("API returned error: 404 for {}", url)))
        }
    }

    #[test]
    fn urls_carry_key_route_and_json_type() {
        let api = BusApi::new(CannedFetcher::default(), "http://example.test/api/rest/", "a%2Bb%3D%3D");

        assert_eq!(
            api.station_list_url("100100118"),
            "http://example.test/api/rest/busRouteInfo/getStaionByRoute?serviceKey=a%2Bb%3D%3D&busRouteId=100100118&_type=json"
        );
        assert_eq!(
            api.bus_positions_url("100100118"),
            "http://example.test/api/rest/buspos/getBusPosByRtid?serviceKey=a%2Bb%3D%3D&busRouteId=100100118&_type=json"
        );
    }

    #[tokio::test]
    async fn station_list_transforms_xml_body() {
        let fetcher = CannedFetcher::default().with(
            "getStaionByRoute",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ServiceResult><msgBody><itemList><stationNm>서울역</stationNm><seq>1</seq></itemList></msgBody></ServiceResult>"#,
        );
        let api = BusApi::new(fetcher, DEFAULT_BASE_URL, "key");

        let stops = api.station_list("100100118").await.unwrap();

        assert_eq!(stops, vec![StopRecord { name: "서울역".into(), sequence: "1".into() }]);
    }

    #[tokio::test]
    async fn transport_and_parse_failures_are_errors() {
        let api = BusApi::new(
            CannedFetcher::default().with("getBusPosByRtid", "not xml <"),
            DEFAULT_BASE_URL,
            "key",
        );

        assert!(matches!(api.station_list("1").await, Err(BusError::NetworkError(_))));
        assert!(matches!(api.bus_positions("1").await, Err(BusError::ParseError(_))));
    }
}
