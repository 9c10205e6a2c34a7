//! GoogleMapsClient - contextual snapshots and nearby search.
//!
//! Street View Static and Static Maps (satellite) images are fetched as raw
//! bytes and base64-encoded; Places nearby search returns a result count.

use async_trait::async_trait;
use civic_core::context::{NearbySearch, SnapshotProvider, SnapshotView};
use civic_core::error::{CivicError, Result};
use civic_core::geo::LatLng;
use civic_core::inference::InlineImage;
use reqwest::{Client, Request, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const STREET_VIEW_URL: &str = "https://maps.googleapis.com/maps/api/streetview";
const STATIC_MAP_URL: &str = "https://maps.googleapis.com/maps/api/staticmap";
const NEARBY_SEARCH_URL: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";

const SNAPSHOT_SIZE: &str = "640x640";
const SATELLITE_ZOOM: &str = "18";
const BACKEND_NAME: &str = "google_maps";

/// Failure of a single Maps call, before conversion to `CivicError`.
#[derive(Error, Debug)]
enum MapsError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(StatusCode),
    #[error("expected an image, got {0}")]
    NotAnImage(String),
    #[error("Places API status {0}")]
    PlacesStatus(String),
}

impl MapsError {
    fn retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(status) => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
            Self::NotAnImage(_) => false,
            Self::PlacesStatus(status) => status == "OVER_QUERY_LIMIT" || status == "UNKNOWN_ERROR",
        }
    }
}

impl From<MapsError> for CivicError {
    fn from(err: MapsError) -> Self {
        let retryable = err.retryable();
        CivicError::gateway(BACKEND_NAME, err.to_string(), retryable)
    }
}

impl From<reqwest::Error> for MapsError {
    fn from(err: reqwest::Error) -> Self {
        // Drop the URL: it carries the API key
        MapsError::Transport(err.without_url().to_string())
    }
}

#[derive(Deserialize)]
struct NearbySearchResponse {
    status: String,
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// Client for the Google Maps Platform web services.
#[derive(Clone)]
pub struct GoogleMapsClient {
    client: Client,
    api_key: String,
}

impl GoogleMapsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn snapshot_request(&self, view: SnapshotView, at: LatLng) -> std::result::Result<Request, MapsError> {
        let location = at.to_query_param();
        let builder = match view {
            SnapshotView::StreetLevel => self.client.get(STREET_VIEW_URL).query(&[
                ("size", SNAPSHOT_SIZE),
                ("location", location.as_str()),
                ("return_error_code", "true"),
                ("key", self.api_key.as_str()),
            ]),
            SnapshotView::Overhead => self.client.get(STATIC_MAP_URL).query(&[
                ("center", location.as_str()),
                ("zoom", SATELLITE_ZOOM),
                ("size", SNAPSHOT_SIZE),
                ("maptype", "satellite"),
                ("key", self.api_key.as_str()),
            ]),
        };
        Ok(builder.build()?)
    }

    fn nearby_request(
        &self,
        at: LatLng,
        radius_m: u32,
        keyword: &str,
    ) -> std::result::Result<Request, MapsError> {
        let location = at.to_query_param();
        let radius = radius_m.to_string();
        Ok(self
            .client
            .get(NEARBY_SEARCH_URL)
            .query(&[
                ("location", location.as_str()),
                ("radius", radius.as_str()),
                ("keyword", keyword),
                ("key", self.api_key.as_str()),
            ])
            .build()?)
    }

    async fn fetch_snapshot(
        &self,
        view: SnapshotView,
        at: LatLng,
    ) -> std::result::Result<InlineImage, MapsError> {
        let request = self.snapshot_request(view, at)?;
        let response = self.client.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MapsError::Status(status));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        if !mime_type.starts_with("image/") {
            return Err(MapsError::NotAnImage(mime_type));
        }

        let bytes = response.bytes().await?;
        debug!(%view, bytes = bytes.len(), "Snapshot captured");
        Ok(InlineImage::from_bytes(mime_type, &bytes))
    }

    async fn search_nearby(
        &self,
        at: LatLng,
        radius_m: u32,
        keyword: &str,
    ) -> std::result::Result<usize, MapsError> {
        let request = self.nearby_request(at, radius_m, keyword)?;
        let response = self.client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MapsError::Status(status));
        }
        let body: NearbySearchResponse = response.json().await?;
        count_results(body)
    }
}

fn count_results(body: NearbySearchResponse) -> std::result::Result<usize, MapsError> {
    match body.status.as_str() {
        "OK" => Ok(body.results.len()),
        "ZERO_RESULTS" => Ok(0),
        _ => Err(MapsError::PlacesStatus(body.status)),
    }
}

#[async_trait]
impl SnapshotProvider for GoogleMapsClient {
    async fn capture(&self, view: SnapshotView, at: LatLng) -> Result<InlineImage> {
        Ok(self.fetch_snapshot(view, at).await?)
    }
}

#[async_trait]
impl NearbySearch for GoogleMapsClient {
    async fn count_nearby(&self, at: LatLng, radius_m: u32, keyword: &str) -> Result<usize> {
        Ok(self.search_nearby(at, radius_m, keyword).await?)
    }
}
