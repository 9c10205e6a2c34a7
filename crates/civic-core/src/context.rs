//! Mapping collaborators consumed by the vision and scoring pipelines.

use crate::error::Result;
use crate::geo::LatLng;
use crate::inference::InlineImage;
use async_trait::async_trait;

/// Which contextual snapshot to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SnapshotView {
    /// Ground-level imagery, used for architectural style.
    StreetLevel,
    /// Satellite imagery, used for layout.
    Overhead,
}

/// Fetches contextual imagery for a coordinate.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn capture(&self, view: SnapshotView, at: LatLng) -> Result<InlineImage>;
}

/// Counts businesses near a coordinate.
#[async_trait]
pub trait NearbySearch: Send + Sync {
    /// Number of places matching `keyword` within `radius_m` metres.
    async fn count_nearby(&self, at: LatLng, radius_m: u32, keyword: &str) -> Result<usize>;
}
