use async_trait::async_trait;
use serde::Serialize;

use crate::errors::{GenerationError, LookupError, ProcessingError, VisionError};
use crate::photos::{Coordinate, PhotoAsset, ProcessedImage};

/// One nearby-place hit, ranked by ascending distance from the query point.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceCandidate {
    pub id: String,
    pub display_name: String,
    pub address: Option<String>,
    pub types: Vec<String>,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaceDetails {
    pub place_id: String,
    pub name: String,
    pub formatted_address: Option<String>,
    pub coordinate: Coordinate,
    pub types: Vec<String>,
}

/// Best-guess identification produced by the vision port.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifiedPlace {
    pub name: String,
    pub address: Option<String>,
    pub place_id: Option<String>,
    pub coordinate: Option<Coordinate>,
    /// Clamped to 0.0..=1.0 by every adapter.
    pub confidence: f64,
    pub reasoning: String,
}

/// Context handed to generation providers when drafting review text.
#[derive(Debug, Clone)]
pub struct DraftContext {
    pub place_name: String,
    pub address: Option<String>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
    /// Normalized photo payloads, included only when the caller opted in.
    pub photos: Vec<Vec<u8>>,
}

#[async_trait]
pub trait PhotoProcessor: Send + Sync {
    async fn process(&self, asset: &PhotoAsset) -> Result<ProcessedImage, ProcessingError>;
}

#[async_trait]
pub trait PlaceLookup: Send + Sync {
    async fn search_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Vec<PlaceCandidate>, LookupError>;

    async fn fetch_details(&self, place_id: &str) -> Result<PlaceDetails, LookupError>;
}

#[async_trait]
pub trait VisionIdentifier: Send + Sync {
    async fn identify(
        &self,
        images: &[ProcessedImage],
        coordinate_hint: Coordinate,
        nearby_context: &[PlaceCandidate],
    ) -> Result<IdentifiedPlace, VisionError>;
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Requests `count` distinct drafts in one call. Returning fewer than
    /// `count` is allowed; the orchestrator marks the shortfall per item.
    async fn generate_drafts(
        &self,
        context: &DraftContext,
        count: usize,
    ) -> Result<Vec<String>, GenerationError>;
}
