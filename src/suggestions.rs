use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::WorkCache;
use crate::clustering::VisitCluster;
use crate::config::EngineConfig;
use crate::errors::{LookupError, ProcessingError, VisionError};
use crate::photos::{Coordinate, PhotoAsset, ProcessedImage};
use crate::places::PlacesService;
use crate::ports::{IdentifiedPlace, PhotoProcessor, PlaceCandidate, PlaceLookup, VisionIdentifier};
use crate::vision::VisionService;

/// Lifecycle of a suggestion while the builder fills it in, plus the two
/// user-driven terminal states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SuggestionStatus {
    PendingPhotoProcessing,
    IdentifyingWithVision,
    VisionSucceeded,
    VisionFailed { message: String },
    Identified {
        name: String,
        address: Option<String>,
        place_id: Option<String>,
    },
    IdentificationFailed { message: String },
    UserConfirmed,
    UserIgnored,
}

impl SuggestionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SuggestionStatus::UserConfirmed | SuggestionStatus::UserIgnored
        )
    }

    /// Both identification branches have settled, one way or the other.
    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            SuggestionStatus::Identified { .. } | SuggestionStatus::IdentificationFailed { .. }
        )
    }
}

/// A visit cluster enriched with a candidate identification and nearby
/// alternatives, awaiting user confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct VisitSuggestion {
    pub id: String,
    pub cluster: VisitCluster,
    pub vision_pick: Option<IdentifiedPlace>,
    pub nearby_candidates: Vec<PlaceCandidate>,
    /// Human-readable nearby-search failure, independent of the vision branch.
    pub nearby_error: Option<String>,
    pub status: SuggestionStatus,
}

impl VisitSuggestion {
    fn set_status(&mut self, status: SuggestionStatus) {
        debug!(suggestion = %self.id, ?status, "suggestion status change");
        self.status = status;
    }

    /// User accepted the suggestion. Allowed from any non-terminal state.
    pub fn confirm(&mut self) {
        if !self.status.is_terminal() {
            self.set_status(SuggestionStatus::UserConfirmed);
        }
    }

    /// User dismissed the suggestion. Allowed from any non-terminal state.
    pub fn ignore(&mut self) {
        if !self.status.is_terminal() {
            self.set_status(SuggestionStatus::UserIgnored);
        }
    }
}

/// Key shared by the nearby-search and vision caches. Depends on member
/// identity and rounded location, not on cluster object identity, so a
/// rebuilt cluster with the same members hits the same entries.
pub fn composite_key(cluster: &VisitCluster) -> String {
    let mut ids: Vec<&str> = cluster
        .member_asset_ids
        .iter()
        .map(String::as_str)
        .collect();
    ids.sort_unstable();
    format!(
        "{}@{}",
        ids.join("|"),
        cluster.average_coordinate.key_fragment()
    )
}

fn suggestion_id(cluster: &VisitCluster) -> String {
    let mut hasher = Sha256::new();
    hasher.update(composite_key(cluster).as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&hasher.finalize()[..12])
}

/// The three cross-suggestion caches. All shared mutable state in the engine
/// lives here; every mutation goes through [`WorkCache`]'s serialized access
/// point.
#[derive(Clone, Default)]
pub struct EngineCaches {
    pub images: WorkCache<String, ProcessedImage, ProcessingError>,
    pub nearby: WorkCache<String, Vec<PlaceCandidate>, LookupError>,
    pub vision: WorkCache<String, IdentifiedPlace, VisionError>,
}

impl EngineCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_all(&self) {
        self.images.clear();
        self.nearby.clear();
        self.vision.clear();
    }
}

pub struct SuggestionBuilder {
    processor: Arc<dyn PhotoProcessor>,
    places: PlacesService,
    vision: VisionService,
    caches: EngineCaches,
    nearby_radius_m: f64,
    max_vision_photos: usize,
}

impl SuggestionBuilder {
    pub fn new(
        processor: Arc<dyn PhotoProcessor>,
        places: PlacesService,
        vision: VisionService,
        caches: EngineCaches,
        config: &EngineConfig,
    ) -> Self {
        Self {
            processor,
            places,
            vision,
            caches,
            nearby_radius_m: config.nearby_radius_m,
            max_vision_photos: config.max_vision_photos,
        }
    }

    pub fn caches(&self) -> &EngineCaches {
        &self.caches
    }

    /// Builds a fully-populated suggestion for one cluster. Never errors:
    /// upstream failures end up as status data on the returned suggestion.
    pub async fn build_suggestion(
        &self,
        cluster: &VisitCluster,
        assets: &HashMap<String, PhotoAsset>,
    ) -> VisitSuggestion {
        let mut suggestion = VisitSuggestion {
            id: suggestion_id(cluster),
            cluster: cluster.clone(),
            vision_pick: None,
            nearby_candidates: Vec::new(),
            nearby_error: None,
            status: SuggestionStatus::PendingPhotoProcessing,
        };
        self.populate(&mut suggestion, assets).await;
        suggestion
    }

    /// Re-runs the build for an existing suggestion, typically after the
    /// caches were cleared or an upstream failure was transient. Keeps the
    /// suggestion's id; terminal suggestions are left untouched.
    pub async fn refresh(
        &self,
        suggestion: &mut VisitSuggestion,
        assets: &HashMap<String, PhotoAsset>,
    ) {
        if suggestion.status.is_terminal() {
            return;
        }
        suggestion.vision_pick = None;
        suggestion.nearby_candidates.clear();
        suggestion.nearby_error = None;
        suggestion.set_status(SuggestionStatus::PendingPhotoProcessing);
        self.populate(suggestion, assets).await;
    }

    async fn populate(
        &self,
        suggestion: &mut VisitSuggestion,
        assets: &HashMap<String, PhotoAsset>,
    ) {
        let images = self.process_member_photos(&suggestion.cluster, assets).await;
        let key = composite_key(&suggestion.cluster);
        let center = suggestion.cluster.average_coordinate;

        let nearby_fut = self.nearby_cached(key.clone(), center);

        if images.is_empty() {
            // Nothing to show vision; nearby search still runs so the user
            // can pick a candidate manually.
            warn!(
                suggestion = %suggestion.id,
                "no member photos could be processed; skipping vision"
            );
            match nearby_fut.await {
                Ok(candidates) => suggestion.nearby_candidates = candidates,
                Err(err) => suggestion.nearby_error = Some(err),
            }
            suggestion.set_status(SuggestionStatus::IdentificationFailed {
                message: "no member photos could be processed".into(),
            });
            return;
        }

        suggestion.set_status(SuggestionStatus::IdentifyingWithVision);

        // Independent branches: a failure in one never cancels the other.
        // The vision compute awaits the same nearby cache entry for context,
        // so the search still happens at most once per composite key.
        let vision_fut = self.vision_cached(key, center, images);
        let (nearby_result, vision_result) = tokio::join!(nearby_fut, vision_fut);

        match nearby_result {
            Ok(candidates) => suggestion.nearby_candidates = candidates,
            Err(message) => {
                warn!(suggestion = %suggestion.id, %message, "nearby search failed");
                suggestion.nearby_error = Some(message);
            }
        }

        match vision_result {
            Ok(pick) => {
                suggestion.set_status(SuggestionStatus::VisionSucceeded);
                suggestion.set_status(SuggestionStatus::Identified {
                    name: pick.name.clone(),
                    address: pick.address.clone(),
                    place_id: pick.place_id.clone(),
                });
                suggestion.vision_pick = Some(pick);
            }
            Err(message) => {
                warn!(suggestion = %suggestion.id, %message, "vision identification failed");
                suggestion.set_status(SuggestionStatus::VisionFailed {
                    message: message.clone(),
                });
                suggestion.set_status(SuggestionStatus::IdentificationFailed { message });
            }
        }
    }

    /// Runs the first few member photos through the image cache. Individual
    /// failures are logged and skipped; the cluster proceeds with whatever
    /// subset succeeded.
    async fn process_member_photos(
        &self,
        cluster: &VisitCluster,
        assets: &HashMap<String, PhotoAsset>,
    ) -> Vec<ProcessedImage> {
        let mut images = Vec::new();
        for asset_id in cluster.member_asset_ids.iter().take(self.max_vision_photos) {
            let Some(asset) = assets.get(asset_id) else {
                warn!(%asset_id, "cluster member missing from asset index");
                continue;
            };
            let processor = Arc::clone(&self.processor);
            let asset = asset.clone();
            let result = self
                .caches
                .images
                .get(asset_id.clone(), move |_| async move {
                    processor.process(&asset).await
                })
                .await;
            match result {
                Ok(image) => images.push(image),
                Err(err) => warn!(%asset_id, %err, "failed to process member photo"),
            }
        }
        images
    }

    async fn nearby_cached(
        &self,
        key: String,
        center: Coordinate,
    ) -> Result<Vec<PlaceCandidate>, String> {
        let places = self.places.clone();
        let radius = self.nearby_radius_m;
        self.caches
            .nearby
            .get(key, move |_| async move {
                places.search_nearby(center, radius).await
            })
            .await
            .map_err(|err| err.to_string())
    }

    async fn vision_cached(
        &self,
        key: String,
        center: Coordinate,
        images: Vec<ProcessedImage>,
    ) -> Result<IdentifiedPlace, String> {
        let vision = self.vision.clone();
        let places = self.places.clone();
        let nearby_cache = self.caches.nearby.clone();
        let radius = self.nearby_radius_m;
        let context_key = key.clone();
        self.caches
            .vision
            .get(key, move |_| async move {
                // Best-effort context: an unavailable nearby list must not
                // fail identification.
                let context = nearby_cache
                    .get(context_key, move |_| async move {
                        places.search_nearby(center, radius).await
                    })
                    .await
                    .unwrap_or_default();
                vision.identify(&images, center, &context).await
            })
            .await
            .map_err(|err| err.to_string())
    }
}
