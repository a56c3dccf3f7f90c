mod cache;
mod clustering;
mod config;
mod drafts;
mod errors;
mod photos;
mod places;
mod ports;
mod providers;
mod suggestions;
mod vision;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use futures_util::future::join_all;
use once_cell::sync::OnceCell;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::{CacheError, WorkCache};
pub use crate::clustering::{cluster_assets, VisitCluster};
pub use crate::config::{EngineConfig, PublicEngineConfig};
pub use crate::drafts::{generate_drafts, start_drafts, DraftBatch, DraftItem, DraftStatus};
pub use crate::errors::{GenerationError, LookupError, ProcessingError, VisionError};
pub use crate::photos::{Coordinate, PhotoAsset, ProcessedImage};
pub use crate::places::{HttpPlacesClient, PlacesService, SyntheticPlacesClient};
pub use crate::ports::{
    DraftContext, GenerationProvider, IdentifiedPlace, PhotoProcessor, PlaceCandidate,
    PlaceDetails, PlaceLookup, VisionIdentifier,
};
pub use crate::providers::{ClaudeProvider, GeminiProvider};
pub use crate::suggestions::{
    composite_key, EngineCaches, SuggestionBuilder, SuggestionStatus, VisitSuggestion,
};
pub use crate::vision::{GeminiVisionClient, SyntheticVisionClient, VisionService};

/// Front door of the visit-discovery engine: owns the configuration, the
/// port adapters, the three single-flight caches and the generation
/// providers. Everything it returns is an in-memory value; persistence is
/// the caller's concern.
pub struct Engine {
    config: EngineConfig,
    builder: SuggestionBuilder,
    providers: Vec<Arc<dyn GenerationProvider>>,
}

impl Engine {
    /// Wires adapters from the configuration: HTTP clients where API keys
    /// are present, deterministic synthetic fallbacks otherwise. The photo
    /// processor stays injected because the photo index is owned by the host
    /// application.
    pub fn new(config: EngineConfig, processor: Arc<dyn PhotoProcessor>) -> Self {
        let places = PlacesService::new(&config);
        let vision = VisionService::new(&config);

        let mut providers: Vec<Arc<dyn GenerationProvider>> = Vec::new();
        if let Some(key) = config.gemini_api_key.clone() {
            providers.push(Arc::new(GeminiProvider::new(
                key,
                config.gemini_api_base.clone(),
                config.gemini_model.clone(),
            )));
        }
        if let Some(key) = config.anthropic_api_key.clone() {
            providers.push(Arc::new(ClaudeProvider::new(
                key,
                config.anthropic_api_base.clone(),
                config.claude_model.clone(),
            )));
        }

        Self::with_ports(config, processor, places, vision, providers)
    }

    /// Fully-injected constructor, used by tests and embedders that bring
    /// their own adapters.
    pub fn with_ports(
        config: EngineConfig,
        processor: Arc<dyn PhotoProcessor>,
        places: PlacesService,
        vision: VisionService,
        providers: Vec<Arc<dyn GenerationProvider>>,
    ) -> Self {
        let builder =
            SuggestionBuilder::new(processor, places, vision, EngineCaches::new(), &config);
        Self {
            config,
            builder,
            providers,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clusters the given assets and builds one suggestion per cluster,
    /// concurrently. Assets without a coordinate never form a cluster;
    /// input order does not matter, sorting happens here.
    pub async fn suggest_visits(&self, assets: &[PhotoAsset]) -> Vec<VisitSuggestion> {
        let mut geotagged: Vec<PhotoAsset> = assets
            .iter()
            .filter(|asset| asset.coordinate.is_some())
            .cloned()
            .collect();
        geotagged.sort_by_key(|asset| asset.captured_at);

        let clusters = cluster_assets(
            &geotagged,
            Duration::seconds(self.config.time_threshold_secs),
            self.config.distance_threshold_m,
        );
        debug!(
            assets = assets.len(),
            geotagged = geotagged.len(),
            clusters = clusters.len(),
            "clustered photo assets"
        );

        let index: HashMap<String, PhotoAsset> = geotagged
            .into_iter()
            .map(|asset| (asset.id.clone(), asset))
            .collect();

        join_all(
            clusters
                .iter()
                .map(|cluster| self.builder.build_suggestion(cluster, &index)),
        )
        .await
    }

    /// Re-runs identification for one suggestion, e.g. after a transient
    /// upstream failure or a cache clear.
    pub async fn refresh_suggestion(
        &self,
        suggestion: &mut VisitSuggestion,
        assets: &[PhotoAsset],
    ) {
        let index: HashMap<String, PhotoAsset> = assets
            .iter()
            .filter(|asset| suggestion.cluster.member_asset_ids.contains(&asset.id))
            .map(|asset| (asset.id.clone(), asset.clone()))
            .collect();
        self.builder.refresh(suggestion, &index).await;
    }

    /// Fan-out draft generation across the configured providers. Returns a
    /// handle whose snapshot already contains every item in `Loading` status.
    pub fn start_drafts(&self, context: DraftContext) -> DraftBatch {
        drafts::start_drafts(&self.providers, context, self.config.drafts_per_provider)
    }

    pub async fn generate_drafts(&self, context: DraftContext) -> Vec<DraftItem> {
        self.start_drafts(context).wait().await
    }

    /// Drops all cached work: processed images, nearby searches and vision
    /// identifications. In-flight computations are cancelled.
    pub fn clear_caches(&self) {
        self.builder.caches().clear_all();
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,visit_scout=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
