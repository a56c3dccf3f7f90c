use thiserror::Error;

// Port failures rarely cross the engine's public boundary as errors: the
// suggestion builder and the draft orchestrator capture them as status data.

/// An asset could not be normalized. Non-fatal to its cluster: the builder
/// skips the asset and proceeds with whatever subset succeeded.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("asset {0} is unreadable")]
    Unreadable(String),
    #[error("unsupported media in asset {0}")]
    Unsupported(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Nearby-search or details fetch failed. Surfaced as a suggestion-level
/// message, retryable via refresh.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("places api: {0}")]
    Api(String),
}

/// Vision identification failed. Same treatment as `LookupError`,
/// independent of the nearby-search outcome.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("vision api: {0}")]
    Api(String),
    #[error("no processable images for cluster")]
    NoImages,
}

/// A generation provider failed. Never aggregated: isolated to that
/// provider's draft items.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("provider {provider}: {message}")]
    Api { provider: String, message: String },
    #[error("provider {0} returned an unparseable response")]
    MalformedResponse(String),
}
