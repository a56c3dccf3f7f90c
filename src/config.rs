use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_TIME_THRESHOLD_SECS: i64 = 3 * 60 * 60;
const DEFAULT_DISTANCE_THRESHOLD_M: f64 = 300.0;
const DEFAULT_NEARBY_RADIUS_M: f64 = 75.0;
const DEFAULT_MAX_VISION_PHOTOS: usize = 3;
const DEFAULT_DRAFTS_PER_PROVIDER: usize = 2;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub time_threshold_secs: i64,
    pub distance_threshold_m: f64,
    pub nearby_radius_m: f64,
    pub max_vision_photos: usize,
    pub drafts_per_provider: usize,
    pub gemini_model: String,
    pub claude_model: String,
    pub google_places_api_key: Option<SecretString>,
    pub gemini_api_key: Option<SecretString>,
    pub anthropic_api_key: Option<SecretString>,
    pub places_api_base: String,
    pub gemini_api_base: String,
    pub anthropic_api_base: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicEngineConfig {
    pub time_threshold_secs: i64,
    pub distance_threshold_m: f64,
    pub nearby_radius_m: f64,
    pub max_vision_photos: usize,
    pub drafts_per_provider: usize,
    pub gemini_model: String,
    pub claude_model: String,
    pub has_google_places_key: bool,
    pub has_gemini_key: bool,
    pub has_anthropic_key: bool,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            time_threshold_secs: parse_i64("VISIT_TIME_THRESHOLD_SECS", DEFAULT_TIME_THRESHOLD_SECS),
            distance_threshold_m: parse_f64("VISIT_DISTANCE_THRESHOLD_M", DEFAULT_DISTANCE_THRESHOLD_M),
            nearby_radius_m: parse_f64("NEARBY_SEARCH_RADIUS_M", DEFAULT_NEARBY_RADIUS_M),
            max_vision_photos: parse_usize("MAX_VISION_PHOTOS", DEFAULT_MAX_VISION_PHOTOS).max(1),
            drafts_per_provider: parse_usize("DRAFTS_PER_PROVIDER", DEFAULT_DRAFTS_PER_PROVIDER)
                .max(1),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            claude_model: env::var("CLAUDE_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            google_places_api_key: secret_from_env("GOOGLE_PLACES_API_KEY"),
            gemini_api_key: secret_from_env("GEMINI_API_KEY"),
            anthropic_api_key: secret_from_env("ANTHROPIC_API_KEY"),
            places_api_base: env::var("PLACES_API_BASE")
                .unwrap_or_else(|_| "https://places.googleapis.com/v1".to_string()),
            gemini_api_base: env::var("GEMINI_API_BASE").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),
            anthropic_api_base: env::var("ANTHROPIC_API_BASE")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string()),
        }
    }

    pub fn public_profile(&self) -> PublicEngineConfig {
        PublicEngineConfig {
            time_threshold_secs: self.time_threshold_secs,
            distance_threshold_m: self.distance_threshold_m,
            nearby_radius_m: self.nearby_radius_m,
            max_vision_photos: self.max_vision_photos,
            drafts_per_provider: self.drafts_per_provider,
            gemini_model: self.gemini_model.clone(),
            claude_model: self.claude_model.clone(),
            has_google_places_key: self.google_places_api_key.is_some(),
            has_gemini_key: self.gemini_api_key.is_some(),
            has_anthropic_key: self.anthropic_api_key.is_some(),
        }
    }
}

fn secret_from_env(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
