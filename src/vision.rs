use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use tracing::trace;

use crate::config::EngineConfig;
use crate::errors::VisionError;
use crate::photos::{Coordinate, ProcessedImage};
use crate::ports::{IdentifiedPlace, PlaceCandidate, VisionIdentifier};

/// Identification front door: Gemini when a key is configured, otherwise a
/// deterministic synthetic guess so keyless runs still exercise the flow.
#[derive(Clone)]
pub struct VisionService {
    inner: Arc<dyn VisionIdentifier>,
}

impl VisionService {
    pub fn new(config: &EngineConfig) -> Self {
        if let Some(key) = config.gemini_api_key.clone() {
            Self {
                inner: Arc::new(GeminiVisionClient::new(
                    key,
                    config.gemini_api_base.clone(),
                    config.gemini_model.clone(),
                )),
            }
        } else {
            Self {
                inner: Arc::new(SyntheticVisionClient::default()),
            }
        }
    }

    pub fn from_identifier(identifier: Arc<dyn VisionIdentifier>) -> Self {
        Self { inner: identifier }
    }
}

#[async_trait]
impl VisionIdentifier for VisionService {
    async fn identify(
        &self,
        images: &[ProcessedImage],
        coordinate_hint: Coordinate,
        nearby_context: &[PlaceCandidate],
    ) -> Result<IdentifiedPlace, VisionError> {
        if images.is_empty() {
            return Err(VisionError::NoImages);
        }
        self.inner
            .identify(images, coordinate_hint, nearby_context)
            .await
    }
}

pub struct GeminiVisionClient {
    http: reqwest::Client,
    api_key: SecretString,
    api_base: String,
    model: String,
}

impl GeminiVisionClient {
    pub fn new(api_key: SecretString, api_base: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("vision http client");
        Self {
            http,
            api_key,
            api_base,
            model,
        }
    }

    fn prompt(coordinate_hint: Coordinate, nearby_context: &[PlaceCandidate]) -> String {
        let mut prompt = String::from(
            "Identify the place shown in these photos. Respond with a single \
             JSON object: {\"name\", \"address\", \"placeId\", \"latitude\", \
             \"longitude\", \"confidence\", \"reasoning\"}. Confidence is a \
             number between 0 and 1.\n",
        );
        prompt.push_str(&format!(
            "The photos were taken near {}.\n",
            coordinate_hint.key_fragment()
        ));
        if !nearby_context.is_empty() {
            prompt.push_str("Known nearby places, closest first:\n");
            for candidate in nearby_context {
                prompt.push_str(&format!(
                    "- {} (id {}, {:.0} m away)\n",
                    candidate.display_name, candidate.id, candidate.distance_m
                ));
            }
        }
        prompt
    }
}

#[async_trait]
impl VisionIdentifier for GeminiVisionClient {
    async fn identify(
        &self,
        images: &[ProcessedImage],
        coordinate_hint: Coordinate,
        nearby_context: &[PlaceCandidate],
    ) -> Result<IdentifiedPlace, VisionError> {
        #[derive(serde::Serialize)]
        struct RequestBody {
            contents: Vec<Content>,
            #[serde(rename = "generationConfig")]
            generation_config: GenerationConfig,
        }

        #[derive(serde::Serialize)]
        struct Content {
            parts: Vec<Part>,
        }

        #[derive(serde::Serialize)]
        #[serde(untagged)]
        enum Part {
            Text {
                text: String,
            },
            Image {
                #[serde(rename = "inlineData")]
                inline_data: InlineData,
            },
        }

        #[derive(serde::Serialize)]
        struct InlineData {
            #[serde(rename = "mimeType")]
            mime_type: &'static str,
            data: String,
        }

        #[derive(serde::Serialize)]
        struct GenerationConfig {
            #[serde(rename = "responseMimeType")]
            response_mime_type: &'static str,
        }

        #[derive(serde::Deserialize)]
        struct Response {
            candidates: Option<Vec<Candidate>>,
        }

        #[derive(serde::Deserialize)]
        struct Candidate {
            content: Option<CandidateContent>,
        }

        #[derive(serde::Deserialize)]
        struct CandidateContent {
            parts: Option<Vec<CandidatePart>>,
        }

        #[derive(serde::Deserialize)]
        struct CandidatePart {
            text: Option<String>,
        }

        #[derive(serde::Deserialize)]
        struct Identification {
            name: String,
            address: Option<String>,
            #[serde(rename = "placeId")]
            place_id: Option<String>,
            latitude: Option<f64>,
            longitude: Option<f64>,
            confidence: Option<f64>,
            reasoning: Option<String>,
        }

        let mut parts = vec![Part::Text {
            text: Self::prompt(coordinate_hint, nearby_context),
        }];
        for image in images {
            parts.push(Part::Image {
                inline_data: InlineData {
                    mime_type: "image/jpeg",
                    data: base64::engine::general_purpose::STANDARD
                        .encode(&image.normalized_bytes),
                },
            });
        }
        trace!(images = images.len(), "sending vision identification request");

        let body = RequestBody {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.api_base, self.model
            ))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        // Candidates arrive best-first; only the top one is used.
        let text = parsed
            .candidates
            .and_then(|list| list.into_iter().next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .and_then(|parts| parts.into_iter().find_map(|part| part.text))
            .ok_or_else(|| VisionError::Api("empty vision response".into()))?;

        let identification: Identification = serde_json::from_str(text.trim())
            .map_err(|err| VisionError::Api(format!("unparseable vision payload: {err}")))?;

        let coordinate = match (identification.latitude, identification.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        };

        Ok(IdentifiedPlace {
            name: identification.name,
            address: identification.address,
            place_id: identification.place_id,
            coordinate,
            confidence: identification.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
            reasoning: identification.reasoning.unwrap_or_default(),
        })
    }
}

/// Keyless fallback: picks the closest nearby candidate when one exists.
#[derive(Default)]
pub struct SyntheticVisionClient;

#[async_trait]
impl VisionIdentifier for SyntheticVisionClient {
    async fn identify(
        &self,
        _images: &[ProcessedImage],
        coordinate_hint: Coordinate,
        nearby_context: &[PlaceCandidate],
    ) -> Result<IdentifiedPlace, VisionError> {
        if let Some(closest) = nearby_context.first() {
            return Ok(IdentifiedPlace {
                name: closest.display_name.clone(),
                address: closest.address.clone(),
                place_id: Some(closest.id.clone()),
                coordinate: Some(coordinate_hint),
                confidence: 0.25,
                reasoning: "closest nearby candidate (no vision key configured)".into(),
            });
        }
        Err(VisionError::Api("no nearby candidates to fall back on".into()))
    }
}
