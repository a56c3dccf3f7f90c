use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::config::EngineConfig;
use crate::errors::LookupError;
use crate::photos::Coordinate;
use crate::ports::{PlaceCandidate, PlaceDetails, PlaceLookup};

const NEARBY_MAX_RESULTS: u8 = 10;
const NEARBY_FIELD_MASK: &str =
    "places.id,places.displayName,places.formattedAddress,places.location,places.types";
const DETAILS_FIELD_MASK: &str = "id,displayName,formattedAddress,location,types";

/// Entry point the engine wires against. Picks the HTTP client when a Places
/// key is configured and the deterministic synthetic resolver otherwise, so
/// keyless development runs still produce stable candidates.
#[derive(Clone)]
pub struct PlacesService {
    inner: Arc<dyn PlaceLookup>,
}

impl PlacesService {
    pub fn new(config: &EngineConfig) -> Self {
        if let Some(key) = config.google_places_api_key.clone() {
            Self {
                inner: Arc::new(HttpPlacesClient::new(key, config.places_api_base.clone())),
            }
        } else {
            Self {
                inner: Arc::new(SyntheticPlacesClient::default()),
            }
        }
    }

    pub fn from_lookup(lookup: Arc<dyn PlaceLookup>) -> Self {
        Self { inner: lookup }
    }
}

#[async_trait]
impl PlaceLookup for PlacesService {
    async fn search_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Vec<PlaceCandidate>, LookupError> {
        let mut candidates = self.inner.search_nearby(center, radius_m).await?;
        rank_candidates(&mut candidates);
        Ok(candidates)
    }

    async fn fetch_details(&self, place_id: &str) -> Result<PlaceDetails, LookupError> {
        self.inner.fetch_details(place_id).await
    }
}

/// Deduplicates by place id, keeping the closer hit, then ranks by ascending
/// distance.
fn rank_candidates(candidates: &mut Vec<PlaceCandidate>) {
    candidates.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut seen = HashSet::new();
    candidates.retain(|candidate| seen.insert(candidate.id.clone()));
}

pub struct HttpPlacesClient {
    http: reqwest::Client,
    api_key: SecretString,
    api_base: String,
}

impl HttpPlacesClient {
    pub fn new(api_key: SecretString, api_base: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("places http client");
        Self {
            http,
            api_key,
            api_base,
        }
    }
}

#[derive(serde::Deserialize)]
struct ResponsePlace {
    id: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<ResponseText>,
    #[serde(rename = "formattedAddress")]
    formatted_address: Option<String>,
    location: Option<ResponseLocation>,
    types: Option<Vec<String>>,
}

#[derive(serde::Deserialize)]
struct ResponseText {
    text: Option<String>,
}

#[derive(serde::Deserialize)]
struct ResponseLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl ResponsePlace {
    fn location(&self) -> Option<Coordinate> {
        let location = self.location.as_ref()?;
        Some(Coordinate::new(location.latitude?, location.longitude?))
    }
}

#[async_trait]
impl PlaceLookup for HttpPlacesClient {
    async fn search_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Vec<PlaceCandidate>, LookupError> {
        #[derive(serde::Serialize)]
        struct RequestBody {
            #[serde(rename = "maxResultCount")]
            max_result_count: u8,
            #[serde(rename = "rankPreference")]
            rank_preference: &'static str,
            #[serde(rename = "locationRestriction")]
            location_restriction: LocationRestriction,
        }

        #[derive(serde::Serialize)]
        struct LocationRestriction {
            circle: Circle,
        }

        #[derive(serde::Serialize)]
        struct Circle {
            center: Center,
            radius: f64,
        }

        #[derive(serde::Serialize)]
        struct Center {
            latitude: f64,
            longitude: f64,
        }

        #[derive(serde::Deserialize)]
        struct Response {
            places: Option<Vec<ResponsePlace>>,
        }

        let body = RequestBody {
            max_result_count: NEARBY_MAX_RESULTS,
            rank_preference: "DISTANCE",
            location_restriction: LocationRestriction {
                circle: Circle {
                    center: Center {
                        latitude: center.lat,
                        longitude: center.lng,
                    },
                    radius: radius_m,
                },
            },
        };

        let response = self
            .http
            .post(format!("{}/places:searchNearby", self.api_base))
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", NEARBY_FIELD_MASK)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        let places = parsed.places.unwrap_or_default();
        trace!(count = places.len(), "nearby search returned candidates");

        let candidates = places
            .into_iter()
            .filter_map(|place| {
                let id = place.id.clone()?;
                let coordinate = place.location();
                Some(PlaceCandidate {
                    distance_m: coordinate
                        .map(|c| center.distance_meters(&c))
                        .unwrap_or(f64::MAX),
                    display_name: place
                        .display_name
                        .and_then(|text| text.text)
                        .unwrap_or_else(|| id.clone()),
                    address: place.formatted_address,
                    types: place.types.unwrap_or_default(),
                    id,
                })
            })
            .collect();
        Ok(candidates)
    }

    async fn fetch_details(&self, place_id: &str) -> Result<PlaceDetails, LookupError> {
        let response = self
            .http
            .get(format!("{}/places/{place_id}", self.api_base))
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", DETAILS_FIELD_MASK)
            .send()
            .await?
            .error_for_status()?;

        let place: ResponsePlace = response.json().await?;
        let coordinate = place
            .location()
            .ok_or_else(|| LookupError::Api("place details missing location".into()))?;
        let id = place
            .id
            .unwrap_or_else(|| place_id.to_string());

        Ok(PlaceDetails {
            name: place
                .display_name
                .and_then(|text| text.text)
                .unwrap_or_else(|| id.clone()),
            place_id: id,
            formatted_address: place.formatted_address,
            coordinate,
            types: place.types.unwrap_or_default(),
        })
    }
}

/// Deterministic resolver for keyless runs: derives stable candidate ids from
/// the rounded query coordinate.
#[derive(Default)]
pub struct SyntheticPlacesClient;

fn synthetic_id(center: &Coordinate, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(center.key_fragment().as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hasher.finalize());
    format!("synthetic_{digest}")
}

#[async_trait]
impl PlaceLookup for SyntheticPlacesClient {
    async fn search_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Vec<PlaceCandidate>, LookupError> {
        let candidates = (0..3)
            .map(|index| PlaceCandidate {
                id: synthetic_id(&center, index),
                display_name: format!("Synthetic place {}", index + 1),
                address: None,
                types: vec!["synthetic".into()],
                distance_m: radius_m * (index as f64 + 1.0) / 4.0,
            })
            .collect();
        Ok(candidates)
    }

    async fn fetch_details(&self, place_id: &str) -> Result<PlaceDetails, LookupError> {
        Ok(PlaceDetails {
            place_id: place_id.to_string(),
            name: format!("Synthetic detail for {place_id}"),
            formatted_address: None,
            coordinate: Coordinate::new(0.0, 0.0),
            types: vec!["synthetic".into()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ranking_dedupes_by_id_and_sorts_by_distance() {
        struct Scripted;

        #[async_trait]
        impl PlaceLookup for Scripted {
            async fn search_nearby(
                &self,
                _center: Coordinate,
                _radius_m: f64,
            ) -> Result<Vec<PlaceCandidate>, LookupError> {
                let candidate = |id: &str, distance_m: f64| PlaceCandidate {
                    id: id.into(),
                    display_name: id.into(),
                    address: None,
                    types: Vec::new(),
                    distance_m,
                };
                Ok(vec![
                    candidate("b", 50.0),
                    candidate("a", 10.0),
                    candidate("b", 70.0),
                    candidate("c", 30.0),
                ])
            }

            async fn fetch_details(&self, _place_id: &str) -> Result<PlaceDetails, LookupError> {
                Err(LookupError::Api("unused".into()))
            }
        }

        let service = PlacesService::from_lookup(Arc::new(Scripted));
        let ranked = service
            .search_nearby(Coordinate::new(0.0, 0.0), 75.0)
            .await
            .unwrap();
        let ids: Vec<_> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(ranked[2].distance_m, 50.0);
    }

    #[tokio::test]
    async fn synthetic_candidates_are_deterministic() {
        let client = SyntheticPlacesClient;
        let center = Coordinate::new(48.8566, 2.3522);
        let first = client.search_nearby(center, 75.0).await.unwrap();
        let second = client.search_nearby(center, 75.0).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(
            first.iter().map(|c| &c.id).collect::<Vec<_>>(),
            second.iter().map(|c| &c.id).collect::<Vec<_>>()
        );
    }
}
