use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use httptest::matchers::{all_of, request};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::json;

use visit_scout::{
    Coordinate, DraftContext, DraftStatus, Engine, EngineConfig, GeminiVisionClient,
    HttpPlacesClient, LookupError, PhotoAsset, PhotoProcessor, PlaceLookup, ProcessedImage,
    ProcessingError, SuggestionStatus, VisionIdentifier,
};

struct StubProcessor;

#[async_trait]
impl PhotoProcessor for StubProcessor {
    async fn process(&self, asset: &PhotoAsset) -> Result<ProcessedImage, ProcessingError> {
        Ok(ProcessedImage {
            asset_id: asset.id.clone(),
            normalized_bytes: vec![0xFF, 0xD8],
            original_bytes: vec![0xFF, 0xD8, 0x00],
            exif_coordinate: asset.coordinate,
            metadata: Default::default(),
        })
    }
}

fn config_for(server: &Server) -> EngineConfig {
    EngineConfig {
        time_threshold_secs: 3 * 60 * 60,
        distance_threshold_m: 300.0,
        nearby_radius_m: 75.0,
        max_vision_photos: 3,
        drafts_per_provider: 2,
        gemini_model: "test-model".into(),
        claude_model: "test-claude".into(),
        google_places_api_key: Some(SecretString::from("places-key".to_string())),
        gemini_api_key: Some(SecretString::from("gemini-key".to_string())),
        anthropic_api_key: Some(SecretString::from("anthropic-key".to_string())),
        places_api_base: server.url_str("/placesapi"),
        gemini_api_base: server.url_str("/gemini"),
        anthropic_api_base: server.url_str("/anthropic"),
    }
}

fn photo(id: &str, minutes: i64, lat: f64, lng: f64) -> PhotoAsset {
    PhotoAsset::new(
        id,
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes),
        Some(Coordinate::new(lat, lng)),
    )
}

fn nearby_response() -> serde_json::Value {
    json!({
        "places": [
            {
                "id": "A",
                "displayName": { "text": "Corner Cafe" },
                "formattedAddress": "1 Rue Test",
                "location": { "latitude": 48.8566, "longitude": 2.3522 },
                "types": ["cafe"]
            },
            {
                "id": "B",
                "displayName": { "text": "Little Museum" },
                "formattedAddress": "2 Rue Test",
                "location": { "latitude": 48.8570, "longitude": 2.3525 },
                "types": ["museum"]
            },
            {
                "id": "C",
                "displayName": { "text": "Park Gate" },
                "formattedAddress": null,
                "location": { "latitude": 48.8560, "longitude": 2.3520 },
                "types": ["park"]
            }
        ]
    })
}

fn vision_response() -> serde_json::Value {
    let identification = json!({
        "name": "Corner Cafe",
        "address": "1 Rue Test",
        "placeId": "A",
        "latitude": 48.8566,
        "longitude": 2.3522,
        "confidence": 0.87,
        "reasoning": "storefront signage matches"
    });
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": identification.to_string() }] }
        }]
    })
}

#[tokio::test]
async fn suggestions_are_built_once_and_then_served_from_cache() {
    let server = Server::run();

    // Two clusters, so exactly two nearby searches and two vision calls;
    // the second suggest_visits pass must not add any.
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/placesapi/places:searchNearby")
        ))
        .times(2)
        .respond_with(json_encoded(nearby_response())),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/gemini/models/test-model:generateContent")
        ))
        .times(2)
        .respond_with(json_encoded(vision_response())),
    );

    let engine = Engine::new(config_for(&server), Arc::new(StubProcessor));

    // Five photos within minutes and meters of each other, then one photo
    // four hours later, two kilometers away.
    let mut assets = Vec::new();
    for i in 0..5 {
        assets.push(photo(
            &format!("p{i}"),
            i * 2,
            48.8566 + i as f64 * 0.0001,
            2.3522,
        ));
    }
    assets.push(photo("far", 4 * 60 + 30, 48.8746, 2.3522));
    // Untagged assets are filtered before clustering.
    assets.push(PhotoAsset::new(
        "no-geo",
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 3, 0).unwrap(),
        None,
    ));

    let suggestions = engine.suggest_visits(&assets).await;
    assert_eq!(suggestions.len(), 2);
    assert_eq!(suggestions[0].cluster.member_asset_ids.len(), 5);
    assert_eq!(suggestions[1].cluster.member_asset_ids, vec!["far"]);

    for suggestion in &suggestions {
        match &suggestion.status {
            SuggestionStatus::Identified { name, place_id, .. } => {
                assert_eq!(name, "Corner Cafe");
                assert_eq!(place_id.as_deref(), Some("A"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        let ids: Vec<_> = suggestion
            .nearby_candidates
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"A") && ids.contains(&"B") && ids.contains(&"C"));
        let pick = suggestion.vision_pick.as_ref().unwrap();
        assert!((pick.confidence - 0.87).abs() < 1e-9);
    }

    // Same composite keys: served from cache, zero extra requests.
    let replay = engine.suggest_visits(&assets).await;
    assert_eq!(replay.len(), 2);
    assert_eq!(replay[0].id, suggestions[0].id);
}

#[tokio::test]
async fn place_details_are_fetched_and_parsed() {
    let server = Server::run();

    // The id field is omitted on purpose: details must fall back to the
    // requested place id.
    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/placesapi/places/A")
        ))
        .respond_with(json_encoded(json!({
            "displayName": { "text": "Corner Cafe" },
            "formattedAddress": "1 Rue Test",
            "location": { "latitude": 48.8566, "longitude": 2.3522 },
            "types": ["cafe"]
        }))),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/placesapi/places/ghost")
        ))
        .respond_with(json_encoded(json!({
            "id": "ghost",
            "displayName": { "text": "No Fixed Abode" }
        }))),
    );

    let client = HttpPlacesClient::new(
        SecretString::from("places-key".to_string()),
        server.url_str("/placesapi"),
    );

    let details = client.fetch_details("A").await.unwrap();
    assert_eq!(details.place_id, "A");
    assert_eq!(details.name, "Corner Cafe");
    assert_eq!(details.formatted_address.as_deref(), Some("1 Rue Test"));
    assert!((details.coordinate.lat - 48.8566).abs() < 1e-9);
    assert!((details.coordinate.lng - 2.3522).abs() < 1e-9);
    assert_eq!(details.types, vec!["cafe"]);

    let missing = client.fetch_details("ghost").await;
    assert!(matches!(missing, Err(LookupError::Api(_))));
}

#[tokio::test]
async fn vision_uses_the_top_ranked_candidate() {
    let server = Server::run();

    let top = json!({
        "name": "Corner Cafe",
        "placeId": "A",
        "confidence": 0.9,
        "reasoning": "clear signage"
    });
    let runner_up = json!({
        "name": "Wrong Pick",
        "placeId": "Z",
        "confidence": 0.1,
        "reasoning": "blurry"
    });
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/gemini/models/test-model:generateContent")
        ))
        .respond_with(json_encoded(json!({
            "candidates": [
                { "content": { "parts": [{ "text": top.to_string() }] } },
                { "content": { "parts": [{ "text": runner_up.to_string() }] } }
            ]
        }))),
    );

    let client = GeminiVisionClient::new(
        SecretString::from("gemini-key".to_string()),
        server.url_str("/gemini"),
        "test-model".into(),
    );
    let image = ProcessedImage {
        asset_id: "p0".into(),
        normalized_bytes: vec![0xFF, 0xD8],
        original_bytes: vec![0xFF, 0xD8, 0x00],
        exif_coordinate: None,
        metadata: Default::default(),
    };

    let pick = client
        .identify(&[image], Coordinate::new(48.8566, 2.3522), &[])
        .await
        .unwrap();
    assert_eq!(pick.name, "Corner Cafe");
    assert_eq!(pick.place_id.as_deref(), Some("A"));
}

#[tokio::test]
async fn draft_fanout_collects_both_providers() {
    let server = Server::run();

    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/gemini/models/test-model:generateContent")
        ))
        .respond_with(json_encoded(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "[\"gemini draft 1\", \"gemini draft 2\"]" }] } },
                { "content": { "parts": [{ "text": "[\"runner-up a\", \"runner-up b\"]" }] } }
            ]
        }))),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/anthropic/messages")
        ))
        .respond_with(json_encoded(json!({
            "content": [{ "type": "text", "text": "[\"claude draft 1\", \"claude draft 2\"]" }]
        }))),
    );

    let engine = Engine::new(config_for(&server), Arc::new(StubProcessor));
    let context = DraftContext {
        place_name: "Corner Cafe".into(),
        address: Some("1 Rue Test".into()),
        rating: Some(5),
        notes: Some("flaky croissants, in the good way".into()),
        photos: Vec::new(),
    };

    let batch = engine.start_drafts(context);
    let placeholders = batch.snapshot();
    assert_eq!(placeholders.len(), 4);
    assert!(placeholders
        .iter()
        .all(|item| item.status == DraftStatus::Loading));

    let items = batch.wait().await;
    assert_eq!(items.len(), 4);
    assert!(items.iter().all(|item| item.status == DraftStatus::Success));
    let gemini_texts: Vec<_> = items
        .iter()
        .filter(|item| item.provider_name == "Gemini")
        .map(|item| item.text.as_str())
        .collect();
    assert_eq!(gemini_texts, vec!["gemini draft 1", "gemini draft 2"]);
}

#[tokio::test]
async fn provider_failure_is_isolated_per_item() {
    let server = Server::run();

    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/gemini/models/test-model:generateContent")
        ))
        .respond_with(status_code(500)),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/anthropic/messages")
        ))
        .respond_with(json_encoded(json!({
            "content": [{ "type": "text", "text": "[\"still here\", \"me too\"]" }]
        }))),
    );

    let engine = Engine::new(config_for(&server), Arc::new(StubProcessor));
    let context = DraftContext {
        place_name: "Corner Cafe".into(),
        address: None,
        rating: None,
        notes: None,
        photos: Vec::new(),
    };

    let items = engine.generate_drafts(context).await;
    assert_eq!(items.len(), 4);

    let errored = items
        .iter()
        .filter(|item| matches!(item.status, DraftStatus::Error(_)))
        .count();
    let succeeded = items
        .iter()
        .filter(|item| item.status == DraftStatus::Success)
        .count();
    assert_eq!(errored, 2);
    assert_eq!(succeeded, 2);
    assert!(items
        .iter()
        .filter(|item| item.provider_name == "Claude")
        .all(|item| item.status == DraftStatus::Success));
}
