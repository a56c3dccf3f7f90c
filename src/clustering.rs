use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::photos::{Coordinate, PhotoAsset};

/// A contiguous run of geotagged photos inferred to be one real-world visit.
///
/// Immutable once built. Members are stored in the input's chronological
/// order; every member carries a coordinate (callers filter untagged assets
/// before clustering).
#[derive(Debug, Clone, Serialize)]
pub struct VisitCluster {
    pub average_coordinate: Coordinate,
    pub time_range: (DateTime<Utc>, DateTime<Utc>),
    pub representative_asset_id: String,
    pub member_asset_ids: Vec<String>,
}

impl VisitCluster {
    pub fn len(&self) -> usize {
        self.member_asset_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_asset_ids.is_empty()
    }
}

/// Groups time-sorted, geotagged assets into visit clusters.
///
/// Greedy single pass: each asset is compared to the last asset accumulated
/// so far, not to the running centroid. A gap over `time_threshold` or a jump
/// over `distance_threshold_m` closes the current cluster and opens a new
/// one. Comparing against the previous member keeps slow drifts (a walking
/// tour) in one cluster, so a cluster's total span can exceed either
/// threshold; that is the intended behavior.
///
/// Callers must present `assets` in non-decreasing `captured_at` order and
/// must have dropped assets without a coordinate; assets that still lack one
/// are skipped here rather than poisoning the averages.
pub fn cluster_assets(
    assets: &[PhotoAsset],
    time_threshold: Duration,
    distance_threshold_m: f64,
) -> Vec<VisitCluster> {
    let mut clusters = Vec::new();
    let mut run: Vec<(&PhotoAsset, Coordinate)> = Vec::new();

    for asset in assets {
        let Some(coordinate) = asset.coordinate else {
            continue;
        };

        if let Some((last, last_coord)) = run.last() {
            let dt = asset.captured_at - last.captured_at;
            let d = coordinate.distance_meters(last_coord);
            if dt > time_threshold || d > distance_threshold_m {
                clusters.push(close_run(&run));
                run.clear();
            }
        }
        run.push((asset, coordinate));
    }

    if !run.is_empty() {
        clusters.push(close_run(&run));
    }
    clusters
}

fn close_run(run: &[(&PhotoAsset, Coordinate)]) -> VisitCluster {
    debug_assert!(!run.is_empty());
    let count = run.len() as f64;
    let (lat_sum, lng_sum) = run.iter().fold((0.0, 0.0), |(lat, lng), (_, coord)| {
        (lat + coord.lat, lng + coord.lng)
    });
    let start = run.first().map(|(a, _)| a.captured_at).unwrap_or_default();
    let end = run.last().map(|(a, _)| a.captured_at).unwrap_or_default();

    VisitCluster {
        average_coordinate: Coordinate::new(lat_sum / count, lng_sum / count),
        time_range: (start, end),
        representative_asset_id: run[0].0.id.clone(),
        member_asset_ids: run.iter().map(|(a, _)| a.id.clone()).collect(),
    }
}
