//! Area sources
//!
//! Areas come either from a literal list of boxes in the configuration or
//! from a Koji project, which serves a GeoJSON feature collection whose
//! features carry precomputed `bbox` arrays.

use serde::Deserialize;
use std::collections::HashSet;

use super::{BoundingBox, BoundingBoxError};
use crate::config::AreasConfig;

/// Errors raised while loading areas
#[derive(Debug, thiserror::Error)]
pub enum AreaError {
    #[error("invalid bbox '{input}': {source}")]
    InvalidBbox {
        input: String,
        #[source]
        source: BoundingBoxError,
    },

    #[error("failed to fetch Koji project: {0}")]
    Koji(#[from] reqwest::Error),

    #[error("no areas configured")]
    NoAreas,
}

#[derive(Debug, Deserialize)]
struct KojiResponse {
    data: KojiCollection,
}

#[derive(Debug, Deserialize)]
struct KojiCollection {
    #[serde(default)]
    features: Vec<KojiFeature>,
}

#[derive(Debug, Deserialize)]
struct KojiFeature {
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    properties: KojiProperties,
}

#[derive(Debug, Default, Deserialize)]
struct KojiProperties {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Parse `"minLon,minLat,maxLon,maxLat;..."` into boxes
pub fn parse_bbox_list(input: &str) -> Result<Vec<BoundingBox>, AreaError> {
    input
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse().map_err(|source| AreaError::InvalidBbox {
                input: part.to_string(),
                source,
            })
        })
        .collect()
}

/// Extract the boxes of a Koji feature collection body
fn koji_boxes(body: KojiResponse, include: &[String]) -> Vec<BoundingBox> {
    let mut names = Vec::new();
    let mut boxes = Vec::new();

    for feature in body.data.features {
        if !include.is_empty() {
            let kind = feature.properties.kind.as_deref().unwrap_or_default();
            if !include.iter().any(|wanted| wanted == kind) {
                continue;
            }
        }

        let Some(bbox) = feature.bbox.as_deref().and_then(|b| BoundingBox::from_slice(b).ok())
        else {
            continue;
        };

        names.push(
            feature
                .properties
                .name
                .unwrap_or_else(|| String::from("No name")),
        );
        boxes.push(bbox);
    }

    tracing::info!(areas = boxes.len(), names = %names.join(", "), "Koji areas loaded");
    boxes
}

/// Drop exact duplicate boxes, keeping first occurrence order
pub fn dedup_boxes(boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    let mut seen = HashSet::new();
    boxes
        .into_iter()
        .filter(|bbox| seen.insert(bbox.dedup_key()))
        .collect()
}

/// Load all configured areas
///
/// A Koji project, when configured, replaces the literal box list.
pub async fn load_areas(
    config: &AreasConfig,
    client: &reqwest::Client,
) -> Result<Vec<BoundingBox>, AreaError> {
    let boxes = if let Some(url) = &config.koji_project {
        let mut request = client.get(url);
        if let Some(token) = &config.koji_bearer {
            request = request.bearer_auth(token);
        }
        let body: KojiResponse = request.send().await?.error_for_status()?.json().await?;
        koji_boxes(body, &config.koji_include)
    } else if let Some(bbox) = &config.bbox {
        let boxes = parse_bbox_list(bbox)?;
        tracing::info!(areas = boxes.len(), "BBox areas loaded");
        boxes
    } else {
        Vec::new()
    };

    let boxes = dedup_boxes(boxes);
    if boxes.is_empty() {
        return Err(AreaError::NoAreas);
    }
    Ok(boxes)
}
