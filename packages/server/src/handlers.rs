//! HTTP request handlers.

use actix_web::{HttpRequest, HttpResponse, web};
use charge_map_database::{Tier, aggregates, stations};
use charge_map_refresh::{CycleOutcome, RefreshError, run_cycle};
use charge_map_region_models::{BoundingBox, RegionType};
use serde::Deserialize;

use crate::AppState;

/// Health check. Always available, even while serving tables are mid-
/// promotion or missing.
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Parses a `west,south,east,north` bbox query value.
fn parse_bbox(raw: &str) -> Option<BoundingBox> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if parts.len() != 4 {
        return None;
    }
    Some(BoundingBox::new(parts[0], parts[1], parts[2], parts[3]))
}

/// Query parameters for the read endpoints.
#[derive(Debug, Deserialize)]
pub struct BboxQuery {
    /// `west,south,east,north` in decimal degrees.
    pub bbox: String,
    /// Map zoom level, selecting the aggregate resolution.
    pub zoom: Option<u8>,
}

/// The aggregate resolution a zoom level reads.
const fn region_for_zoom(zoom: u8) -> RegionType {
    match zoom {
        0..=5 => RegionType::State,
        6..=8 => RegionType::County,
        _ => RegionType::Zip,
    }
}

/// `GET /api/stations?bbox=w,s,e,n` — serving stations in a bounding box.
pub async fn stations_in_bbox(
    state: web::Data<AppState>,
    query: web::Query<BboxQuery>,
) -> HttpResponse {
    let Some(bbox) = parse_bbox(&query.bbox) else {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "invalid bbox; expected west,south,east,north" }));
    };

    match stations::select_in_bbox(state.db.as_ref(), Tier::Serving, &bbox).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => {
            log::error!("Station bbox query failed: {e}");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "storage unavailable" }))
        }
    }
}

/// `GET /api/aggregates?bbox=w,s,e,n&zoom=z` — serving aggregates at the
/// resolution the zoom tier consumes.
pub async fn aggregates_in_bbox(
    state: web::Data<AppState>,
    query: web::Query<BboxQuery>,
) -> HttpResponse {
    let Some(bbox) = parse_bbox(&query.bbox) else {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "invalid bbox; expected west,south,east,north" }));
    };
    let region_type = region_for_zoom(query.zoom.unwrap_or(4));

    match aggregates::select_in_bbox(state.db.as_ref(), Tier::Serving, region_type, &bbox).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => {
            log::error!("Aggregate bbox query failed: {e}");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "storage unavailable" }))
        }
    }
}

/// Request body for the polygon containment endpoint.
#[derive(Debug, Deserialize)]
pub struct PolygonQuery {
    /// A `GeoJSON` `Polygon` or `MultiPolygon` geometry.
    pub geometry: serde_json::Value,
}

/// `POST /api/stations/in-polygon` — staging stations whose point lies
/// within the posted geometry. Falls back to nothing rather than the
/// bbox when the geometry is unusable; the caller chose exact
/// containment by picking this endpoint.
pub async fn stations_in_polygon(
    state: web::Data<AppState>,
    body: web::Json<PolygonQuery>,
) -> HttpResponse {
    let geometry = body.geometry.to_string();
    match charge_map_geography::counties::stations_in_polygon(state.db.as_ref(), &geometry).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(charge_map_geography::GeoError::Conversion { message }) => {
            HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
        }
        Err(e) => {
            log::error!("Polygon containment query failed: {e}");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "storage unavailable" }))
        }
    }
}

/// Extracts the caller's secret from the `x-cron-secret` header or the
/// `secret` query parameter.
fn caller_secret(req: &HttpRequest) -> Option<String> {
    if let Some(header) = req.headers().get("x-cron-secret")
        && let Ok(value) = header.to_str()
    {
        return Some(value.to_string());
    }
    web::Query::<std::collections::BTreeMap<String, String>>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.get("secret").cloned())
}

/// `POST /api/refresh` — runs one refresh cycle. Idempotent against
/// concurrent triggers via the database-level cycle lock.
pub async fn trigger_refresh(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if state.cron_secret.is_empty() || caller_secret(&req).as_deref() != Some(&state.cron_secret) {
        return HttpResponse::Unauthorized().json(serde_json::json!({ "error": "unauthorized" }));
    }

    let result = run_cycle(state.db.as_ref(), &state.client, &state.config).await;

    match result {
        Ok(report) => {
            let partial = match report.outcome {
                CycleOutcome::Partial(fraction) => Some(fraction),
                CycleOutcome::Promoted | CycleOutcome::NoChanges => None,
            };
            HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "message": report.message,
                "counts": report.counts,
                "partial": partial,
            }))
        }
        Err(RefreshError::CycleInProgress) => HttpResponse::ServiceUnavailable().json(
            serde_json::json!({ "success": false, "message": "cycle-in-progress" }),
        ),
        Err(RefreshError::Storage(e)) => {
            log::error!("Refresh storage failure: {e}");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "success": false, "message": "storage unavailable" }))
        }
        // Aggregation produced rows but a later sub-step failed; the
        // cycle will retry from its persisted phase next tick.
        Err(e @ RefreshError::PromotionFailed(_)) => HttpResponse::MultiStatus()
            .json(serde_json::json!({ "success": false, "message": e.to_string() })),
        Err(e) => HttpResponse::Ok()
            .json(serde_json::json!({ "success": false, "message": e.to_string() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_parsing() {
        let bbox = parse_bbox("-122.6,37.2,-121.8,37.9").unwrap();
        assert!((bbox.west - -122.6).abs() < 1e-9);
        assert!((bbox.north - 37.9).abs() < 1e-9);
        assert!(parse_bbox("-122.6,37.2,-121.8").is_none());
        assert!(parse_bbox("a,b,c,d").is_none());
    }

    #[test]
    fn zoom_selects_resolution() {
        assert_eq!(region_for_zoom(0), RegionType::State);
        assert_eq!(region_for_zoom(5), RegionType::State);
        assert_eq!(region_for_zoom(6), RegionType::County);
        assert_eq!(region_for_zoom(8), RegionType::County);
        assert_eq!(region_for_zoom(9), RegionType::Zip);
        assert_eq!(region_for_zoom(16), RegionType::Zip);
    }
}
