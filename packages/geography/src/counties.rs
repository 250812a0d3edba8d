//! In-memory county boundary index.
//!
//! Loads county polygons from the `county_boundaries` table at cycle
//! start, builds an R-tree, and provides fast point-in-polygon lookups
//! for county attribution plus bbox iteration for the county aggregation
//! pass.

use charge_map_region_models::BoundingBox;
use geo::{Contains, MultiPolygon};
use geojson::GeoJson;
use moosicbox_json_utils::database::ToValue as _;
use rstar::{AABB, RTree, RTreeObject};
use switchy_database::Database;

use crate::GeoError;

/// A county's identity as carried on index hits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountyRef {
    /// 5-digit county FIPS.
    pub fips: String,
    /// County display name.
    pub name: String,
    /// Two-letter state abbreviation.
    pub state: String,
}

/// A county polygon stored in the R-tree with its metadata.
pub struct CountyShape {
    county: CountyRef,
    bbox: BoundingBox,
    centroid: (f64, f64),
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl CountyShape {
    /// The county's identity.
    #[must_use]
    pub const fn county(&self) -> &CountyRef {
        &self.county
    }

    /// Axis-aligned bounding box of the polygon.
    #[must_use]
    pub const fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Polygon centroid, `(longitude, latitude)`.
    #[must_use]
    pub const fn centroid(&self) -> (f64, f64) {
        self.centroid
    }

    /// Exact point-in-polygon test.
    #[must_use]
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        self.polygon.contains(&geo::Point::new(longitude, latitude))
    }
}

impl RTreeObject for CountyShape {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over county polygons.
///
/// Constructed once per refresh cycle and shared read-only between the
/// change detector and the county aggregation pass.
pub struct CountyIndex {
    tree: RTree<CountyShape>,
}

impl CountyIndex {
    /// Loads county polygons from `county_boundaries` and builds the
    /// R-tree.
    ///
    /// Rows with unparseable geometry are skipped with a warning rather
    /// than failing the load; a county missing from the index merely
    /// falls back to the crosswalk derivation path.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError`] if the database query fails.
    pub async fn load(db: &dyn Database) -> Result<Self, GeoError> {
        let rows = db
            .query_raw_params(
                "SELECT county_fips, name, state, boundary_geojson,
                        min_lng, min_lat, max_lng, max_lat,
                        centroid_lng, centroid_lat
                 FROM county_boundaries",
                &[],
            )
            .await?;

        let mut shapes = Vec::with_capacity(rows.len());

        for row in &rows {
            let fips: String = row.to_value("county_fips").unwrap_or_default();
            let geojson_str: String = row.to_value("boundary_geojson").unwrap_or_default();
            if fips.is_empty() || geojson_str.is_empty() {
                continue;
            }

            let Some(polygon) = parse_multipolygon(&geojson_str) else {
                log::warn!("Failed to parse boundary GeoJSON for county {fips}");
                continue;
            };

            let bbox = BoundingBox::new(
                row.to_value("min_lng").unwrap_or(0.0),
                row.to_value("min_lat").unwrap_or(0.0),
                row.to_value("max_lng").unwrap_or(0.0),
                row.to_value("max_lat").unwrap_or(0.0),
            );

            let centroid_lng: Option<f64> = row.to_value("centroid_lng").unwrap_or(None);
            let centroid_lat: Option<f64> = row.to_value("centroid_lat").unwrap_or(None);
            let centroid = (
                centroid_lng.unwrap_or_else(|| f64::midpoint(bbox.west, bbox.east)),
                centroid_lat.unwrap_or_else(|| f64::midpoint(bbox.south, bbox.north)),
            );

            shapes.push(CountyShape {
                county: CountyRef {
                    fips,
                    name: row.to_value("name").unwrap_or_default(),
                    state: row.to_value("state").unwrap_or_default(),
                },
                bbox,
                centroid,
                envelope: AABB::from_corners([bbox.west, bbox.south], [bbox.east, bbox.north]),
                polygon,
            });
        }

        log::info!("Loaded {} county boundaries into spatial index", shapes.len());

        Ok(Self {
            tree: RTree::bulk_load(shapes),
        })
    }

    /// Builds an index directly from shapes. Test seam.
    #[must_use]
    pub fn from_shapes(shapes: Vec<CountyShape>) -> Self {
        Self {
            tree: RTree::bulk_load(shapes),
        }
    }

    /// Number of counties in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Look up the county containing a point.
    ///
    /// Counties tile each state without overlap, so first match wins.
    #[must_use]
    pub fn lookup(&self, longitude: f64, latitude: f64) -> Option<&CountyRef> {
        let point = geo::Point::new(longitude, latitude);
        let query_env = AABB::from_point([longitude, latitude]);

        self.tree
            .locate_in_envelope_intersecting(&query_env)
            .find(|shape| shape.polygon.contains(&point))
            .map(|shape| &shape.county)
    }

    /// Iterates all county shapes, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &CountyShape> {
        self.tree.iter()
    }
}

/// Builds a [`CountyShape`] from raw parts. Used by ingestion tests and
/// fixture construction.
#[must_use]
pub fn shape_from_geojson(
    county: CountyRef,
    geojson_str: &str,
    centroid: Option<(f64, f64)>,
) -> Option<CountyShape> {
    let polygon = parse_multipolygon(geojson_str)?;
    let bbox = polygon_bbox(&polygon)?;
    let centroid = centroid.unwrap_or((
        f64::midpoint(bbox.west, bbox.east),
        f64::midpoint(bbox.south, bbox.north),
    ));
    Some(CountyShape {
        county,
        bbox,
        centroid,
        envelope: AABB::from_corners([bbox.west, bbox.south], [bbox.east, bbox.north]),
        polygon,
    })
}

/// Returns the staging stations whose point lies within the given
/// `GeoJSON` geometry. Candidates are prefiltered by the geometry's
/// bounding box at the storage layer, then tested exactly.
///
/// # Errors
///
/// Returns [`GeoError`] if the geometry cannot be parsed or the database
/// operation fails.
pub async fn stations_in_polygon(
    db: &dyn Database,
    geojson_str: &str,
) -> Result<Vec<charge_map_station_models::Station>, GeoError> {
    use charge_map_database::{Tier, stations};

    let polygon = parse_multipolygon(geojson_str).ok_or_else(|| GeoError::Conversion {
        message: "Unparseable polygon geometry".to_string(),
    })?;
    let bbox = polygon_bbox(&polygon).ok_or_else(|| GeoError::Conversion {
        message: "Geometry has no computable bounding box".to_string(),
    })?;

    let candidates = stations::select_in_bbox(db, Tier::Staging, &bbox)
        .await
        .map_err(|e| GeoError::Conversion {
            message: format!("Station bbox query failed: {e}"),
        })?;

    Ok(candidates
        .into_iter()
        .filter(|s| polygon.contains(&geo::Point::new(s.longitude, s.latitude)))
        .collect())
}

/// Parses a `GeoJSON` geometry string into a [`MultiPolygon`], accepting
/// both `Polygon` and `MultiPolygon` types.
#[must_use]
pub fn parse_multipolygon(geojson_str: &str) -> Option<MultiPolygon<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    let geometry = match geojson {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature.geometry?,
        GeoJson::FeatureCollection(_) => return None,
    };
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Computes the axis-aligned bounding box of a multipolygon.
#[must_use]
pub fn polygon_bbox(polygon: &MultiPolygon<f64>) -> Option<BoundingBox> {
    use geo::BoundingRect;

    polygon.bounding_rect().map(|rect| {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(county: CountyRef, west: f64, south: f64, size: f64) -> CountyShape {
        let geojson = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [west, south],
                [west + size, south],
                [west + size, south + size],
                [west, south + size],
                [west, south]
            ]]
        })
        .to_string();
        shape_from_geojson(county, &geojson, None).unwrap()
    }

    fn ca_county() -> CountyRef {
        CountyRef {
            fips: "06075".to_string(),
            name: "San Francisco".to_string(),
            state: "CA".to_string(),
        }
    }

    fn nv_county() -> CountyRef {
        CountyRef {
            fips: "32003".to_string(),
            name: "Clark".to_string(),
            state: "NV".to_string(),
        }
    }

    #[test]
    fn lookup_finds_containing_county() {
        let index = CountyIndex::from_shapes(vec![
            square(ca_county(), -123.0, 37.0, 1.0),
            square(nv_county(), -116.0, 35.5, 1.0),
        ]);

        assert_eq!(index.lookup(-122.41, 37.75).unwrap().fips, "06075");
        assert_eq!(index.lookup(-115.17, 36.11).unwrap().fips, "32003");
        assert!(index.lookup(-80.0, 25.0).is_none());
    }

    #[test]
    fn shape_bbox_and_centroid() {
        let shape = square(ca_county(), -123.0, 37.0, 1.0);
        assert!((shape.bbox().west - -123.0).abs() < 1e-9);
        assert!((shape.bbox().north - 38.0).abs() < 1e-9);
        let (lng, lat) = shape.centroid();
        assert!((lng - -122.5).abs() < 1e-9);
        assert!((lat - 37.5).abs() < 1e-9);
    }

    #[test]
    fn parses_multipolygon_geometry() {
        let geojson = serde_json::json!({
            "type": "MultiPolygon",
            "coordinates": [[[
                [0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]
            ]]]
        })
        .to_string();
        let polygon = parse_multipolygon(&geojson).unwrap();
        assert_eq!(polygon.0.len(), 1);
    }

    #[test]
    fn rejects_non_polygon_geometry() {
        let geojson = serde_json::json!({
            "type": "Point",
            "coordinates": [0.0, 0.0]
        })
        .to_string();
        assert!(parse_multipolygon(&geojson).is_none());
    }

    #[test]
    fn exact_containment_beats_bbox() {
        // A triangle occupying the lower-left half of its bbox: a point in
        // the upper-right corner hits the envelope but not the polygon.
        let geojson = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [0.0, 0.0], [2.0, 0.0], [0.0, 2.0], [0.0, 0.0]
            ]]
        })
        .to_string();
        let shape = shape_from_geojson(ca_county(), &geojson, None).unwrap();
        assert!(shape.contains(0.5, 0.5));
        assert!(!shape.contains(1.8, 1.8));

        let index = CountyIndex::from_shapes(vec![shape]);
        assert!(index.lookup(1.8, 1.8).is_none());
    }
}
