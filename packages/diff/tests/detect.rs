//! Change-detector integration tests against in-memory SQLite.
//!
//! These walk the detector through the three cornerstone flows: a cold
//! start against an empty serving set, a no-op rerun with identical
//! data, and a connector-only modification that must survive the
//! already-current ZIP filter.

use charge_map_database::{Tier, aggregates, stations};
use charge_map_diff::detect;
use charge_map_region_models::{
    ChargerCounts, ConnectorCounts, PortCounts, RegionAggregate, RegionType, ZipKey,
};
use charge_map_station_models::{ChargerLevel, ConnectorType, Station};
use chrono::Utc;
use switchy_database::Database;

async fn connect() -> Box<dyn Database> {
    switchy_database_connection::init_sqlite_rusqlite(None)
        .await
        .expect("Failed to open in-memory SQLite")
}

async fn create_tables(db: &dyn Database) {
    for table in ["stations", "stations_staging"] {
        db.exec_raw(&format!(
            "CREATE TABLE {table} (
                external_id BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                latitude DOUBLE PRECISION NOT NULL,
                longitude DOUBLE PRECISION NOT NULL,
                street_address TEXT,
                city TEXT,
                state TEXT NOT NULL,
                zip TEXT,
                level TEXT NOT NULL,
                num_ports INTEGER NOT NULL DEFAULT 1,
                connector_types TEXT NOT NULL,
                network TEXT,
                created_at TIMESTAMP NOT NULL
            )"
        ))
        .await
        .unwrap();
    }

    for table in ["zip_aggregates", "zip_aggregates_staging"] {
        db.exec_raw(&format!(
            "CREATE TABLE {table} (
                zip_code TEXT NOT NULL,
                state TEXT NOT NULL,
                latitude DOUBLE PRECISION NOT NULL,
                longitude DOUBLE PRECISION NOT NULL,
                population BIGINT NOT NULL,
                population_estimated BOOLEAN NOT NULL DEFAULT FALSE,
                total_chargers INTEGER NOT NULL,
                dcfast_count INTEGER NOT NULL,
                level2_count INTEGER NOT NULL,
                level1_count INTEGER NOT NULL,
                tesla_count INTEGER NOT NULL,
                ccs_count INTEGER NOT NULL,
                j1772_count INTEGER NOT NULL,
                chademo_count INTEGER NOT NULL,
                tesla_ports INTEGER NOT NULL,
                ccs_ports INTEGER NOT NULL,
                j1772_ports INTEGER NOT NULL,
                chademo_ports INTEGER NOT NULL,
                total_ports INTEGER NOT NULL,
                need_score INTEGER NOT NULL,
                ev_infrastructure_score INTEGER NOT NULL,
                opportunity_score INTEGER NOT NULL,
                vmt_per_capita DOUBLE PRECISION,
                zoom_range TEXT NOT NULL,
                computed_at TIMESTAMP NOT NULL,
                PRIMARY KEY (zip_code, state)
            )"
        ))
        .await
        .unwrap();
    }

    db.exec_raw(
        "CREATE TABLE zip_counties (zip TEXT NOT NULL, county_fips TEXT NOT NULL,
         PRIMARY KEY (zip, county_fips))",
    )
    .await
    .unwrap();
    db.exec_raw(
        "CREATE TABLE county_boundaries (
            county_fips TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            state_fips TEXT NOT NULL,
            state TEXT NOT NULL,
            boundary_geojson TEXT NOT NULL,
            min_lng DOUBLE PRECISION NOT NULL,
            min_lat DOUBLE PRECISION NOT NULL,
            max_lng DOUBLE PRECISION NOT NULL,
            max_lat DOUBLE PRECISION NOT NULL,
            centroid_lng DOUBLE PRECISION,
            centroid_lat DOUBLE PRECISION
        )",
    )
    .await
    .unwrap();
}

async fn seed_reference(db: &dyn Database) {
    for (zip, fips, name, state, state_fips) in [
        ("94110", "06075", "San Francisco", "CA", "06"),
        ("89109", "32003", "Clark", "NV", "32"),
    ] {
        db.exec_raw(&format!(
            "INSERT INTO zip_counties (zip, county_fips) VALUES ('{zip}', '{fips}')"
        ))
        .await
        .unwrap();
        db.exec_raw(&format!(
            "INSERT INTO county_boundaries (county_fips, name, state_fips, state,
                boundary_geojson, min_lng, min_lat, max_lng, max_lat)
             VALUES ('{fips}', '{name}', '{state_fips}', '{state}',
                '{{\"type\":\"Polygon\",\"coordinates\":[]}}', -125, 30, -110, 42)"
        ))
        .await
        .unwrap();
    }
}

fn ca_station() -> Station {
    Station {
        external_id: 1,
        name: "City Hall Garage".to_string(),
        latitude: 37.75,
        longitude: -122.41,
        street_address: None,
        city: None,
        state: "CA".to_string(),
        zip: Some("94110".to_string()),
        level: ChargerLevel::DcFast,
        num_ports: 8,
        connectors: vec![ConnectorType::Tesla],
        network: None,
        created_at: Utc::now(),
    }
}

fn nv_station() -> Station {
    Station {
        external_id: 2,
        name: "Strip Plaza".to_string(),
        latitude: 36.11,
        longitude: -115.17,
        street_address: None,
        city: None,
        state: "NV".to_string(),
        zip: Some("89109".to_string()),
        level: ChargerLevel::DcFast,
        num_ports: 4,
        connectors: vec![ConnectorType::J1772Combo],
        network: None,
        created_at: Utc::now(),
    }
}

/// The serving ZIP aggregate row that matches one serving station.
fn matching_zip_row(station: &Station) -> RegionAggregate {
    let (tesla, ccs) = match station.connectors.first() {
        Some(ConnectorType::Tesla) => (1, 0),
        Some(ConnectorType::J1772Combo) => (0, 1),
        _ => (0, 0),
    };
    RegionAggregate {
        region_type: RegionType::Zip,
        state: station.state.clone(),
        name: station.zip.clone().unwrap(),
        county_fips: None,
        latitude: station.latitude,
        longitude: station.longitude,
        population: 50_000,
        population_estimated: false,
        chargers: ChargerCounts {
            total: 1,
            dcfast: 1,
            level2: 0,
            level1: 0,
        },
        connectors: ConnectorCounts {
            tesla,
            ccs,
            ..ConnectorCounts::default()
        },
        ports: PortCounts {
            tesla: tesla * station.num_ports,
            ccs: ccs * station.num_ports,
            total: station.num_ports,
            ..PortCounts::default()
        },
        need_score: 5,
        ev_infrastructure_score: 60,
        opportunity_score: 65,
        vmt_per_capita: None,
        zoom_range: RegionType::Zip.zoom_range(),
    }
}

#[tokio::test]
async fn cold_start_marks_everything_affected() {
    let db = connect().await;
    create_tables(db.as_ref()).await;
    seed_reference(db.as_ref()).await;

    stations::insert_batch(db.as_ref(), Tier::Staging, &[ca_station(), nv_station()])
        .await
        .unwrap();

    let changes = detect(db.as_ref(), None).await.unwrap();

    assert_eq!(changes.totals.added, 2);
    assert_eq!(changes.totals.removed, 0);
    assert!(changes.affected_states.contains("CA"));
    assert!(changes.affected_states.contains("NV"));
    assert_eq!(changes.affected_zips.len(), 2);
    // Counties resolve through the crosswalk, FIPS-keyed.
    let county_fips: Vec<&str> = changes
        .affected_counties
        .iter()
        .map(|c| c.fips.as_str())
        .collect();
    assert_eq!(county_fips, vec!["06075", "32003"]);
}

#[tokio::test]
async fn identical_sets_detect_nothing() {
    let db = connect().await;
    create_tables(db.as_ref()).await;
    seed_reference(db.as_ref()).await;

    let batch = [ca_station(), nv_station()];
    stations::insert_batch(db.as_ref(), Tier::Staging, &batch)
        .await
        .unwrap();
    stations::insert_batch(db.as_ref(), Tier::Serving, &batch)
        .await
        .unwrap();

    let changes = detect(db.as_ref(), None).await.unwrap();
    assert!(changes.is_empty());
}

#[tokio::test]
async fn connector_modification_survives_the_current_filter() {
    let db = connect().await;
    create_tables(db.as_ref()).await;
    seed_reference(db.as_ref()).await;

    let serving_batch = [ca_station(), nv_station()];
    stations::insert_batch(db.as_ref(), Tier::Serving, &serving_batch)
        .await
        .unwrap();

    // Serving aggregates are current for the serving stations.
    let rows: Vec<RegionAggregate> = serving_batch.iter().map(matching_zip_row).collect();
    aggregates::insert_zip_batch(db.as_ref(), Tier::Serving, &rows, Utc::now())
        .await
        .unwrap();

    // Staging: station 1 gains a CCS connector. Level counts are
    // unchanged, so only the connector comparison can catch this.
    let mut modified = ca_station();
    modified.connectors = vec![ConnectorType::Tesla, ConnectorType::J1772Combo];
    modified.connectors.sort_unstable();
    stations::insert_batch(db.as_ref(), Tier::Staging, &[modified, nv_station()])
        .await
        .unwrap();

    let changes = detect(db.as_ref(), None).await.unwrap();

    assert_eq!(changes.totals.modified, 1);
    assert_eq!(changes.affected_states.len(), 1);
    assert!(changes.affected_states.contains("CA"));
    assert_eq!(
        changes.affected_zips.iter().collect::<Vec<_>>(),
        vec![&ZipKey {
            state: "CA".to_string(),
            zip: "94110".to_string()
        }]
    );

    // The untouched NV ZIP was filtered as already current.
    assert!(!changes
        .affected_zips
        .contains(&ZipKey { state: "NV".to_string(), zip: "89109".to_string() }));
}
