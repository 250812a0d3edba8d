#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server binary for the charge map.

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use charge_map_database::{db, run_migrations};
use charge_map_refresh::RefreshConfig;
use charge_map_server::{AppState, handlers};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Connecting to database...");
    let db_conn = db::connect_from_env()
        .await
        .expect("Failed to connect to database");

    log::info!("Running migrations...");
    run_migrations(db_conn.as_ref())
        .await
        .expect("Failed to run migrations");

    let client = reqwest::Client::builder()
        .user_agent("charge-map/0.1")
        .build()
        .expect("Failed to build HTTP client");

    let state = web::Data::new(AppState {
        db: Arc::from(db_conn),
        client,
        config: RefreshConfig::from_env(),
        cron_secret: std::env::var("CRON_SECRET").unwrap_or_default(),
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route("/refresh", web::post().to(handlers::trigger_refresh))
                    .route("/stations", web::get().to(handlers::stations_in_bbox))
                    .route(
                        "/stations/in-polygon",
                        web::post().to(handlers::stations_in_polygon),
                    )
                    .route("/aggregates", web::get().to(handlers::aggregates_in_bbox)),
            )
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
