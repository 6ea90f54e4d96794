// src/bin/api_server.rs
//
// Thin HTTP shim over the resolver: JSON in, the same structured reports the
// CLI produces out. No business logic lives here.

use anyhow::{Context, Result};
use axum::{extract::State, routing::post, Json, Router};
use cnpj_lookup_lib::io::report::{CompanyQueryReport, PartnerQueryReport};
use cnpj_lookup_lib::matching::resolver::{
    resolve_company, resolve_partner, DEFAULT_SIMILARITY_THRESHOLD,
};
use cnpj_lookup_lib::utils::db_connect::{connect, PgPool};
use cnpj_lookup_lib::utils::env::load_env;
use cnpj_lookup_lib::utils::schema_map::RegistrySchema;
use log::info;
use serde::Deserialize;
use std::time::Instant;

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    schema: RegistrySchema,
}

#[derive(Debug, Deserialize)]
struct PartnerRequest {
    identifier: String,
    name: Option<String>,
    threshold: Option<f64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CompanyRequest {
    cnpj: String,
}

async fn partner_handler(
    State(state): State<AppState>,
    Json(req): Json<PartnerRequest>,
) -> Json<PartnerQueryReport> {
    let started = Instant::now();
    let threshold = req.threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
    let limit = req.limit.unwrap_or(100);
    let report = match resolve_partner(
        &state.pool,
        &state.schema,
        &req.identifier,
        req.name.as_deref(),
        threshold,
        limit,
    )
    .await
    {
        Ok(outcome) => PartnerQueryReport::from_outcome(
            &req.identifier,
            req.name.as_deref(),
            &outcome,
            started.elapsed().as_millis() as u64,
        ),
        Err(e) => PartnerQueryReport::from_error(
            &req.identifier,
            req.name.as_deref(),
            &format!("{:#}", e),
            started.elapsed().as_millis() as u64,
        ),
    };
    Json(report)
}

async fn company_handler(
    State(state): State<AppState>,
    Json(req): Json<CompanyRequest>,
) -> Json<CompanyQueryReport> {
    let started = Instant::now();
    let report = match resolve_company(&state.pool, &state.schema, &req.cnpj).await {
        Ok(resolution) => CompanyQueryReport::from_resolution(
            &req.cnpj,
            &resolution,
            started.elapsed().as_millis() as u64,
        ),
        Err(e) => CompanyQueryReport::from_error(
            &req.cnpj,
            &format!("{:#}", e),
            started.elapsed().as_millis() as u64,
        ),
    };
    Json(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    load_env();

    let schema = RegistrySchema::from_env();
    schema.log_config();

    let pool = connect().await.context("Failed to connect to database")?;
    schema
        .validate(&pool)
        .await
        .context("Registry schema validation failed")?;

    let state = AppState { pool, schema };
    let app = Router::new()
        .route("/api/partner", post(partner_handler))
        .route("/api/company", post(company_handler))
        .with_state(state);

    let host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("API_PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Lookup API listening on {}", addr);

    axum::serve(listener, app)
        .await
        .context("API server failed")?;
    Ok(())
}
