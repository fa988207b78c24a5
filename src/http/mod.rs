use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;

use crate::config::HttpConfig;
use crate::health::{HealthMonitor, HealthStatus};
use crate::metrics::Metrics;
use crate::service::OrderService;
use crate::utils::CircuitBreaker;

// ============================================================================
// HTTP Surface
// ============================================================================
//
// GET  /order/{order_uid}   order as JSON, 404 when unknown
// POST /order               form lookup, redirects to GET /order/{order_uid}
// GET  /health              component health, 503 when unhealthy
// GET  /metrics             Prometheus text exposition
//
// ============================================================================

const DATABASE_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
    pub health: Arc<HealthMonitor>,
    pub metrics: Arc<Metrics>,
    pub dead_letter_breaker: Option<CircuitBreaker>,
}

#[derive(Debug, Deserialize)]
struct LookupForm {
    #[serde(default)]
    order_uid: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/order/{order_uid}", web::get().to(get_order))
        .route("/order", web::post().to(lookup_order))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

pub async fn serve(state: AppState, config: &HttpConfig) -> std::io::Result<()> {
    tracing::info!("🌐 Starting HTTP server on http://{}:{}", config.host, config.port);

    let data = web::Data::new(state);
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind((config.host.as_str(), config.port))?
        .run()
        .await
}

async fn get_order(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let order_uid = path.into_inner();

    match state.service.get(&order_uid).await {
        Ok(Some(order)) => HttpResponse::Ok().json(order),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "order not found"
        })),
        Err(e) => {
            tracing::error!(order_uid = %order_uid, error = %e, "Order lookup failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "failed to load order"
            }))
        }
    }
}

async fn lookup_order(form: web::Form<LookupForm>) -> impl Responder {
    let order_uid = form.order_uid.trim();

    if order_uid.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "order_uid is required"
        }));
    }

    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, format!("/order/{}", order_uid)))
        .finish()
}

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let database =
        tokio::time::timeout(DATABASE_PROBE_TIMEOUT, state.service.repository().ping()).await;
    let database = match database {
        Ok(Ok(())) => HealthStatus::Healthy,
        Ok(Err(e)) => HealthStatus::Unhealthy(e.to_string()),
        Err(_) => HealthStatus::Unhealthy("database ping timed out".to_string()),
    };
    state.health.update("database", database, None).await;

    if let Some(breaker) = &state.dead_letter_breaker {
        let circuit = breaker.state().await;
        state.metrics.update_circuit_breaker_state(circuit.as_gauge());
        state
            .health
            .update("dead_letter_producer", HealthStatus::from_circuit(circuit), None)
            .await;
    }

    let cached = state.service.cache().len().await;
    state
        .health
        .update(
            "cache",
            HealthStatus::Healthy,
            Some(format!("{} orders cached", cached)),
        )
        .await;

    let health = state.health.snapshot().await;
    if health.overall_status.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(health)
    } else {
        HttpResponse::Ok().json(health)
    }
}

async fn metrics_handler(state: web::Data<AppState>) -> impl Responder {
    if let Some(breaker) = &state.dead_letter_breaker {
        state
            .metrics
            .update_circuit_breaker_state(breaker.state().await.as_gauge());
    }

    match state.metrics.encode() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
