//! HTTP handlers, mounted under `/api` by [`configure`].
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::warn;
use serde_json::json;

use crate::errors::ApiError;
use crate::models::User;
use crate::permissions::{authorize, AccessPolicy, Action};
use crate::state::AppState;
use crate::store::blocking;

pub mod areas;
pub mod auth;
pub mod complaints;
pub mod connections;
pub mod rbac;
pub mod users;
pub mod valves;

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Checks `policy` for the request's method; a refusal is the generic 403.
pub async fn enforce(
    state: &web::Data<AppState>,
    actor: &User,
    policy: AccessPolicy,
    req: &HttpRequest,
) -> Result<(), ApiError> {
    let identity = state.identity.clone();
    let checked = actor.clone();
    let method = req.method().clone();
    if blocking(move || policy.permits(identity.as_ref(), &checked, &method)).await? {
        Ok(())
    } else {
        warn!("User {} denied {} on {}", actor.email, req.method(), policy.page);
        Err(ApiError::permission_denied())
    }
}

/// The explicit check used by the role, permission and user admin endpoints.
pub async fn require(
    state: &web::Data<AppState>,
    actor: &User,
    page: &'static str,
    action: Action,
) -> Result<(), ApiError> {
    let identity = state.identity.clone();
    let checked = actor.clone();
    if blocking(move || authorize(identity.as_ref(), &checked, page, action)).await? {
        Ok(())
    } else {
        warn!("User {} denied {} on {}", actor.email, action.as_str(), page);
        Err(ApiError::Forbidden("Permission denied".to_string()))
    }
}

/// Malformed bodies and query strings answer like any other validation error.
fn extractor_configs(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::ValidationError(err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::ValidationError(err.to_string()).into()
    }));
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    extractor_configs(cfg);
    cfg.service(health_check);
    auth::configure(cfg);
    rbac::configure(cfg);
    users::configure(cfg);
    areas::configure(cfg);
    complaints::configure(cfg);
    connections::configure(cfg);
    valves::configure(cfg);
}
