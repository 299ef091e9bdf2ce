use actix_web::{delete, get, post, route, web, HttpRequest, HttpResponse};
use log::info;

use crate::auth::AuthenticatedUser;
use crate::errors::ApiError;
use crate::handlers::enforce;
use crate::models::*;
use crate::permissions::VALVES_POLICY;
use crate::state::AppState;
use crate::store::blocking;

#[get("/valves/")]
async fn list_valves(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, VALVES_POLICY, &req).await?;
    let valves = state.valves.clone();
    Ok(HttpResponse::Ok().json(blocking(move || valves.list_valves()).await?))
}

#[post("/valves/")]
async fn create_valve(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    body: web::Json<CreateValveRequest>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, VALVES_POLICY, &req).await?;
    let new_valve = body.into_inner().into_new(Some(user.0.id)).map_err(ApiError::ValidationError)?;
    let valves = state.valves.clone();
    let valve = blocking(move || valves.create_valve(new_valve)).await?;
    Ok(HttpResponse::Created().json(valve))
}

#[get("/valves/{id}/")]
async fn get_valve(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, VALVES_POLICY, &req).await?;
    let id = path.into_inner();
    let valves = state.valves.clone();
    Ok(HttpResponse::Ok().json(blocking(move || valves.get_valve(id)).await?))
}

/// Updates the valve and records one audit row per changed field.
#[route("/valves/{id}/", method = "PUT", method = "PATCH")]
async fn update_valve(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<ValveChanges>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, VALVES_POLICY, &req).await?;
    let id = path.into_inner();
    let changes = body.into_inner();
    changes.validate().map_err(ApiError::ValidationError)?;
    let valves = state.valves.clone();
    let actor = user.0.id;
    let (valve, logs) = blocking(move || valves.update_valve(id, changes, Some(actor))).await?;
    if !logs.is_empty() {
        info!("Valve {} updated by {}: {} field(s) logged", valve.id, user.0.email, logs.len());
    }
    Ok(HttpResponse::Ok().json(valve))
}

#[delete("/valves/{id}/")]
async fn delete_valve(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, VALVES_POLICY, &req).await?;
    let id = path.into_inner();
    let valves = state.valves.clone();
    blocking(move || valves.delete_valve(id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

// Audit rows are read-only; without a valve_id there is nothing to list
#[get("/logs/")]
async fn list_valve_logs(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    filter: web::Query<ValveLogFilter>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, VALVES_POLICY, &req).await?;
    let valve_id = match filter.valve_id {
        Some(valve_id) => valve_id,
        None => return Ok(HttpResponse::Ok().json(Vec::<ValveLog>::new())),
    };
    let valves = state.valves.clone();
    Ok(HttpResponse::Ok().json(blocking(move || valves.list_valve_logs(valve_id)).await?))
}

#[get("/logs/{id}/")]
async fn get_valve_log(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, VALVES_POLICY, &req).await?;
    let id = path.into_inner();
    let valves = state.valves.clone();
    Ok(HttpResponse::Ok().json(blocking(move || valves.get_valve_log(id)).await?))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_valves)
        .service(create_valve)
        .service(get_valve)
        .service(update_valve)
        .service(delete_valve)
        .service(list_valve_logs)
        .service(get_valve_log);
}
