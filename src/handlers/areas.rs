use actix_web::{delete, get, post, route, web, HttpRequest, HttpResponse};

use crate::auth::AuthenticatedUser;
use crate::errors::ApiError;
use crate::handlers::enforce;
use crate::models::*;
use crate::permissions::AREA_POLICY;
use crate::state::AppState;
use crate::store::blocking;

fn check_area_name(area_name: &str) -> Result<(), ApiError> {
    if area_name.trim().is_empty() {
        return Err(ApiError::ValidationError("area_name: This field may not be blank.".to_string()));
    }
    Ok(())
}

#[get("/add-area/")]
async fn list_areas(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, AREA_POLICY, &req).await?;
    let areas = state.areas.clone();
    Ok(HttpResponse::Ok().json(blocking(move || areas.list_areas()).await?))
}

#[post("/add-area/")]
async fn create_area(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    body: web::Json<NewArea>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, AREA_POLICY, &req).await?;
    let new_area = body.into_inner();
    check_area_name(&new_area.area_name)?;
    let areas = state.areas.clone();
    let area = blocking(move || areas.create_area(new_area)).await?;
    Ok(HttpResponse::Created().json(area))
}

#[get("/add-area/{id}/")]
async fn get_area(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, AREA_POLICY, &req).await?;
    let id = path.into_inner();
    let areas = state.areas.clone();
    Ok(HttpResponse::Ok().json(blocking(move || areas.get_area(id)).await?))
}

#[route("/add-area/{id}/", method = "PUT", method = "PATCH")]
async fn update_area(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<AreaChanges>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, AREA_POLICY, &req).await?;
    let id = path.into_inner();
    let changes = body.into_inner();
    if let Some(area_name) = &changes.area_name {
        check_area_name(area_name)?;
    }
    let areas = state.areas.clone();
    Ok(HttpResponse::Ok().json(blocking(move || areas.update_area(id, changes)).await?))
}

#[delete("/add-area/{id}/")]
async fn delete_area(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, AREA_POLICY, &req).await?;
    let id = path.into_inner();
    let areas = state.areas.clone();
    blocking(move || areas.delete_area(id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_areas)
        .service(create_area)
        .service(get_area)
        .service(update_area)
        .service(delete_area);
}
