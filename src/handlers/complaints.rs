use actix_web::{delete, get, post, route, web, HttpRequest, HttpResponse};
use log::info;

use crate::auth::AuthenticatedUser;
use crate::errors::ApiError;
use crate::handlers::enforce;
use crate::models::*;
use crate::permissions::COMPLAINTS_POLICY;
use crate::state::AppState;
use crate::store::blocking;

#[get("/complaints/")]
async fn list_complaints(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    filter: web::Query<ComplaintFilter>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, COMPLAINTS_POLICY, &req).await?;
    let complaints = state.complaints.clone();
    let filter = filter.into_inner();
    Ok(HttpResponse::Ok().json(blocking(move || complaints.list_complaints(&filter)).await?))
}

#[post("/complaints/")]
async fn create_complaint(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    body: web::Json<CreateComplaintRequest>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, COMPLAINTS_POLICY, &req).await?;
    let request = body.into_inner();
    let area_id = request.validate().map_err(ApiError::ValidationError)?;

    let draft = ComplaintDraft {
        area_id,
        complaint_type: request.complaint_type,
        name: request.name,
        date: request.date.unwrap_or_else(|| state.clock.now().date_naive()),
        address: request.address,
        phone_number: request.phone_number,
        department: request.department,
        status: request.status.unwrap_or_else(|| DEFAULT_COMPLAINT_STATUS.to_string()),
        created_by: Some(user.0.id),
    };
    let complaints = state.complaints.clone();
    let complaint = blocking(move || complaints.create_complaint(draft)).await?;
    info!("Complaint {} filed as ticket {}", complaint.serial_no, complaint.ticket_number);
    Ok(HttpResponse::Created().json(complaint))
}

#[get("/complaints/{id}/")]
async fn get_complaint(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, COMPLAINTS_POLICY, &req).await?;
    let id = path.into_inner();
    let complaints = state.complaints.clone();
    Ok(HttpResponse::Ok().json(blocking(move || complaints.get_complaint(id)).await?))
}

#[route("/complaints/{id}/", method = "PUT", method = "PATCH")]
async fn update_complaint(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<ComplaintChanges>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, COMPLAINTS_POLICY, &req).await?;
    let id = path.into_inner();
    let changes = body.into_inner();
    changes.validate().map_err(ApiError::ValidationError)?;
    let complaints = state.complaints.clone();
    Ok(HttpResponse::Ok().json(blocking(move || complaints.update_complaint(id, changes)).await?))
}

#[delete("/complaints/{id}/")]
async fn delete_complaint(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce(&state, &user.0, COMPLAINTS_POLICY, &req).await?;
    let id = path.into_inner();
    let complaints = state.complaints.clone();
    blocking(move || complaints.delete_complaint(id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_complaints)
        .service(create_complaint)
        .service(get_complaint)
        .service(update_complaint)
        .service(delete_complaint);
}
