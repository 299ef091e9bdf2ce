use actix_web::{delete, get, post, put, web, HttpResponse};
use log::info;

use crate::auth::AuthenticatedUser;
use crate::errors::ApiError;
use crate::handlers::require;
use crate::models::*;
use crate::permissions::{Action, PAGE_PERMISSION, PAGE_ROLE};
use crate::services::UserService;
use crate::state::AppState;
use crate::store::blocking;

#[get("/roles/")]
async fn list_roles(state: web::Data<AppState>, user: AuthenticatedUser) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_ROLE, Action::View).await?;
    let identity = state.identity.clone();
    let roles = blocking(move || {
        let permissions = identity.list_permissions()?;
        Ok(identity
            .list_roles()?
            .into_iter()
            .map(|role| {
                let granted = permissions.iter().filter(|p| p.role_id == role.id).cloned().collect();
                RoleResponse::new(role, granted)
            })
            .collect::<Vec<_>>())
    })
    .await?;
    Ok(HttpResponse::Ok().json(roles))
}

#[post("/roles/")]
async fn create_role(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<CreateRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_ROLE, Action::Add).await?;
    let request = body.into_inner();
    if request.name.trim().is_empty() {
        return Err(ApiError::ValidationError("name: This field may not be blank.".to_string()));
    }
    for fields in &request.permissions {
        fields.validate().map_err(ApiError::ValidationError)?;
    }

    let new_role = NewRole { name: request.name, description: request.description };
    let identity = state.identity.clone();
    let role = blocking(move || identity.create_role(new_role, request.permissions)).await?;
    info!("Role {} ({}) created by {}", role.id, role.name, user.0.email);
    let response = UserService::role_response(&state, role.id).await?;
    Ok(HttpResponse::Created().json(response))
}

#[get("/roles/{id}/")]
async fn get_role(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_ROLE, Action::View).await?;
    let response = UserService::role_response(&state, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[put("/roles/{id}/")]
async fn update_role(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
    body: web::Json<RoleChanges>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_ROLE, Action::Edit).await?;
    let id = path.into_inner();
    let changes = body.into_inner();
    if changes.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        return Err(ApiError::ValidationError("name: This field may not be blank.".to_string()));
    }
    let identity = state.identity.clone();
    blocking(move || identity.update_role(id, changes)).await?;
    let response = UserService::role_response(&state, id).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[delete("/roles/{id}/")]
async fn delete_role(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_ROLE, Action::Delete).await?;
    let id = path.into_inner();
    let identity = state.identity.clone();
    blocking(move || identity.delete_role(id)).await?;
    info!("Role {} deleted by {}", id, user.0.email);
    Ok(HttpResponse::NoContent().finish())
}

#[post("/permissions/")]
async fn create_permission(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<CreatePermissionRequest>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_PERMISSION, Action::Add).await?;
    let request = body.into_inner();
    request.fields.validate().map_err(ApiError::ValidationError)?;
    let new_permission = request.fields.into_new(request.role);
    let identity = state.identity.clone();
    let permission = blocking(move || identity.create_permission(new_permission)).await?;
    Ok(HttpResponse::Created().json(permission))
}

#[get("/permissions/list/")]
async fn list_permissions(state: web::Data<AppState>, user: AuthenticatedUser) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_PERMISSION, Action::View).await?;
    let identity = state.identity.clone();
    let permissions = blocking(move || identity.list_permissions()).await?;
    Ok(HttpResponse::Ok().json(permissions))
}

#[get("/permissions/{id}/")]
async fn get_permission(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_PERMISSION, Action::View).await?;
    let id = path.into_inner();
    let identity = state.identity.clone();
    let permission = blocking(move || identity.get_permission(id)).await?;
    Ok(HttpResponse::Ok().json(permission))
}

#[put("/permissions/{id}/")]
async fn update_permission(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
    body: web::Json<PermissionChanges>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_PERMISSION, Action::Edit).await?;
    let id = path.into_inner();
    let changes = body.into_inner();
    let identity = state.identity.clone();
    let permission = blocking(move || identity.update_permission(id, changes)).await?;
    Ok(HttpResponse::Ok().json(permission))
}

#[delete("/permissions/{id}/")]
async fn delete_permission(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_PERMISSION, Action::Delete).await?;
    let id = path.into_inner();
    let identity = state.identity.clone();
    blocking(move || identity.delete_permission(id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    // The literal listing path must be registered ahead of `/permissions/{id}/`
    cfg.service(list_roles)
        .service(create_role)
        .service(get_role)
        .service(update_role)
        .service(delete_role)
        .service(list_permissions)
        .service(create_permission)
        .service(get_permission)
        .service(update_permission)
        .service(delete_permission);
}
