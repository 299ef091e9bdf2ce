use std::collections::HashMap;

use actix_web::{delete, get, post, put, web, HttpResponse};
use log::{info, warn};

use crate::auth::AuthenticatedUser;
use crate::errors::ApiError;
use crate::handlers::require;
use crate::models::*;
use crate::permissions::{Action, PAGE_USER_DETAIL, PAGE_USER_MANAGEMENT};
use crate::services::UserService;
use crate::state::AppState;
use crate::store::blocking;

#[get("/users/")]
async fn list_users(state: web::Data<AppState>, user: AuthenticatedUser) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_USER_MANAGEMENT, Action::View).await?;
    let identity = state.identity.clone();
    let users = blocking(move || {
        let permissions = identity.list_permissions()?;
        let roles: HashMap<i32, RoleResponse> = identity
            .list_roles()?
            .into_iter()
            .map(|role| {
                let granted = permissions.iter().filter(|p| p.role_id == role.id).cloned().collect();
                (role.id, RoleResponse::new(role, granted))
            })
            .collect();
        Ok(identity
            .list_users()?
            .into_iter()
            .map(|user| {
                let role = user.role_id.and_then(|id| roles.get(&id).cloned());
                UserResponse::new(user, role)
            })
            .collect::<Vec<_>>())
    })
    .await?;
    Ok(HttpResponse::Ok().json(users))
}

#[post("/users/")]
async fn create_user(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<CreateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    if !user.0.is_superuser {
        warn!("User {} tried to provision an account", user.0.email);
        return Err(ApiError::Forbidden("Only superadmin can create users".to_string()));
    }
    let (created, credentials_emailed) = UserService::provision(&state, body.into_inner()).await?;
    info!("User {} provisioned by {}", created.email, user.0.email);
    let response = ProvisionedUserResponse {
        user: UserService::user_response(&state, created).await?,
        credentials_emailed,
    };
    Ok(HttpResponse::Created().json(response))
}

#[get("/users/{id}/")]
async fn get_user(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_USER_DETAIL, Action::View).await?;
    let id = path.into_inner();
    let identity = state.identity.clone();
    let found = blocking(move || identity.get_user(id)).await?;
    Ok(HttpResponse::Ok().json(UserService::user_response(&state, found).await?))
}

#[put("/users/{id}/")]
async fn update_user(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
    body: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_USER_DETAIL, Action::Edit).await?;
    let updated = UserService::update(&state, &user.0, path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UserService::user_response(&state, updated).await?))
}

#[delete("/users/{id}/")]
async fn delete_user(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    require(&state, &user.0, PAGE_USER_DETAIL, Action::Delete).await?;
    let id = path.into_inner();
    let identity = state.identity.clone();
    blocking(move || identity.delete_user(id)).await?;
    info!("User {} deleted by {}", id, user.0.email);
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_users)
        .service(create_user)
        .service(get_user)
        .service(update_user)
        .service(delete_user);
}
