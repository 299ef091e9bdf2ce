use actix_web::{get, post, put, web, HttpResponse};
use log::debug;
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::errors::ApiError;
use crate::models::*;
use crate::services::{PasswordResetService, SessionService, UserService};
use crate::state::AppState;

#[post("/login")]
async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    debug!("Login attempt for user: {}", body.email);
    let response = SessionService::login(&state, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/logout")]
async fn logout(
    state: web::Data<AppState>,
    _user: AuthenticatedUser,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    SessionService::logout(&state, body.into_inner()).await?;
    Ok(HttpResponse::ResetContent().finish())
}

#[post("/token")]
async fn obtain_token(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    let pair = SessionService::obtain_pair(&state, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(pair))
}

#[post("/token/refresh")]
async fn refresh_token(state: web::Data<AppState>, body: web::Json<RefreshRequest>) -> Result<HttpResponse, ApiError> {
    let access = SessionService::refresh(&state, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "access": access })))
}

#[get("/profile")]
async fn profile(state: web::Data<AppState>, user: AuthenticatedUser) -> Result<HttpResponse, ApiError> {
    let response = UserService::user_response(&state, user.0).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[put("/profile")]
async fn update_profile(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    let AuthenticatedUser(actor) = user;
    let updated = UserService::update(&state, &actor, actor.id, body.into_inner()).await?;
    let data = UserService::user_response(&state, updated).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Profile updated successfully",
        "data": data
    })))
}

#[post("/forgot-password")]
async fn forgot_password(
    state: web::Data<AppState>,
    body: web::Json<ForgotPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    PasswordResetService::request_otp(&state, &body.email).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "OTP sent to your email" })))
}

#[post("/otp-verification")]
async fn verify_otp(
    state: web::Data<AppState>,
    body: web::Json<OtpVerificationRequest>,
) -> Result<HttpResponse, ApiError> {
    PasswordResetService::verify_otp(&state, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "OTP verified successfully" })))
}

#[post("/reset-password")]
async fn reset_password(
    state: web::Data<AppState>,
    body: web::Json<ResetPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    PasswordResetService::complete_reset(&state, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password reset successfully" })))
}

#[post("/change-password")]
async fn change_password(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    PasswordResetService::change_password(&state, &user.0, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password changed successfully" })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(login)
        .service(logout)
        .service(obtain_token)
        .service(refresh_token)
        .service(profile)
        .service(update_profile)
        .service(forgot_password)
        .service(verify_otp)
        .service(reset_password)
        .service(change_password);
}
