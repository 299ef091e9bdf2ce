#[macro_use]
mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use chrono::Duration;
use serde_json::{json, Value};

use common::{grant, PASSWORD};
use utilityops::store::IdentityStore;

fn otp_from(body: &str) -> String {
    body.lines()
        .next()
        .and_then(|line| line.rsplit(' ').next())
        .unwrap()
        .to_string()
}

#[actix_web::test]
async fn logout_blacklists_the_refresh_token() {
    let ctx = common::context();
    let user = ctx.user("clerk@ward.gov", None, false);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({ "email": "clerk@ward.gov", "password": PASSWORD }))
        .to_request();
    let tokens: Value = test::call_and_read_body_json(&app, req).await;
    let refresh = tokens["refresh"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/token/refresh")
        .set_json(json!({ "refresh": refresh }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let renewed: Value = test::read_body_json(res).await;
    assert!(renewed["access"].is_string());

    let req = test::TestRequest::post()
        .uri("/api/logout")
        .insert_header(ctx.bearer(&user))
        .set_json(json!({}))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "Refresh token is required");

    let req = test::TestRequest::post()
        .uri("/api/logout")
        .insert_header(ctx.bearer(&user))
        .set_json(json!({ "refresh": refresh }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::RESET_CONTENT);

    let req = test::TestRequest::post()
        .uri("/api/token/refresh")
        .set_json(json!({ "refresh": refresh }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/logout")
        .insert_header(ctx.bearer(&user))
        .set_json(json!({ "refresh": refresh }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn logout_requires_authentication() {
    let ctx = common::context();
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/logout")
        .set_json(json!({ "refresh": "anything" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn verified_otp_allows_exactly_one_reset() {
    let ctx = common::context();
    ctx.user("clerk@ward.gov", None, false);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/forgot-password")
        .set_json(json!({ "email": "clerk@ward.gov" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["message"], "OTP sent to your email");

    let mail = ctx.outbox().last_to("clerk@ward.gov").unwrap();
    assert_eq!(mail.subject, "Your OTP for Password Reset");
    assert_eq!(mail.from, "ops@ward.test");
    let otp = otp_from(&mail.body);
    assert_eq!(otp.len(), 6);

    let wrong = if otp == "000000" { "111111" } else { "000000" };
    let req = test::TestRequest::post()
        .uri("/api/otp-verification")
        .set_json(json!({ "email": "clerk@ward.gov", "otp": wrong }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "Invalid or expired OTP");

    let req = test::TestRequest::post()
        .uri("/api/otp-verification")
        .set_json(json!({ "email": "clerk@ward.gov", "otp": otp }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri("/api/reset-password")
        .set_json(json!({
            "email": "clerk@ward.gov",
            "new_password": "Fresh-Start-1",
            "confirm_new_password": "Fresh-Start-2"
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "Passwords do not match");

    let reset = json!({
        "email": "clerk@ward.gov",
        "new_password": "Fresh-Start-1",
        "confirm_new_password": "Fresh-Start-1"
    });
    let req = test::TestRequest::post().uri("/api/reset-password").set_json(&reset).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["message"], "Password reset successfully");

    let req = test::TestRequest::post().uri("/api/reset-password").set_json(&reset).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "OTP not verified");

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({ "email": "clerk@ward.gov", "password": "Fresh-Start-1" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn otp_expires_after_five_minutes() {
    let ctx = common::context();
    ctx.user("clerk@ward.gov", None, false);
    let app = init_app!(ctx);

    let request_otp = || {
        test::TestRequest::post()
            .uri("/api/forgot-password")
            .set_json(json!({ "email": "clerk@ward.gov" }))
            .to_request()
    };

    assert_eq!(test::call_service(&app, request_otp()).await.status(), StatusCode::OK);
    let otp = otp_from(&ctx.outbox().last_to("clerk@ward.gov").unwrap().body);
    ctx.clock.advance(Duration::seconds(299));
    let req = test::TestRequest::post()
        .uri("/api/otp-verification")
        .set_json(json!({ "email": "clerk@ward.gov", "otp": otp }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    assert_eq!(test::call_service(&app, request_otp()).await.status(), StatusCode::OK);
    let otp = otp_from(&ctx.outbox().last_to("clerk@ward.gov").unwrap().body);
    ctx.clock.advance(Duration::seconds(300));
    let req = test::TestRequest::post()
        .uri("/api/otp-verification")
        .set_json(json!({ "email": "clerk@ward.gov", "otp": otp }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn forgot_password_reports_unknown_users_and_mail_failures() {
    let ctx = common::context();
    ctx.user("clerk@ward.gov", None, false);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/forgot-password")
        .set_json(json!({ "email": "ghost@ward.gov" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "User not found");

    ctx.outbox().fail_with(Some("relay unreachable"));
    let req = test::TestRequest::post()
        .uri("/api/forgot-password")
        .set_json(json!({ "email": "clerk@ward.gov" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "Failed to send email: relay unreachable");
}

#[actix_web::test]
async fn change_password_checks_confirmation_before_current_password() {
    let ctx = common::context();
    let user = ctx.user("clerk@ward.gov", None, false);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/change-password")
        .insert_header(ctx.bearer(&user))
        .set_json(json!({
            "current_password": "not-it",
            "new_password": "Next-1",
            "confirm_new_password": "Next-2"
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "Passwords do not match");

    let req = test::TestRequest::post()
        .uri("/api/change-password")
        .insert_header(ctx.bearer(&user))
        .set_json(json!({
            "current_password": "not-it",
            "new_password": "Next-1",
            "confirm_new_password": "Next-1"
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "Current password is incorrect");

    let unchanged = ctx.state.identity.get_user(user.id).unwrap();
    assert_eq!(unchanged.password_hash, user.password_hash);

    let req = test::TestRequest::post()
        .uri("/api/change-password")
        .insert_header(ctx.bearer(&user))
        .set_json(json!({
            "current_password": PASSWORD,
            "new_password": "Next-1",
            "confirm_new_password": "Next-1"
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["message"], "Password changed successfully");
}

#[actix_web::test]
async fn only_superusers_may_change_roles_through_the_profile() {
    let ctx = common::context();
    let clerk_role = ctx.role("clerk", vec![grant("complaints", [true, true, false, false], true)]);
    let admin_role = ctx.role("admin", vec![grant("role", [true; 4], false)]);
    let clerk = ctx.user("clerk@ward.gov", Some(clerk_role.id), false);
    let root = ctx.user("root@ward.gov", None, true);
    let app = init_app!(ctx);

    let req = test::TestRequest::put()
        .uri("/api/profile")
        .insert_header(ctx.bearer(&clerk))
        .set_json(json!({ "first_name": "Asha", "role_id": admin_role.id }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "Only superadmin can edit roles");
    let stored = ctx.state.identity.get_user(clerk.id).unwrap();
    assert_eq!(stored.role_id, Some(clerk_role.id));
    assert_eq!(stored.first_name, "Test");

    let req = test::TestRequest::put()
        .uri("/api/profile")
        .insert_header(ctx.bearer(&clerk))
        .set_json(json!({ "first_name": "Asha" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["message"], "Profile updated successfully");
    assert_eq!(body["data"]["first_name"], "Asha");
    assert_eq!(body["data"]["role"]["name"], "clerk");
    assert_eq!(body["data"]["role"]["permissions"][0]["page"], "complaints");

    let req = test::TestRequest::put()
        .uri("/api/profile")
        .insert_header(ctx.bearer(&root))
        .set_json(json!({ "role_id": admin_role.id }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["role"]["name"], "admin");
}

#[actix_web::test]
async fn profile_hides_the_password_hash() {
    let ctx = common::context();
    let user = ctx.user("clerk@ward.gov", None, false);
    let app = init_app!(ctx);

    let req = test::TestRequest::get()
        .uri("/api/profile")
        .insert_header(ctx.bearer(&user))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["email"], "clerk@ward.gov");
    assert_eq!(body["role"], Value::Null);
    assert!(body.get("password_hash").is_none());
}

#[actix_web::test]
async fn provisioned_accounts_receive_working_credentials() {
    let ctx = common::context();
    let role = ctx.role("clerk", vec![grant("complaints", [true, true, false, false], true)]);
    let root = ctx.user("root@ward.gov", None, true);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/users/")
        .insert_header(ctx.bearer(&root))
        .set_json(json!({
            "email": "new.clerk@ward.gov",
            "username": "newclerk",
            "first_name": "Meera",
            "role_id": role.id
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["credentials_emailed"], true);
    assert_eq!(body["role"]["name"], "clerk");

    let mail = ctx.outbox().last_to("new.clerk@ward.gov").unwrap();
    assert_eq!(mail.subject, "Your Account Credentials");
    assert!(mail.body.starts_with("Hello Meera,"));
    assert!(mail.body.contains("https://ops.ward.test/login"));
    let password = mail
        .body
        .lines()
        .find_map(|line| line.strip_prefix("Password: "))
        .unwrap()
        .to_string();
    assert_eq!(password.chars().count(), 12);

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({ "email": "new.clerk@ward.gov", "password": password }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["login_page"], "complaints");
}

#[actix_web::test]
async fn provisioning_survives_a_mail_failure() {
    let ctx = common::context();
    let role = ctx.role("clerk", vec![]);
    let root = ctx.user("root@ward.gov", None, true);
    let app = init_app!(ctx);

    ctx.outbox().fail_with(Some("smtp down"));
    let req = test::TestRequest::post()
        .uri("/api/users/")
        .insert_header(ctx.bearer(&root))
        .set_json(json!({ "email": "new.clerk@ward.gov", "username": "newclerk", "role_id": role.id }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["credentials_emailed"], false);

    let created = ctx.state.identity.find_user_by_email("new.clerk@ward.gov").unwrap().unwrap();
    assert!(created.is_active);
    assert_eq!(created.role_id, Some(role.id));

    let req = test::TestRequest::post()
        .uri("/api/users/")
        .insert_header(ctx.bearer(&root))
        .set_json(json!({ "email": "new.clerk@ward.gov", "username": "other", "role_id": role.id }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "Email already exists");
}

#[actix_web::test]
async fn blank_passwords_are_rejected_before_anything_changes() {
    let ctx = common::context();
    let user = ctx.user("clerk@ward.gov", None, false);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/change-password")
        .insert_header(ctx.bearer(&user))
        .set_json(json!({
            "current_password": PASSWORD,
            "new_password": "",
            "confirm_new_password": ""
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "new_password: This field may not be blank.");

    let unchanged = ctx.state.identity.get_user(user.id).unwrap();
    assert_eq!(unchanged.password_hash, user.password_hash);

    let req = test::TestRequest::post()
        .uri("/api/reset-password")
        .set_json(json!({
            "email": "clerk@ward.gov",
            "new_password": "   ",
            "confirm_new_password": "   "
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "new_password: This field may not be blank.");

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({ "email": "clerk@ward.gov", "password": PASSWORD }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn blank_identity_fields_are_rejected() {
    let ctx = common::context();
    let role = ctx.role("clerk", vec![]);
    let clerk = ctx.user("clerk@ward.gov", Some(role.id), false);
    let root = ctx.user("root@ward.gov", None, true);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/users/")
        .insert_header(ctx.bearer(&root))
        .set_json(json!({ "email": " ", "username": "newclerk", "role_id": role.id }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "email: This field may not be blank.");
    assert!(ctx.outbox().messages().is_empty());

    let req = test::TestRequest::put()
        .uri("/api/profile")
        .insert_header(ctx.bearer(&clerk))
        .set_json(json!({ "username": "" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "username: This field may not be blank.");
    let stored = ctx.state.identity.get_user(clerk.id).unwrap();
    assert_eq!(stored.username, clerk.username);
}

#[actix_web::test]
async fn malformed_login_body_is_a_json_validation_error() {
    let ctx = common::context();
    ctx.user("clerk@ward.gov", None, false);
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/login")
        .set_json(json!({ "email": "clerk@ward.gov" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert!(body["error"].as_str().unwrap().contains("password"));
}
