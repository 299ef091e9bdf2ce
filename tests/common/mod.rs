// Shared fixtures for the HTTP integration tests
#![allow(dead_code)]

use std::sync::Arc;

use actix_web::web;
use chrono::{TimeZone, Utc};

use utilityops::auth::AuthService;
use utilityops::cache::ManualClock;
use utilityops::config::{AppConfig, StorageBackend};
use utilityops::mailer::{Mailer, OutboxMailer};
use utilityops::models::{Area, NewArea, NewRole, NewUser, PermissionFields, Role, TokenType, User};
use utilityops::state::AppState;
use utilityops::store::{AreaStore, IdentityStore};

pub const PASSWORD: &str = "Correct-Horse-9";

/// Builds the `/api` app around a context's state.
macro_rules! init_app {
    ($ctx:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($ctx.state.clone())
                .service(actix_web::web::scope("/api").configure(utilityops::handlers::configure)),
        )
        .await
    };
}

pub struct TestContext {
    pub state: web::Data<AppState>,
    pub clock: Arc<ManualClock>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        storage_backend: StorageBackend::Memory,
        jwt_secret: "integration-secret".to_string(),
        bcrypt_cost: 4,
        frontend_url: "https://ops.ward.test".to_string(),
        default_from_email: "ops@ward.test".to_string(),
        ..AppConfig::default()
    }
}

pub fn context() -> TestContext {
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let state = AppState::in_memory(test_config(), clock.clone(), Mailer::Outbox(OutboxMailer::new()));
    TestContext { state: web::Data::new(state), clock }
}

/// `[view, add, edit, delete]` flags for one page.
pub fn grant(page: &str, flags: [bool; 4], is_login_page: bool) -> PermissionFields {
    let [can_view, can_add, can_edit, can_delete] = flags;
    PermissionFields { page: page.to_string(), can_view, can_add, can_edit, can_delete, is_login_page }
}

impl TestContext {
    pub fn outbox(&self) -> &OutboxMailer {
        self.state.mailer.outbox().expect("tests run with the outbox mailer")
    }

    pub fn role(&self, name: &str, grants: Vec<PermissionFields>) -> Role {
        let role = NewRole { name: name.to_string(), description: String::new() };
        self.state.identity.create_role(role, grants).unwrap()
    }

    pub fn user(&self, email: &str, role_id: Option<i32>, is_superuser: bool) -> User {
        let username = email.split('@').next().unwrap().to_string();
        self.state
            .identity
            .create_user(NewUser {
                email: email.to_string(),
                username,
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                avatar: None,
                role_id,
                is_superuser,
                is_staff: is_superuser,
                is_active: true,
                password_hash: AuthService::hash_password(PASSWORD, 4).unwrap(),
            })
            .unwrap()
    }

    pub fn area(&self, name: &str) -> Area {
        self.state.areas.create_area(NewArea { area_name: name.to_string() }).unwrap()
    }

    /// A bearer header value for `user`, as if they had logged in.
    pub fn bearer(&self, user: &User) -> (&'static str, String) {
        let token = AuthService::issue_token(user, None, TokenType::Access, &self.state.config).unwrap();
        ("Authorization", format!("Bearer {}", token))
    }
}
