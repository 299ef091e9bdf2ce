use actix_web::web;
use chrono::Duration;
use log::{debug, error, info, warn};
use rand::Rng;

use crate::auth::{is_revoked, revoke, AuthService};
use crate::errors::ApiError;
use crate::mailer::EmailMessage;
use crate::models::*;
use crate::state::AppState;
use crate::store::{blocking, StoreError};

const OTP_TTL_SECONDS: i64 = 300;
const VERIFIED_TTL_SECONDS: i64 = 600;
const GENERATED_PASSWORD_LENGTH: usize = 12;
const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

fn otp_key(email: &str) -> String {
    format!("otp_{}", email)
}

fn verified_key(email: &str) -> String {
    format!("verified_{}", email)
}

/// Six decimal digits, leading zeros allowed.
pub fn generate_otp() -> String {
    let mut rng = rand::thread_rng();
    (0..6).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}

pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_PASSWORD_LENGTH)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())]))
        .collect()
}

pub struct SessionService;

impl SessionService {
    /// Checks the credentials of an active account.
    async fn authenticate(state: &web::Data<AppState>, email: &str, password: &str) -> Result<Option<User>, ApiError> {
        let identity = state.identity.clone();
        let lookup = email.to_string();
        let user = match blocking(move || identity.find_user_by_email(&lookup)).await? {
            Some(user) => user,
            None => {
                warn!("Login attempt for unknown email {}", email);
                return Ok(None);
            }
        };

        let password = password.to_string();
        let password_hash = user.password_hash.clone();
        let matches = web::block(move || AuthService::verify_password(&password, &password_hash))
            .await
            .map_err(|e| ApiError::InternalError(e.to_string()))??;
        if !matches || !user.is_active {
            warn!("Rejected credentials for {}", email);
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// The role name and login landing page for `user`.
    async fn role_and_landing(state: &web::Data<AppState>, user: &User) -> Result<(Option<String>, Option<String>), ApiError> {
        let role_id = match user.role_id {
            Some(role_id) => role_id,
            None => return Ok((None, None)),
        };
        let identity = state.identity.clone();
        blocking(move || {
            let role = match identity.get_role(role_id) {
                Ok(role) => Some(role.name),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            Ok((role, identity.login_page(role_id)?))
        })
        .await
    }

    pub async fn login(state: &web::Data<AppState>, request: LoginRequest) -> Result<LoginResponse, ApiError> {
        let user = Self::authenticate(state, &request.email, &request.password)
            .await?
            .ok_or_else(|| ApiError::CredentialsError("Invalid credentials".to_string()))?;

        let (role, login_page) = Self::role_and_landing(state, &user).await?;
        let (access, refresh) = AuthService::issue_pair(&user, role.as_deref(), &state.config)?;

        let identity = state.identity.clone();
        let user_id = user.id;
        blocking(move || identity.touch_last_login(user_id)).await?;

        info!("User {} logged in, landing on {:?}", user.email, login_page);
        Ok(LoginResponse { access, refresh, role, login_page })
    }

    pub async fn obtain_pair(state: &web::Data<AppState>, request: LoginRequest) -> Result<TokenPairResponse, ApiError> {
        let user = Self::authenticate(state, &request.email, &request.password)
            .await?
            .ok_or_else(|| ApiError::AuthError("No active account found with the given credentials".to_string()))?;

        let (role, _) = Self::role_and_landing(state, &user).await?;
        let (access, refresh) = AuthService::issue_pair(&user, role.as_deref(), &state.config)?;
        Ok(TokenPairResponse { access, refresh, role })
    }

    /// A fresh access token for a refresh token that is neither revoked nor expired.
    pub async fn refresh(state: &web::Data<AppState>, request: RefreshRequest) -> Result<String, ApiError> {
        let token = request
            .refresh
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::ValidationError("Refresh token is required".to_string()))?;
        let claims = AuthService::decode_token(&token, TokenType::Refresh, &state.config)
            .map_err(ApiError::AuthError)?;

        let cache = state.cache.clone();
        let jti = claims.jti.clone();
        if blocking(move || is_revoked(cache.as_ref(), &jti)).await? {
            warn!("Refresh attempted with blacklisted token {}", claims.jti);
            return Err(ApiError::AuthError("Token is blacklisted".to_string()));
        }

        let identity = state.identity.clone();
        let user = blocking(move || identity.get_user(claims.user_id))
            .await
            .map_err(|e| match e {
                ApiError::NotFoundError(_) => ApiError::AuthError("User not found".to_string()),
                other => other,
            })?;
        if !user.is_active {
            return Err(ApiError::AuthError("User is inactive".to_string()));
        }
        AuthService::issue_token(&user, claims.role.as_deref(), TokenType::Access, &state.config)
    }

    pub async fn logout(state: &web::Data<AppState>, request: RefreshRequest) -> Result<(), ApiError> {
        let token = request
            .refresh
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::ValidationError("Refresh token is required".to_string()))?;
        let claims = AuthService::decode_token(&token, TokenType::Refresh, &state.config)
            .map_err(ApiError::ValidationError)?;

        let cache = state.cache.clone();
        let now = state.clock.now();
        let jti = claims.jti.clone();
        let revoked = blocking(move || {
            if is_revoked(cache.as_ref(), &claims.jti)? {
                return Ok(false);
            }
            revoke(cache.as_ref(), &claims, now)?;
            Ok(true)
        })
        .await?;
        if !revoked {
            return Err(ApiError::ValidationError("Token is blacklisted".to_string()));
        }

        debug!("Refresh token {} blacklisted", jti);
        Ok(())
    }
}

pub struct PasswordResetService;

impl PasswordResetService {
    pub async fn request_otp(state: &web::Data<AppState>, email: &str) -> Result<(), ApiError> {
        let identity = state.identity.clone();
        let lookup = email.to_string();
        let user = blocking(move || identity.find_user_by_email(&lookup))
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| ApiError::not_found("User"))?;

        let otp = generate_otp();
        let cache = state.cache.clone();
        let key = otp_key(&user.email);
        let value = otp.clone();
        blocking(move || cache.set(&key, &value, Duration::seconds(OTP_TTL_SECONDS))).await?;

        let message = EmailMessage {
            from: state.config.default_from_email.clone(),
            to: vec![user.email.clone()],
            subject: "Your OTP for Password Reset".to_string(),
            body: format!(
                "Your OTP to reset your password is: {}\nThis OTP is valid for 5 minutes.",
                otp
            ),
        };
        state.mailer.send(&message).await.map_err(|e| {
            error!("OTP email to {} failed: {}", user.email, e);
            ApiError::DeliveryError(format!("Failed to send email: {}", e))
        })?;
        info!("OTP issued for {}", user.email);
        Ok(())
    }

    pub async fn verify_otp(state: &web::Data<AppState>, request: OtpVerificationRequest) -> Result<(), ApiError> {
        let cache = state.cache.clone();
        let email = request.email.clone();
        let verified = blocking(move || {
            let matches = cache.get(&otp_key(&email))?.map(|cached| cached == request.otp).unwrap_or(false);
            if matches {
                cache.set(&verified_key(&email), "1", Duration::seconds(VERIFIED_TTL_SECONDS))?;
            }
            Ok(matches)
        })
        .await?;

        if !verified {
            warn!("Invalid or expired OTP submitted for {}", request.email);
            return Err(ApiError::ValidationError("Invalid or expired OTP".to_string()));
        }
        Ok(())
    }

    /// Sets a new password once the email's OTP has been verified; usable once.
    pub async fn complete_reset(state: &web::Data<AppState>, request: ResetPasswordRequest) -> Result<(), ApiError> {
        request.validate().map_err(ApiError::ValidationError)?;
        if request.new_password != request.confirm_new_password {
            return Err(ApiError::ValidationError("Passwords do not match".to_string()));
        }

        let cache = state.cache.clone();
        let key = verified_key(&request.email);
        if blocking(move || cache.get(&key)).await?.is_none() {
            return Err(ApiError::ValidationError("OTP not verified".to_string()));
        }

        let identity = state.identity.clone();
        let email = request.email.clone();
        let user = blocking(move || identity.find_user_by_email(&email))
            .await?
            .ok_or_else(|| ApiError::not_found("User"))?;

        let password_hash = hash_blocking(request.new_password, state.config.bcrypt_cost).await?;
        let identity = state.identity.clone();
        let cache = state.cache.clone();
        let email = request.email;
        blocking(move || {
            identity.set_password(user.id, &password_hash)?;
            cache.delete(&verified_key(&email))?;
            cache.delete(&otp_key(&email))
        })
        .await?;
        info!("Password reset completed for user {}", user.id);
        Ok(())
    }

    pub async fn change_password(state: &web::Data<AppState>, user: &User, request: ChangePasswordRequest) -> Result<(), ApiError> {
        request.validate().map_err(ApiError::ValidationError)?;
        if request.new_password != request.confirm_new_password {
            return Err(ApiError::ValidationError("Passwords do not match".to_string()));
        }

        let current = request.current_password;
        let stored = user.password_hash.clone();
        let matches = web::block(move || AuthService::verify_password(&current, &stored))
            .await
            .map_err(|e| ApiError::InternalError(e.to_string()))??;
        if !matches {
            warn!("Wrong current password from user {}", user.id);
            return Err(ApiError::ValidationError("Current password is incorrect".to_string()));
        }

        let password_hash = hash_blocking(request.new_password, state.config.bcrypt_cost).await?;
        let identity = state.identity.clone();
        let user_id = user.id;
        blocking(move || identity.set_password(user_id, &password_hash)).await?;
        info!("User {} changed their password", user.id);
        Ok(())
    }
}

async fn hash_blocking(password: String, cost: u32) -> Result<String, ApiError> {
    web::block(move || AuthService::hash_password(&password, cost))
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
}

pub struct UserService;

impl UserService {
    pub async fn role_response(state: &web::Data<AppState>, role_id: i32) -> Result<RoleResponse, ApiError> {
        let identity = state.identity.clone();
        blocking(move || {
            let role = identity.get_role(role_id)?;
            let permissions = identity.permissions_for_role(role_id)?;
            Ok(RoleResponse::new(role, permissions))
        })
        .await
    }

    pub async fn user_response(state: &web::Data<AppState>, user: User) -> Result<UserResponse, ApiError> {
        let role = match user.role_id {
            Some(role_id) => match Self::role_response(state, role_id).await {
                Ok(role) => Some(role),
                Err(ApiError::NotFoundError(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };
        Ok(UserResponse::new(user, role))
    }

    /// Creates an active account with a generated password and emails it.
    ///
    /// Returns the user and whether the credentials email went out. A failed
    /// delivery is logged and never undoes the account.
    pub async fn provision(state: &web::Data<AppState>, request: CreateUserRequest) -> Result<(User, bool), ApiError> {
        request.validate().map_err(ApiError::ValidationError)?;
        let password = generate_password();
        let password_hash = hash_blocking(password.clone(), state.config.bcrypt_cost).await?;

        let new_user = NewUser {
            email: request.email,
            username: request.username,
            first_name: request.first_name,
            last_name: request.last_name,
            avatar: request.avatar,
            role_id: Some(request.role_id),
            is_superuser: false,
            is_staff: false,
            is_active: true,
            password_hash,
        };

        let identity = state.identity.clone();
        let user = blocking(move || identity.create_user(new_user)).await?;
        info!("Provisioned user {} ({})", user.id, user.email);

        let message = EmailMessage {
            from: state.config.default_from_email.clone(),
            to: vec![user.email.clone()],
            subject: "Your Account Credentials".to_string(),
            body: format!(
                "Hello {},\n\nYour account has been created successfully. Here are your login credentials:\nEmail: {}\nPassword: {}\n\nPlease log in at {} and change your password after your first login.\n\nRegards,\nYour Team",
                user.first_name,
                user.email,
                password,
                state.config.login_url()
            ),
        };
        let emailed = match state.mailer.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send credentials email to {}: {}", user.email, e);
                false
            }
        };
        Ok((user, emailed))
    }

    /// Creates the configured superuser unless the email is already taken.
    pub async fn ensure_superuser(state: &web::Data<AppState>) -> Result<(), ApiError> {
        let (email, password) = match (&state.config.superuser_email, &state.config.superuser_password) {
            (Some(email), Some(password)) => (email.clone(), password.clone()),
            _ => return Ok(()),
        };

        let identity = state.identity.clone();
        let lookup = email.clone();
        if blocking(move || identity.find_user_by_email(&lookup)).await?.is_some() {
            debug!("Superuser {} already present", email);
            return Ok(());
        }

        let password_hash = hash_blocking(password, state.config.bcrypt_cost).await?;
        let username = email.split('@').next().unwrap_or(&email).to_string();
        let new_user = NewUser {
            email,
            username,
            first_name: String::new(),
            last_name: String::new(),
            avatar: None,
            role_id: None,
            is_superuser: true,
            is_staff: true,
            is_active: true,
            password_hash,
        };
        let identity = state.identity.clone();
        let user = blocking(move || identity.create_user(new_user)).await?;
        info!("Seeded superuser {}", user.email);
        Ok(())
    }

    /// Partial update of `target`; only superusers may touch `role_id`.
    pub async fn update(state: &web::Data<AppState>, actor: &User, target: i32, request: UpdateUserRequest) -> Result<User, ApiError> {
        if request.role_id.is_some() && !actor.is_superuser {
            warn!("User {} tried to change a role without superuser rights", actor.id);
            return Err(ApiError::Forbidden("Only superadmin can edit roles".to_string()));
        }
        request.validate().map_err(ApiError::ValidationError)?;
        let changes = request.into_changes(state.clock.now().naive_utc());
        let identity = state.identity.clone();
        blocking(move || identity.update_user(target, changes)).await
    }
}
