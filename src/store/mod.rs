//! Record storage behind the services.
//!
//! Every aggregate is reached through a synchronous trait so the same service
//! code runs against Postgres ([`pg::PgStore`]) or the in-process
//! [`memory::MemoryStore`]. Handlers call stores through [`blocking`], which
//! moves the work onto actix-web's blocking pool.
use actix_web::web;
use log::error;
use thiserror::Error;

use crate::errors::ApiError;
use crate::models::*;
use crate::permissions::PermissionLookup;

pub mod memory;
pub mod pg;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("database: {0}")]
    Database(String),
    #[error("pool: {0}")]
    Pool(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// Messages shared by both backends so clients see the same text
pub const EMAIL_TAKEN: &str = "Email already exists";
pub const USERNAME_TAKEN: &str = "A user with that username already exists.";
pub const ROLE_NAME_TAKEN: &str = "role with this name already exists.";
pub const ROLE_PAGE_TAKEN: &str = "The fields role, page must make a unique set.";
pub const CONNECTION_TYPE_TAKEN: &str = "connection type with this name already exists.";
pub const FILE_NUMBER_TAKEN: &str = "A record with this file number already exists.";
pub const TICKET_TAKEN: &str = "A complaint with this serial or ticket number already exists.";
pub const MISSING_REFERENCE: &str = "Invalid pk - referenced object does not exist.";
pub const PROTECTED_REFERENCE: &str =
    "Cannot delete this record because it is referenced through a protected foreign key.";

pub trait IdentityStore: PermissionLookup + Send + Sync {
    fn get_user(&self, id: i32) -> StoreResult<User>;
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    fn list_users(&self) -> StoreResult<Vec<User>>;
    fn create_user(&self, user: NewUser) -> StoreResult<User>;
    fn update_user(&self, id: i32, changes: UserChanges) -> StoreResult<User>;
    fn set_password(&self, id: i32, password_hash: &str) -> StoreResult<()>;
    fn touch_last_login(&self, id: i32) -> StoreResult<()>;
    fn delete_user(&self, id: i32) -> StoreResult<()>;

    fn list_roles(&self) -> StoreResult<Vec<Role>>;
    fn get_role(&self, id: i32) -> StoreResult<Role>;
    /// Creates the role and its initial grants in one unit of work.
    fn create_role(&self, role: NewRole, permissions: Vec<PermissionFields>) -> StoreResult<Role>;
    fn update_role(&self, id: i32, changes: RoleChanges) -> StoreResult<Role>;
    /// Removes the role's grants and detaches its users.
    fn delete_role(&self, id: i32) -> StoreResult<()>;

    fn list_permissions(&self) -> StoreResult<Vec<Permission>>;
    fn permissions_for_role(&self, role_id: i32) -> StoreResult<Vec<Permission>>;
    fn get_permission(&self, id: i32) -> StoreResult<Permission>;
    /// Saving a login-page grant clears the flag on the role's other grants.
    fn create_permission(&self, permission: NewPermission) -> StoreResult<Permission>;
    fn update_permission(&self, id: i32, changes: PermissionChanges) -> StoreResult<Permission>;
    fn delete_permission(&self, id: i32) -> StoreResult<()>;
    /// The page of the role's login-page grant, if one is flagged.
    fn login_page(&self, role_id: i32) -> StoreResult<Option<String>>;
}

pub trait AreaStore: Send + Sync {
    fn list_areas(&self) -> StoreResult<Vec<Area>>;
    fn get_area(&self, id: i32) -> StoreResult<Area>;
    fn create_area(&self, area: NewArea) -> StoreResult<Area>;
    fn update_area(&self, id: i32, changes: AreaChanges) -> StoreResult<Area>;
    fn delete_area(&self, id: i32) -> StoreResult<()>;
}

pub trait ComplaintStore: Send + Sync {
    fn list_complaints(&self, filter: &ComplaintFilter) -> StoreResult<Vec<Complaint>>;
    fn get_complaint(&self, id: i32) -> StoreResult<Complaint>;
    /// Assigns `serial_no` and `ticket_number` atomically with the insert.
    fn create_complaint(&self, draft: ComplaintDraft) -> StoreResult<Complaint>;
    fn update_complaint(&self, id: i32, changes: ComplaintChanges) -> StoreResult<Complaint>;
    fn delete_complaint(&self, id: i32) -> StoreResult<()>;
}

pub trait ConnectionStore: Send + Sync {
    fn list_connection_types(&self) -> StoreResult<Vec<ConnectionType>>;
    fn get_connection_type(&self, id: i32) -> StoreResult<ConnectionType>;
    fn create_connection_type(&self, connection_type: NewConnectionType) -> StoreResult<ConnectionType>;
    fn update_connection_type(&self, id: i32, changes: ConnectionTypeChanges) -> StoreResult<ConnectionType>;
    /// Fails while a connection still uses the type; conversions go with it.
    fn delete_connection_type(&self, id: i32) -> StoreResult<()>;

    fn list_connections(&self, filter: &ConnectionFilter) -> StoreResult<Vec<Connection>>;
    fn get_connection(&self, id: i32) -> StoreResult<Connection>;
    fn create_connection(&self, connection: NewConnection) -> StoreResult<Connection>;
    fn update_connection(&self, id: i32, changes: ConnectionChanges) -> StoreResult<Connection>;
    fn delete_connection(&self, id: i32) -> StoreResult<()>;

    fn list_conversions(&self, filter: &ConversionFilter) -> StoreResult<Vec<Conversion>>;
    fn get_conversion(&self, id: i32) -> StoreResult<Conversion>;
    fn create_conversion(&self, conversion: NewConversion) -> StoreResult<Conversion>;
    fn update_conversion(&self, id: i32, changes: ConversionChanges) -> StoreResult<Conversion>;
    fn delete_conversion(&self, id: i32) -> StoreResult<()>;
}

pub trait ValveStore: Send + Sync {
    fn list_valves(&self) -> StoreResult<Vec<Valve>>;
    fn get_valve(&self, id: i32) -> StoreResult<Valve>;
    fn create_valve(&self, valve: NewValve) -> StoreResult<Valve>;
    /// Applies `changes` and writes one log row per changed field, atomically.
    fn update_valve(&self, id: i32, changes: ValveChanges, actor: Option<i32>)
        -> StoreResult<(Valve, Vec<ValveLog>)>;
    fn delete_valve(&self, id: i32) -> StoreResult<()>;
    fn list_valve_logs(&self, valve_id: i32) -> StoreResult<Vec<ValveLog>>;
    fn get_valve_log(&self, id: i32) -> StoreResult<ValveLog>;
}

/// Run a store call on the blocking pool and surface its error as an [`ApiError`].
pub async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    web::block(f)
        .await
        .map_err(|e| {
            error!("Database operation error: {}", e);
            ApiError::InternalError(e.to_string())
        })?
        .map_err(ApiError::from)
}
