use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};

use crate::permissions::Action;

// Distinguishes an explicit `null` from an absent key in partial updates
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Reject a value that is not one of the declared choices for `field`.
pub fn validate_choice(field: &str, value: &str, choices: &[&str]) -> Result<(), String> {
    if choices.contains(&value) {
        Ok(())
    } else {
        Err(format!("{}: \"{}\" is not a valid choice.", field, value))
    }
}

/// Reject an empty or whitespace-only value for `field`.
pub fn require_filled(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{}: This field may not be blank.", field));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Role {
    pub id: i32,
    pub name: String,
    pub description: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::role)]
pub struct NewRole {
    pub name: String,
    pub description: String,
}

#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::role)]
pub struct RoleChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Permission {
    pub id: i32,
    #[serde(rename = "role")]
    pub role_id: i32,
    pub page: String,
    pub can_view: bool,
    pub can_add: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub is_login_page: bool,
}

impl Permission {
    /// The flag this grant holds for `action`.
    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::View => self.can_view,
            Action::Add => self.can_add,
            Action::Edit => self.can_edit,
            Action::Delete => self.can_delete,
        }
    }

    /// The row as it would look after `changes` were saved.
    pub fn merged(&self, changes: &PermissionChanges) -> Permission {
        Permission {
            id: self.id,
            role_id: changes.role_id.unwrap_or(self.role_id),
            page: changes.page.clone().unwrap_or_else(|| self.page.clone()),
            can_view: changes.can_view.unwrap_or(self.can_view),
            can_add: changes.can_add.unwrap_or(self.can_add),
            can_edit: changes.can_edit.unwrap_or(self.can_edit),
            can_delete: changes.can_delete.unwrap_or(self.can_delete),
            is_login_page: changes.is_login_page.unwrap_or(self.is_login_page),
        }
    }
}

/// A login page must be viewable by the role it lands.
pub fn validate_login_page(is_login_page: bool, can_view: bool) -> Result<(), String> {
    if is_login_page && !can_view {
        return Err("Login page must have view permission enabled.".to_string());
    }
    Ok(())
}

/// Grant flags for one page, as submitted by clients.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PermissionFields {
    pub page: String,
    #[serde(default)]
    pub can_view: bool,
    #[serde(default)]
    pub can_add: bool,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_delete: bool,
    #[serde(default)]
    pub is_login_page: bool,
}

impl PermissionFields {
    pub fn validate(&self) -> Result<(), String> {
        if self.page.trim().is_empty() {
            return Err("page: This field may not be blank.".to_string());
        }
        validate_login_page(self.is_login_page, self.can_view)
    }

    pub fn into_new(self, role_id: i32) -> NewPermission {
        NewPermission {
            role_id,
            page: self.page,
            can_view: self.can_view,
            can_add: self.can_add,
            can_edit: self.can_edit,
            can_delete: self.can_delete,
            is_login_page: self.is_login_page,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreatePermissionRequest {
    pub role: i32,
    #[serde(flatten)]
    pub fields: PermissionFields,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::permission)]
pub struct NewPermission {
    pub role_id: i32,
    pub page: String,
    pub can_view: bool,
    pub can_add: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub is_login_page: bool,
}

#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::permission)]
pub struct PermissionChanges {
    #[serde(rename = "role")]
    pub role_id: Option<i32>,
    pub page: Option<String>,
    pub can_view: Option<bool>,
    pub can_add: Option<bool>,
    pub can_edit: Option<bool>,
    pub can_delete: Option<bool>,
    pub is_login_page: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<PermissionFields>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RoleResponse {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub permissions: Vec<Permission>,
}

impl RoleResponse {
    pub fn new(role: Role, permissions: Vec<Permission>) -> Self {
        Self {
            id: role.id,
            name: role.name,
            description: role.description,
            permissions,
        }
    }
}

#[derive(Queryable, Serialize, Debug, Clone)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub role_id: Option<i32>,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub date_joined: NaiveDateTime,
    pub last_login: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::app_user)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub role_id: Option<i32>,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub is_active: bool,
    pub password_hash: String,
}

#[derive(AsChangeset, Debug, Clone)]
#[diesel(table_name = crate::schema::app_user)]
pub struct UserChanges {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<Option<String>>,
    pub role_id: Option<Option<i32>>,
    pub updated_at: NaiveDateTime,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateUserRequest {
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub avatar: Option<String>,
    pub role_id: i32,
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<(), String> {
        require_filled("email", &self.email)?;
        require_filled("username", &self.username)
    }
}

/// Partial profile/user update. `role_id` keeps key presence so that a
/// non-superuser sending it at all can be refused.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub avatar: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub role_id: Option<Option<i32>>,
}

impl UpdateUserRequest {
    /// Identity fields may be omitted but never cleared.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(email) = &self.email {
            require_filled("email", email)?;
        }
        if let Some(username) = &self.username {
            require_filled("username", username)?;
        }
        Ok(())
    }

    pub fn into_changes(self, now: NaiveDateTime) -> UserChanges {
        UserChanges {
            email: self.email,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            avatar: self.avatar,
            role_id: self.role_id,
            updated_at: now,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct UserResponse {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub role: Option<RoleResponse>,
}

impl UserResponse {
    pub fn new(user: User, role: Option<RoleResponse>) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            avatar: user.avatar,
            role,
        }
    }
}

/// The `POST /users/` body: the new user plus whether the credentials email went out.
#[derive(Serialize, Debug, Clone)]
pub struct ProvisionedUserResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub credentials_emailed: bool,
}

// ---------------------------------------------------------------------------
// Authentication DTOs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub role: Option<String>,
    pub login_page: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
    pub role: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    pub sub: String,      // Subject (user id)
    pub exp: usize,       // Expiration time
    pub iat: usize,       // Issued at
    pub jti: String,      // Token id, the revocation key
    pub token_type: TokenType,
    pub user_id: i32,
    pub email: String,
    pub role: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize, Debug)]
pub struct OtpVerificationRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

impl ResetPasswordRequest {
    pub fn validate(&self) -> Result<(), String> {
        require_filled("new_password", &self.new_password)?;
        require_filled("confirm_new_password", &self.confirm_new_password)
    }
}

#[derive(Deserialize, Debug)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> Result<(), String> {
        require_filled("new_password", &self.new_password)?;
        require_filled("confirm_new_password", &self.confirm_new_password)
    }
}

// ---------------------------------------------------------------------------
// Areas and complaints
// ---------------------------------------------------------------------------

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Area {
    pub id: i32,
    pub area_name: String,
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::area)]
pub struct NewArea {
    pub area_name: String,
}

#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::area)]
pub struct AreaChanges {
    pub area_name: Option<String>,
}

pub const COMPLAINT_STATUSES: &[&str] = &["completed", "accepted", "processing", "return_for_review"];
pub const DEFAULT_COMPLAINT_STATUS: &str = "processing";

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Complaint {
    pub id: i32,
    #[serde(rename = "area")]
    pub area_id: i32,
    pub serial_no: String,
    pub complaint_type: String,
    pub ticket_number: String,
    pub name: String,
    pub date: NaiveDate,
    pub address: String,
    pub phone_number: String,
    pub department: String,
    pub status: String,
    pub created_by: Option<i32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateComplaintRequest {
    pub area: Option<i32>,
    pub complaint_type: String,
    pub name: String,
    pub date: Option<NaiveDate>,
    pub address: String,
    pub phone_number: String,
    pub department: String,
    pub status: Option<String>,
}

impl CreateComplaintRequest {
    pub fn validate(&self) -> Result<i32, String> {
        let area_id = self.area.ok_or_else(|| "area: Area field is required.".to_string())?;
        validate_phone_number(&self.phone_number)?;
        if let Some(status) = &self.status {
            validate_choice("status", status, COMPLAINT_STATUSES)?;
        }
        Ok(area_id)
    }
}

fn validate_phone_number(phone_number: &str) -> Result<(), String> {
    if phone_number.chars().count() > 15 {
        return Err("phone_number: Ensure this field has no more than 15 characters.".to_string());
    }
    Ok(())
}

/// A complaint before the store assigns its serial and ticket numbers.
#[derive(Debug, Clone)]
pub struct ComplaintDraft {
    pub area_id: i32,
    pub complaint_type: String,
    pub name: String,
    pub date: NaiveDate,
    pub address: String,
    pub phone_number: String,
    pub department: String,
    pub status: String,
    pub created_by: Option<i32>,
}

impl ComplaintDraft {
    pub fn into_new(self, serial_no: String, ticket_number: String) -> NewComplaint {
        NewComplaint {
            area_id: self.area_id,
            serial_no,
            complaint_type: self.complaint_type,
            ticket_number,
            name: self.name,
            date: self.date,
            address: self.address,
            phone_number: self.phone_number,
            department: self.department,
            status: self.status,
            created_by: self.created_by,
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::complaint)]
pub struct NewComplaint {
    pub area_id: i32,
    pub serial_no: String,
    pub complaint_type: String,
    pub ticket_number: String,
    pub name: String,
    pub date: NaiveDate,
    pub address: String,
    pub phone_number: String,
    pub department: String,
    pub status: String,
    pub created_by: Option<i32>,
}

/// Editable complaint fields; serial and ticket numbers are not among them.
#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::complaint)]
pub struct ComplaintChanges {
    #[serde(rename = "area")]
    pub area_id: Option<i32>,
    pub complaint_type: Option<String>,
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
}

impl ComplaintChanges {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(phone_number) = &self.phone_number {
            validate_phone_number(phone_number)?;
        }
        if let Some(status) = &self.status {
            validate_choice("status", status, COMPLAINT_STATUSES)?;
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ComplaintFilter {
    pub area: Option<i32>,
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Connections and conversions
// ---------------------------------------------------------------------------

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionType {
    pub id: i32,
    pub name: String,
    #[serde(skip_serializing, default = "epoch")]
    pub created_at: NaiveDateTime,
}

fn epoch() -> NaiveDateTime {
    NaiveDateTime::default()
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::connection_type)]
pub struct NewConnectionType {
    pub name: String,
}

#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::connection_type)]
pub struct ConnectionTypeChanges {
    pub name: Option<String>,
}

pub const CONNECTION_STATUSES: &[&str] = &["assistant_engineer", "fo", "site_inspector", "completed"];
pub const DEFAULT_CONNECTION_STATUS: &str = "assistant_engineer";

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: i32,
    pub name: String,
    pub address: String,
    pub file_number: String,
    pub area: String,
    #[serde(rename = "connection_type")]
    pub connection_type_id: i32,
    pub status: String,
    pub created_by: Option<i32>,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize, Debug, Clone)]
pub struct ConnectionResponse {
    #[serde(flatten)]
    pub connection: Connection,
    pub connection_type_detail: Option<ConnectionType>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateConnectionRequest {
    pub name: String,
    pub address: String,
    pub file_number: String,
    pub area: String,
    pub connection_type: i32,
    pub status: Option<String>,
}

impl CreateConnectionRequest {
    pub fn into_new(self, created_by: Option<i32>) -> Result<NewConnection, String> {
        // A blank status falls back to the first stage
        let status = match self.status.filter(|s| !s.is_empty()) {
            Some(status) => {
                validate_choice("status", &status, CONNECTION_STATUSES)?;
                status
            }
            None => DEFAULT_CONNECTION_STATUS.to_string(),
        };
        Ok(NewConnection {
            name: self.name,
            address: self.address,
            file_number: self.file_number,
            area: self.area,
            connection_type_id: self.connection_type,
            status,
            created_by,
        })
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::connection)]
pub struct NewConnection {
    pub name: String,
    pub address: String,
    pub file_number: String,
    pub area: String,
    pub connection_type_id: i32,
    pub status: String,
    pub created_by: Option<i32>,
}

#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::connection)]
pub struct ConnectionChanges {
    pub name: Option<String>,
    pub address: Option<String>,
    pub file_number: Option<String>,
    pub area: Option<String>,
    #[serde(rename = "connection_type")]
    pub connection_type_id: Option<i32>,
    pub status: Option<String>,
}

impl ConnectionChanges {
    pub fn validate(&self) -> Result<(), String> {
        match &self.status {
            Some(status) => validate_choice("status", status, CONNECTION_STATUSES),
            None => Ok(()),
        }
    }
}

/// Ordering accepted by the connection and conversion listings.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreatedOrdering {
    #[default]
    #[serde(rename = "created_at")]
    Oldest,
    #[serde(rename = "-created_at")]
    Newest,
}

/// Whole-day bounds for the `date_gte`/`date_lte` filters: the first instant
/// of `from`, and the first instant after `to`.
pub fn day_bounds(from: Option<NaiveDate>, to: Option<NaiveDate>) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let start = from.map(|d| d.and_time(NaiveTime::default()));
    let end = to.map(|d| d.succ_opt().unwrap_or(NaiveDate::MAX).and_time(NaiveTime::default()));
    (start, end)
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConnectionFilter {
    pub connection_type: Option<i32>,
    pub area: Option<String>,
    pub status: Option<String>,
    pub name: Option<String>,
    pub date_gte: Option<NaiveDate>,
    pub date_lte: Option<NaiveDate>,
    #[serde(default)]
    pub ordering: CreatedOrdering,
}

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Conversion {
    pub id: i32,
    pub name: String,
    pub address: String,
    pub file_number: String,
    pub area: String,
    #[serde(rename = "from_connection_type")]
    pub from_connection_type_id: i32,
    #[serde(rename = "to_connection_type")]
    pub to_connection_type_id: i32,
    pub created_by: Option<i32>,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize, Debug, Clone)]
pub struct ConversionResponse {
    #[serde(flatten)]
    pub conversion: Conversion,
    pub from_connection_type_detail: Option<ConnectionType>,
    pub to_connection_type_detail: Option<ConnectionType>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateConversionRequest {
    pub name: String,
    pub address: String,
    pub file_number: String,
    pub area: String,
    pub from_connection_type: i32,
    pub to_connection_type: i32,
}

impl CreateConversionRequest {
    pub fn into_new(self, created_by: Option<i32>) -> NewConversion {
        NewConversion {
            name: self.name,
            address: self.address,
            file_number: self.file_number,
            area: self.area,
            from_connection_type_id: self.from_connection_type,
            to_connection_type_id: self.to_connection_type,
            created_by,
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::conversion)]
pub struct NewConversion {
    pub name: String,
    pub address: String,
    pub file_number: String,
    pub area: String,
    pub from_connection_type_id: i32,
    pub to_connection_type_id: i32,
    pub created_by: Option<i32>,
}

#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::conversion)]
pub struct ConversionChanges {
    pub name: Option<String>,
    pub address: Option<String>,
    pub file_number: Option<String>,
    pub area: Option<String>,
    #[serde(rename = "from_connection_type")]
    pub from_connection_type_id: Option<i32>,
    #[serde(rename = "to_connection_type")]
    pub to_connection_type_id: Option<i32>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConversionFilter {
    pub from_connection_type: Option<i32>,
    pub to_connection_type: Option<i32>,
    pub area: Option<String>,
    pub name: Option<String>,
    pub date_gte: Option<NaiveDate>,
    pub date_lte: Option<NaiveDate>,
    #[serde(default)]
    pub ordering: CreatedOrdering,
}

// ---------------------------------------------------------------------------
// Valves
// ---------------------------------------------------------------------------

pub const LOCATION_TYPES: &[&str] = &["current", "coordinates"];
pub const DEFAULT_LOCATION_TYPE: &str = "coordinates";

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Valve {
    pub id: i32,
    pub name: String,
    pub size: String,
    pub full_open_condition: String,
    pub current_condition: String,
    pub remarks: String,
    pub previous_position: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_type: String,
    pub location_link: Option<String>,
    pub created_by: Option<i32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateValveRequest {
    pub name: String,
    pub size: String,
    pub full_open_condition: String,
    pub current_condition: String,
    pub remarks: String,
    pub previous_position: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_type: Option<String>,
    pub location_link: Option<String>,
}

impl CreateValveRequest {
    pub fn into_new(self, created_by: Option<i32>) -> Result<NewValve, String> {
        let location_type = match self.location_type {
            Some(location_type) => {
                validate_choice("location_type", &location_type, LOCATION_TYPES)?;
                location_type
            }
            None => DEFAULT_LOCATION_TYPE.to_string(),
        };
        Ok(NewValve {
            name: self.name,
            size: self.size,
            full_open_condition: self.full_open_condition,
            current_condition: self.current_condition,
            remarks: self.remarks,
            previous_position: self.previous_position,
            latitude: self.latitude,
            longitude: self.longitude,
            location_type,
            location_link: self.location_link,
            created_by,
        })
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::valve)]
pub struct NewValve {
    pub name: String,
    pub size: String,
    pub full_open_condition: String,
    pub current_condition: String,
    pub remarks: String,
    pub previous_position: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_type: String,
    pub location_link: Option<String>,
    pub created_by: Option<i32>,
}

#[derive(AsChangeset, Deserialize, Debug, Clone, Default)]
#[diesel(table_name = crate::schema::valve)]
pub struct ValveChanges {
    pub name: Option<String>,
    pub size: Option<String>,
    pub full_open_condition: Option<String>,
    pub current_condition: Option<String>,
    pub remarks: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub previous_position: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub latitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub longitude: Option<Option<f64>>,
    pub location_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub location_link: Option<Option<String>>,
}

/// One tracked field whose stored value differs from the incoming one.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old_value: String,
    pub new_value: String,
}

fn render_optional<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "null".to_string())
}

impl ValveChanges {
    pub fn validate(&self) -> Result<(), String> {
        match &self.location_type {
            Some(location_type) => validate_choice("location_type", location_type, LOCATION_TYPES),
            None => Ok(()),
        }
    }

    /// Fields of `current` that this update would change, in declaration order.
    pub fn diff(&self, current: &Valve) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        let mut text = |field: &'static str, old: &String, new: &Option<String>| {
            if let Some(new) = new {
                if new != old {
                    changes.push(FieldChange { field, old_value: old.clone(), new_value: new.clone() });
                }
            }
        };
        text("name", &current.name, &self.name);
        text("size", &current.size, &self.size);
        text("full_open_condition", &current.full_open_condition, &self.full_open_condition);
        text("current_condition", &current.current_condition, &self.current_condition);
        text("remarks", &current.remarks, &self.remarks);

        let mut optional = |field: &'static str, old: String, new: String, differs: bool| {
            if differs {
                changes.push(FieldChange { field, old_value: old, new_value: new });
            }
        };
        if let Some(new) = &self.previous_position {
            optional("previous_position", render_optional(&current.previous_position),
                render_optional(new), *new != current.previous_position);
        }
        if let Some(new) = &self.latitude {
            optional("latitude", render_optional(&current.latitude),
                render_optional(new), *new != current.latitude);
        }
        if let Some(new) = &self.longitude {
            optional("longitude", render_optional(&current.longitude),
                render_optional(new), *new != current.longitude);
        }
        if let Some(new) = &self.location_type {
            optional("location_type", current.location_type.clone(),
                new.clone(), *new != current.location_type);
        }
        if let Some(new) = &self.location_link {
            optional("location_link", render_optional(&current.location_link),
                render_optional(new), *new != current.location_link);
        }
        changes
    }
}

#[derive(Queryable, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValveLog {
    pub id: i32,
    #[serde(rename = "valve")]
    pub valve_id: i32,
    #[serde(rename = "user")]
    pub user_id: Option<i32>,
    pub changed_field: String,
    pub old_value: String,
    pub new_value: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::valve_log)]
pub struct NewValveLog {
    pub valve_id: i32,
    pub user_id: Option<i32>,
    pub changed_field: String,
    pub old_value: String,
    pub new_value: String,
}

impl NewValveLog {
    pub fn from_change(valve_id: i32, user_id: Option<i32>, change: FieldChange) -> Self {
        Self {
            valve_id,
            user_id,
            changed_field: change.field.to_string(),
            old_value: change.old_value,
            new_value: change.new_value,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ValveLogFilter {
    pub valve_id: Option<i32>,
}
