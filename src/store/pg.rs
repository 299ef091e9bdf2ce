//! Postgres backend over the diesel r2d2 pool.
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Nullable, Text};
use log::{debug, error};

use super::{
    AreaStore, ComplaintStore, ConnectionStore, IdentityStore, StoreError, StoreResult, ValveStore,
    CONNECTION_TYPE_TAKEN, EMAIL_TAKEN, FILE_NUMBER_TAKEN, MISSING_REFERENCE, PROTECTED_REFERENCE,
    ROLE_NAME_TAKEN, ROLE_PAGE_TAKEN, TICKET_TAKEN, USERNAME_TAKEN,
};
use crate::config::DbPool;
use crate::models::{
    self, day_bounds, validate_login_page, Area, AreaChanges, Complaint, ComplaintChanges, ComplaintDraft,
    ComplaintFilter, ConnectionChanges, ConnectionFilter, ConnectionType, ConnectionTypeChanges, Conversion,
    ConversionChanges, ConversionFilter, CreatedOrdering, NewArea, NewConnection, NewConnectionType,
    NewConversion, NewPermission, NewRole, NewUser, NewValve, NewValveLog, Permission, PermissionChanges,
    PermissionFields, Role, RoleChanges, User, UserChanges, Valve, ValveChanges, ValveLog,
};
use crate::permissions::PermissionLookup;
use crate::schema::{
    app_user, area, complaint, connection, connection_type, conversion, permission, role, valve, valve_log,
};
use crate::sequence;

pub type PooledConn = PooledConnection<ConnectionManager<PgConnection>>;

// Key of the transaction-scoped advisory lock guarding complaint numbering
const COMPLAINT_NUMBERING_LOCK: i64 = 0x636f_6d70;

fn conflict_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("app_user_email_key") => EMAIL_TAKEN,
        Some("app_user_username_key") => USERNAME_TAKEN,
        Some("role_name_key") => ROLE_NAME_TAKEN,
        Some("permission_role_page_key") => ROLE_PAGE_TAKEN,
        Some("connection_type_name_key") => CONNECTION_TYPE_TAKEN,
        Some("connection_file_number_key") | Some("conversion_file_number_key") => FILE_NUMBER_TAKEN,
        Some("complaint_serial_no_key") | Some("complaint_ticket_number_key") => TICKET_TAKEN,
        _ => "A record with these values already exists.",
    }
}

impl From<DieselError> for StoreError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => StoreError::NotFound("Record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(conflict_message(info.constraint_name()).to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                StoreError::Invalid(MISSING_REFERENCE.to_string())
            }
            other => {
                error!("Query failed: {}", other);
                StoreError::Database(other.to_string())
            }
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        error!("Failed to get database connection: {}", e);
        StoreError::Pool(e.to_string())
    }
}

trait Described<T> {
    /// Names the missing record when the query found nothing.
    fn described(self, what: &str) -> StoreResult<T>;
}

impl<T> Described<T> for QueryResult<T> {
    fn described(self, what: &str) -> StoreResult<T> {
        self.map_err(|e| match e {
            DieselError::NotFound => StoreError::NotFound(format!("{} not found", what)),
            other => other.into(),
        })
    }
}

/// Update result, falling back to the stored row when the changeset was empty.
fn updated_or<T>(result: QueryResult<T>, current: impl FnOnce() -> QueryResult<T>, what: &str) -> StoreResult<T> {
    match result {
        Err(DieselError::QueryBuilderError(_)) => {
            debug!("Empty changeset for {}, returning stored row", what);
            current().described(what)
        }
        other => other.described(what),
    }
}

fn deleted(count: usize, what: &str) -> StoreResult<()> {
    if count == 0 {
        Err(StoreError::NotFound(format!("{} not found", what)))
    } else {
        Ok(())
    }
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(QueryableByName)]
struct MaxSerial {
    #[diesel(sql_type = Nullable<BigInt>)]
    value: Option<i64>,
}

#[derive(QueryableByName)]
struct MaxTicket {
    #[diesel(sql_type = Nullable<Text>)]
    value: Option<String>,
}

fn check_permission_row(page: &str, is_login_page: bool, can_view: bool) -> StoreResult<()> {
    if page.trim().is_empty() {
        return Err(StoreError::Invalid("page: This field may not be blank.".to_string()));
    }
    validate_login_page(is_login_page, can_view).map_err(StoreError::Invalid)
}

fn clear_login_pages(conn: &mut PgConnection, role: i32, keep: Option<i32>) -> StoreResult<()> {
    let others = permission::table
        .filter(permission::role_id.eq(role))
        .filter(permission::is_login_page.eq(true))
        .filter(permission::id.ne(keep.unwrap_or(0)));
    let cleared = diesel::update(others).set(permission::is_login_page.eq(false)).execute(conn)?;
    if cleared > 0 {
        debug!("Cleared login page flag on {} grant(s) of role {}", cleared, role);
    }
    Ok(())
}

fn insert_permission(conn: &mut PgConnection, new: NewPermission) -> StoreResult<Permission> {
    check_permission_row(&new.page, new.is_login_page, new.can_view)?;
    if new.is_login_page {
        clear_login_pages(conn, new.role_id, None)?;
    }
    Ok(diesel::insert_into(permission::table).values(&new).get_result::<Permission>(conn)?)
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> StoreResult<PooledConn> {
        Ok(self.pool.get()?)
    }

    fn run<T>(&self, f: impl FnOnce(&mut PgConnection) -> StoreResult<T>) -> StoreResult<T> {
        let mut pooled = self.conn()?;
        f(&mut pooled)
    }
}

impl PermissionLookup for PgStore {
    fn find_permission(&self, role: i32, page: &str) -> StoreResult<Option<Permission>> {
        self.run(|conn| {
            Ok(permission::table
                .filter(permission::role_id.eq(role))
                .filter(permission::page.eq(page))
                .first::<Permission>(conn)
                .optional()?)
        })
    }
}

impl IdentityStore for PgStore {
    fn get_user(&self, id: i32) -> StoreResult<User> {
        self.run(|conn| app_user::table.find(id).first::<User>(conn).described("User"))
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.run(|conn| {
            Ok(app_user::table
                .filter(app_user::email.eq(email))
                .first::<User>(conn)
                .optional()?)
        })
    }

    fn list_users(&self) -> StoreResult<Vec<User>> {
        self.run(|conn| Ok(app_user::table.order(app_user::id.asc()).load::<User>(conn)?))
    }

    fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.run(|conn| Ok(diesel::insert_into(app_user::table).values(&user).get_result::<User>(conn)?))
    }

    fn update_user(&self, id: i32, changes: UserChanges) -> StoreResult<User> {
        self.run(|conn| {
            diesel::update(app_user::table.find(id))
                .set(&changes)
                .get_result::<User>(conn)
                .described("User")
        })
    }

    fn set_password(&self, id: i32, hash: &str) -> StoreResult<()> {
        self.run(|conn| {
            let count = diesel::update(app_user::table.find(id))
                .set((app_user::password_hash.eq(hash), app_user::updated_at.eq(Utc::now().naive_utc())))
                .execute(conn)?;
            deleted(count, "User")
        })
    }

    fn touch_last_login(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| {
            let count = diesel::update(app_user::table.find(id))
                .set(app_user::last_login.eq(Some(Utc::now().naive_utc())))
                .execute(conn)?;
            deleted(count, "User")
        })
    }

    fn delete_user(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| deleted(diesel::delete(app_user::table.find(id)).execute(conn)?, "User"))
    }

    fn list_roles(&self) -> StoreResult<Vec<Role>> {
        self.run(|conn| Ok(role::table.order(role::id.asc()).load::<Role>(conn)?))
    }

    fn get_role(&self, id: i32) -> StoreResult<Role> {
        self.run(|conn| role::table.find(id).first::<Role>(conn).described("Role"))
    }

    fn create_role(&self, new: NewRole, permissions: Vec<PermissionFields>) -> StoreResult<Role> {
        self.run(|conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let saved = diesel::insert_into(role::table).values(&new).get_result::<Role>(conn)?;
                for fields in permissions {
                    insert_permission(conn, fields.into_new(saved.id))?;
                }
                Ok(saved)
            })
        })
    }

    fn update_role(&self, id: i32, changes: RoleChanges) -> StoreResult<Role> {
        self.run(|conn| {
            let result = diesel::update(role::table.find(id)).set(&changes).get_result::<Role>(conn);
            updated_or(result, || role::table.find(id).first::<Role>(conn), "Role")
        })
    }

    fn delete_role(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| deleted(diesel::delete(role::table.find(id)).execute(conn)?, "Role"))
    }

    fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        self.run(|conn| Ok(permission::table.order(permission::id.asc()).load::<Permission>(conn)?))
    }

    fn permissions_for_role(&self, role: i32) -> StoreResult<Vec<Permission>> {
        self.run(|conn| {
            Ok(permission::table
                .filter(permission::role_id.eq(role))
                .order(permission::id.asc())
                .load::<Permission>(conn)?)
        })
    }

    fn get_permission(&self, id: i32) -> StoreResult<Permission> {
        self.run(|conn| permission::table.find(id).first::<Permission>(conn).described("Permission"))
    }

    fn create_permission(&self, new: NewPermission) -> StoreResult<Permission> {
        self.run(|conn| conn.transaction::<_, StoreError, _>(|conn| insert_permission(conn, new)))
    }

    fn update_permission(&self, id: i32, changes: PermissionChanges) -> StoreResult<Permission> {
        self.run(|conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let current = permission::table
                    .find(id)
                    .for_update()
                    .first::<Permission>(conn)
                    .described("Permission")?;
                let merged = current.merged(&changes);
                check_permission_row(&merged.page, merged.is_login_page, merged.can_view)?;
                if merged.is_login_page {
                    clear_login_pages(conn, merged.role_id, Some(id))?;
                }
                let result = diesel::update(permission::table.find(id))
                    .set(&changes)
                    .get_result::<Permission>(conn);
                updated_or(result, || Ok(current.clone()), "Permission")
            })
        })
    }

    fn delete_permission(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| deleted(diesel::delete(permission::table.find(id)).execute(conn)?, "Permission"))
    }

    fn login_page(&self, role: i32) -> StoreResult<Option<String>> {
        self.run(|conn| {
            Ok(permission::table
                .filter(permission::role_id.eq(role))
                .filter(permission::is_login_page.eq(true))
                .select(permission::page)
                .first::<String>(conn)
                .optional()?)
        })
    }
}

impl AreaStore for PgStore {
    fn list_areas(&self) -> StoreResult<Vec<Area>> {
        self.run(|conn| Ok(area::table.order(area::id.asc()).load::<Area>(conn)?))
    }

    fn get_area(&self, id: i32) -> StoreResult<Area> {
        self.run(|conn| area::table.find(id).first::<Area>(conn).described("Area"))
    }

    fn create_area(&self, new: NewArea) -> StoreResult<Area> {
        self.run(|conn| Ok(diesel::insert_into(area::table).values(&new).get_result::<Area>(conn)?))
    }

    fn update_area(&self, id: i32, changes: AreaChanges) -> StoreResult<Area> {
        self.run(|conn| {
            let result = diesel::update(area::table.find(id)).set(&changes).get_result::<Area>(conn);
            updated_or(result, || area::table.find(id).first::<Area>(conn), "Area")
        })
    }

    fn delete_area(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| deleted(diesel::delete(area::table.find(id)).execute(conn)?, "Area"))
    }
}

impl ComplaintStore for PgStore {
    fn list_complaints(&self, filter: &ComplaintFilter) -> StoreResult<Vec<Complaint>> {
        self.run(|conn| {
            let mut query = complaint::table.into_boxed();
            if let Some(area_id) = filter.area {
                query = query.filter(complaint::area_id.eq(area_id));
            }
            if let Some(status) = &filter.status {
                query = query.filter(complaint::status.eq(status.clone()));
            }
            Ok(query.order(complaint::id.asc()).load::<Complaint>(conn)?)
        })
    }

    fn get_complaint(&self, id: i32) -> StoreResult<Complaint> {
        self.run(|conn| complaint::table.find(id).first::<Complaint>(conn).described("Complaint"))
    }

    fn create_complaint(&self, draft: ComplaintDraft) -> StoreResult<Complaint> {
        self.run(|conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
                    .bind::<BigInt, _>(COMPLAINT_NUMBERING_LOCK)
                    .execute(conn)?;

                let owner = area::table
                    .find(draft.area_id)
                    .first::<Area>(conn)
                    .optional()?
                    .ok_or_else(|| StoreError::Invalid(MISSING_REFERENCE.to_string()))?;
                let prefix = sequence::ticket_prefix(&owner.area_name);

                let max_serial = diesel::sql_query(
                    "SELECT MAX(CAST(serial_no AS BIGINT)) AS value FROM complaint \
                     WHERE serial_no ~ '^[0-9]+$'",
                )
                .get_result::<MaxSerial>(conn)?;
                let max_ticket = diesel::sql_query(
                    "SELECT MAX(ticket_number) AS value FROM complaint \
                     WHERE char_length(ticket_number) = char_length($1) + 3 \
                     AND LEFT(ticket_number, char_length($1)) = $1 \
                     AND RIGHT(ticket_number, 3) ~ '^[0-9]{3}$'",
                )
                .bind::<Text, _>(&prefix)
                .get_result::<MaxTicket>(conn)?;

                let serial_no = sequence::next_serial_no(max_serial.value);
                let last_ticket = max_ticket.value.filter(|t| sequence::issued_under(t, &prefix));
                let ticket_number = sequence::next_ticket_number(&prefix, last_ticket.as_deref());
                debug!("Assigning serial {} and ticket {}", serial_no, ticket_number);

                let new = draft.into_new(serial_no, ticket_number);
                Ok(diesel::insert_into(complaint::table).values(&new).get_result::<Complaint>(conn)?)
            })
        })
    }

    fn update_complaint(&self, id: i32, changes: ComplaintChanges) -> StoreResult<Complaint> {
        self.run(|conn| {
            let result = diesel::update(complaint::table.find(id)).set(&changes).get_result::<Complaint>(conn);
            updated_or(result, || complaint::table.find(id).first::<Complaint>(conn), "Complaint")
        })
    }

    fn delete_complaint(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| deleted(diesel::delete(complaint::table.find(id)).execute(conn)?, "Complaint"))
    }
}

impl ConnectionStore for PgStore {
    fn list_connection_types(&self) -> StoreResult<Vec<ConnectionType>> {
        self.run(|conn| {
            Ok(connection_type::table
                .order((connection_type::name.asc(), connection_type::id.asc()))
                .load::<ConnectionType>(conn)?)
        })
    }

    fn get_connection_type(&self, id: i32) -> StoreResult<ConnectionType> {
        self.run(|conn| {
            connection_type::table
                .find(id)
                .first::<ConnectionType>(conn)
                .described("Connection type")
        })
    }

    fn create_connection_type(&self, new: NewConnectionType) -> StoreResult<ConnectionType> {
        self.run(|conn| {
            Ok(diesel::insert_into(connection_type::table)
                .values(&new)
                .get_result::<ConnectionType>(conn)?)
        })
    }

    fn update_connection_type(&self, id: i32, changes: ConnectionTypeChanges) -> StoreResult<ConnectionType> {
        self.run(|conn| {
            let result = diesel::update(connection_type::table.find(id))
                .set(&changes)
                .get_result::<ConnectionType>(conn);
            updated_or(result, || connection_type::table.find(id).first::<ConnectionType>(conn), "Connection type")
        })
    }

    fn delete_connection_type(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| match diesel::delete(connection_type::table.find(id)).execute(conn) {
            Ok(count) => deleted(count, "Connection type"),
            Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
                Err(StoreError::Conflict(PROTECTED_REFERENCE.to_string()))
            }
            Err(e) => Err(e.into()),
        })
    }

    fn list_connections(&self, filter: &ConnectionFilter) -> StoreResult<Vec<models::Connection>> {
        self.run(|conn| {
            let mut query = connection::table.into_boxed();
            if let Some(type_id) = filter.connection_type {
                query = query.filter(connection::connection_type_id.eq(type_id));
            }
            if let Some(area_name) = &filter.area {
                query = query.filter(connection::area.eq(area_name.clone()));
            }
            if let Some(status) = &filter.status {
                query = query.filter(connection::status.eq(status.clone()));
            }
            if let Some(name) = &filter.name {
                query = query.filter(connection::name.ilike(like_pattern(name)));
            }
            let (start, end) = day_bounds(filter.date_gte, filter.date_lte);
            if let Some(start) = start {
                query = query.filter(connection::created_at.ge(start));
            }
            if let Some(end) = end {
                query = query.filter(connection::created_at.lt(end));
            }
            query = match filter.ordering {
                CreatedOrdering::Oldest => query.order((connection::created_at.asc(), connection::id.asc())),
                CreatedOrdering::Newest => query.order((connection::created_at.desc(), connection::id.desc())),
            };
            Ok(query.load::<models::Connection>(conn)?)
        })
    }

    fn get_connection(&self, id: i32) -> StoreResult<models::Connection> {
        self.run(|conn| connection::table.find(id).first::<models::Connection>(conn).described("Connection"))
    }

    fn create_connection(&self, new: NewConnection) -> StoreResult<models::Connection> {
        self.run(|conn| Ok(diesel::insert_into(connection::table).values(&new).get_result::<models::Connection>(conn)?))
    }

    fn update_connection(&self, id: i32, changes: ConnectionChanges) -> StoreResult<models::Connection> {
        self.run(|conn| {
            let result = diesel::update(connection::table.find(id)).set(&changes).get_result::<models::Connection>(conn);
            updated_or(result, || connection::table.find(id).first::<models::Connection>(conn), "Connection")
        })
    }

    fn delete_connection(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| deleted(diesel::delete(connection::table.find(id)).execute(conn)?, "Connection"))
    }

    fn list_conversions(&self, filter: &ConversionFilter) -> StoreResult<Vec<Conversion>> {
        self.run(|conn| {
            let mut query = conversion::table.into_boxed();
            if let Some(type_id) = filter.from_connection_type {
                query = query.filter(conversion::from_connection_type_id.eq(type_id));
            }
            if let Some(type_id) = filter.to_connection_type {
                query = query.filter(conversion::to_connection_type_id.eq(type_id));
            }
            if let Some(area_name) = &filter.area {
                query = query.filter(conversion::area.eq(area_name.clone()));
            }
            if let Some(name) = &filter.name {
                query = query.filter(conversion::name.ilike(like_pattern(name)));
            }
            let (start, end) = day_bounds(filter.date_gte, filter.date_lte);
            if let Some(start) = start {
                query = query.filter(conversion::created_at.ge(start));
            }
            if let Some(end) = end {
                query = query.filter(conversion::created_at.lt(end));
            }
            query = match filter.ordering {
                CreatedOrdering::Oldest => query.order((conversion::created_at.asc(), conversion::id.asc())),
                CreatedOrdering::Newest => query.order((conversion::created_at.desc(), conversion::id.desc())),
            };
            Ok(query.load::<Conversion>(conn)?)
        })
    }

    fn get_conversion(&self, id: i32) -> StoreResult<Conversion> {
        self.run(|conn| conversion::table.find(id).first::<Conversion>(conn).described("Conversion"))
    }

    fn create_conversion(&self, new: NewConversion) -> StoreResult<Conversion> {
        self.run(|conn| Ok(diesel::insert_into(conversion::table).values(&new).get_result::<Conversion>(conn)?))
    }

    fn update_conversion(&self, id: i32, changes: ConversionChanges) -> StoreResult<Conversion> {
        self.run(|conn| {
            let result = diesel::update(conversion::table.find(id)).set(&changes).get_result::<Conversion>(conn);
            updated_or(result, || conversion::table.find(id).first::<Conversion>(conn), "Conversion")
        })
    }

    fn delete_conversion(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| deleted(diesel::delete(conversion::table.find(id)).execute(conn)?, "Conversion"))
    }
}

impl ValveStore for PgStore {
    fn list_valves(&self) -> StoreResult<Vec<Valve>> {
        self.run(|conn| Ok(valve::table.order(valve::id.asc()).load::<Valve>(conn)?))
    }

    fn get_valve(&self, id: i32) -> StoreResult<Valve> {
        self.run(|conn| valve::table.find(id).first::<Valve>(conn).described("Valve"))
    }

    fn create_valve(&self, new: NewValve) -> StoreResult<Valve> {
        self.run(|conn| Ok(diesel::insert_into(valve::table).values(&new).get_result::<Valve>(conn)?))
    }

    fn update_valve(&self, id: i32, changes: ValveChanges, actor: Option<i32>)
        -> StoreResult<(Valve, Vec<ValveLog>)> {
        self.run(|conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let current = valve::table.find(id).for_update().first::<Valve>(conn).described("Valve")?;
                let entries: Vec<NewValveLog> = changes
                    .diff(&current)
                    .into_iter()
                    .map(|change| NewValveLog::from_change(id, actor, change))
                    .collect();

                let result = diesel::update(valve::table.find(id)).set(&changes).get_result::<Valve>(conn);
                let updated = updated_or(result, || Ok(current.clone()), "Valve")?;

                let logs = if entries.is_empty() {
                    Vec::new()
                } else {
                    diesel::insert_into(valve_log::table)
                        .values(&entries)
                        .get_results::<ValveLog>(conn)?
                };
                Ok((updated, logs))
            })
        })
    }

    fn delete_valve(&self, id: i32) -> StoreResult<()> {
        self.run(|conn| deleted(diesel::delete(valve::table.find(id)).execute(conn)?, "Valve"))
    }

    fn list_valve_logs(&self, valve_id: i32) -> StoreResult<Vec<ValveLog>> {
        self.run(|conn| {
            Ok(valve_log::table
                .filter(valve_log::valve_id.eq(valve_id))
                .order(valve_log::id.asc())
                .load::<ValveLog>(conn)?)
        })
    }

    fn get_valve_log(&self, id: i32) -> StoreResult<ValveLog> {
        self.run(|conn| valve_log::table.find(id).first::<ValveLog>(conn).described("Valve log"))
    }
}
