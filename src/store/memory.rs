//! In-process backend for development and tests.
//!
//! All tables sit behind one mutex, so every trait call is a single atomic
//! unit of work; that lock is also what serializes complaint numbering.
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use log::debug;

use super::*;
use crate::sequence;

struct Table<T> {
    rows: BTreeMap<i32, T>,
    last_id: i32,
}

impl<T: Clone> Table<T> {
    fn insert_with(&mut self, build: impl FnOnce(i32) -> T) -> T {
        self.last_id += 1;
        let row = build(self.last_id);
        self.rows.insert(self.last_id, row.clone());
        row
    }

    fn get(&self, id: i32, what: &str) -> StoreResult<T> {
        self.rows.get(&id).cloned().ok_or_else(|| not_found(what))
    }

    fn get_mut(&mut self, id: i32, what: &str) -> StoreResult<&mut T> {
        self.rows.get_mut(&id).ok_or_else(|| not_found(what))
    }

    fn remove(&mut self, id: i32, what: &str) -> StoreResult<T> {
        self.rows.remove(&id).ok_or_else(|| not_found(what))
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    fn contains(&self, id: i32) -> bool {
        self.rows.contains_key(&id)
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self { rows: BTreeMap::new(), last_id: 0 }
    }
}

fn not_found(what: &str) -> StoreError {
    StoreError::NotFound(format!("{} not found", what))
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn require(exists: bool) -> StoreResult<()> {
    if exists {
        Ok(())
    } else {
        Err(StoreError::Invalid(MISSING_REFERENCE.to_string()))
    }
}

fn ensure_unique(taken: bool, message: &str) -> StoreResult<()> {
    if taken {
        Err(StoreError::Conflict(message.to_string()))
    } else {
        Ok(())
    }
}

fn check_file_number<'a>(id: i32, file_number: &str, mut existing: impl Iterator<Item = (i32, &'a str)>) -> StoreResult<()> {
    ensure_unique(existing.any(|(other, number)| other != id && number == file_number), FILE_NUMBER_TAKEN)
}

fn within_days(created_at: NaiveDateTime, bounds: (Option<NaiveDateTime>, Option<NaiveDateTime>)) -> bool {
    bounds.0.map_or(true, |start| created_at >= start) && bounds.1.map_or(true, |end| created_at < end)
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn sort_by_created<T>(rows: &mut [T], ordering: CreatedOrdering, key: impl Fn(&T) -> (NaiveDateTime, i32)) {
    rows.sort_by_key(|row| key(row));
    if ordering == CreatedOrdering::Newest {
        rows.reverse();
    }
}

#[derive(Default)]
struct State {
    roles: Table<Role>,
    permissions: Table<Permission>,
    users: Table<User>,
    areas: Table<Area>,
    complaints: Table<Complaint>,
    connection_types: Table<ConnectionType>,
    connections: Table<Connection>,
    conversions: Table<Conversion>,
    valves: Table<Valve>,
    valve_logs: Table<ValveLog>,
}

impl State {
    fn check_permission(&self, row: &Permission) -> StoreResult<()> {
        require(self.roles.contains(row.role_id))?;
        if row.page.trim().is_empty() {
            return Err(StoreError::Invalid("page: This field may not be blank.".to_string()));
        }
        validate_login_page(row.is_login_page, row.can_view).map_err(StoreError::Invalid)?;
        let taken = self
            .permissions
            .values()
            .any(|p| p.id != row.id && p.role_id == row.role_id && p.page == row.page);
        ensure_unique(taken, ROLE_PAGE_TAKEN)
    }

    /// Clears the login-page flag on the role's other grants.
    fn clear_login_pages(&mut self, role_id: i32, keep: i32) {
        for grant in self.permissions.rows.values_mut() {
            if grant.role_id == role_id && grant.id != keep && grant.is_login_page {
                debug!("Clearing login page flag on permission {}", grant.id);
                grant.is_login_page = false;
            }
        }
    }

    fn insert_permission(&mut self, new: NewPermission) -> StoreResult<Permission> {
        let candidate = Permission {
            id: 0,
            role_id: new.role_id,
            page: new.page,
            can_view: new.can_view,
            can_add: new.can_add,
            can_edit: new.can_edit,
            can_delete: new.can_delete,
            is_login_page: new.is_login_page,
        };
        self.check_permission(&candidate)?;
        let saved = self.permissions.insert_with(|id| Permission { id, ..candidate });
        if saved.is_login_page {
            self.clear_login_pages(saved.role_id, saved.id);
        }
        Ok(saved)
    }

    fn check_user(&self, id: i32, email: &str, username: &str, role_id: Option<i32>) -> StoreResult<()> {
        ensure_unique(self.users.values().any(|u| u.id != id && u.email == email), EMAIL_TAKEN)?;
        ensure_unique(self.users.values().any(|u| u.id != id && u.username == username), USERNAME_TAKEN)?;
        match role_id {
            Some(role_id) => require(self.roles.contains(role_id)),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }
}

impl PermissionLookup for MemoryStore {
    fn find_permission(&self, role_id: i32, page: &str) -> StoreResult<Option<Permission>> {
        let state = self.lock()?;
        let found = state
            .permissions
            .values()
            .find(|p| p.role_id == role_id && p.page == page)
            .cloned();
        Ok(found)
    }
}

impl IdentityStore for MemoryStore {
    fn get_user(&self, id: i32) -> StoreResult<User> {
        self.lock()?.users.get(id, "User")
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.lock()?;
        let found = state.users.values().find(|u| u.email == email).cloned();
        Ok(found)
    }

    fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.lock()?.users.values().cloned().collect())
    }

    fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.lock()?;
        state.check_user(0, &user.email, &user.username, user.role_id)?;
        let joined = now();
        Ok(state.users.insert_with(|id| User {
            id,
            email: user.email,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            avatar: user.avatar,
            role_id: user.role_id,
            is_superuser: user.is_superuser,
            is_staff: user.is_staff,
            is_active: user.is_active,
            password_hash: user.password_hash,
            date_joined: joined,
            last_login: None,
            updated_at: joined,
        }))
    }

    fn update_user(&self, id: i32, changes: UserChanges) -> StoreResult<User> {
        let mut state = self.lock()?;
        let mut user = state.users.get(id, "User")?;
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(avatar) = changes.avatar {
            user.avatar = avatar;
        }
        if let Some(role_id) = changes.role_id {
            user.role_id = role_id;
        }
        user.updated_at = changes.updated_at;
        state.check_user(id, &user.email, &user.username, user.role_id)?;
        *state.users.get_mut(id, "User")? = user.clone();
        Ok(user)
    }

    fn set_password(&self, id: i32, password_hash: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(id, "User")?;
        user.password_hash = password_hash.to_string();
        user.updated_at = now();
        Ok(())
    }

    fn touch_last_login(&self, id: i32) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.users.get_mut(id, "User")?.last_login = Some(now());
        Ok(())
    }

    fn delete_user(&self, id: i32) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.users.remove(id, "User")?;
        let orphaned = Some(id);
        for complaint in state.complaints.rows.values_mut().filter(|c| c.created_by == orphaned) {
            complaint.created_by = None;
        }
        for connection in state.connections.rows.values_mut().filter(|c| c.created_by == orphaned) {
            connection.created_by = None;
        }
        for conversion in state.conversions.rows.values_mut().filter(|c| c.created_by == orphaned) {
            conversion.created_by = None;
        }
        for valve in state.valves.rows.values_mut().filter(|v| v.created_by == orphaned) {
            valve.created_by = None;
        }
        for log in state.valve_logs.rows.values_mut().filter(|l| l.user_id == orphaned) {
            log.user_id = None;
        }
        Ok(())
    }

    fn list_roles(&self) -> StoreResult<Vec<Role>> {
        Ok(self.lock()?.roles.values().cloned().collect())
    }

    fn get_role(&self, id: i32) -> StoreResult<Role> {
        self.lock()?.roles.get(id, "Role")
    }

    fn create_role(&self, role: NewRole, permissions: Vec<PermissionFields>) -> StoreResult<Role> {
        let mut state = self.lock()?;
        ensure_unique(state.roles.values().any(|r| r.name == role.name), ROLE_NAME_TAKEN)?;
        let saved = state.roles.insert_with(|id| Role { id, name: role.name, description: role.description });
        for fields in permissions {
            if let Err(e) = state.insert_permission(fields.into_new(saved.id)) {
                // Undo the partial unit of work
                let grants: Vec<i32> = state
                    .permissions
                    .values()
                    .filter(|p| p.role_id == saved.id)
                    .map(|p| p.id)
                    .collect();
                for grant in grants {
                    state.permissions.rows.remove(&grant);
                }
                state.roles.rows.remove(&saved.id);
                return Err(e);
            }
        }
        Ok(saved)
    }

    fn update_role(&self, id: i32, changes: RoleChanges) -> StoreResult<Role> {
        let mut state = self.lock()?;
        let mut role = state.roles.get(id, "Role")?;
        if let Some(name) = changes.name {
            ensure_unique(state.roles.values().any(|r| r.id != id && r.name == name), ROLE_NAME_TAKEN)?;
            role.name = name;
        }
        if let Some(description) = changes.description {
            role.description = description;
        }
        *state.roles.get_mut(id, "Role")? = role.clone();
        Ok(role)
    }

    fn delete_role(&self, id: i32) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.roles.remove(id, "Role")?;
        state.permissions.rows.retain(|_, p| p.role_id != id);
        for user in state.users.rows.values_mut().filter(|u| u.role_id == Some(id)) {
            user.role_id = None;
        }
        Ok(())
    }

    fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        Ok(self.lock()?.permissions.values().cloned().collect())
    }

    fn permissions_for_role(&self, role_id: i32) -> StoreResult<Vec<Permission>> {
        let state = self.lock()?;
        Ok(state.permissions.values().filter(|p| p.role_id == role_id).cloned().collect())
    }

    fn get_permission(&self, id: i32) -> StoreResult<Permission> {
        self.lock()?.permissions.get(id, "Permission")
    }

    fn create_permission(&self, permission: NewPermission) -> StoreResult<Permission> {
        self.lock()?.insert_permission(permission)
    }

    fn update_permission(&self, id: i32, changes: PermissionChanges) -> StoreResult<Permission> {
        let mut state = self.lock()?;
        let merged = state.permissions.get(id, "Permission")?.merged(&changes);
        state.check_permission(&merged)?;
        *state.permissions.get_mut(id, "Permission")? = merged.clone();
        if merged.is_login_page {
            state.clear_login_pages(merged.role_id, merged.id);
        }
        Ok(merged)
    }

    fn delete_permission(&self, id: i32) -> StoreResult<()> {
        self.lock()?.permissions.remove(id, "Permission").map(|_| ())
    }

    fn login_page(&self, role_id: i32) -> StoreResult<Option<String>> {
        let state = self.lock()?;
        let page = state
            .permissions
            .values()
            .find(|p| p.role_id == role_id && p.is_login_page)
            .map(|p| p.page.clone());
        Ok(page)
    }
}

impl AreaStore for MemoryStore {
    fn list_areas(&self) -> StoreResult<Vec<Area>> {
        Ok(self.lock()?.areas.values().cloned().collect())
    }

    fn get_area(&self, id: i32) -> StoreResult<Area> {
        self.lock()?.areas.get(id, "Area")
    }

    fn create_area(&self, area: NewArea) -> StoreResult<Area> {
        Ok(self.lock()?.areas.insert_with(|id| Area { id, area_name: area.area_name }))
    }

    fn update_area(&self, id: i32, changes: AreaChanges) -> StoreResult<Area> {
        let mut state = self.lock()?;
        let area = state.areas.get_mut(id, "Area")?;
        if let Some(area_name) = changes.area_name {
            area.area_name = area_name;
        }
        Ok(area.clone())
    }

    fn delete_area(&self, id: i32) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.areas.remove(id, "Area")?;
        state.complaints.rows.retain(|_, c| c.area_id != id);
        Ok(())
    }
}

impl ComplaintStore for MemoryStore {
    fn list_complaints(&self, filter: &ComplaintFilter) -> StoreResult<Vec<Complaint>> {
        let state = self.lock()?;
        Ok(state
            .complaints
            .values()
            .filter(|c| filter.area.map_or(true, |area| c.area_id == area))
            .filter(|c| filter.status.as_ref().map_or(true, |status| &c.status == status))
            .cloned()
            .collect())
    }

    fn get_complaint(&self, id: i32) -> StoreResult<Complaint> {
        self.lock()?.complaints.get(id, "Complaint")
    }

    fn create_complaint(&self, draft: ComplaintDraft) -> StoreResult<Complaint> {
        let mut state = self.lock()?;
        let area = state
            .areas
            .get(draft.area_id, "Area")
            .map_err(|_| StoreError::Invalid(MISSING_REFERENCE.to_string()))?;

        let prefix = sequence::ticket_prefix(&area.area_name);
        let max_serial = state.complaints.values().filter_map(|c| sequence::serial_value(&c.serial_no)).max();
        let last_ticket = state
            .complaints
            .values()
            .map(|c| c.ticket_number.as_str())
            .filter(|ticket| sequence::issued_under(ticket, &prefix))
            .max();
        let serial_no = sequence::next_serial_no(max_serial);
        let ticket_number = sequence::next_ticket_number(&prefix, last_ticket);
        let taken = state
            .complaints
            .values()
            .any(|c| c.serial_no == serial_no || c.ticket_number == ticket_number);
        ensure_unique(taken, TICKET_TAKEN)?;

        let new = draft.into_new(serial_no, ticket_number);
        Ok(state.complaints.insert_with(|id| Complaint {
            id,
            area_id: new.area_id,
            serial_no: new.serial_no,
            complaint_type: new.complaint_type,
            ticket_number: new.ticket_number,
            name: new.name,
            date: new.date,
            address: new.address,
            phone_number: new.phone_number,
            department: new.department,
            status: new.status,
            created_by: new.created_by,
        }))
    }

    fn update_complaint(&self, id: i32, changes: ComplaintChanges) -> StoreResult<Complaint> {
        let mut state = self.lock()?;
        if let Some(area_id) = changes.area_id {
            require(state.areas.contains(area_id))?;
        }
        let complaint = state.complaints.get_mut(id, "Complaint")?;
        if let Some(area_id) = changes.area_id {
            complaint.area_id = area_id;
        }
        if let Some(complaint_type) = changes.complaint_type {
            complaint.complaint_type = complaint_type;
        }
        if let Some(name) = changes.name {
            complaint.name = name;
        }
        if let Some(date) = changes.date {
            complaint.date = date;
        }
        if let Some(address) = changes.address {
            complaint.address = address;
        }
        if let Some(phone_number) = changes.phone_number {
            complaint.phone_number = phone_number;
        }
        if let Some(department) = changes.department {
            complaint.department = department;
        }
        if let Some(status) = changes.status {
            complaint.status = status;
        }
        Ok(complaint.clone())
    }

    fn delete_complaint(&self, id: i32) -> StoreResult<()> {
        self.lock()?.complaints.remove(id, "Complaint").map(|_| ())
    }
}

impl ConnectionStore for MemoryStore {
    fn list_connection_types(&self) -> StoreResult<Vec<ConnectionType>> {
        let mut types: Vec<ConnectionType> = self.lock()?.connection_types.values().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(types)
    }

    fn get_connection_type(&self, id: i32) -> StoreResult<ConnectionType> {
        self.lock()?.connection_types.get(id, "Connection type")
    }

    fn create_connection_type(&self, connection_type: NewConnectionType) -> StoreResult<ConnectionType> {
        let mut state = self.lock()?;
        let taken = state.connection_types.values().any(|t| t.name == connection_type.name);
        ensure_unique(taken, CONNECTION_TYPE_TAKEN)?;
        Ok(state.connection_types.insert_with(|id| ConnectionType {
            id,
            name: connection_type.name,
            created_at: now(),
        }))
    }

    fn update_connection_type(&self, id: i32, changes: ConnectionTypeChanges) -> StoreResult<ConnectionType> {
        let mut state = self.lock()?;
        let mut connection_type = state.connection_types.get(id, "Connection type")?;
        if let Some(name) = changes.name {
            let taken = state.connection_types.values().any(|t| t.id != id && t.name == name);
            ensure_unique(taken, CONNECTION_TYPE_TAKEN)?;
            connection_type.name = name;
        }
        *state.connection_types.get_mut(id, "Connection type")? = connection_type.clone();
        Ok(connection_type)
    }

    fn delete_connection_type(&self, id: i32) -> StoreResult<()> {
        let mut state = self.lock()?;
        if !state.connection_types.contains(id) {
            return Err(not_found("Connection type"));
        }
        if state.connections.values().any(|c| c.connection_type_id == id) {
            return Err(StoreError::Conflict(PROTECTED_REFERENCE.to_string()));
        }
        state.connection_types.rows.remove(&id);
        state
            .conversions
            .rows
            .retain(|_, c| c.from_connection_type_id != id && c.to_connection_type_id != id);
        Ok(())
    }

    fn list_connections(&self, filter: &ConnectionFilter) -> StoreResult<Vec<Connection>> {
        let state = self.lock()?;
        let bounds = day_bounds(filter.date_gte, filter.date_lte);
        let mut rows: Vec<Connection> = state
            .connections
            .values()
            .filter(|c| filter.connection_type.map_or(true, |t| c.connection_type_id == t))
            .filter(|c| filter.area.as_ref().map_or(true, |area| &c.area == area))
            .filter(|c| filter.status.as_ref().map_or(true, |status| &c.status == status))
            .filter(|c| filter.name.as_ref().map_or(true, |name| contains_ignore_case(&c.name, name)))
            .filter(|c| within_days(c.created_at, bounds))
            .cloned()
            .collect();
        sort_by_created(&mut rows, filter.ordering, |c| (c.created_at, c.id));
        Ok(rows)
    }

    fn get_connection(&self, id: i32) -> StoreResult<Connection> {
        self.lock()?.connections.get(id, "Connection")
    }

    fn create_connection(&self, connection: NewConnection) -> StoreResult<Connection> {
        let mut state = self.lock()?;
        require(state.connection_types.contains(connection.connection_type_id))?;
        let existing = state.connections.values().map(|c| (c.id, c.file_number.as_str()));
        check_file_number(0, &connection.file_number, existing)?;
        Ok(state.connections.insert_with(|id| Connection {
            id,
            name: connection.name,
            address: connection.address,
            file_number: connection.file_number,
            area: connection.area,
            connection_type_id: connection.connection_type_id,
            status: connection.status,
            created_by: connection.created_by,
            created_at: now(),
        }))
    }

    fn update_connection(&self, id: i32, changes: ConnectionChanges) -> StoreResult<Connection> {
        let mut state = self.lock()?;
        let mut connection = state.connections.get(id, "Connection")?;
        if let Some(connection_type_id) = changes.connection_type_id {
            require(state.connection_types.contains(connection_type_id))?;
            connection.connection_type_id = connection_type_id;
        }
        if let Some(file_number) = changes.file_number {
            let existing = state.connections.values().map(|c| (c.id, c.file_number.as_str()));
            check_file_number(id, &file_number, existing)?;
            connection.file_number = file_number;
        }
        if let Some(name) = changes.name {
            connection.name = name;
        }
        if let Some(address) = changes.address {
            connection.address = address;
        }
        if let Some(area) = changes.area {
            connection.area = area;
        }
        if let Some(status) = changes.status {
            connection.status = status;
        }
        *state.connections.get_mut(id, "Connection")? = connection.clone();
        Ok(connection)
    }

    fn delete_connection(&self, id: i32) -> StoreResult<()> {
        self.lock()?.connections.remove(id, "Connection").map(|_| ())
    }

    fn list_conversions(&self, filter: &ConversionFilter) -> StoreResult<Vec<Conversion>> {
        let state = self.lock()?;
        let bounds = day_bounds(filter.date_gte, filter.date_lte);
        let mut rows: Vec<Conversion> = state
            .conversions
            .values()
            .filter(|c| filter.from_connection_type.map_or(true, |t| c.from_connection_type_id == t))
            .filter(|c| filter.to_connection_type.map_or(true, |t| c.to_connection_type_id == t))
            .filter(|c| filter.area.as_ref().map_or(true, |area| &c.area == area))
            .filter(|c| filter.name.as_ref().map_or(true, |name| contains_ignore_case(&c.name, name)))
            .filter(|c| within_days(c.created_at, bounds))
            .cloned()
            .collect();
        sort_by_created(&mut rows, filter.ordering, |c| (c.created_at, c.id));
        Ok(rows)
    }

    fn get_conversion(&self, id: i32) -> StoreResult<Conversion> {
        self.lock()?.conversions.get(id, "Conversion")
    }

    fn create_conversion(&self, conversion: NewConversion) -> StoreResult<Conversion> {
        let mut state = self.lock()?;
        require(state.connection_types.contains(conversion.from_connection_type_id))?;
        require(state.connection_types.contains(conversion.to_connection_type_id))?;
        let existing = state.conversions.values().map(|c| (c.id, c.file_number.as_str()));
        check_file_number(0, &conversion.file_number, existing)?;
        Ok(state.conversions.insert_with(|id| Conversion {
            id,
            name: conversion.name,
            address: conversion.address,
            file_number: conversion.file_number,
            area: conversion.area,
            from_connection_type_id: conversion.from_connection_type_id,
            to_connection_type_id: conversion.to_connection_type_id,
            created_by: conversion.created_by,
            created_at: now(),
        }))
    }

    fn update_conversion(&self, id: i32, changes: ConversionChanges) -> StoreResult<Conversion> {
        let mut state = self.lock()?;
        let mut conversion = state.conversions.get(id, "Conversion")?;
        if let Some(from) = changes.from_connection_type_id {
            require(state.connection_types.contains(from))?;
            conversion.from_connection_type_id = from;
        }
        if let Some(to) = changes.to_connection_type_id {
            require(state.connection_types.contains(to))?;
            conversion.to_connection_type_id = to;
        }
        if let Some(file_number) = changes.file_number {
            let existing = state.conversions.values().map(|c| (c.id, c.file_number.as_str()));
            check_file_number(id, &file_number, existing)?;
            conversion.file_number = file_number;
        }
        if let Some(name) = changes.name {
            conversion.name = name;
        }
        if let Some(address) = changes.address {
            conversion.address = address;
        }
        if let Some(area) = changes.area {
            conversion.area = area;
        }
        *state.conversions.get_mut(id, "Conversion")? = conversion.clone();
        Ok(conversion)
    }

    fn delete_conversion(&self, id: i32) -> StoreResult<()> {
        self.lock()?.conversions.remove(id, "Conversion").map(|_| ())
    }
}

impl ValveStore for MemoryStore {
    fn list_valves(&self) -> StoreResult<Vec<Valve>> {
        Ok(self.lock()?.valves.values().cloned().collect())
    }

    fn get_valve(&self, id: i32) -> StoreResult<Valve> {
        self.lock()?.valves.get(id, "Valve")
    }

    fn create_valve(&self, valve: NewValve) -> StoreResult<Valve> {
        Ok(self.lock()?.valves.insert_with(|id| Valve {
            id,
            name: valve.name,
            size: valve.size,
            full_open_condition: valve.full_open_condition,
            current_condition: valve.current_condition,
            remarks: valve.remarks,
            previous_position: valve.previous_position,
            latitude: valve.latitude,
            longitude: valve.longitude,
            location_type: valve.location_type,
            location_link: valve.location_link,
            created_by: valve.created_by,
        }))
    }

    fn update_valve(&self, id: i32, changes: ValveChanges, actor: Option<i32>)
        -> StoreResult<(Valve, Vec<ValveLog>)> {
        let mut state = self.lock()?;
        let current = state.valves.get(id, "Valve")?;
        let diff = changes.diff(&current);

        let updated = Valve {
            id,
            name: changes.name.unwrap_or(current.name),
            size: changes.size.unwrap_or(current.size),
            full_open_condition: changes.full_open_condition.unwrap_or(current.full_open_condition),
            current_condition: changes.current_condition.unwrap_or(current.current_condition),
            remarks: changes.remarks.unwrap_or(current.remarks),
            previous_position: changes.previous_position.unwrap_or(current.previous_position),
            latitude: changes.latitude.unwrap_or(current.latitude),
            longitude: changes.longitude.unwrap_or(current.longitude),
            location_type: changes.location_type.unwrap_or(current.location_type),
            location_link: changes.location_link.unwrap_or(current.location_link),
            created_by: current.created_by,
        };
        *state.valves.get_mut(id, "Valve")? = updated.clone();

        let timestamp = now();
        let logs = diff
            .into_iter()
            .map(|change| {
                let entry = NewValveLog::from_change(id, actor, change);
                state.valve_logs.insert_with(|log_id| ValveLog {
                    id: log_id,
                    valve_id: entry.valve_id,
                    user_id: entry.user_id,
                    changed_field: entry.changed_field,
                    old_value: entry.old_value,
                    new_value: entry.new_value,
                    timestamp,
                })
            })
            .collect();
        Ok((updated, logs))
    }

    fn delete_valve(&self, id: i32) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.valves.remove(id, "Valve")?;
        state.valve_logs.rows.retain(|_, l| l.valve_id != id);
        Ok(())
    }

    fn list_valve_logs(&self, valve_id: i32) -> StoreResult<Vec<ValveLog>> {
        let state = self.lock()?;
        Ok(state.valve_logs.values().filter(|l| l.valve_id == valve_id).cloned().collect())
    }

    fn get_valve_log(&self, id: i32) -> StoreResult<ValveLog> {
        self.lock()?.valve_logs.get(id, "Valve log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn user(email: &str, username: &str, role_id: Option<i32>) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: username.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            avatar: None,
            role_id,
            is_superuser: false,
            is_staff: false,
            is_active: true,
            password_hash: "x".to_string(),
        }
    }

    fn grant(page: &str, is_login_page: bool) -> PermissionFields {
        PermissionFields {
            page: page.to_string(),
            can_view: true,
            is_login_page,
            ..Default::default()
        }
    }

    fn draft(area_id: i32) -> ComplaintDraft {
        ComplaintDraft {
            area_id,
            complaint_type: "leak".to_string(),
            name: "R. Iyer".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            address: "12 Canal Rd".to_string(),
            phone_number: "9800000000".to_string(),
            department: "water".to_string(),
            status: DEFAULT_COMPLAINT_STATUS.to_string(),
            created_by: None,
        }
    }

    fn role(store: &MemoryStore, name: &str) -> Role {
        let new = NewRole { name: name.to_string(), description: String::new() };
        store.create_role(new, Vec::new()).unwrap()
    }

    #[test]
    fn flagging_a_login_page_clears_the_previous_one() {
        let store = MemoryStore::new();
        let clerk = role(&store, "clerk");
        let a = store.create_permission(grant("complaints", true).into_new(clerk.id)).unwrap();
        let b = store.create_permission(grant("valves", false).into_new(clerk.id)).unwrap();

        let flag = PermissionChanges { is_login_page: Some(true), ..Default::default() };
        store.update_permission(b.id, flag).unwrap();

        assert!(!store.get_permission(a.id).unwrap().is_login_page);
        assert_eq!(store.login_page(clerk.id).unwrap().as_deref(), Some("valves"));
    }

    #[test]
    fn login_page_without_view_is_rejected_on_update() {
        let store = MemoryStore::new();
        let clerk = role(&store, "clerk");
        let a = store.create_permission(grant("complaints", true).into_new(clerk.id)).unwrap();
        let hide = PermissionChanges { can_view: Some(false), ..Default::default() };
        assert!(matches!(store.update_permission(a.id, hide), Err(StoreError::Invalid(_))));
        assert!(store.get_permission(a.id).unwrap().can_view);
    }

    #[test]
    fn role_creation_with_bad_grant_leaves_nothing_behind() {
        let store = MemoryStore::new();
        let new = NewRole { name: "ops".to_string(), description: String::new() };
        let grants = vec![grant("area", false), grant("area", false)];
        let err = store.create_role(new, grants).unwrap_err();
        assert_eq!(err, StoreError::Conflict(ROLE_PAGE_TAKEN.to_string()));
        assert!(store.list_roles().unwrap().is_empty());
        assert!(store.list_permissions().unwrap().is_empty());
    }

    #[test]
    fn deleting_a_role_detaches_users_and_drops_grants() {
        let store = MemoryStore::new();
        let clerk = role(&store, "clerk");
        store.create_permission(grant("area", false).into_new(clerk.id)).unwrap();
        let member = store.create_user(user("a@ward.gov", "a", Some(clerk.id))).unwrap();

        store.delete_role(clerk.id).unwrap();

        assert_eq!(store.get_user(member.id).unwrap().role_id, None);
        assert!(store.list_permissions().unwrap().is_empty());
    }

    #[test]
    fn point_lookups_find_users_and_grants() {
        let store = MemoryStore::new();
        let clerk = role(&store, "clerk");
        store.create_permission(grant("valves", true).into_new(clerk.id)).unwrap();
        store.create_user(user("a@ward.gov", "a", Some(clerk.id))).unwrap();

        let found = store.find_user_by_email("a@ward.gov").unwrap().unwrap();
        assert_eq!(found.role_id, Some(clerk.id));
        assert!(store.find_user_by_email("b@ward.gov").unwrap().is_none());

        let granted = store.find_permission(clerk.id, "valves").unwrap().unwrap();
        assert!(granted.can_view);
        assert!(store.find_permission(clerk.id, "Valves").unwrap().is_none());
        assert_eq!(store.login_page(clerk.id).unwrap().as_deref(), Some("valves"));
        assert_eq!(store.login_page(clerk.id + 1).unwrap(), None);
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let store = MemoryStore::new();
        store.create_user(user("a@ward.gov", "a", None)).unwrap();
        let err = store.create_user(user("a@ward.gov", "b", None)).unwrap_err();
        assert_eq!(err, StoreError::Conflict(EMAIL_TAKEN.to_string()));
    }

    #[test]
    fn tickets_are_numbered_per_prefix() {
        let store = MemoryStore::new();
        let north = store.create_area(NewArea { area_name: "Northside".to_string() }).unwrap();
        let south = store.create_area(NewArea { area_name: "South".to_string() }).unwrap();

        let first = store.create_complaint(draft(north.id)).unwrap();
        let second = store.create_complaint(draft(south.id)).unwrap();
        let third = store.create_complaint(draft(north.id)).unwrap();

        assert_eq!((first.serial_no.as_str(), first.ticket_number.as_str()), ("001", "NOR001"));
        assert_eq!((second.serial_no.as_str(), second.ticket_number.as_str()), ("002", "SOU001"));
        assert_eq!((third.serial_no.as_str(), third.ticket_number.as_str()), ("003", "NOR002"));
    }

    #[test]
    fn areas_sharing_a_prefix_share_a_counter() {
        let store = MemoryStore::new();
        let a = store.create_area(NewArea { area_name: "Northside".to_string() }).unwrap();
        let b = store.create_area(NewArea { area_name: "North Ext".to_string() }).unwrap();
        store.create_complaint(draft(a.id)).unwrap();
        let other = store.create_complaint(draft(b.id)).unwrap();
        assert_eq!(other.ticket_number, "NOR002");
    }

    #[test]
    fn concurrent_complaints_get_sequential_numbers() {
        let store = MemoryStore::new();
        let area = store.create_area(NewArea { area_name: "Ward Nine".to_string() }).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..60 {
                scope.spawn(|| store.create_complaint(draft(area.id)).unwrap());
            }
        });

        let mut tickets: Vec<String> = store
            .list_complaints(&ComplaintFilter::default())
            .unwrap()
            .into_iter()
            .map(|c| c.ticket_number)
            .collect();
        tickets.sort();
        let expected: Vec<String> = (1..=60).map(|n| format!("WAR{:03}", n)).collect();
        assert_eq!(tickets, expected);
    }

    #[test]
    fn deleting_an_area_cascades_to_complaints() {
        let store = MemoryStore::new();
        let area = store.create_area(NewArea { area_name: "East".to_string() }).unwrap();
        store.create_complaint(draft(area.id)).unwrap();
        store.delete_area(area.id).unwrap();
        assert!(store.list_complaints(&ComplaintFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn connection_type_in_use_is_protected() {
        let store = MemoryStore::new();
        let metered = store.create_connection_type(NewConnectionType { name: "metered".to_string() }).unwrap();
        let flat = store.create_connection_type(NewConnectionType { name: "flat".to_string() }).unwrap();
        store
            .create_connection(NewConnection {
                name: "A".to_string(),
                address: "x".to_string(),
                file_number: "F-1".to_string(),
                area: "North".to_string(),
                connection_type_id: metered.id,
                status: DEFAULT_CONNECTION_STATUS.to_string(),
                created_by: None,
            })
            .unwrap();
        store
            .create_conversion(NewConversion {
                name: "B".to_string(),
                address: "y".to_string(),
                file_number: "C-1".to_string(),
                area: "North".to_string(),
                from_connection_type_id: flat.id,
                to_connection_type_id: metered.id,
                created_by: None,
            })
            .unwrap();

        let err = store.delete_connection_type(metered.id).unwrap_err();
        assert_eq!(err, StoreError::Conflict(PROTECTED_REFERENCE.to_string()));

        store.delete_connection_type(flat.id).unwrap();
        assert!(store.list_conversions(&ConversionFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn valve_update_logs_each_changed_field() {
        let store = MemoryStore::new();
        let valve = store
            .create_valve(NewValve {
                name: "V-1".to_string(),
                size: "100mm".to_string(),
                full_open_condition: "10 turns".to_string(),
                current_condition: "open".to_string(),
                remarks: String::new(),
                previous_position: None,
                latitude: None,
                longitude: None,
                location_type: DEFAULT_LOCATION_TYPE.to_string(),
                location_link: None,
                created_by: None,
            })
            .unwrap();
        let changes = ValveChanges {
            current_condition: Some("closed".to_string()),
            remarks: Some(String::new()),
            latitude: Some(Some(19.07)),
            ..Default::default()
        };

        let (updated, logs) = store.update_valve(valve.id, changes, Some(4)).unwrap();

        assert_eq!(updated.current_condition, "closed");
        assert_eq!(updated.latitude, Some(19.07));
        let fields: Vec<&str> = logs.iter().map(|l| l.changed_field.as_str()).collect();
        assert_eq!(fields, vec!["current_condition", "latitude"]);
        assert!(logs.iter().all(|l| l.user_id == Some(4)));
        assert_eq!(store.list_valve_logs(valve.id).unwrap().len(), 2);

        store.delete_valve(valve.id).unwrap();
        assert!(store.list_valve_logs(valve.id).unwrap().is_empty());
    }
}
