//! Role-based permission evaluation.
//!
//! Every protected endpoint names a fixed `page`. A role's grant for that page
//! is a single [`Permission`](crate::models::Permission) row holding one flag
//! per [`Action`]. Superusers bypass the matrix; users without a role and
//! pages without a row are denied.
use actix_web::http::Method;
use log::debug;

use crate::models::User;
use crate::store::StoreResult;

pub const PAGE_AREA: &str = "area";
pub const PAGE_COMPLAINTS: &str = "complaints";
/// Shared by connection types, connections and conversions.
pub const PAGE_E_TAPP: &str = "e-tapp";
pub const PAGE_VALVES: &str = "valves";
pub const PAGE_ROLE: &str = "role";
pub const PAGE_PERMISSION: &str = "permission";
pub const PAGE_USER_MANAGEMENT: &str = "usermanagement";
pub const PAGE_USER_DETAIL: &str = "userdetail";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    View,
    Add,
    Edit,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::View, Action::Add, Action::Edit, Action::Delete];

    /// The action a request with `method` performs, if any.
    pub fn for_method(method: &Method) -> Option<Action> {
        match *method {
            Method::GET | Method::HEAD => Some(Action::View),
            Method::POST => Some(Action::Add),
            Method::PUT | Method::PATCH => Some(Action::Edit),
            Method::DELETE => Some(Action::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Add => "add",
            Action::Edit => "edit",
            Action::Delete => "delete",
        }
    }
}

/// Point lookup of the grant a role holds for a page.
pub trait PermissionLookup {
    fn find_permission(&self, role_id: i32, page: &str) -> StoreResult<Option<crate::models::Permission>>;
}

/// Can `actor` perform `action` on `page`?
pub fn authorize<L>(lookup: &L, actor: &User, page: &str, action: Action) -> StoreResult<bool>
where
    L: PermissionLookup + ?Sized,
{
    if actor.is_superuser {
        debug!("User {} is superuser, granting {} on {}", actor.email, action.as_str(), page);
        return Ok(true);
    }
    let role_id = match actor.role_id {
        Some(role_id) => role_id,
        None => {
            debug!("User {} has no role, denying {} on {}", actor.email, action.as_str(), page);
            return Ok(false);
        }
    };
    let allowed = lookup
        .find_permission(role_id, page)?
        .map(|grant| grant.allows(action))
        .unwrap_or(false);
    debug!("User {} {} permission for {}: {}", actor.email, action.as_str(), page, allowed);
    Ok(allowed)
}

/// The guards attached to one endpoint group.
///
/// Each guarded action only fires for requests whose method maps to it and
/// permits everything else; a request passes when every guard permits it.
#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
    pub page: &'static str,
    guarded: &'static [Action],
}

impl AccessPolicy {
    pub const fn new(page: &'static str, guarded: &'static [Action]) -> Self {
        Self { page, guarded }
    }

    /// Guards every action on `page`.
    pub const fn full(page: &'static str) -> Self {
        Self::new(page, &Action::ALL)
    }

    pub fn permits<L>(&self, lookup: &L, actor: &User, method: &Method) -> StoreResult<bool>
    where
        L: PermissionLookup + ?Sized,
    {
        let requested = Action::for_method(method);
        for guard in self.guarded {
            if requested != Some(*guard) {
                continue;
            }
            if !authorize(lookup, actor, self.page, *guard)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub const AREA_POLICY: AccessPolicy = AccessPolicy::full(PAGE_AREA);
pub const COMPLAINTS_POLICY: AccessPolicy = AccessPolicy::full(PAGE_COMPLAINTS);
pub const E_TAPP_POLICY: AccessPolicy = AccessPolicy::full(PAGE_E_TAPP);
pub const VALVES_POLICY: AccessPolicy = AccessPolicy::full(PAGE_VALVES);
