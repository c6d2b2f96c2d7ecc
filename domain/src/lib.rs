//! Domain library for the user registry.
//!
//! Holds the entity types, the repository port, the error type and the user
//! services built on top of them. Storage adapters live under `adapters`;
//! process concerns (logging setup, argument parsing) stay in the apps.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

use crate::password::PasswordHash;

pub use crate::error::{AuthFailure, CoreError, ErrorPayload};

/// Integer key shared by every stored record.
pub type EntityId = u64;

/// Any record with a unique integer identifier.
pub trait Entity: Clone + Send + Sync {
    fn id(&self) -> EntityId;
}

/// Account lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Active,
    Suspended,
    Deleted,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Active => "ACTIVE",
            Status::Suspended => "SUSPENDED",
            Status::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(Status::Pending),
            "ACTIVE" => Some(Status::Active),
            "SUSPENDED" => Some(Status::Suspended),
            "DELETED" => Some(Status::Deleted),
            _ => None,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Deleted is terminal (re-deleting is a no-op) and nothing returns to
    /// Pending once it has left it.
    pub fn can_transition_to(&self, next: Status) -> bool {
        match (self, next) {
            (Status::Deleted, Status::Deleted) => true,
            (Status::Deleted, _) => false,
            (current, Status::Pending) => *current == Status::Pending,
            _ => true,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable postal address attached to a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

impl Address {
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            country: country.into(),
            postal_code: None,
        }
    }

    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = Some(postal_code.into());
        self
    }
}

/// Preference key recorded when an account is suspended.
pub const SUSPENSION_REASON: &str = "suspension_reason";

/// Registered user account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: EntityId,
    pub username: String,
    pub email: String,
    pub status: Status,
    #[serde(skip)]
    password_hash: Option<PasswordHash>,
    pub addresses: Vec<Address>,
    pub preferences: BTreeMap<String, String>,
    pub created_at: SystemTime,
    /// Last time any field or the status changed.
    pub updated_at: Option<SystemTime>,
}

impl User {
    /// Create a new user in `Pending` status with no password set.
    pub fn new(
        id: EntityId,
        username: impl Into<String>,
        email: impl Into<String>,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
            status: Status::Pending,
            password_hash: None,
            addresses: Vec::new(),
            preferences: BTreeMap::new(),
            created_at,
            updated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn is_deleted(&self) -> bool {
        self.status == Status::Deleted
    }

    /// Username with the first letter of every alphabetic run upper-cased.
    pub fn display_name(&self) -> String {
        let mut out = String::with_capacity(self.username.len());
        let mut prev_alpha = false;
        for c in self.username.chars() {
            if c.is_alphabetic() && !prev_alpha {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            prev_alpha = c.is_alphabetic();
        }
        out
    }

    pub fn set_password(&mut self, password: &str) {
        self.password_hash = Some(PasswordHash::new(password));
    }

    /// A user without a password never verifies.
    pub fn verify_password(&self, password: &str) -> bool {
        self.password_hash
            .as_ref()
            .is_some_and(|hash| hash.verify(password))
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn add_address(&mut self, address: Address) {
        self.addresses.push(address);
    }

    pub fn touch(&mut self, now: SystemTime) {
        self.updated_at = Some(now);
    }

    pub fn activate(&mut self, now: SystemTime) -> Result<(), CoreError> {
        self.transition_to(Status::Active, now)
    }

    pub fn suspend(&mut self, reason: &str, now: SystemTime) -> Result<(), CoreError> {
        self.transition_to(Status::Suspended, now)?;
        self.preferences
            .insert(SUSPENSION_REASON.to_string(), reason.to_string());
        Ok(())
    }

    /// Soft delete: the record stays in the store with status `Deleted`.
    pub fn mark_deleted(&mut self, now: SystemTime) -> Result<(), CoreError> {
        self.transition_to(Status::Deleted, now)
    }

    pub fn transition_to(&mut self, next: Status, now: SystemTime) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }
}

impl Entity for User {
    fn id(&self) -> EntityId {
        self.id
    }
}

/// Capability an administrator may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Delete,
    ManageUsers,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
            Permission::ManageUsers => "manage_users",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "read" => Some(Permission::Read),
            "write" => Some(Permission::Write),
            "delete" => Some(Permission::Delete),
            "manage_users" => Some(Permission::ManageUsers),
            _ => None,
        }
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permissions granted to an admin created without an explicit set.
pub const DEFAULT_ADMIN_PERMISSIONS: [Permission; 3] =
    [Permission::Read, Permission::Write, Permission::Delete];

/// Administrator: an always-active user with a permission set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admin {
    pub user: User,
    permissions: Vec<Permission>,
    managed_users: Vec<EntityId>,
}

impl Admin {
    pub fn new(
        id: EntityId,
        username: impl Into<String>,
        email: impl Into<String>,
        created_at: SystemTime,
    ) -> Self {
        let mut user = User::new(id, username, email, created_at);
        user.status = Status::Active;
        Self {
            user,
            permissions: DEFAULT_ADMIN_PERMISSIONS.to_vec(),
            managed_users: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.clear();
        for p in permissions {
            self.grant_permission(p);
        }
        self
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn grant_permission(&mut self, permission: Permission) {
        if !self.has_permission(permission) {
            self.permissions.push(permission);
        }
    }

    pub fn revoke_permission(&mut self, permission: Permission) {
        self.permissions.retain(|p| *p != permission);
    }

    pub fn managed_users(&self) -> &[EntityId] {
        &self.managed_users
    }

    pub fn manage_user(&mut self, user_id: EntityId) {
        if !self.managed_users.contains(&user_id) {
            self.managed_users.push(user_id);
        }
    }

    /// Fail with the missing permission and everything this admin holds.
    pub fn require(&self, permission: Permission) -> Result<(), CoreError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(CoreError::Authorization {
                required: permission,
                granted: self.permissions.clone(),
            })
        }
    }
}

/// Check that an optional acting admin holds `permission`.
pub fn require_admin(admin: Option<&Admin>, permission: Permission) -> Result<(), CoreError> {
    match admin {
        Some(admin) => admin.require(permission),
        None => Err(CoreError::Authorization {
            required: permission,
            granted: Vec::new(),
        }),
    }
}

/// Input for creating a user without a password (async and batch paths).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
        }
    }
}

/// Mutable fields accepted by an update. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub status: Option<Status>,
}

impl UserUpdate {
    /// Build an update from loosely typed key/value pairs; unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut update = Self::default();
        for (key, value) in pairs {
            match key.as_ref() {
                "username" => update.username = Some(value.into()),
                "email" => update.email = Some(value.into()),
                "status" => {
                    let raw: String = value.into();
                    let status = Status::parse(&raw).ok_or_else(|| CoreError::Validation {
                        field: "status",
                        errors: vec![format!("Unknown status '{}'", raw)],
                    })?;
                    update.status = Some(status);
                }
                _ => {}
            }
        }
        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.status.is_none()
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Identity source for newly created entities.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> EntityId;
}

/// Monotonically increasing ids starting at a fixed value.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn starting_at(first: EntityId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> EntityId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Repository port: key-value persistence keyed by the entity's own id.
///
/// Absence is `Ok(None)` / `Ok(false)`; `Err` is reserved for infrastructure
/// failures. `list_all` makes no ordering promise.
pub trait Repository<T: Entity>: Send + Sync {
    fn get(&self, id: EntityId) -> Result<Option<T>, CoreError>;
    /// Insert or replace.
    fn save(&self, entity: T) -> Result<(), CoreError>;
    /// Returns whether something was removed.
    fn delete(&self, id: EntityId) -> Result<bool, CoreError>;
    fn list_all(&self) -> Result<Vec<T>, CoreError>;

    fn exists(&self, id: EntityId) -> Result<bool, CoreError> {
        Ok(self.get(id)?.is_some())
    }
}

impl<T: Entity, R: Repository<T> + ?Sized> Repository<T> for Arc<R> {
    fn get(&self, id: EntityId) -> Result<Option<T>, CoreError> {
        (**self).get(id)
    }

    fn save(&self, entity: T) -> Result<(), CoreError> {
        (**self).save(entity)
    }

    fn delete(&self, id: EntityId) -> Result<bool, CoreError> {
        (**self).delete(id)
    }

    fn list_all(&self) -> Result<Vec<T>, CoreError> {
        (**self).list_all()
    }
}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} - user registry", pkg, ver)
}

pub mod adapters;
pub mod async_service;
pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod password;
pub mod service;
pub mod validate;
