use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::cache::FifoCache;
use crate::config::Config;
use crate::validate::{validate_all, EmailValidator, PasswordValidator, UsernameValidator, Validator};
use crate::{
    require_admin, Admin, AuthFailure, Clock, CoreError, EntityId, IdGenerator, Permission,
    Repository, Status, User, UserUpdate,
};

/// Upper bound on id draws before giving up on finding a free id.
const MAX_ID_ATTEMPTS: usize = 100;

/// Application service for user management.
///
/// Generic over repository, id generator and clock so it stays testable
/// without external dependencies. Reads by id go through a bounded FIFO
/// cache (sized by `Config::cache_size`) that every successful mutation
/// invalidates for the affected id. Admin actions are appended to an
/// `AuditLog`.
///
/// Calls are not serialized internally; share the service across threads
/// only if the caller orders conflicting updates.
pub struct UserService<R: Repository<User>, G: IdGenerator, C: Clock> {
    repo: R,
    ids: G,
    clock: C,
    config: Config,
    read_cache: Mutex<FifoCache<User>>,
    audit: AuditLog,
    usernames: UsernameValidator,
    emails: EmailValidator,
    passwords: PasswordValidator,
}

impl<R: Repository<User>, G: IdGenerator, C: Clock> UserService<R, G, C> {
    pub fn new(repo: R, ids: G, clock: C, config: Config) -> Self {
        let read_cache = Mutex::new(FifoCache::new(config.cache_size));
        Self {
            repo,
            ids,
            clock,
            config,
            read_cache,
            audit: AuditLog::new(),
            usernames: UsernameValidator::default(),
            emails: EmailValidator::default(),
            passwords: PasswordValidator::default(),
        }
    }

    /// Replace the default password strength rules.
    pub fn with_password_policy(mut self, policy: PasswordValidator) -> Self {
        self.passwords = policy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    fn read_cache(&self) -> Result<MutexGuard<'_, FifoCache<User>>, CoreError> {
        self.read_cache
            .lock()
            .map_err(|_| CoreError::Repository("read cache mutex poisoned".into()))
    }

    fn evict(&self, id: EntityId) -> Result<(), CoreError> {
        self.read_cache()?.remove(id);
        Ok(())
    }

    fn reserve_id(&self) -> Result<EntityId, CoreError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.next_id();
            if !self.repo.exists(id)? {
                return Ok(id);
            }
        }
        Err(CoreError::Repository("failed to generate unique user id".into()))
    }

    /// Persist a mutated user and drop its cached copy.
    fn store(&self, user: User) -> Result<User, CoreError> {
        let id = user.id;
        self.repo.save(user.clone())?;
        self.evict(id)?;
        Ok(user)
    }

    /// Fetch a user by id, serving repeat reads from the read cache.
    pub fn get_user(&self, id: EntityId) -> Result<User, CoreError> {
        if let Some(hit) = self.read_cache()?.get(id).cloned() {
            return Ok(hit);
        }
        let user = self
            .repo
            .get(id)?
            .ok_or_else(|| CoreError::user_not_found(id))?;
        self.read_cache()?.insert(id, user.clone());
        Ok(user)
    }

    /// Validate input and create a new `Pending` user.
    ///
    /// Fields are checked in order username, email, password; the first
    /// failing field is reported with all of its reasons.
    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, CoreError> {
        self.usernames.validate(username)?;
        self.emails.validate(email)?;
        self.passwords.validate(password)?;

        let id = self.reserve_id()?;
        let mut user = User::new(id, username, email, self.clock.now());
        user.set_password(password);
        self.repo.save(user.clone())?;
        info!(user_id = id, username, "user created");
        Ok(user)
    }

    /// Every reason registration input would be rejected, across all fields.
    /// Empty when `create_user` would pass validation.
    pub fn registration_problems(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Vec<String> {
        validate_all(&[
            (&self.usernames, username),
            (&self.emails, email),
            (&self.passwords, password),
        ])
    }

    /// Check credentials. Activity is only checked once the password matches,
    /// so a wrong password never reveals whether an account is active.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User, CoreError> {
        let found = self
            .repo
            .list_all()?
            .into_iter()
            .find(|u| u.username == username);

        let user = match found {
            None => return Err(auth_failure(username, AuthFailure::UserNotFound)),
            Some(user) => user,
        };
        if !user.verify_password(password) {
            return Err(auth_failure(username, AuthFailure::InvalidPassword));
        }
        if !user.is_active() {
            return Err(auth_failure(username, AuthFailure::AccountInactive));
        }
        debug!(user_id = user.id, "authenticated");
        Ok(user)
    }

    /// Apply `updates` to a user.
    ///
    /// Status changes need an admin holding `manage_users` and follow the
    /// lifecycle rules; soft deletion only goes through `delete_user`. The
    /// stored record is untouched unless every check passes.
    pub fn update_user(
        &self,
        id: EntityId,
        updates: UserUpdate,
        admin: Option<&Admin>,
    ) -> Result<User, CoreError> {
        let mut user = self.get_user(id)?;

        if updates.status.is_some() {
            require_admin(admin, Permission::ManageUsers)?;
        }

        if let Some(username) = updates.username {
            self.usernames.validate(username.as_str())?;
            user.username = username;
        }
        if let Some(email) = updates.email {
            self.emails.validate(email.as_str())?;
            user.email = email;
        }

        let now = self.clock.now();
        let status_change = updates.status;
        if let Some(status) = status_change {
            if status == Status::Deleted {
                return Err(CoreError::InvalidTransition {
                    from: user.status,
                    to: status,
                });
            }
            user.transition_to(status, now)?;
        }
        user.touch(now);

        let user = self.store(user)?;
        if let (Some(status), Some(admin)) = (status_change, admin) {
            self.audit.record(
                AuditEntry::user(admin.user.id, AuditAction::ChangeStatus, id, now)
                    .with_detail("status", status.as_str()),
            )?;
        }
        info!(user_id = id, "user updated");
        Ok(user)
    }

    /// Soft delete: the record stays in the repository with status `Deleted`.
    pub fn delete_user(&self, id: EntityId, admin: &Admin) -> Result<(), CoreError> {
        admin.require(Permission::Delete)?;

        let now = self.clock.now();
        let mut user = self.get_user(id)?;
        user.mark_deleted(now)?;
        self.store(user)?;
        self.audit
            .record(AuditEntry::user(admin.user.id, AuditAction::Delete, id, now))?;
        info!(user_id = id, admin_id = admin.user.id, "user deleted");
        Ok(())
    }

    pub fn activate_user(&self, id: EntityId) -> Result<User, CoreError> {
        let mut user = self.get_user(id)?;
        user.activate(self.clock.now())?;
        let user = self.store(user)?;
        info!(user_id = id, "user activated");
        Ok(user)
    }

    pub fn suspend_user(
        &self,
        id: EntityId,
        reason: &str,
        admin: &Admin,
    ) -> Result<User, CoreError> {
        admin.require(Permission::ManageUsers)?;

        let now = self.clock.now();
        let mut user = self.get_user(id)?;
        user.suspend(reason, now)?;
        let user = self.store(user)?;
        self.audit.record(
            AuditEntry::user(admin.user.id, AuditAction::Suspend, id, now)
                .with_detail("reason", reason),
        )?;
        info!(user_id = id, admin_id = admin.user.id, reason, "user suspended");
        Ok(user)
    }

    /// Optionally filter by status, then return `limit` users starting at
    /// `offset`, in repository order.
    pub fn list_users(
        &self,
        status: Option<Status>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<User>, CoreError> {
        Ok(self
            .repo
            .list_all()?
            .into_iter()
            .filter(|u| status.map_or(true, |s| u.status == s))
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// Case-insensitive substring match on username or email.
    pub fn search_users(&self, query: &str) -> Result<Vec<User>, CoreError> {
        let q = query.to_lowercase();
        Ok(self
            .repo
            .list_all()?
            .into_iter()
            .filter(|u| u.username.to_lowercase().contains(&q) || u.email.to_lowercase().contains(&q))
            .collect())
    }
}

fn auth_failure(username: &str, reason: AuthFailure) -> CoreError {
    warn!(username, %reason, "authentication failed");
    CoreError::Authentication(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cached_repo::CachedRepository;
    use crate::adapters::memory_repo::InMemoryUserRepo;
    use crate::SequentialIds;
    use std::sync::Arc;
    use std::time::SystemTime;

    struct TestClock;
    impl Clock for TestClock {
        fn now(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH
        }
    }

    type TestService = UserService<InMemoryUserRepo, SequentialIds, TestClock>;

    fn svc() -> TestService {
        UserService::new(
            InMemoryUserRepo::new(),
            SequentialIds::default(),
            TestClock,
            Config::new("test://", "test"),
        )
    }

    fn admin_with(permissions: &[Permission]) -> Admin {
        Admin::new(1000, "admin", "admin@example.com", SystemTime::UNIX_EPOCH)
            .with_permissions(permissions.iter().copied())
    }

    fn validation_field(err: CoreError) -> &'static str {
        match err {
            CoreError::Validation { field, .. } => field,
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn create_user_returns_pending_user() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        assert_eq!(user.username, "testuser");
        assert_eq!(user.email, "test@example.com");
        assert_eq!(user.status, Status::Pending);
        assert!(user.verify_password("Password123"));
        assert_eq!(svc.repository().get(user.id).unwrap(), Some(user));
    }

    #[test]
    fn create_user_rejects_invalid_fields() {
        let svc = svc();
        let err = svc
            .create_user("ab", "test@example.com", "Password123")
            .unwrap_err();
        assert_eq!(validation_field(err), "username");

        let err = svc
            .create_user("testuser", "invalid-email", "Password123")
            .unwrap_err();
        assert_eq!(validation_field(err), "email");

        match svc.create_user("testuser", "test@example.com", "weak").unwrap_err() {
            CoreError::Validation { field, errors } => {
                assert_eq!(field, "password");
                assert!(errors.len() > 1);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(svc.repository().count().unwrap(), 0);
    }

    #[test]
    fn custom_password_policy() {
        let svc = svc().with_password_policy(PasswordValidator {
            require_special: true,
            ..PasswordValidator::default()
        });
        let err = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap_err();
        assert_eq!(validation_field(err), "password");
        assert!(svc
            .create_user("testuser", "test@example.com", "Password123!")
            .is_ok());
    }

    #[test]
    fn get_user_not_found() {
        let err = svc().get_user(999).unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotFound {
                resource: "User",
                id: 999
            }
        ));
    }

    #[test]
    fn authenticate_failures_are_distinct() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();

        let unknown = svc.authenticate("nobody", "Password123").unwrap_err();
        assert_eq!(unknown, CoreError::Authentication(AuthFailure::UserNotFound));

        let wrong = svc.authenticate("testuser", "Wrong1234").unwrap_err();
        assert_eq!(wrong, CoreError::Authentication(AuthFailure::InvalidPassword));

        let inactive = svc.authenticate("testuser", "Password123").unwrap_err();
        assert_eq!(inactive, CoreError::Authentication(AuthFailure::AccountInactive));

        svc.activate_user(user.id).unwrap();
        let authed = svc.authenticate("testuser", "Password123").unwrap();
        assert_eq!(authed.id, user.id);
    }

    #[test]
    fn delete_requires_delete_permission() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        let reader = admin_with(&[Permission::Read]);
        let err = svc.delete_user(user.id, &reader).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Authorization {
                required: Permission::Delete,
                ..
            }
        ));
        assert_eq!(svc.get_user(user.id).unwrap().status, Status::Pending);
    }

    #[test]
    fn delete_is_soft_and_terminal() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        svc.activate_user(user.id).unwrap();
        svc.delete_user(user.id, &admin_with(&[Permission::Delete]))
            .unwrap();

        let stored = svc.repository().get(user.id).unwrap().unwrap();
        assert_eq!(stored.status, Status::Deleted);

        let err = svc.activate_user(user.id).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: Status::Deleted,
                to: Status::Active
            }
        ));
    }

    #[test]
    fn status_update_requires_manage_users() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        let activate = UserUpdate {
            status: Some(Status::Active),
            ..UserUpdate::default()
        };

        let err = svc.update_user(user.id, activate.clone(), None).unwrap_err();
        assert!(matches!(err, CoreError::Authorization { .. }));

        let plain = admin_with(&[Permission::Read, Permission::Delete]);
        let err = svc
            .update_user(user.id, activate.clone(), Some(&plain))
            .unwrap_err();
        match err {
            CoreError::Authorization { required, granted } => {
                assert_eq!(required, Permission::ManageUsers);
                assert_eq!(granted, vec![Permission::Read, Permission::Delete]);
            }
            other => panic!("expected Authorization, got {other:?}"),
        }

        let manager = admin_with(&[Permission::ManageUsers]);
        let updated = svc.update_user(user.id, activate, Some(&manager)).unwrap();
        assert!(updated.is_active());
        assert!(updated.updated_at.is_some());
    }

    #[test]
    fn rejected_update_leaves_store_unchanged() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        let update = UserUpdate::from_pairs([
            ("username", "renamed"),
            ("status", "ACTIVE"),
        ])
        .unwrap();
        svc.update_user(user.id, update, None).unwrap_err();

        let stored = svc.repository().get(user.id).unwrap().unwrap();
        assert_eq!(stored.username, "testuser");
        assert_eq!(stored.status, Status::Pending);

        let bad_email = UserUpdate::from_pairs([("email", "nope")]).unwrap();
        let err = svc.update_user(user.id, bad_email, None).unwrap_err();
        assert_eq!(validation_field(err), "email");
        assert_eq!(svc.get_user(user.id).unwrap().email, "test@example.com");
    }

    #[test]
    fn update_refreshes_read_cache() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        svc.get_user(user.id).unwrap();
        let update = UserUpdate::from_pairs([("email", "new@example.com"), ("unknown", "x")])
            .unwrap();
        svc.update_user(user.id, update, None).unwrap();
        assert_eq!(svc.get_user(user.id).unwrap().email, "new@example.com");
    }

    #[test]
    fn update_cannot_delete() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        let update = UserUpdate {
            status: Some(Status::Deleted),
            ..UserUpdate::default()
        };
        let manager = admin_with(&[Permission::ManageUsers]);
        let err = svc.update_user(user.id, update, Some(&manager)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                to: Status::Deleted,
                ..
            }
        ));
    }

    #[test]
    fn suspend_requires_manage_users_and_records_reason() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        svc.activate_user(user.id).unwrap();
        assert!(svc
            .suspend_user(user.id, "spam", &admin_with(&[Permission::Read]))
            .is_err());

        let suspended = svc
            .suspend_user(user.id, "spam", &admin_with(&[Permission::ManageUsers]))
            .unwrap();
        assert_eq!(suspended.status, Status::Suspended);
        assert_eq!(
            suspended.preferences.get(crate::SUSPENSION_REASON).map(String::as_str),
            Some("spam")
        );
        let err = svc.authenticate("testuser", "Password123").unwrap_err();
        assert_eq!(err, CoreError::Authentication(AuthFailure::AccountInactive));
    }

    #[test]
    fn list_users_pages_in_store_order() {
        let svc = svc();
        for name in ["alice", "bob", "carol"] {
            let u = svc
                .create_user(name, &format!("{}@example.com", name), "Password123")
                .unwrap();
            svc.activate_user(u.id).unwrap();
        }
        svc.create_user("dave", "dave@example.com", "Password123")
            .unwrap();

        let page = svc.list_users(Some(Status::Active), 2, 1).unwrap();
        let names: Vec<_> = page.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol"]);

        assert_eq!(svc.list_users(None, 100, 0).unwrap().len(), 4);
        assert_eq!(svc.list_users(Some(Status::Pending), 100, 0).unwrap().len(), 1);
        assert!(svc.list_users(None, 10, 10).unwrap().is_empty());
    }

    #[test]
    fn search_is_case_insensitive_over_username_and_email() {
        let svc = svc();
        svc.create_user("Alice", "alice@example.com", "Password123")
            .unwrap();
        svc.create_user("bob", "bob@corp.example.org", "Password123")
            .unwrap();

        assert_eq!(svc.search_users("ALI").unwrap().len(), 1);
        let by_email = svc.search_users("EXAMPLE.ORG").unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].username, "bob");
        assert_eq!(svc.search_users("example").unwrap().len(), 2);
        assert!(svc.search_users("zzz").unwrap().is_empty());
    }

    #[test]
    fn works_over_cached_repository() {
        let store = Arc::new(InMemoryUserRepo::new());
        let svc = UserService::new(
            CachedRepository::new(Arc::clone(&store), 2),
            SequentialIds::default(),
            TestClock,
            Config::new("test://", "test"),
        );
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        svc.activate_user(user.id).unwrap();
        svc.delete_user(user.id, &admin_with(&[Permission::Delete]))
            .unwrap();
        assert_eq!(store.get(user.id).unwrap().unwrap().status, Status::Deleted);
        assert_eq!(
            svc.repository().get(user.id).unwrap().unwrap().status,
            Status::Deleted
        );
    }

    #[test]
    fn id_collisions_are_skipped() {
        let store = InMemoryUserRepo::new();
        store
            .save(User::new(1, "existing", "e@example.com", SystemTime::UNIX_EPOCH))
            .unwrap();
        let svc = UserService::new(
            store,
            SequentialIds::default(),
            TestClock,
            Config::new("test://", "test"),
        );
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        assert_eq!(user.id, 2);
    }

    #[test]
    fn registration_problems_cover_every_field() {
        let svc = svc();
        let problems = svc.registration_problems("ab", "nope", "weak");
        assert!(problems.iter().any(|p| p.contains("Username")));
        assert!(problems.iter().any(|p| p.contains("Email") || p.contains("@")));
        assert!(problems.iter().any(|p| p.contains("Password")));
        assert!(svc
            .registration_problems("alice", "alice@example.com", "Password123")
            .is_empty());

        let strict = svc.with_password_policy(PasswordValidator {
            require_special: true,
            ..PasswordValidator::default()
        });
        assert_eq!(
            strict
                .registration_problems("alice", "alice@example.com", "Password123")
                .len(),
            1
        );
    }

    #[test]
    fn admin_actions_are_audited() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        let admin = admin_with(&[Permission::ManageUsers, Permission::Delete]);

        let activate = UserUpdate {
            status: Some(Status::Active),
            ..UserUpdate::default()
        };
        svc.update_user(user.id, activate, Some(&admin)).unwrap();
        svc.suspend_user(user.id, "spam", &admin).unwrap();
        svc.delete_user(user.id, &admin).unwrap();

        let entries = svc.audit_log().for_target(user.id).unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::ChangeStatus, AuditAction::Suspend, AuditAction::Delete]
        );
        assert!(entries.iter().all(|e| e.actor_id == admin.user.id));
        assert_eq!(entries[0].details.get("status").map(String::as_str), Some("ACTIVE"));
        assert_eq!(entries[1].details.get("reason").map(String::as_str), Some("spam"));
    }

    #[test]
    fn refused_and_non_admin_actions_are_not_audited() {
        let svc = svc();
        let user = svc
            .create_user("testuser", "test@example.com", "Password123")
            .unwrap();
        svc.activate_user(user.id).unwrap();
        let email = UserUpdate::from_pairs([("email", "new@example.com")]).unwrap();
        svc.update_user(user.id, email, None).unwrap();
        svc.delete_user(user.id, &admin_with(&[Permission::Read]))
            .unwrap_err();
        assert!(svc.audit_log().is_empty().unwrap());
    }
}
