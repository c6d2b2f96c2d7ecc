use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::{CoreError, Entity, EntityId, Repository, Status, User};

/// Simple in-memory repository. Entries are kept in key order; the internal
/// mutex only exists so the store can be shared, callers still serialize
/// multi-step operations themselves.
pub struct InMemoryRepo<T> {
    inner: Mutex<BTreeMap<EntityId, T>>,
}

/// In-memory store for users.
pub type InMemoryUserRepo = InMemoryRepo<User>;

impl<T> InMemoryRepo<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn map(&self) -> Result<MutexGuard<'_, BTreeMap<EntityId, T>>, CoreError> {
        self.inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }

    pub fn count(&self) -> Result<usize, CoreError> {
        Ok(self.map()?.len())
    }

    pub fn clear(&self) -> Result<(), CoreError> {
        self.map()?.clear();
        Ok(())
    }
}

impl<T> Default for InMemoryRepo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Repository<T> for InMemoryRepo<T> {
    fn get(&self, id: EntityId) -> Result<Option<T>, CoreError> {
        Ok(self.map()?.get(&id).cloned())
    }

    fn save(&self, entity: T) -> Result<(), CoreError> {
        self.map()?.insert(entity.id(), entity);
        Ok(())
    }

    fn delete(&self, id: EntityId) -> Result<bool, CoreError> {
        Ok(self.map()?.remove(&id).is_some())
    }

    fn list_all(&self) -> Result<Vec<T>, CoreError> {
        Ok(self.map()?.values().cloned().collect())
    }
}

impl InMemoryRepo<User> {
    pub fn find_by_username(&self, username: &str) -> Result<Option<User>, CoreError> {
        Ok(self
            .map()?
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>, CoreError> {
        Ok(self.map()?.values().find(|u| u.email == email).cloned())
    }

    pub fn find_active_users(&self) -> Result<Vec<User>, CoreError> {
        Ok(self
            .map()?
            .values()
            .filter(|u| u.status == Status::Active)
            .cloned()
            .collect())
    }
}
