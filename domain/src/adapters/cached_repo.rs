use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::cache::FifoCache;
use crate::{CoreError, Entity, EntityId, Repository};

/// Cache size used when the caller has no preference.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Repository decorator adding a bounded FIFO read cache in front of `inner`.
///
/// - `get` serves hits from the cache and populates it on a found miss.
/// - `save` and `delete` always write through; `delete` evicts the key and
///   `save` refreshes an already-cached value in place.
/// - `list_all` always goes to `inner`.
pub struct CachedRepository<T, R> {
    inner: R,
    cache: Mutex<FifoCache<T>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, R: Repository<T>> CachedRepository<T, R> {
    pub fn new(inner: R, max_size: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(FifoCache::new(max_size)),
            _entity: PhantomData,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn cache(&self) -> Result<MutexGuard<'_, FifoCache<T>>, CoreError> {
        self.cache
            .lock()
            .map_err(|_| CoreError::Repository("cache mutex poisoned".into()))
    }

    pub fn invalidate(&self, id: EntityId) -> Result<(), CoreError> {
        self.cache()?.remove(id);
        Ok(())
    }

    pub fn clear_cache(&self) -> Result<(), CoreError> {
        self.cache()?.clear();
        Ok(())
    }

    pub fn cached_len(&self) -> Result<usize, CoreError> {
        Ok(self.cache()?.len())
    }

    pub fn is_cached(&self, id: EntityId) -> Result<bool, CoreError> {
        Ok(self.cache()?.contains(id))
    }
}

impl<T: Entity, R: Repository<T>> Repository<T> for CachedRepository<T, R> {
    fn get(&self, id: EntityId) -> Result<Option<T>, CoreError> {
        if let Some(hit) = self.cache()?.get(id).cloned() {
            trace!(id, "cache hit");
            return Ok(Some(hit));
        }
        let found = self.inner.get(id)?;
        if let Some(entity) = &found {
            if let Some(evicted) = self.cache()?.insert(id, entity.clone()) {
                trace!(id, evicted, "cache full, evicted oldest entry");
            }
        }
        Ok(found)
    }

    fn save(&self, entity: T) -> Result<(), CoreError> {
        let id = entity.id();
        self.inner.save(entity.clone())?;
        self.cache()?.refresh(id, entity);
        Ok(())
    }

    fn delete(&self, id: EntityId) -> Result<bool, CoreError> {
        self.cache()?.remove(id);
        self.inner.delete(id)
    }

    fn list_all(&self) -> Result<Vec<T>, CoreError> {
        self.inner.list_all()
    }
}
