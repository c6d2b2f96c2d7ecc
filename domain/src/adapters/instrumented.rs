use std::marker::PhantomData;
use std::time::Instant;

use tracing::{debug, warn};

use crate::{CoreError, Entity, EntityId, Repository};

/// Repository wrapper that logs the latency and outcome of every call.
pub struct InstrumentedRepository<T, R> {
    inner: R,
    name: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, R: Repository<T>> InstrumentedRepository<T, R> {
    /// `name` labels every log line (e.g. "users").
    pub fn new(inner: R, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
            _entity: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn timed<O>(
        &self,
        op: &'static str,
        call: impl FnOnce(&R) -> Result<O, CoreError>,
    ) -> Result<O, CoreError> {
        let start = Instant::now();
        let result = call(&self.inner);
        let elapsed_us = elapsed_micros(start);
        match &result {
            Ok(_) => debug!(repository = %self.name, op, elapsed_us, "repository call"),
            Err(e) => warn!(repository = %self.name, op, elapsed_us, error = %e, "repository call failed"),
        }
        result
    }
}

/// Whole microseconds since `start`, saturating at `u64::MAX`.
fn elapsed_micros(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

impl<T: Entity, R: Repository<T>> Repository<T> for InstrumentedRepository<T, R> {
    fn get(&self, id: EntityId) -> Result<Option<T>, CoreError> {
        self.timed("get", |r| r.get(id))
    }

    fn save(&self, entity: T) -> Result<(), CoreError> {
        self.timed("save", |r| r.save(entity))
    }

    fn delete(&self, id: EntityId) -> Result<bool, CoreError> {
        self.timed("delete", |r| r.delete(id))
    }

    fn list_all(&self) -> Result<Vec<T>, CoreError> {
        self.timed("list_all", |r| r.list_all())
    }
}
