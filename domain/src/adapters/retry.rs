use std::marker::PhantomData;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::{CoreError, Entity, EntityId, Repository};

/// Exponential backoff: attempt `n` (0-based) waits `base_delay * 2^n`
/// before the next try.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or
    /// the attempts run out. At least one attempt is always made. Blocks the
    /// current thread between attempts.
    pub fn run<O>(
        &self,
        op: &'static str,
        mut call: impl FnMut() -> Result<O, CoreError>,
    ) -> Result<O, CoreError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match call() {
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(op, attempt, ?delay, error = %e, "retrying repository call");
                    thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Repository wrapper retrying infrastructure failures per `RetryPolicy`.
/// Absence (`Ok(None)`) is an answer, not a failure, and is never retried.
///
/// Backoff sleeps the calling thread. Only use it from synchronous callers;
/// inside an async runtime wrap calls in `tokio::task::spawn_blocking` or the
/// wait stalls the worker.
pub struct RetryingRepository<T, R> {
    inner: R,
    policy: RetryPolicy,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, R: Repository<T>> RetryingRepository<T, R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            _entity: PhantomData,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<T: Entity, R: Repository<T>> Repository<T> for RetryingRepository<T, R> {
    fn get(&self, id: EntityId) -> Result<Option<T>, CoreError> {
        self.policy.run("get", || self.inner.get(id))
    }

    fn save(&self, entity: T) -> Result<(), CoreError> {
        self.policy.run("save", || self.inner.save(entity.clone()))
    }

    fn delete(&self, id: EntityId) -> Result<bool, CoreError> {
        self.policy.run("delete", || self.inner.delete(id))
    }

    fn list_all(&self) -> Result<Vec<T>, CoreError> {
        self.policy.run("list_all", || self.inner.list_all())
    }
}
