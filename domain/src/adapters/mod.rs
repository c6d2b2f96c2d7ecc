//! Repository implementations and wrappers.
//!
//! `memory_repo` is the only backing store; the other modules wrap any
//! `Repository` and are composed by construction, e.g.
//! `RetryingRepository::new(CachedRepository::new(InMemoryUserRepo::new(), 1000), policy)`.

pub mod cached_repo;
pub mod instrumented;
pub mod memory_repo;
pub mod retry;
