//! Asynchronous user service over a lock-guarded in-memory map.
//!
//! The map lock is only held while reading or inserting, never across a
//! caller-supplied future, so processors may call back into the service.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;

use futures::future::try_join_all;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::validate::{EmailValidator, UsernameValidator, Validator};
use crate::{Clock, CoreError, EntityId, IdGenerator, NewUser, SequentialIds, SystemClock, User};

const MAX_ID_ATTEMPTS: usize = 100;

pub struct AsyncUserService<G: IdGenerator = SequentialIds, C: Clock = SystemClock> {
    config: Config,
    ids: G,
    clock: C,
    users: Mutex<BTreeMap<EntityId, User>>,
    usernames: UsernameValidator,
    emails: EmailValidator,
}

impl AsyncUserService {
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, SequentialIds::default(), SystemClock)
    }
}

impl<G: IdGenerator, C: Clock> AsyncUserService<G, C> {
    pub fn with_parts(config: Config, ids: G, clock: C) -> Self {
        Self {
            config,
            ids,
            clock,
            users: Mutex::new(BTreeMap::new()),
            usernames: UsernameValidator::default(),
            emails: EmailValidator::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn count(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn get_user(&self, id: EntityId) -> Result<User, CoreError> {
        self.users
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::user_not_found(id))
    }

    fn check(&self, username: &str, email: &str) -> Result<(), CoreError> {
        self.usernames.validate(username)?;
        self.emails.validate(email)
    }

    /// Create a `Pending` user without a password.
    pub async fn create_user(&self, username: &str, email: &str) -> Result<User, CoreError> {
        self.check(username, email)?;

        let mut users = self.users.lock().await;
        let id = (0..MAX_ID_ATTEMPTS)
            .map(|_| self.ids.next_id())
            .find(|id| !users.contains_key(id))
            .ok_or_else(|| CoreError::Repository("failed to generate unique user id".into()))?;
        let user = User::new(id, username, email, self.clock.now());
        users.insert(id, user.clone());
        drop(users);

        debug!(user_id = id, username, "user created");
        Ok(user)
    }

    /// Create all `inputs` concurrently; results keep input order.
    ///
    /// Every input is validated before anything is inserted, so an invalid
    /// entry fails the whole batch without creating the others.
    pub async fn batch_create_users(&self, inputs: Vec<NewUser>) -> Result<Vec<User>, CoreError> {
        for input in &inputs {
            self.check(&input.username, &input.email)?;
        }
        let created =
            try_join_all(inputs.iter().map(|n| self.create_user(&n.username, &n.email))).await?;
        info!(count = created.len(), "batch created users");
        Ok(created)
    }

    /// Stream a snapshot of all users in id order. Users created after the
    /// call are not included.
    pub async fn stream_users(&self) -> impl Stream<Item = User> + Unpin + Send {
        let snapshot: Vec<User> = self.users.lock().await.values().cloned().collect();
        stream::iter(snapshot)
    }

    /// Run `processor` on each user in turn. A missing user or a failing
    /// processor only fails that item; the rest of the batch still runs.
    pub async fn process_user_batch<F, Fut, O, E>(
        &self,
        ids: &[EntityId],
        processor: F,
    ) -> Vec<Result<O, CoreError>>
    where
        F: Fn(User) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: Display,
    {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let outcome = match self.get_user(id).await {
                Ok(user) => processor(user)
                    .await
                    .map_err(|e| CoreError::Processing(e.to_string())),
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                warn!(user_id = id, error = %e, "batch item failed");
            }
            results.push(outcome);
        }
        results
    }
}

/// Recreate every user of `source` in `target`, one at a time. Stops at the
/// first failure; users already copied stay in `target`.
pub async fn run_user_migration<G1, C1, G2, C2>(
    source: &AsyncUserService<G1, C1>,
    target: &AsyncUserService<G2, C2>,
) -> Result<usize, CoreError>
where
    G1: IdGenerator,
    C1: Clock,
    G2: IdGenerator,
    C2: Clock,
{
    let mut users = source.stream_users().await;
    let mut count = 0;
    while let Some(user) = users.next().await {
        target.create_user(&user.username, &user.email).await?;
        count += 1;
    }
    info!(count, "user migration finished");
    Ok(count)
}
